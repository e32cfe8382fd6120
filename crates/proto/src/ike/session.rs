//! The IKE session driver
//!
//! [`IkeSession`] owns the UDP socket, the SA context and the Child SAs,
//! and drives the exchanges as a single logical actor: one state-machine
//! step at a time, requests leaving in strictly increasing message-ID
//! order, retransmission with exponential backoff, and best-effort Delete
//! on close. Independent sessions share nothing.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use rand::RngCore;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use zeroize::Zeroize;

use super::child_sa::{derive_child_sa_keys, ChildSa, ChildSaState};
use super::config::SessionConfig;
use super::constants::ExchangeType;
use super::crypto::{CipherAlgorithm, DhGroup, DhKeyPair, IntegAlgorithm};
use super::dpd::DpdState;
use super::exchange::{
    AuthOutcome, CreateChildSaExchange, IkeAuthExchange, IkeSaContext, IkeSaInitExchange,
    InformationalExchange, InitOutcome, NONCE_LEN,
};
use super::logging;
use super::message::IkeMessage;
use super::payload::{cfg_attr, ConfigPayload, DeletePayload, IdPayload, NotifyType, Payload};
use super::proposal::{ProtocolId, SaPayload, TransformType};
use super::state::{IkeState, PeerRequestDisposition};
use super::ts::TsPayload;
use crate::eap::{EapResult, EapSession};
use crate::ike::{Error, Result};

/// Events surfaced by [`IkeSession::recv_and_handle`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Nothing arrived within the wait window
    Idle,
    /// A peer request was answered (duplicate replay included)
    PeerRequestHandled,
    /// The peer deleted one of our Child SAs
    ChildSaDeleted([u8; 4]),
    /// The peer deleted the IKE SA; the session is now closed
    IkeSaDeleted,
}

/// A client-side IKEv2 session.
///
/// All methods take `&mut self`: a session is a single actor and is never
/// shared across tasks.
pub struct IkeSession {
    config: SessionConfig,
    context: IkeSaContext,
    socket: Option<UdpSocket>,
    peer_addr: Option<SocketAddr>,
    recv_buffer: Vec<u8>,

    child_sas: HashMap<u32, ChildSa>,
    child_offer: Option<SaPayload>,
    dpd_state: DpdState,
    rekey_in_flight: bool,

    /// Last response sent to a peer request, replayed on duplicates
    response_cache: Option<(u32, Vec<u8>)>,

    /// Internal address assigned by the gateway, if one was requested
    internal_address: Option<std::net::Ipv4Addr>,

    /// MSK exported by EAP, kept for the lifetime of the SA
    eap_msk: Option<Vec<u8>>,
}

impl IkeSession {
    /// Create a session from a validated configuration
    pub fn new(config: SessionConfig) -> Self {
        IkeSession {
            config,
            context: IkeSaContext::new_initiator(),
            socket: None,
            peer_addr: None,
            recv_buffer: vec![0u8; 65536],
            child_sas: HashMap::new(),
            child_offer: None,
            dpd_state: DpdState::new(),
            rekey_in_flight: false,
            response_cache: None,
            internal_address: None,
            eap_msk: None,
        }
    }

    /// Current IKE SA state
    pub fn state(&self) -> IkeState {
        self.context.state
    }

    /// Established Child SAs, keyed by inbound SPI
    pub fn child_sas(&self) -> &HashMap<u32, ChildSa> {
        &self.child_sas
    }

    /// Internal IPv4 address assigned by the gateway, if requested
    pub fn internal_address(&self) -> Option<std::net::Ipv4Addr> {
        self.internal_address
    }

    /// Connect to the gateway: bind, IKE_SA_INIT, IKE_AUTH (with EAP when
    /// configured) and install the first Child SA.
    pub async fn connect(&mut self, peer_addr: SocketAddr) -> Result<()> {
        if self.context.state != IkeState::Initial {
            return Err(Error::InvalidState(
                "Session already connected; create a new session".to_string(),
            ));
        }

        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(peer_addr).await?;
        self.socket = Some(socket);
        self.peer_addr = Some(peer_addr);

        match self.handshake().await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fail_sa(e).await),
        }
    }

    async fn handshake(&mut self) -> Result<()> {
        let dh_group = self.preferred_dh_group()?;
        self.ike_sa_init(dh_group, true).await?;
        self.context.transition_to(IkeState::IkeAuthSent)?;
        self.ike_auth().await?;
        self.context.transition_to(IkeState::Established)?;
        self.dpd_state.mark_activity();
        Ok(())
    }

    /// The DH group of our most-preferred IKE proposal
    fn preferred_dh_group(&self) -> Result<DhGroup> {
        let transform = self
            .config
            .ike_proposals
            .first()
            .and_then(|p| p.get_transform(TransformType::Dh))
            .ok_or_else(|| {
                Error::InvalidSyntax("IKE proposals carry no DH transform".to_string())
            })?;
        DhGroup::from_transform_id(transform.transform_id)
    }

    async fn ike_sa_init(&mut self, dh_group: DhGroup, allow_retry: bool) -> Result<()> {
        let offers = SaPayload::new(self.config.ike_proposals.clone())?;
        let request =
            IkeSaInitExchange::create_request(&mut self.context, offers, dh_group)?;
        let request_bytes = request.encode();
        self.context.init_request_bytes = Some(request_bytes.clone());
        self.context.transition_to(IkeState::IkeInitSent)?;

        let (raw, message) = self
            .request_response(request_bytes, ExchangeType::IkeSaInit)
            .await?;

        match IkeSaInitExchange::process_response(&mut self.context, &raw, &message)? {
            InitOutcome::Done => Ok(()),
            InitOutcome::RetryWithGroup(group_id) => {
                if !allow_retry {
                    return Err(Error::InvalidKeyExchange(
                        "Responder rejected the retried DH group".to_string(),
                    ));
                }
                let group = DhGroup::from_transform_id(group_id)?;
                logging::log_datagram_dropped("INVALID_KE_PAYLOAD; retrying with suggested group");

                // One retry with a fresh SA context, per the notify.
                self.context = IkeSaContext::new_initiator();
                Box::pin(self.ike_sa_init(group, false)).await
            }
        }
    }

    async fn ike_auth(&mut self) -> Result<()> {
        let child_offer = self.fresh_child_offer();
        let ts_i = TsPayload::new(self.config.local_ts.clone())?;
        let ts_r = TsPayload::new(self.config.remote_ts.clone())?;
        let config_request = self
            .config
            .request_internal_address
            .then(|| ConfigPayload::request(&[cfg_attr::INTERNAL_IP4_ADDRESS]));

        let id_i = IdPayload::new(self.config.local_id.clone());
        let psk = self.config.psk.clone();

        let request = IkeAuthExchange::create_request(
            &mut self.context,
            id_i,
            psk.as_deref(),
            child_offer.clone(),
            ts_i,
            ts_r,
            self.config.transport_mode,
            config_request,
        )?;
        self.child_offer = Some(child_offer.clone());

        let (mut raw, mut message) = self
            .request_response(request, ExchangeType::IkeAuth)
            .await?;

        // Without a PSK the responder starts EAP.
        let mut auth_secret = psk.unwrap_or_default();

        if self.config.eap.is_some() {
            self.context.transition_to(IkeState::EapInProgress)?;
            let eap_config = self.config.eap.clone().expect("checked above");
            let mut eap = EapSession::new(&eap_config);

            loop {
                let outcome = IkeAuthExchange::process_response(
                    &mut self.context,
                    &raw,
                    &message,
                    &auth_secret,
                    &child_offer,
                )?;

                let eap_request = match outcome {
                    AuthOutcome::EapRequest(request) => request,
                    AuthOutcome::Complete(_) => {
                        return Err(Error::AuthenticationFailed(
                            "Responder skipped the EAP rounds".to_string(),
                        ))
                    }
                };

                match eap.process(&eap_request)? {
                    EapResult::Response(reply) => {
                        let request =
                            IkeAuthExchange::create_eap_reply(&mut self.context, reply)?;
                        let (next_raw, next_message) = self
                            .request_response(request, ExchangeType::IkeAuth)
                            .await?;
                        raw = next_raw;
                        message = next_message;
                    }
                    EapResult::Success { msk, mut emsk } => {
                        emsk.zeroize();
                        auth_secret = msk.clone();
                        self.eap_msk = Some(msk);
                        self.context.transition_to(IkeState::IkeAuthSent)?;

                        let request = IkeAuthExchange::create_final_auth(
                            &mut self.context,
                            &auth_secret,
                        )?;
                        let (next_raw, next_message) = self
                            .request_response(request, ExchangeType::IkeAuth)
                            .await?;
                        raw = next_raw;
                        message = next_message;
                        break;
                    }
                    EapResult::Failure => {
                        return Err(Error::AuthenticationFailed(
                            "EAP authentication failed".to_string(),
                        ))
                    }
                }
            }
        }

        let outcome = IkeAuthExchange::process_response(
            &mut self.context,
            &raw,
            &message,
            &auth_secret,
            &child_offer,
        )?;
        auth_secret.zeroize();

        let complete = match outcome {
            AuthOutcome::Complete(complete) => complete,
            AuthOutcome::EapRequest(_) => {
                return Err(Error::AuthenticationFailed(
                    "Responder restarted EAP after completion".to_string(),
                ))
            }
        };

        if let Some(expected) = &self.config.remote_id {
            if complete.id_r.id != *expected {
                return Err(Error::AuthenticationFailed(format!(
                    "Responder identity {:?} does not match the configured one",
                    complete.id_r.id
                )));
            }
        }

        if let Some(config) = &complete.config {
            if let Some(value) = config.get(cfg_attr::INTERNAL_IP4_ADDRESS) {
                if value.len() == 4 {
                    let octets: [u8; 4] = value.try_into().expect("length checked");
                    self.internal_address = Some(octets.into());
                }
            }
        }

        self.install_child_sa(
            &child_offer,
            complete.child_proposal.clone(),
            complete.ts_i.selectors.clone(),
            complete.ts_r.selectors.clone(),
        )?;

        Ok(())
    }

    /// Build a Child SA offer with a fresh inbound SPI on every proposal.
    fn fresh_child_offer(&self) -> SaPayload {
        let spi = random_child_spi();
        let proposals = self
            .config
            .child_proposals
            .iter()
            .cloned()
            .map(|p| p.with_spi(spi.to_vec()))
            .collect();
        SaPayload { proposals }
    }

    /// Install the Child SA negotiated by IKE_AUTH; its keys derive from
    /// the IKE_SA_INIT nonces (RFC 7296 Section 2.17).
    fn install_child_sa(
        &mut self,
        offer: &SaPayload,
        selected: super::proposal::Proposal,
        local_ts: Vec<super::ts::TrafficSelector>,
        remote_ts: Vec<super::ts::TrafficSelector>,
    ) -> Result<()> {
        let inbound_spi: [u8; 4] = offer
            .proposals
            .first()
            .map(|p| p.spi.clone())
            .unwrap_or_default()
            .try_into()
            .map_err(|_| Error::Internal("Child offer without a 4-byte SPI".to_string()))?;
        let outbound_spi: [u8; 4] = selected
            .spi
            .clone()
            .try_into()
            .map_err(|_| Error::NoProposalChosen)?;

        let (encr_len, integ_len) = child_key_lengths(&selected)?;

        let crypto = self.context.crypto()?;
        let nonce_i = self
            .context
            .nonce_i
            .clone()
            .ok_or_else(|| Error::Internal("Missing initiator nonce".to_string()))?;
        let nonce_r = self
            .context
            .nonce_r
            .clone()
            .ok_or_else(|| Error::Internal("Missing responder nonce".to_string()))?;

        let keys = derive_child_sa_keys(
            crypto.prf(),
            crypto.sk_d(),
            None,
            &nonce_i,
            &nonce_r,
            encr_len,
            integ_len,
        )?;

        let child = ChildSa::new(
            inbound_spi,
            outbound_spi,
            selected,
            local_ts,
            remote_ts,
            self.config.transport_mode,
            keys,
            self.config.lifetime,
        );

        logging::log_child_sa_created(
            u32::from_be_bytes(inbound_spi),
            u32::from_be_bytes(outbound_spi),
            self.config.transport_mode,
        );
        self.child_sas.insert(u32::from_be_bytes(inbound_spi), child);
        Ok(())
    }

    /// Rekey one Child SA by inbound SPI.
    pub async fn rekey_child_sa(&mut self, inbound_spi: [u8; 4]) -> Result<()> {
        if !self.context.state.is_established() {
            return Err(Error::InvalidState(
                "IKE SA must be established to rekey".to_string(),
            ));
        }
        if self.rekey_in_flight {
            return Err(Error::InvalidState(
                "A rekey is already in flight".to_string(),
            ));
        }

        let key = u32::from_be_bytes(inbound_spi);
        self.child_sas
            .get_mut(&key)
            .ok_or_else(|| {
                Error::InvalidState(format!("No Child SA with SPI 0x{:08x}", key))
            })?
            .initiate_rekey()?;

        self.rekey_in_flight = true;
        logging::log_rekey_start("child-sa");

        let result = self.rekey_child_inner(inbound_spi).await;
        self.rekey_in_flight = false;

        match result {
            Ok(()) => {
                logging::log_rekey_complete("child-sa");
                Ok(())
            }
            Err(e @ Error::IntegrityFailure)
            | Err(e @ Error::DecryptionFailure)
            | Err(e @ Error::Timeout) => Err(self.fail_sa(e).await),
            Err(e) => {
                if let Some(old) = self.child_sas.get_mut(&key) {
                    let _ = old.abort_rekey();
                }
                Err(e)
            }
        }
    }

    async fn rekey_child_inner(&mut self, old_spi: [u8; 4]) -> Result<()> {
        let offer = self.fresh_child_offer();
        let mut nonce = vec![0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let old_key = u32::from_be_bytes(old_spi);
        let (local_ts, remote_ts) = {
            let old = self
                .child_sas
                .get(&old_key)
                .ok_or_else(|| Error::Internal("Rekeyed Child SA vanished".to_string()))?;
            (old.local_ts.clone(), old.remote_ts.clone())
        };

        let request = CreateChildSaExchange::create_child_request(
            &mut self.context,
            offer.clone(),
            nonce.clone(),
            TsPayload::new(local_ts.clone())?,
            TsPayload::new(remote_ts.clone())?,
            self.config.transport_mode,
            Some(old_spi),
        )?;

        let (raw, message) = self
            .request_response(request, ExchangeType::CreateChildSa)
            .await?;
        let complete = CreateChildSaExchange::process_child_response(
            &mut self.context,
            &raw,
            &message,
            &offer,
        )?;

        // Install the replacement keyed from the fresh nonces.
        let crypto = self.context.crypto()?;
        let (encr_len, integ_len) = child_key_lengths(&complete.proposal)?;
        let keys = derive_child_sa_keys(
            crypto.prf(),
            crypto.sk_d(),
            None,
            &nonce,
            &complete.nonce_r,
            encr_len,
            integ_len,
        )?;

        let inbound_spi: [u8; 4] = offer.proposals[0]
            .spi
            .clone()
            .try_into()
            .map_err(|_| Error::Internal("Child offer without a 4-byte SPI".to_string()))?;
        let outbound_spi: [u8; 4] = complete
            .proposal
            .spi
            .clone()
            .try_into()
            .map_err(|_| Error::NoProposalChosen)?;

        let child = ChildSa::new(
            inbound_spi,
            outbound_spi,
            complete.proposal,
            complete.ts_i.selectors,
            complete.ts_r.selectors,
            self.config.transport_mode,
            keys,
            self.config.lifetime,
        );
        self.child_sas.insert(u32::from_be_bytes(inbound_spi), child);

        // Retire the old SA: Delete exchange, then drop its keys.
        if let Some(old) = self.child_sas.get_mut(&old_key) {
            let _ = old.mark_rekeyed();
        }
        let request =
            InformationalExchange::create_delete_child_sa_request(&mut self.context, vec![old_spi])?;
        let _ = self
            .request_response(request, ExchangeType::Informational)
            .await?;

        if let Some(mut old) = self.child_sas.remove(&old_key) {
            old.mark_deleted();
            logging::log_child_sa_deleted(old_key, "rekeyed");
        }
        Ok(())
    }

    /// Rekey the IKE SA itself (RFC 7296 Section 2.18).
    pub async fn rekey_ike_sa(&mut self) -> Result<()> {
        if self.context.state != IkeState::Established {
            return Err(Error::InvalidState(
                "IKE SA must be established to rekey".to_string(),
            ));
        }
        if self.rekey_in_flight {
            return Err(Error::InvalidState(
                "A rekey is already in flight".to_string(),
            ));
        }

        self.rekey_in_flight = true;
        self.context.transition_to(IkeState::Rekeying)?;
        logging::log_rekey_start("ike-sa");

        let result = self.rekey_ike_inner().await;
        self.rekey_in_flight = false;

        match result {
            Ok(()) => {
                self.context.transition_to(IkeState::Established)?;
                logging::log_rekey_complete("ike-sa");
                Ok(())
            }
            Err(e) => Err(self.fail_sa(e).await),
        }
    }

    async fn rekey_ike_inner(&mut self) -> Result<()> {
        let mut new_spi = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut new_spi);

        let group = self.current_dh_group()?;
        let dh = DhKeyPair::generate(group);

        let proposals: Vec<_> = self
            .config
            .ike_proposals
            .iter()
            .cloned()
            .map(|p| p.with_spi(new_spi.to_vec()))
            .collect();
        let offer = SaPayload::new(proposals)?;

        let mut nonce = vec![0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let request = CreateChildSaExchange::create_rekey_ike_request(
            &mut self.context,
            offer.clone(),
            nonce.clone(),
            &dh,
        )?;

        let (raw, message) = self
            .request_response(request, ExchangeType::CreateChildSa)
            .await?;
        let (proposal, nonce_r, ke) = CreateChildSaExchange::process_rekey_ike_response(
            &mut self.context,
            &raw,
            &message,
            &offer,
        )?;

        let responder_spi: [u8; 8] = proposal
            .spi
            .clone()
            .try_into()
            .map_err(|_| Error::NoProposalChosen)?;

        let mut shared_secret = dh.compute_shared(&ke.key_data)?;
        let new_crypto = self.context.crypto()?.rekey(
            &proposal,
            &nonce,
            &nonce_r,
            &shared_secret,
            &new_spi,
            &responder_spi,
        )?;
        shared_secret.zeroize();

        // Delete the old IKE SA before switching over.
        let request = InformationalExchange::create_delete_ike_sa_request(&mut self.context)?;
        let _ = self
            .request_response(request, ExchangeType::Informational)
            .await?;

        // Switch the context to the new SA: fresh SPIs, keys and window.
        self.context.initiator_spi = new_spi;
        self.context.responder_spi = responder_spi;
        self.context.crypto = Some(new_crypto);
        self.context.selected_proposal = Some(proposal);
        self.context.nonce_i = Some(nonce);
        self.context.nonce_r = Some(nonce_r);
        self.context.window = Default::default();
        self.response_cache = None;

        Ok(())
    }

    fn current_dh_group(&self) -> Result<DhGroup> {
        let transform = self
            .context
            .selected_proposal
            .as_ref()
            .and_then(|p| p.get_transform(TransformType::Dh))
            .ok_or_else(|| {
                Error::Internal("Established SA without a DH transform".to_string())
            })?;
        DhGroup::from_transform_id(transform.transform_id)
    }

    /// Send a dead peer detection probe and wait for the reply.
    pub async fn send_dpd(&mut self) -> Result<()> {
        if !self.context.state.is_established() {
            return Err(Error::InvalidState(
                "IKE SA must be established for DPD".to_string(),
            ));
        }

        let request = InformationalExchange::create_dpd_request(&mut self.context)?;
        let message_id = self
            .context
            .window
            .outstanding_request_id()
            .unwrap_or_default();
        logging::log_dpd_probe(message_id);
        self.dpd_state.mark_probe_sent();

        match self
            .request_response(request, ExchangeType::Informational)
            .await
        {
            Ok(_) => {
                self.dpd_state.mark_probe_answered();
                Ok(())
            }
            Err(Error::Timeout) => {
                if self.dpd_state.handle_probe_timeout(&self.config.dpd) {
                    return Err(self.fail_sa(Error::Timeout).await);
                }
                Err(Error::Timeout)
            }
            Err(e) => Err(self.fail_sa(e).await),
        }
    }

    /// Run one round of background maintenance: DPD when idle, rekey when
    /// a Child SA crosses its soft lifetime.
    pub async fn maintain(&mut self) -> Result<()> {
        if !self.context.state.is_established() {
            return Ok(());
        }

        let due: Vec<[u8; 4]> = self
            .child_sas
            .values()
            .filter(|sa| sa.should_rekey())
            .map(|sa| sa.inbound_spi)
            .collect();
        for spi in due {
            if !self.rekey_in_flight {
                self.rekey_child_sa(spi).await?;
            }
        }

        if self.dpd_state.should_probe(&self.config.dpd) {
            self.send_dpd().await?;
        }

        Ok(())
    }

    /// Wait up to `wait` for an inbound datagram and handle it: peer
    /// INFORMATIONAL requests are answered, duplicates replayed, foreign
    /// or malformed datagrams dropped.
    pub async fn recv_and_handle(&mut self, wait: Duration) -> Result<SessionEvent> {
        if !self.context.state.is_established() {
            return Err(Error::InvalidState(
                "IKE SA must be established to poll".to_string(),
            ));
        }

        let raw = {
            let socket = self
                .socket
                .as_ref()
                .ok_or_else(|| Error::Transport("Socket not bound".to_string()))?;
            match timeout(wait, socket.recv(&mut self.recv_buffer)).await {
                Err(_) => return Ok(SessionEvent::Idle),
                Ok(n) => self.recv_buffer[..n?].to_vec(),
            }
        };

        let message = match IkeMessage::decode(&raw) {
            Ok(message) => message,
            Err(e) => {
                logging::log_datagram_dropped(&e.to_string());
                return Ok(SessionEvent::Idle);
            }
        };

        if message.header.initiator_spi != self.context.initiator_spi {
            logging::log_datagram_dropped("foreign SPI");
            return Ok(SessionEvent::Idle);
        }
        if message.header.flags.is_response() {
            logging::log_datagram_dropped("unsolicited response");
            return Ok(SessionEvent::Idle);
        }

        self.handle_peer_request(&raw, &message).await
    }

    async fn handle_peer_request(
        &mut self,
        raw: &[u8],
        message: &IkeMessage,
    ) -> Result<SessionEvent> {
        let message_id = message.header.message_id;

        match self.context.window.classify_peer_request(message_id) {
            PeerRequestDisposition::Drop => {
                logging::log_datagram_dropped("peer request outside the ID window");
                Ok(SessionEvent::Idle)
            }
            PeerRequestDisposition::ReplayCached => {
                if let Some((cached_id, bytes)) = &self.response_cache {
                    if *cached_id == message_id {
                        let bytes = bytes.clone();
                        self.send_raw(&bytes).await?;
                        return Ok(SessionEvent::PeerRequestHandled);
                    }
                }
                Ok(SessionEvent::Idle)
            }
            PeerRequestDisposition::Process => {
                if message.header.exchange_type != ExchangeType::Informational {
                    logging::log_datagram_dropped("unsupported peer-initiated exchange");
                    return Ok(SessionEvent::Idle);
                }

                let request = match InformationalExchange::process_request(
                    &self.context,
                    raw,
                    message,
                ) {
                    Ok(request) => request,
                    Err(e @ Error::IntegrityFailure) | Err(e @ Error::DecryptionFailure) => {
                        return Err(self.fail_sa(e).await);
                    }
                    Err(e) => {
                        // A syntax error inside the protected exchange is
                        // reported to the peer; the reply is not awaited.
                        logging::log_datagram_dropped(&e.to_string());
                        if matches!(e, Error::InvalidSyntax(_) | Error::MalformedMessage(_)) {
                            if let Ok(notify) = InformationalExchange::create_notify_request(
                                &mut self.context,
                                NotifyType::InvalidSyntax,
                                Vec::new(),
                            ) {
                                let _ = self.send_raw(&notify).await;
                            }
                        }
                        return Ok(SessionEvent::Idle);
                    }
                };

                self.dpd_state.mark_activity();

                let mut event = SessionEvent::PeerRequestHandled;
                let mut response_payloads: Vec<Payload> = Vec::new();

                for delete in &request.deletes {
                    match delete.protocol_id {
                        ProtocolId::Ike => {
                            event = SessionEvent::IkeSaDeleted;
                        }
                        ProtocolId::Esp | ProtocolId::Ah => {
                            let mut ours = Vec::new();
                            for spi in &delete.spis {
                                if let Ok(outbound) =
                                    <[u8; 4]>::try_from(spi.as_slice())
                                {
                                    if let Some(child) = self
                                        .child_sas
                                        .values_mut()
                                        .find(|c| c.outbound_spi == outbound)
                                    {
                                        child.mark_deleted();
                                        ours.push(child.inbound_spi);
                                        event =
                                            SessionEvent::ChildSaDeleted(child.inbound_spi);
                                    }
                                }
                            }
                            self.child_sas
                                .retain(|_, c| c.state() != ChildSaState::Deleted);
                            if !ours.is_empty() {
                                response_payloads.push(Payload::Delete(
                                    DeletePayload::delete_child_sas(ours),
                                ));
                            }
                        }
                    }
                }

                let response = InformationalExchange::create_response(
                    &self.context,
                    message_id,
                    &response_payloads,
                )?;
                self.context.window.record_peer_request(message_id);
                self.response_cache = Some((message_id, response.clone()));
                self.send_raw(&response).await?;

                if event == SessionEvent::IkeSaDeleted {
                    self.release_resources();
                    self.context.transition_to(IkeState::Closed)?;
                }
                Ok(event)
            }
        }
    }

    /// Close the session: best-effort Delete within the configured grace
    /// period, then release all key material.
    pub async fn close(&mut self) -> Result<()> {
        if self.context.state == IkeState::Closed {
            return Ok(());
        }

        self.context.transition_to(IkeState::Deleting)?;

        // Best-effort Delete: one attempt, short grace, no retransmission.
        if self.context.crypto.is_some() && self.socket.is_some() {
            if let Ok(request) =
                InformationalExchange::create_delete_ike_sa_request(&mut self.context)
            {
                let grace = self.config.close_grace;
                let _ = self.send_raw(&request).await;
                let socket = self.socket.as_ref().expect("checked above");
                let _ = timeout(grace, socket.recv(&mut self.recv_buffer)).await;
            }
        }

        self.release_resources();
        self.context.transition_to(IkeState::Closed)?;
        Ok(())
    }

    /// Drop all key material and cancelable state.
    fn release_resources(&mut self) {
        // KeyMaterial and ChildSaKeys zeroize on drop.
        self.context.crypto = None;
        self.child_sas.clear();
        if let Some(msk) = self.eap_msk.as_mut() {
            msk.zeroize();
        }
        self.eap_msk = None;
        self.response_cache = None;
        self.child_offer = None;
    }

    /// Escalate a fatal error: notify the peer when possible, close the
    /// SA, release resources.
    async fn fail_sa(&mut self, error: Error) -> Error {
        logging::log_fatal_error("ike-session", &error.to_string());

        let notify_worthy = matches!(
            error,
            Error::IntegrityFailure | Error::DecryptionFailure | Error::AuthenticationFailed(_)
        );
        if notify_worthy && self.context.crypto.is_some() && self.socket.is_some() {
            if let Ok(request) =
                InformationalExchange::create_delete_ike_sa_request(&mut self.context)
            {
                let _ = self.send_raw(&request).await;
            }
        }

        self.release_resources();
        let _ = self.context.transition_to(IkeState::Closed);
        error
    }

    async fn send_raw(&self, bytes: &[u8]) -> Result<()> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| Error::Transport("Socket not bound".to_string()))?;
        socket.send(bytes).await?;
        Ok(())
    }

    /// Send a request and wait for its matching response, retransmitting
    /// on the configured backoff schedule.
    async fn request_response(
        &mut self,
        request: Vec<u8>,
        exchange: ExchangeType,
    ) -> Result<(Vec<u8>, IkeMessage)> {
        let message_id = self
            .context
            .window
            .outstanding_request_id()
            .ok_or_else(|| Error::Internal("No request outstanding".to_string()))?;

        for attempt in 0..self.config.retransmit.max_attempts {
            if attempt > 0 {
                logging::log_retransmit(
                    message_id,
                    attempt,
                    self.config
                        .retransmit
                        .delay_for_attempt(attempt - 1)
                        .as_millis() as u64,
                );
            }
            self.send_raw(&request).await?;
            logging::log_exchange_sent(exchange_name(exchange), message_id, request.len());

            let wait = self.config.retransmit.delay_for_attempt(attempt);
            match timeout(wait, self.recv_matching_response(message_id)).await {
                Ok(Ok(found)) => {
                    logging::log_exchange_completed(exchange_name(exchange), message_id);
                    self.dpd_state.mark_activity();
                    return Ok(found);
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => continue,
            }
        }

        Err(Error::Timeout)
    }

    /// Receive until a response matching `message_id` arrives; everything
    /// else is dropped (the peer retransmits its own requests).
    async fn recv_matching_response(
        &mut self,
        message_id: u32,
    ) -> Result<(Vec<u8>, IkeMessage)> {
        loop {
            let n = {
                let socket = self
                    .socket
                    .as_ref()
                    .ok_or_else(|| Error::Transport("Socket not bound".to_string()))?;
                socket.recv(&mut self.recv_buffer).await?
            };
            let raw = self.recv_buffer[..n].to_vec();

            let message = match IkeMessage::decode(&raw) {
                Ok(message) => message,
                Err(e) => {
                    logging::log_datagram_dropped(&e.to_string());
                    continue;
                }
            };

            if message.header.initiator_spi != self.context.initiator_spi {
                logging::log_datagram_dropped("foreign SPI");
                continue;
            }
            if !message.header.flags.is_response() {
                logging::log_datagram_dropped("peer request during an exchange");
                continue;
            }
            if message.header.message_id != message_id {
                logging::log_datagram_dropped("response ID outside the window");
                continue;
            }

            return Ok((raw, message));
        }
    }
}

fn exchange_name(exchange: ExchangeType) -> &'static str {
    match exchange {
        ExchangeType::IkeSaInit => "IKE_SA_INIT",
        ExchangeType::IkeAuth => "IKE_AUTH",
        ExchangeType::CreateChildSa => "CREATE_CHILD_SA",
        ExchangeType::Informational => "INFORMATIONAL",
    }
}

/// Key material lengths for a negotiated ESP proposal.
fn child_key_lengths(proposal: &super::proposal::Proposal) -> Result<(usize, usize)> {
    let encr = proposal
        .get_transform(TransformType::Encr)
        .ok_or(Error::NoProposalChosen)?;
    let cipher = CipherAlgorithm::from_transform(encr.transform_id, encr.key_length)?;

    let integ_len = match proposal.get_transform(TransformType::Integ) {
        Some(t) => IntegAlgorithm::from_transform_id(t.transform_id)?
            .map(|i| i.key_len())
            .unwrap_or(0),
        None => 0,
    };

    Ok((cipher.keymat_len(), integ_len))
}

fn random_child_spi() -> [u8; 4] {
    let mut spi = [0u8; 4];
    loop {
        rand::thread_rng().fill_bytes(&mut spi);
        if spi != [0u8; 4] {
            return spi;
        }
    }
}
