//! IKEv2 exchange builders and processors
//!
//! Message-level logic for the four exchange types, driven by
//! [`crate::ike::session::IkeSession`]:
//!
//! ```text
//! Initiator                          Responder
//! -----------                        -----------
//! HDR, SAi1, KEi, Ni   -->
//!                      <--  HDR, SAr1, KEr, Nr
//!
//! HDR, SK {IDi, [CP,] [AUTH,]
//!     SAi2, TSi, TSr}  -->
//!                      <--  HDR, SK {IDr, AUTH, SAr2, TSi, TSr}
//!        (or EAP rounds in between, RFC 7296 Section 2.16)
//!
//! HDR, SK {SA, Ni, [KEi,] TSi, TSr}      CREATE_CHILD_SA
//! HDR, SK {[N,] [D,]}                    INFORMATIONAL
//! ```
//!
//! The functions here never touch the socket: they build complete wire
//! datagrams (sealing through the SA's crypto context where required) and
//! validate/decompose received ones.

use rand::RngCore;
use zeroize::Zeroize;

use super::auth;
use super::constants::{ExchangeType, IkeFlags, PayloadType};
use super::crypto::{sk_header, DhGroup, DhKeyPair, IkeCrypto};
use super::message::{IkeHeader, IkeMessage};
use super::payload::{
    AuthPayload, ConfigPayload, DeletePayload, IdPayload, KePayload, NoncePayload,
    NotifyPayload, NotifyType, Payload,
};
use super::proposal::{Proposal, ProtocolId, SaPayload, TransformType};
use super::state::{IkeState, MessageIdWindow};
use super::ts::TsPayload;
use crate::ike::{Error, Result};

/// Length of the nonces this stack generates
pub const NONCE_LEN: usize = 32;

/// IKE SA context shared by the exchanges.
///
/// Holds the handshake transcript pieces the AUTH computation needs, the
/// message-ID window, and (once IKE_SA_INIT completes) the crypto context.
pub struct IkeSaContext {
    /// Current state
    pub state: IkeState,

    /// Always true in this stack: only the initiator role is implemented
    pub is_initiator: bool,

    /// Initiator SPI
    pub initiator_spi: [u8; 8],

    /// Responder SPI (zero until the IKE_SA_INIT response)
    pub responder_spi: [u8; 8],

    /// Message-ID bookkeeping
    pub window: MessageIdWindow,

    /// The SA payload we offered in IKE_SA_INIT
    pub ike_offer: Option<SaPayload>,

    /// The proposal the responder selected
    pub selected_proposal: Option<Proposal>,

    /// Initiator nonce
    pub nonce_i: Option<Vec<u8>>,

    /// Responder nonce
    pub nonce_r: Option<Vec<u8>>,

    /// Ephemeral DH key pair for the initial exchange
    pub dh: Option<DhKeyPair>,

    /// Crypto context (after key derivation)
    pub crypto: Option<IkeCrypto>,

    /// Encoded IKE_SA_INIT request (RealMessage1 for AUTH)
    pub init_request_bytes: Option<Vec<u8>>,

    /// Encoded IKE_SA_INIT response (RealMessage2 for AUTH)
    pub init_response_bytes: Option<Vec<u8>>,

    /// Encoded IDi payload body (for the AUTH signed octets)
    pub id_i_data: Option<Vec<u8>>,
}

impl IkeSaContext {
    /// Create a fresh initiator context with a random SPI
    pub fn new_initiator() -> Self {
        let mut initiator_spi = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut initiator_spi);

        IkeSaContext {
            state: IkeState::Initial,
            is_initiator: true,
            initiator_spi,
            responder_spi: [0u8; 8],
            window: MessageIdWindow::new(),
            ike_offer: None,
            selected_proposal: None,
            nonce_i: None,
            nonce_r: None,
            dh: None,
            crypto: None,
            init_request_bytes: None,
            init_response_bytes: None,
            id_i_data: None,
        }
    }

    /// Transition to a new state, validating the edge
    pub fn transition_to(&mut self, new_state: IkeState) -> Result<()> {
        if !self.state.can_transition_to(new_state) {
            return Err(Error::InvalidState(format!(
                "Invalid state transition from {:?} to {:?}",
                self.state, new_state
            )));
        }
        super::logging::log_state_transition(
            &self.initiator_spi,
            &self.responder_spi,
            &format!("{:?}", self.state),
            &format!("{:?}", new_state),
        );
        self.state = new_state;
        Ok(())
    }

    /// The crypto context, or an error before key derivation
    pub fn crypto(&self) -> Result<&IkeCrypto> {
        self.crypto
            .as_ref()
            .ok_or_else(|| Error::InvalidState("IKE SA keys not derived yet".to_string()))
    }

    /// Validate common response header fields (response flag, SPIs, ID)
    pub fn check_response_header(&self, header: &IkeHeader) -> Result<()> {
        if !header.flags.is_response() {
            return Err(Error::InvalidState(
                "Expected a response message".to_string(),
            ));
        }
        if header.initiator_spi != self.initiator_spi {
            return Err(Error::InvalidState(
                "Response carries a foreign initiator SPI".to_string(),
            ));
        }
        self.window.validate_response(header.message_id)
    }
}

impl Drop for IkeSaContext {
    fn drop(&mut self) {
        if let Some(nonce) = self.nonce_i.as_mut() {
            nonce.zeroize();
        }
        if let Some(nonce) = self.nonce_r.as_mut() {
            nonce.zeroize();
        }
    }
}

/// Outcome of processing an IKE_SA_INIT response
#[derive(Debug)]
pub enum InitOutcome {
    /// Keys derived; proceed to IKE_AUTH
    Done,
    /// Responder asked for a different DH group; retry once
    RetryWithGroup(u16),
}

/// IKE_SA_INIT exchange (RFC 7296 Section 1.2)
pub struct IkeSaInitExchange;

impl IkeSaInitExchange {
    /// Build the IKE_SA_INIT request: HDR, SAi1, KEi, Ni.
    ///
    /// Generates the ephemeral DH key pair and nonce, recording both in
    /// the context.
    pub fn create_request(
        context: &mut IkeSaContext,
        offers: SaPayload,
        dh_group: DhGroup,
    ) -> Result<IkeMessage> {
        for proposal in &offers.proposals {
            proposal.validate_offer()?;
        }

        let dh = DhKeyPair::generate(dh_group);
        let ke = KePayload::new(dh_group.transform_id(), dh.public_value().to_vec());

        let mut nonce = vec![0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let header = IkeHeader::new(
            context.initiator_spi,
            [0u8; 8],
            PayloadType::SA.to_u8(),
            ExchangeType::IkeSaInit,
            IkeFlags::request(true),
            context.window.next_request_id(),
            0,
        );

        let payloads = vec![
            Payload::Sa(offers.clone()),
            Payload::Ke(ke),
            Payload::Nonce(NoncePayload::new(nonce.clone())?),
        ];

        context.ike_offer = Some(offers);
        context.nonce_i = Some(nonce);
        context.dh = Some(dh);

        Ok(IkeMessage::new(header, payloads))
    }

    /// Process the IKE_SA_INIT response, deriving the IKE SA keys.
    ///
    /// `raw` is the exact datagram (stored as RealMessage2 for AUTH).
    pub fn process_response(
        context: &mut IkeSaContext,
        raw: &[u8],
        message: &IkeMessage,
    ) -> Result<InitOutcome> {
        context.check_response_header(&message.header)?;

        // Error notifies come unprotected in IKE_SA_INIT.
        for payload in &message.payloads {
            if let Payload::Notify(notify) = payload {
                match notify.known_type() {
                    Some(NotifyType::NoProposalChosen) => {
                        return Err(Error::NoProposalChosen)
                    }
                    Some(NotifyType::InvalidKePayload) => {
                        if notify.data.len() != 2 {
                            return Err(Error::InvalidKeyExchange(
                                "INVALID_KE_PAYLOAD without a suggested group".to_string(),
                            ));
                        }
                        let group = u16::from_be_bytes([notify.data[0], notify.data[1]]);
                        return Ok(InitOutcome::RetryWithGroup(group));
                    }
                    Some(t) if t.is_error() => {
                        return Err(Error::AuthenticationFailed(format!(
                            "IKE_SA_INIT rejected with notify {:?}",
                            t
                        )))
                    }
                    _ => {}
                }
            }
        }

        let offer = context
            .ike_offer
            .as_ref()
            .ok_or_else(|| Error::InvalidState("No IKE offer recorded".to_string()))?;

        let sa_response = message
            .payloads
            .iter()
            .find_map(|p| match p {
                Payload::Sa(sa) => Some(sa),
                _ => None,
            })
            .ok_or_else(|| {
                Error::MalformedMessage("IKE_SA_INIT response missing SA payload".to_string())
            })?;
        let selected = sa_response.validate_response(offer)?;

        let ke = message
            .payloads
            .iter()
            .find_map(|p| match p {
                Payload::Ke(ke) => Some(ke),
                _ => None,
            })
            .ok_or_else(|| {
                Error::MalformedMessage("IKE_SA_INIT response missing KE payload".to_string())
            })?;

        let nonce_r = message
            .payloads
            .iter()
            .find_map(|p| match p {
                Payload::Nonce(n) => Some(n.nonce.clone()),
                _ => None,
            })
            .ok_or_else(|| {
                Error::MalformedMessage("IKE_SA_INIT response missing Nonce payload".to_string())
            })?;

        let dh = context
            .dh
            .as_ref()
            .ok_or_else(|| Error::InvalidState("No DH key pair recorded".to_string()))?;

        // DH group agreement: the KE payload and the selected proposal must
        // both name the group we offered in the KE payload.
        if ke.dh_group != dh.group().transform_id() {
            return Err(Error::InvalidKeyExchange(format!(
                "Responder KE group {} does not match ours ({})",
                ke.dh_group,
                dh.group().transform_id()
            )));
        }
        if let Some(dh_transform) = selected.get_transform(TransformType::Dh) {
            if dh_transform.transform_id != ke.dh_group {
                return Err(Error::InvalidKeyExchange(
                    "Selected proposal and KE payload disagree on the DH group".to_string(),
                ));
            }
        }

        let mut shared_secret = dh.compute_shared(&ke.key_data)?;

        let nonce_i = context
            .nonce_i
            .as_ref()
            .ok_or_else(|| Error::InvalidState("No initiator nonce recorded".to_string()))?;

        context.responder_spi = message.header.responder_spi;

        let crypto = IkeCrypto::negotiate(
            &selected,
            context.is_initiator,
            nonce_i,
            &nonce_r,
            &shared_secret,
            &context.initiator_spi,
            &context.responder_spi,
        )?;
        shared_secret.zeroize();

        context.crypto = Some(crypto);
        context.selected_proposal = Some(selected);
        context.nonce_r = Some(nonce_r);
        context.init_response_bytes = Some(raw.to_vec());

        Ok(InitOutcome::Done)
    }
}

/// What the IKE_AUTH response contained
pub enum AuthOutcome {
    /// Responder started EAP; here is the first EAP request
    EapRequest(Vec<u8>),
    /// Authentication finished; the first Child SA parameters
    Complete(Box<AuthComplete>),
}

/// Results of a completed IKE_AUTH exchange
pub struct AuthComplete {
    /// The responder's identity payload body (already verified)
    pub id_r: IdPayload,
    /// Selected Child SA proposal
    pub child_proposal: Proposal,
    /// Negotiated initiator-side traffic selectors
    pub ts_i: TsPayload,
    /// Negotiated responder-side traffic selectors
    pub ts_r: TsPayload,
    /// Configuration reply, if one was requested
    pub config: Option<ConfigPayload>,
}

/// IKE_AUTH exchange, including the EAP rounds (RFC 7296 Section 2.16)
pub struct IkeAuthExchange;

impl IkeAuthExchange {
    /// Build the first IKE_AUTH request.
    ///
    /// With `psk` present this is a complete shared-secret authentication;
    /// without it the AUTH payload is omitted to request EAP.
    #[allow(clippy::too_many_arguments)]
    pub fn create_request(
        context: &mut IkeSaContext,
        id_i: IdPayload,
        psk: Option<&[u8]>,
        child_offer: SaPayload,
        ts_i: TsPayload,
        ts_r: TsPayload,
        transport_mode: bool,
        config_request: Option<ConfigPayload>,
    ) -> Result<Vec<u8>> {
        for proposal in &child_offer.proposals {
            proposal.validate_offer()?;
        }

        let id_i_data = id_i.to_payload_data();
        let mut inner = vec![Payload::IdInit(id_i.clone())];

        if let Some(secret) = psk {
            let auth = Self::compute_local_auth(context, secret, &id_i_data)?;
            inner.push(Payload::Auth(auth));
        }

        if let Some(cp) = config_request {
            inner.push(Payload::Config(cp));
        }

        inner.push(Payload::Sa(child_offer));
        inner.push(Payload::TsInit(ts_i));
        inner.push(Payload::TsResp(ts_r));
        if transport_mode {
            inner.push(Payload::Notify(NotifyPayload::status(
                NotifyType::UseTransportMode,
                Vec::new(),
            )));
        }

        context.id_i_data = Some(id_i_data);
        Self::seal_request(context, &inner)
    }

    /// Build an IKE_AUTH request carrying only an EAP payload
    pub fn create_eap_reply(context: &mut IkeSaContext, eap_message: Vec<u8>) -> Result<Vec<u8>> {
        let inner = vec![Payload::Eap(super::payload::EapPayload {
            message: eap_message,
        })];
        Self::seal_request(context, &inner)
    }

    /// Build the final IKE_AUTH request after EAP success: SK{AUTH},
    /// with the AUTH payload keyed by the exported MSK.
    pub fn create_final_auth(context: &mut IkeSaContext, msk: &[u8]) -> Result<Vec<u8>> {
        let id_i_data = context
            .id_i_data
            .clone()
            .ok_or_else(|| Error::InvalidState("IDi not recorded".to_string()))?;
        let auth = Self::compute_local_auth(context, msk, &id_i_data)?;
        Self::seal_request(context, &[Payload::Auth(auth)])
    }

    fn compute_local_auth(
        context: &IkeSaContext,
        secret: &[u8],
        id_i_data: &[u8],
    ) -> Result<AuthPayload> {
        let crypto = context.crypto()?;
        let message1 = context
            .init_request_bytes
            .as_ref()
            .ok_or_else(|| Error::InvalidState("IKE_SA_INIT request not recorded".to_string()))?;
        let nonce_r = context
            .nonce_r
            .as_ref()
            .ok_or_else(|| Error::InvalidState("Responder nonce not recorded".to_string()))?;

        let signed = auth::initiator_signed_octets(
            crypto.prf(),
            message1,
            nonce_r,
            crypto.sk_p_local(),
            id_i_data,
        )?;
        auth::compute_psk_auth(crypto.prf(), secret, &signed)
    }

    fn seal_request(context: &mut IkeSaContext, inner: &[Payload]) -> Result<Vec<u8>> {
        let header = sk_header(
            context.initiator_spi,
            context.responder_spi,
            ExchangeType::IkeAuth,
            IkeFlags::request(true),
            context.window.next_request_id(),
        );
        context.crypto()?.seal_message(&header, inner)
    }

    /// Process an IKE_AUTH response.
    ///
    /// `auth_secret` is the PSK, or the MSK once EAP has completed; it is
    /// only consulted when the response carries the final AUTH payload.
    /// `child_offer` is the SA payload from the first request.
    pub fn process_response(
        context: &mut IkeSaContext,
        raw: &[u8],
        message: &IkeMessage,
        auth_secret: &[u8],
        child_offer: &SaPayload,
    ) -> Result<AuthOutcome> {
        context.check_response_header(&message.header)?;
        let inner = context.crypto()?.open_message(raw, message)?;

        // Error notifies inside SK are authoritative.
        for payload in &inner {
            if let Payload::Notify(notify) = payload {
                match notify.known_type() {
                    Some(NotifyType::AuthenticationFailed) => {
                        return Err(Error::AuthenticationFailed(
                            "Responder rejected our authentication".to_string(),
                        ))
                    }
                    Some(NotifyType::NoProposalChosen) => {
                        return Err(Error::NoProposalChosen)
                    }
                    Some(NotifyType::TsUnacceptable) => {
                        return Err(Error::NoProposalChosen)
                    }
                    _ => {}
                }
            }
        }

        // An EAP payload means the server wants another round.
        if let Some(eap) = inner.iter().find_map(|p| match p {
            Payload::Eap(e) => Some(e.message.clone()),
            _ => None,
        }) {
            return Ok(AuthOutcome::EapRequest(eap));
        }

        let id_r = inner
            .iter()
            .find_map(|p| match p {
                Payload::IdResp(id) => Some(id.clone()),
                _ => None,
            })
            .ok_or_else(|| {
                Error::MalformedMessage("IKE_AUTH response missing IDr".to_string())
            })?;

        let auth_payload = inner
            .iter()
            .find_map(|p| match p {
                Payload::Auth(a) => Some(a.clone()),
                _ => None,
            })
            .ok_or_else(|| {
                Error::AuthenticationFailed("IKE_AUTH response missing AUTH".to_string())
            })?;

        Self::verify_peer_auth(context, auth_secret, &id_r, &auth_payload)?;

        let sa_response = inner
            .iter()
            .find_map(|p| match p {
                Payload::Sa(sa) => Some(sa),
                _ => None,
            })
            .ok_or_else(|| {
                Error::MalformedMessage("IKE_AUTH response missing Child SA".to_string())
            })?;
        let child_proposal = sa_response.validate_response(child_offer)?;

        let ts_i = inner
            .iter()
            .find_map(|p| match p {
                Payload::TsInit(ts) => Some(ts.clone()),
                _ => None,
            })
            .ok_or_else(|| {
                Error::MalformedMessage("IKE_AUTH response missing TSi".to_string())
            })?;
        let ts_r = inner
            .iter()
            .find_map(|p| match p {
                Payload::TsResp(ts) => Some(ts.clone()),
                _ => None,
            })
            .ok_or_else(|| {
                Error::MalformedMessage("IKE_AUTH response missing TSr".to_string())
            })?;

        // IPv6 selectors can be coded but not yet negotiated.
        if ts_i.is_ipv6_only() || ts_r.is_ipv6_only() {
            return Err(Error::UnsupportedPayload(PayloadType::TSi.to_u8()));
        }

        let config = inner.iter().find_map(|p| match p {
            Payload::Config(cp) => Some(cp.clone()),
            _ => None,
        });

        Ok(AuthOutcome::Complete(Box::new(AuthComplete {
            id_r,
            child_proposal,
            ts_i,
            ts_r,
            config,
        })))
    }

    fn verify_peer_auth(
        context: &IkeSaContext,
        secret: &[u8],
        id_r: &IdPayload,
        received: &AuthPayload,
    ) -> Result<()> {
        let crypto = context.crypto()?;
        let message2 = context
            .init_response_bytes
            .as_ref()
            .ok_or_else(|| Error::InvalidState("IKE_SA_INIT response not recorded".to_string()))?;
        let nonce_i = context
            .nonce_i
            .as_ref()
            .ok_or_else(|| Error::InvalidState("Initiator nonce not recorded".to_string()))?;

        let signed = auth::responder_signed_octets(
            crypto.prf(),
            message2,
            nonce_i,
            crypto.sk_p_peer(),
            &id_r.to_payload_data(),
        )?;
        auth::verify_psk_auth(crypto.prf(), secret, &signed, received)
    }
}

/// CREATE_CHILD_SA exchange (RFC 7296 Section 1.3)
pub struct CreateChildSaExchange;

/// Results of a completed CREATE_CHILD_SA exchange for a Child SA
pub struct ChildComplete {
    /// Selected proposal (carries the peer's SPI)
    pub proposal: Proposal,
    /// Responder nonce
    pub nonce_r: Vec<u8>,
    /// Negotiated traffic selectors (initiator side)
    pub ts_i: TsPayload,
    /// Negotiated traffic selectors (responder side)
    pub ts_r: TsPayload,
}

impl CreateChildSaExchange {
    /// Build a CREATE_CHILD_SA request for a new (or rekeyed) Child SA.
    ///
    /// `rekeyed_spi` carries the inbound SPI of the Child SA being
    /// replaced, emitted as a REKEY_SA notify.
    #[allow(clippy::too_many_arguments)]
    pub fn create_child_request(
        context: &mut IkeSaContext,
        offer: SaPayload,
        nonce: Vec<u8>,
        ts_i: TsPayload,
        ts_r: TsPayload,
        transport_mode: bool,
        rekeyed_spi: Option<[u8; 4]>,
    ) -> Result<Vec<u8>> {
        for proposal in &offer.proposals {
            proposal.validate_offer()?;
        }

        let mut inner = Vec::new();
        if let Some(spi) = rekeyed_spi {
            inner.push(Payload::Notify(NotifyPayload::for_child_sa(
                NotifyType::RekeySa,
                ProtocolId::Esp,
                spi,
            )));
        }
        inner.push(Payload::Sa(offer));
        inner.push(Payload::Nonce(NoncePayload::new(nonce)?));
        inner.push(Payload::TsInit(ts_i));
        inner.push(Payload::TsResp(ts_r));
        if transport_mode {
            inner.push(Payload::Notify(NotifyPayload::status(
                NotifyType::UseTransportMode,
                Vec::new(),
            )));
        }

        Self::seal_request(context, &inner)
    }

    /// Build a CREATE_CHILD_SA request rekeying the IKE SA itself.
    ///
    /// The offer's proposals must carry the new 8-byte initiator SPI.
    pub fn create_rekey_ike_request(
        context: &mut IkeSaContext,
        offer: SaPayload,
        nonce: Vec<u8>,
        dh: &DhKeyPair,
    ) -> Result<Vec<u8>> {
        let inner = vec![
            Payload::Sa(offer),
            Payload::Nonce(NoncePayload::new(nonce)?),
            Payload::Ke(KePayload::new(
                dh.group().transform_id(),
                dh.public_value().to_vec(),
            )),
        ];
        Self::seal_request(context, &inner)
    }

    fn seal_request(context: &mut IkeSaContext, inner: &[Payload]) -> Result<Vec<u8>> {
        let header = sk_header(
            context.initiator_spi,
            context.responder_spi,
            ExchangeType::CreateChildSa,
            IkeFlags::request(true),
            context.window.next_request_id(),
        );
        context.crypto()?.seal_message(&header, inner)
    }

    /// Process a CREATE_CHILD_SA response for a Child SA request.
    pub fn process_child_response(
        context: &mut IkeSaContext,
        raw: &[u8],
        message: &IkeMessage,
        offer: &SaPayload,
    ) -> Result<ChildComplete> {
        context.check_response_header(&message.header)?;
        let inner = context.crypto()?.open_message(raw, message)?;

        for payload in &inner {
            if let Payload::Notify(notify) = payload {
                if let Some(t) = notify.known_type() {
                    if t.is_error() {
                        return Err(Error::NoProposalChosen);
                    }
                }
            }
        }

        let sa_response = inner
            .iter()
            .find_map(|p| match p {
                Payload::Sa(sa) => Some(sa),
                _ => None,
            })
            .ok_or_else(|| {
                Error::MalformedMessage("CREATE_CHILD_SA response missing SA".to_string())
            })?;
        let proposal = sa_response.validate_response(offer)?;

        let nonce_r = inner
            .iter()
            .find_map(|p| match p {
                Payload::Nonce(n) => Some(n.nonce.clone()),
                _ => None,
            })
            .ok_or_else(|| {
                Error::MalformedMessage("CREATE_CHILD_SA response missing Nonce".to_string())
            })?;

        let ts_i = inner
            .iter()
            .find_map(|p| match p {
                Payload::TsInit(ts) => Some(ts.clone()),
                _ => None,
            })
            .ok_or_else(|| {
                Error::MalformedMessage("CREATE_CHILD_SA response missing TSi".to_string())
            })?;
        let ts_r = inner
            .iter()
            .find_map(|p| match p {
                Payload::TsResp(ts) => Some(ts.clone()),
                _ => None,
            })
            .ok_or_else(|| {
                Error::MalformedMessage("CREATE_CHILD_SA response missing TSr".to_string())
            })?;

        Ok(ChildComplete {
            proposal,
            nonce_r,
            ts_i,
            ts_r,
        })
    }

    /// Process a CREATE_CHILD_SA response for an IKE SA rekey, returning
    /// (selected proposal, responder nonce, responder KE payload).
    pub fn process_rekey_ike_response(
        context: &mut IkeSaContext,
        raw: &[u8],
        message: &IkeMessage,
        offer: &SaPayload,
    ) -> Result<(Proposal, Vec<u8>, KePayload)> {
        context.check_response_header(&message.header)?;
        let inner = context.crypto()?.open_message(raw, message)?;

        for payload in &inner {
            if let Payload::Notify(notify) = payload {
                if let Some(t) = notify.known_type() {
                    if t.is_error() {
                        return Err(Error::NoProposalChosen);
                    }
                }
            }
        }

        let sa_response = inner
            .iter()
            .find_map(|p| match p {
                Payload::Sa(sa) => Some(sa),
                _ => None,
            })
            .ok_or_else(|| {
                Error::MalformedMessage("Rekey response missing SA".to_string())
            })?;
        let proposal = sa_response.validate_response(offer)?;

        let nonce_r = inner
            .iter()
            .find_map(|p| match p {
                Payload::Nonce(n) => Some(n.nonce.clone()),
                _ => None,
            })
            .ok_or_else(|| {
                Error::MalformedMessage("Rekey response missing Nonce".to_string())
            })?;

        let ke = inner
            .iter()
            .find_map(|p| match p {
                Payload::Ke(ke) => Some(ke.clone()),
                _ => None,
            })
            .ok_or_else(|| {
                Error::MalformedMessage("Rekey response missing KE".to_string())
            })?;

        Ok((proposal, nonce_r, ke))
    }
}

/// Decoded contents of an inbound INFORMATIONAL request
#[derive(Debug, Default)]
pub struct InformationalRequest {
    /// Delete payloads carried by the request
    pub deletes: Vec<DeletePayload>,
    /// Notify payloads carried by the request
    pub notifies: Vec<NotifyPayload>,
}

/// INFORMATIONAL exchange (RFC 7296 Section 1.4)
pub struct InformationalExchange;

impl InformationalExchange {
    /// Build an INFORMATIONAL request deleting the IKE SA
    pub fn create_delete_ike_sa_request(context: &mut IkeSaContext) -> Result<Vec<u8>> {
        Self::seal_request(context, &[Payload::Delete(DeletePayload::delete_ike_sa())])
    }

    /// Build an INFORMATIONAL request deleting Child SAs
    pub fn create_delete_child_sa_request(
        context: &mut IkeSaContext,
        spis: Vec<[u8; 4]>,
    ) -> Result<Vec<u8>> {
        if spis.is_empty() {
            return Err(Error::InvalidSyntax("SPI list cannot be empty".to_string()));
        }
        Self::seal_request(
            context,
            &[Payload::Delete(DeletePayload::delete_child_sas(spis))],
        )
    }

    /// Build an empty INFORMATIONAL request (dead peer detection probe)
    pub fn create_dpd_request(context: &mut IkeSaContext) -> Result<Vec<u8>> {
        Self::seal_request(context, &[])
    }

    /// Build an INFORMATIONAL request carrying a single notify
    pub fn create_notify_request(
        context: &mut IkeSaContext,
        notify_type: NotifyType,
        data: Vec<u8>,
    ) -> Result<Vec<u8>> {
        Self::seal_request(
            context,
            &[Payload::Notify(NotifyPayload::status(notify_type, data))],
        )
    }

    fn seal_request(context: &mut IkeSaContext, inner: &[Payload]) -> Result<Vec<u8>> {
        let header = sk_header(
            context.initiator_spi,
            context.responder_spi,
            ExchangeType::Informational,
            IkeFlags::request(true),
            context.window.next_request_id(),
        );
        context.crypto()?.seal_message(&header, inner)
    }

    /// Build an (optionally empty) response to a peer request
    pub fn create_response(
        context: &IkeSaContext,
        message_id: u32,
        inner: &[Payload],
    ) -> Result<Vec<u8>> {
        let header = sk_header(
            context.initiator_spi,
            context.responder_spi,
            ExchangeType::Informational,
            IkeFlags::response(context.is_initiator),
            message_id,
        );
        context.crypto()?.seal_message(&header, inner)
    }

    /// Decode a peer's INFORMATIONAL request
    pub fn process_request(
        context: &IkeSaContext,
        raw: &[u8],
        message: &IkeMessage,
    ) -> Result<InformationalRequest> {
        let inner = context.crypto()?.open_message(raw, message)?;

        let mut request = InformationalRequest::default();
        for payload in inner {
            match payload {
                Payload::Delete(d) => request.deletes.push(d),
                Payload::Notify(n) => request.notifies.push(n),
                _ => {}
            }
        }
        Ok(request)
    }

    /// Decode an INFORMATIONAL response to one of our requests
    pub fn process_response(
        context: &mut IkeSaContext,
        raw: &[u8],
        message: &IkeMessage,
    ) -> Result<Vec<Payload>> {
        context.check_response_header(&message.header)?;
        context.crypto()?.open_message(raw, message)
    }
}
