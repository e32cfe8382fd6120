//! End-to-end IKE session tests against a scripted in-process responder.
//!
//! The responder is built from the same codec and crypto primitives the
//! initiator uses, with the responder key direction, so a full PSK
//! handshake, DPD probe and Delete run over a real UDP socket pair.

use std::time::Duration;

use tokio::net::UdpSocket;

use ikepeer_proto::ike::auth;
use ikepeer_proto::ike::config::{RetransmitConfig, SessionConfig};
use ikepeer_proto::ike::constants::{ExchangeType, IkeFlags, PayloadType};
use ikepeer_proto::ike::crypto::{sk_header, DhKeyPair, DhGroup, IkeCrypto};
use ikepeer_proto::ike::message::IkeMessage;
use ikepeer_proto::ike::payload::{
    IdPayload, IkeIdentification, KePayload, NoncePayload, NotifyPayload, NotifyType, Payload,
};
use ikepeer_proto::ike::proposal::{Proposal, SaPayload, TransformType};
use ikepeer_proto::ike::session::IkeSession;
use ikepeer_proto::ike::{Error, IkeHeader, IkeState};

const PSK: &[u8] = b"integration-test-psk";
const RESPONDER_SPI: [u8; 8] = [0xEE; 8];

fn client_config() -> SessionConfig {
    SessionConfig::builder()
        .with_local_id(IkeIdentification::fqdn("client.example.com").unwrap())
        .with_remote_id(IkeIdentification::fqdn("gateway.example.com").unwrap())
        .with_psk(PSK.to_vec())
        .build()
        .unwrap()
}

/// Select the first transform of each type from an offered proposal.
fn select_from(offer: &Proposal) -> Proposal {
    let mut selection = Proposal::new(offer.proposal_num, offer.protocol_id);
    for transform_type in TransformType::ALL {
        if let Some(t) = offer.transforms_of_type(transform_type).first() {
            selection = selection.add_transform((*t).clone());
        }
    }
    selection
}

fn find_sa(payloads: &[Payload]) -> &SaPayload {
    payloads
        .iter()
        .find_map(|p| match p {
            Payload::Sa(sa) => Some(sa),
            _ => None,
        })
        .expect("SA payload present")
}

/// A one-client PSK responder: IKE_SA_INIT, IKE_AUTH, then an
/// INFORMATIONAL loop until the client deletes the IKE SA.
async fn run_psk_responder(socket: UdpSocket) {
    let mut buf = vec![0u8; 65536];

    // ---- IKE_SA_INIT ----
    let (n, peer) = socket.recv_from(&mut buf).await.unwrap();
    let raw_init_request = buf[..n].to_vec();
    let init_request = IkeMessage::decode(&raw_init_request).unwrap();
    let spi_i = init_request.header.initiator_spi;

    let offer = &find_sa(&init_request.payloads).proposals[0];
    let selection = select_from(offer);

    let ke_i = init_request
        .payloads
        .iter()
        .find_map(|p| match p {
            Payload::Ke(ke) => Some(ke.clone()),
            _ => None,
        })
        .unwrap();
    let nonce_i = init_request
        .payloads
        .iter()
        .find_map(|p| match p {
            Payload::Nonce(nonce) => Some(nonce.nonce.clone()),
            _ => None,
        })
        .unwrap();

    let dh = DhKeyPair::generate(DhGroup::from_transform_id(ke_i.dh_group).unwrap());
    let shared_secret = dh.compute_shared(&ke_i.key_data).unwrap();
    let nonce_r = vec![0x5F; 32];

    let init_response = IkeMessage::new(
        IkeHeader::new(
            spi_i,
            RESPONDER_SPI,
            PayloadType::SA.to_u8(),
            ExchangeType::IkeSaInit,
            IkeFlags::response(false),
            0,
            0,
        ),
        vec![
            Payload::Sa(SaPayload::new(vec![selection.clone()]).unwrap()),
            Payload::Ke(KePayload::new(ke_i.dh_group, dh.public_value().to_vec())),
            Payload::Nonce(NoncePayload::new(nonce_r.clone()).unwrap()),
        ],
    );
    let raw_init_response = init_response.encode();
    socket.send_to(&raw_init_response, peer).await.unwrap();

    let crypto = IkeCrypto::negotiate(
        &selection,
        false,
        &nonce_i,
        &nonce_r,
        &shared_secret,
        &spi_i,
        &RESPONDER_SPI,
    )
    .unwrap();

    // ---- IKE_AUTH ----
    let (n, peer) = socket.recv_from(&mut buf).await.unwrap();
    let raw_auth_request = buf[..n].to_vec();
    let auth_request = IkeMessage::decode(&raw_auth_request).unwrap();
    let inner = crypto.open_message(&raw_auth_request, &auth_request).unwrap();

    // Verify the initiator's AUTH with the shared PSK.
    let id_i = inner
        .iter()
        .find_map(|p| match p {
            Payload::IdInit(id) => Some(id.clone()),
            _ => None,
        })
        .unwrap();
    let auth_i = inner
        .iter()
        .find_map(|p| match p {
            Payload::Auth(a) => Some(a.clone()),
            _ => None,
        })
        .unwrap();
    let signed = auth::initiator_signed_octets(
        crypto.prf(),
        &raw_init_request,
        &nonce_r,
        crypto.sk_p_peer(),
        &id_i.to_payload_data(),
    )
    .unwrap();
    auth::verify_psk_auth(crypto.prf(), PSK, &signed, &auth_i).unwrap();

    // Child SA selection with the responder's inbound SPI.
    let child_offer = &find_sa(&inner).proposals[0];
    let child_selection = select_from(child_offer).with_spi(vec![0xAB, 0xCD, 0xEF, 0x01]);

    let ts_i = inner
        .iter()
        .find_map(|p| match p {
            Payload::TsInit(ts) => Some(ts.clone()),
            _ => None,
        })
        .unwrap();
    let ts_r = inner
        .iter()
        .find_map(|p| match p {
            Payload::TsResp(ts) => Some(ts.clone()),
            _ => None,
        })
        .unwrap();

    let id_r = IdPayload::new(IkeIdentification::fqdn("gateway.example.com").unwrap());
    let signed = auth::responder_signed_octets(
        crypto.prf(),
        &raw_init_response,
        &nonce_i,
        crypto.sk_p_local(),
        &id_r.to_payload_data(),
    )
    .unwrap();
    let auth_r = auth::compute_psk_auth(crypto.prf(), PSK, &signed).unwrap();

    let response_inner = vec![
        Payload::IdResp(id_r),
        Payload::Auth(auth_r),
        Payload::Sa(SaPayload::new(vec![child_selection]).unwrap()),
        Payload::TsInit(ts_i),
        Payload::TsResp(ts_r),
    ];
    let header = sk_header(
        spi_i,
        RESPONDER_SPI,
        ExchangeType::IkeAuth,
        IkeFlags::response(false),
        auth_request.header.message_id,
    );
    let raw = crypto.seal_message(&header, &response_inner).unwrap();
    socket.send_to(&raw, peer).await.unwrap();

    // ---- INFORMATIONAL loop (DPD probes, Delete) ----
    loop {
        let (n, peer) = match socket.recv_from(&mut buf).await {
            Ok(x) => x,
            Err(_) => return,
        };
        let raw_request = buf[..n].to_vec();
        let request = match IkeMessage::decode(&raw_request) {
            Ok(m) => m,
            Err(_) => continue,
        };
        if request.header.exchange_type != ExchangeType::Informational {
            continue;
        }
        let inner = crypto.open_message(&raw_request, &request).unwrap();
        let is_ike_delete = inner.iter().any(|p| {
            matches!(p, Payload::Delete(d)
                if d.protocol_id == ikepeer_proto::ike::proposal::ProtocolId::Ike)
        });

        let header = sk_header(
            spi_i,
            RESPONDER_SPI,
            ExchangeType::Informational,
            IkeFlags::response(false),
            request.header.message_id,
        );
        let raw = crypto.seal_message(&header, &[]).unwrap();
        socket.send_to(&raw, peer).await.unwrap();

        if is_ike_delete {
            return;
        }
    }
}

#[tokio::test]
async fn psk_handshake_dpd_and_close() {
    let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let server_addr = server.local_addr().unwrap();
    let responder = tokio::spawn(run_psk_responder(server));

    let mut session = IkeSession::new(client_config());
    session.connect(server_addr).await.unwrap();

    assert_eq!(session.state(), IkeState::Established);
    assert_eq!(session.child_sas().len(), 1);
    let child = session.child_sas().values().next().unwrap();
    assert_eq!(child.outbound_spi, [0xAB, 0xCD, 0xEF, 0x01]);
    assert!(!child.keys.sk_ei.is_empty());

    // Liveness probe round-trips through the responder.
    session.send_dpd().await.unwrap();

    // Graceful close sends the Delete the responder is waiting for.
    session.close().await.unwrap();
    assert_eq!(session.state(), IkeState::Closed);
    assert!(session.child_sas().is_empty());

    responder.await.unwrap();
}

#[tokio::test]
async fn no_proposal_chosen_aborts_connect() {
    let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let server_addr = server.local_addr().unwrap();

    let responder = tokio::spawn(async move {
        let mut buf = vec![0u8; 65536];
        let (n, peer) = server.recv_from(&mut buf).await.unwrap();
        let request = IkeMessage::decode(&buf[..n]).unwrap();

        let response = IkeMessage::new(
            IkeHeader::new(
                request.header.initiator_spi,
                RESPONDER_SPI,
                PayloadType::N.to_u8(),
                ExchangeType::IkeSaInit,
                IkeFlags::response(false),
                0,
                0,
            ),
            vec![Payload::Notify(NotifyPayload::status(
                NotifyType::NoProposalChosen,
                Vec::new(),
            ))],
        );
        server.send_to(&response.encode(), peer).await.unwrap();
    });

    let mut session = IkeSession::new(client_config());
    let result = session.connect(server_addr).await;

    assert!(matches!(result, Err(Error::NoProposalChosen)));
    assert_eq!(session.state(), IkeState::Closed);
    responder.await.unwrap();
}

#[tokio::test]
async fn retransmission_exhaustion_times_out() {
    // A bound but silent peer: every attempt expires.
    let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let server_addr = server.local_addr().unwrap();

    let config = SessionConfig::builder()
        .with_local_id(IkeIdentification::fqdn("client.example.com").unwrap())
        .with_psk(PSK.to_vec())
        .with_retransmit(RetransmitConfig {
            base_delay: Duration::from_millis(10),
            max_attempts: 3,
        })
        .build()
        .unwrap();

    let mut session = IkeSession::new(config);
    let result = session.connect(server_addr).await;

    assert!(matches!(result, Err(Error::Timeout)));
    assert_eq!(session.state(), IkeState::Closed);
}
