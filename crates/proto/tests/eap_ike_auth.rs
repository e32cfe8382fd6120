//! IKE_AUTH with EAP-AKA inner authentication, end to end.
//!
//! The scripted responder drives the EAP server side: AKA-Identity,
//! AKA-Challenge (with a valid AT_MAC), EAP-Success, then verifies the
//! client's final AUTH payload against the exported MSK.

use std::sync::Arc;

use tokio::net::UdpSocket;

use ikepeer_platform::{AkaAppType, PlatformResult, SimAuthenticator};
use ikepeer_proto::eap::crypto::{aka_master_key, compute_mac, SimAkaKeys};
use ikepeer_proto::eap::message::{EapCode, EapData, EapMessage, TYPE_AKA};
use ikepeer_proto::eap::simaka::{
    attribute, zero_mac_in_message, SimAkaAttribute, SimAkaSubtype, SimAkaTypeData,
};
use ikepeer_proto::ike::auth;
use ikepeer_proto::ike::config::{EapMethodConfig, SessionConfig};
use ikepeer_proto::ike::constants::{ExchangeType, IkeFlags, PayloadType};
use ikepeer_proto::ike::crypto::{sk_header, DhKeyPair, DhGroup, IkeCrypto};
use ikepeer_proto::ike::message::IkeMessage;
use ikepeer_proto::ike::payload::{
    EapPayload, IdPayload, IkeIdentification, KePayload, NoncePayload, Payload,
};
use ikepeer_proto::ike::proposal::{Proposal, SaPayload, TransformType};
use ikepeer_proto::ike::session::IkeSession;
use ikepeer_proto::ike::{IkeHeader, IkeState};

const IMSI: &str = "208930000000001";
const IK: [u8; 16] = [0x11; 16];
const CK: [u8; 16] = [0x22; 16];
const RES: [u8; 8] = [0x66; 8];
const RESPONDER_SPI: [u8; 8] = [0xEE; 8];

struct TestCard;

impl SimAuthenticator for TestCard {
    fn subscriber_id(&self) -> Option<String> {
        Some(IMSI.to_string())
    }

    fn authenticate(&self, _: AkaAppType, _: &[u8]) -> PlatformResult<Vec<u8>> {
        let mut out = vec![0xDB, RES.len() as u8];
        out.extend_from_slice(&RES);
        out.push(IK.len() as u8);
        out.extend_from_slice(&IK);
        out.push(CK.len() as u8);
        out.extend_from_slice(&CK);
        Ok(out)
    }
}

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

fn find_eap(payloads: &[Payload]) -> Vec<u8> {
    payloads
        .iter()
        .find_map(|p| match p {
            Payload::Eap(e) => Some(e.message.clone()),
            _ => None,
        })
        .expect("EAP payload present")
}

fn eap_request(identifier: u8, td: SimAkaTypeData) -> Vec<u8> {
    EapMessage {
        code: EapCode::Request,
        identifier,
        data: Some(EapData {
            eap_type: TYPE_AKA,
            type_data: td.encode(),
        }),
    }
    .encode()
}

async fn run_eap_responder(socket: UdpSocket) {
    let mut buf = vec![0u8; 65536];

    // ---- IKE_SA_INIT ----
    let (n, peer) = socket.recv_from(&mut buf).await.unwrap();
    let raw_init_request = buf[..n].to_vec();
    let init_request = IkeMessage::decode(&raw_init_request).unwrap();
    let spi_i = init_request.header.initiator_spi;

    let selection = select_from(&find_sa(&init_request.payloads).proposals[0]);
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
    let nonce_r = vec![0x6A; 32];

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

    let respond_eap = |message_id: u32, eap: Vec<u8>| {
        let header = sk_header(
            spi_i,
            RESPONDER_SPI,
            ExchangeType::IkeAuth,
            IkeFlags::response(false),
            message_id,
        );
        crypto
            .seal_message(&header, &[Payload::Eap(EapPayload { message: eap })])
            .unwrap()
    };

    // ---- IKE_AUTH #1: no AUTH payload, so start EAP with AKA-Identity ----
    let (n, peer) = socket.recv_from(&mut buf).await.unwrap();
    let request = IkeMessage::decode(&buf[..n]).unwrap();
    let inner = crypto.open_message(&buf[..n], &request).unwrap();
    assert!(!inner.iter().any(|p| matches!(p, Payload::Auth(_))));
    let child_offer = find_sa(&inner).proposals[0].clone();
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

    let identity_request = eap_request(
        1,
        SimAkaTypeData::new(SimAkaSubtype::Identity, vec![SimAkaAttribute::AnyIdReq]),
    );
    let raw = respond_eap(request.header.message_id, identity_request);
    socket.send_to(&raw, peer).await.unwrap();

    // ---- EAP round 2: identity response, send a MAC'd challenge ----
    let (n, peer) = socket.recv_from(&mut buf).await.unwrap();
    let request = IkeMessage::decode(&buf[..n]).unwrap();
    let inner = crypto.open_message(&buf[..n], &request).unwrap();
    let eap_response = EapMessage::decode(&find_eap(&inner)).unwrap();
    let td = SimAkaTypeData::decode(&eap_response.data.unwrap().type_data).unwrap();
    let identity = match td.get(attribute::AT_IDENTITY) {
        Some(SimAkaAttribute::Identity(id)) => id.clone(),
        other => panic!("Expected AT_IDENTITY, got {:?}", other),
    };
    assert_eq!(identity, format!("0{}", IMSI).into_bytes());

    let keys = SimAkaKeys::derive(&aka_master_key(&identity, &IK, &CK)).unwrap();

    let challenge_td = SimAkaTypeData::new(
        SimAkaSubtype::Challenge,
        vec![
            SimAkaAttribute::Rand(vec![0xA1; 16]),
            SimAkaAttribute::Autn([0xB2; 16]),
            SimAkaAttribute::Mac([0u8; 16]),
        ],
    );
    let unsigned = eap_request(2, challenge_td.clone());
    let mac = compute_mac(&keys.k_aut, &unsigned, b"");
    let mut signed_td = challenge_td;
    let last = signed_td.attributes.len() - 1;
    signed_td.attributes[last] = SimAkaAttribute::Mac(mac);

    let raw = respond_eap(request.header.message_id, eap_request(2, signed_td));
    socket.send_to(&raw, peer).await.unwrap();

    // ---- EAP round 3: challenge response, verify then EAP-Success ----
    let (n, peer) = socket.recv_from(&mut buf).await.unwrap();
    let request = IkeMessage::decode(&buf[..n]).unwrap();
    let inner = crypto.open_message(&buf[..n], &request).unwrap();
    let eap_bytes = find_eap(&inner);
    let eap_response = EapMessage::decode(&eap_bytes).unwrap();
    let td = SimAkaTypeData::decode(&eap_response.data.unwrap().type_data).unwrap();
    assert_eq!(td.subtype, SimAkaSubtype::Challenge);
    match td.get(attribute::AT_RES) {
        Some(SimAkaAttribute::Res(res)) => assert_eq!(res, &RES.to_vec()),
        other => panic!("Expected AT_RES, got {:?}", other),
    }
    // The response MAC covers the response with its MAC zeroed.
    let zeroed = zero_mac_in_message(&eap_bytes).unwrap();
    let expected = compute_mac(&keys.k_aut, &zeroed, b"");
    match td.get(attribute::AT_MAC) {
        Some(SimAkaAttribute::Mac(mac)) => assert_eq!(*mac, expected),
        other => panic!("Expected AT_MAC, got {:?}", other),
    }

    let success = EapMessage {
        code: EapCode::Success,
        identifier: 3,
        data: None,
    }
    .encode();
    let raw = respond_eap(request.header.message_id, success);
    socket.send_to(&raw, peer).await.unwrap();

    // ---- Final AUTH keyed by the MSK ----
    let (n, peer) = socket.recv_from(&mut buf).await.unwrap();
    let raw_final = buf[..n].to_vec();
    let request = IkeMessage::decode(&raw_final).unwrap();
    let inner = crypto.open_message(&raw_final, &request).unwrap();
    let auth_i = inner
        .iter()
        .find_map(|p| match p {
            Payload::Auth(a) => Some(a.clone()),
            _ => None,
        })
        .expect("final AUTH payload");

    let id_i = IdPayload::new(IkeIdentification::fqdn("client.example.com").unwrap());
    let signed = auth::initiator_signed_octets(
        crypto.prf(),
        &raw_init_request,
        &nonce_r,
        crypto.sk_p_peer(),
        &id_i.to_payload_data(),
    )
    .unwrap();
    auth::verify_psk_auth(crypto.prf(), &keys.msk, &signed, &auth_i).unwrap();

    // Complete: IDr, AUTH(MSK), child SA, TS.
    let child_selection = select_from(&child_offer).with_spi(vec![0x0C, 0x0D, 0x0E, 0x0F]);
    let id_r = IdPayload::new(IkeIdentification::fqdn("gateway.example.com").unwrap());
    let signed = auth::responder_signed_octets(
        crypto.prf(),
        &raw_init_response,
        &nonce_i,
        crypto.sk_p_local(),
        &id_r.to_payload_data(),
    )
    .unwrap();
    let auth_r = auth::compute_psk_auth(crypto.prf(), &keys.msk, &signed).unwrap();

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
        request.header.message_id,
    );
    let raw = crypto.seal_message(&header, &response_inner).unwrap();
    socket.send_to(&raw, peer).await.unwrap();
}

#[tokio::test]
async fn eap_aka_ike_auth_end_to_end() {
    let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let server_addr = server.local_addr().unwrap();
    let responder = tokio::spawn(run_eap_responder(server));

    let config = SessionConfig::builder()
        .with_local_id(IkeIdentification::fqdn("client.example.com").unwrap())
        .with_eap(EapMethodConfig::Aka {
            authenticator: Arc::new(TestCard),
        })
        .build()
        .unwrap();

    let mut session = IkeSession::new(config);
    session.connect(server_addr).await.unwrap();

    assert_eq!(session.state(), IkeState::Established);
    assert_eq!(session.child_sas().len(), 1);
    let child = session.child_sas().values().next().unwrap();
    assert_eq!(child.outbound_spi, [0x0C, 0x0D, 0x0E, 0x0F]);

    responder.await.unwrap();
}
