//! Wire-format conformance checks against fixed, literal inputs.

use ikepeer_proto::ike::constants::{ExchangeType, IkeFlags, PayloadType};
use ikepeer_proto::ike::message::IkeMessage;
use ikepeer_proto::ike::payload::{NoncePayload, Payload};
use ikepeer_proto::ike::proposal::{
    dh, integ, prf, Proposal, ProtocolId, SaPayload, Transform, TransformType,
};
use ikepeer_proto::ike::ts::TsPayload;
use ikepeer_proto::ike::Error;
use ikepeer_proto::ike::IkeHeader;

fn sa_init_offer() -> Proposal {
    Proposal::new(1, ProtocolId::Ike)
        .add_transform(Transform::encr_aes_cbc(256))
        .add_transform(Transform::prf(prf::HMAC_SHA2_256))
        .add_transform(Transform::integ(integ::HMAC_SHA2_256_128))
        .add_transform(Transform::dh(dh::MODP_2048))
}

#[test]
fn sa_init_round_trip_and_negotiation() {
    // IKE_SA_INIT request with SPIi=0x0102030405060708, SPIr=0, proposing
    // IKE/ENCR_AES_CBC-256/PRF_HMAC_SHA2_256/INTEG_HMAC_SHA2_256_128/DH_2048.
    let header = IkeHeader::new(
        [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08],
        [0u8; 8],
        PayloadType::SA.to_u8(),
        ExchangeType::IkeSaInit,
        IkeFlags::request(true),
        0,
        0,
    );
    let message = IkeMessage::new(
        header,
        vec![
            Payload::Sa(SaPayload::new(vec![sa_init_offer()]).unwrap()),
            Payload::Nonce(NoncePayload::new(vec![0x42; 32]).unwrap()),
        ],
    );

    let bytes = message.encode();
    let decoded = IkeMessage::decode(&bytes).unwrap();

    assert_eq!(
        decoded.header.initiator_spi,
        [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]
    );
    assert_eq!(decoded.header.responder_spi, [0u8; 8]);
    assert_eq!(decoded.payloads, message.payloads);
    // Round-trip law
    assert_eq!(decoded.encode(), bytes);

    // The responder-selected proposal (the same four transforms, one each)
    // is a valid selection.
    let selection = Proposal::new(1, ProtocolId::Ike)
        .add_transform(Transform::encr_aes_cbc(256))
        .add_transform(Transform::prf(prf::HMAC_SHA2_256))
        .add_transform(Transform::integ(integ::HMAC_SHA2_256_128))
        .add_transform(Transform::dh(dh::MODP_2048));
    assert!(selection.is_negotiated_from(&sa_init_offer()));

    let response = SaPayload::new(vec![selection]).unwrap();
    let offers = SaPayload::new(vec![sa_init_offer()]).unwrap();
    assert!(response.validate_response(&offers).is_ok());
}

#[test]
fn proposal_outside_offer_is_rejected() {
    // Response proposes ENCR_AES_GCM_16 while the request offered only
    // ENCR_AES_CBC.
    let offers = SaPayload::new(vec![sa_init_offer()]).unwrap();

    let response = SaPayload::new(vec![Proposal::new(1, ProtocolId::Ike)
        .add_transform(Transform::encr_aes_gcm_16(256))
        .add_transform(Transform::prf(prf::HMAC_SHA2_256))
        .add_transform(Transform::dh(dh::MODP_2048))])
    .unwrap();

    assert!(matches!(
        response.validate_response(&offers),
        Err(Error::NoProposalChosen)
    ));
}

#[test]
fn inverted_address_range_is_invalid_syntax() {
    // A v4 selector with start=10.0.0.5, end=10.0.0.1.
    let mut bytes = Vec::new();
    bytes.push(1u8); // one selector
    bytes.extend_from_slice(&[0u8; 3]); // reserved
    bytes.push(7); // TS_IPV4_ADDR_RANGE
    bytes.push(0); // any protocol
    bytes.extend_from_slice(&16u16.to_be_bytes()); // selector length
    bytes.extend_from_slice(&0u16.to_be_bytes()); // start port
    bytes.extend_from_slice(&65535u16.to_be_bytes()); // end port
    bytes.extend_from_slice(&[10, 0, 0, 5]); // start address
    bytes.extend_from_slice(&[10, 0, 0, 1]); // end address

    let result = TsPayload::from_payload_data(&bytes);
    assert!(matches!(result, Err(Error::InvalidSyntax(_))));
}

#[test]
fn traffic_selector_encoded_widths() {
    let v4 = ikepeer_proto::ike::ts::TrafficSelector::new(
        "10.0.0.1".parse().unwrap(),
        "10.0.0.9".parse().unwrap(),
    )
    .unwrap();
    assert_eq!(v4.encode().len(), 16);

    let v6 = ikepeer_proto::ike::ts::TrafficSelector::new(
        "2001:db8::1".parse().unwrap(),
        "2001:db8::9".parse().unwrap(),
    )
    .unwrap();
    assert_eq!(v6.encode().len(), 40);
}

#[test]
fn transform_type_codes_match_rfc() {
    assert_eq!(TransformType::Encr.to_u8(), 1);
    assert_eq!(TransformType::Prf.to_u8(), 2);
    assert_eq!(TransformType::Integ.to_u8(), 3);
    assert_eq!(TransformType::Dh.to_u8(), 4);
    assert_eq!(TransformType::Esn.to_u8(), 5);

    assert_eq!(PayloadType::SA.to_u8(), 33);
    assert_eq!(PayloadType::EAP.to_u8(), 48);
    assert_eq!(ExchangeType::IkeSaInit.to_u8(), 34);
    assert_eq!(ExchangeType::Informational.to_u8(), 37);
}
