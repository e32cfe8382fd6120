//! EAP-AKA' method support (RFC 5448)
//!
//! EAP-AKA' runs the EAP-AKA machine with method type 50, the "6" identity
//! prefix, and two extra challenge requirements: AT_KDF must name the one
//! defined KDF, and AT_KDF_INPUT must carry a network name that
//! prefix-matches the locally configured one (unless the configuration
//! explicitly tolerates a mismatch). A failed check is answered with
//! AKA-Authentication-Reject.

use std::sync::Arc;

use ikepeer_platform::SimAuthenticator;

use super::aka::{AkaVariant, EapAkaMachine};
use super::simaka::attribute::{AT_KDF, AT_KDF_INPUT};
use super::simaka::{SimAkaAttribute, SimAkaTypeData};

/// The only KDF defined by RFC 5448
const SUPPORTED_KDF: u16 = 1;

/// Create an EAP-AKA' machine
pub fn new_machine(
    authenticator: Arc<dyn SimAuthenticator>,
    network_name: String,
    allow_mismatched_network_names: bool,
) -> EapAkaMachine {
    EapAkaMachine::with_variant(
        authenticator,
        AkaVariant::AkaPrime {
            network_name,
            allow_mismatched_network_names,
        },
    )
}

/// Validate the AKA'-specific challenge attributes.
pub(crate) fn is_valid_challenge_attributes(
    type_data: &SimAkaTypeData,
    peer_network_name: &str,
    allow_mismatched_network_names: bool,
) -> bool {
    let kdf = match type_data.get(AT_KDF) {
        Some(SimAkaAttribute::Kdf(kdf)) => *kdf,
        _ => return false,
    };
    if kdf != SUPPORTED_KDF {
        return false;
    }

    let server_name = match type_data.get(AT_KDF_INPUT) {
        Some(SimAkaAttribute::KdfInput(name)) if !name.is_empty() => {
            match std::str::from_utf8(name) {
                Ok(name) => name.to_string(),
                Err(_) => return false,
            }
        }
        _ => return false,
    };

    allow_mismatched_network_names
        || has_matching_network_names(peer_network_name, &server_name)
}

/// Compare two access network names (RFC 5448 Section 3.1).
///
/// Each name is broken into colon-separated fields; extra fields on the
/// longer name are ignored, so the comparison is a prefix match. An empty
/// name matches anything.
pub fn has_matching_network_names(peer_network_name: &str, server_network_name: &str) -> bool {
    if peer_network_name.is_empty() || server_network_name.is_empty() {
        return true;
    }

    peer_network_name
        .split(':')
        .zip(server_network_name.split(':'))
        .all(|(peer, server)| peer == server)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eap::aka::tests::{challenge_request, ScriptedCard, IMSI};
    use crate::eap::message::{EapCode, EapData, EapMessage, TYPE_AKA_PRIME};
    use crate::eap::simaka::attribute::AT_IDENTITY;
    use crate::eap::simaka::SimAkaSubtype;
    use crate::eap::{EapMethodStateMachine, EapResult};

    fn machine(network_name: &str, allow_mismatch: bool) -> EapAkaMachine {
        new_machine(
            Arc::new(ScriptedCard::default()),
            network_name.to_string(),
            allow_mismatch,
        )
    }

    fn decode_response(result: &EapResult) -> SimAkaTypeData {
        match result {
            EapResult::Response(bytes) => {
                let msg = EapMessage::decode(bytes).unwrap();
                SimAkaTypeData::decode(&msg.data.unwrap().type_data).unwrap()
            }
            other => panic!("Expected a response, got {:?}", other),
        }
    }

    #[test]
    fn test_network_name_prefix_match() {
        assert!(!has_matching_network_names("a:b:c", "a:b:d"));
        assert!(has_matching_network_names("a:b", "a:b:c"));
        assert!(has_matching_network_names("a:b:c", "a:b"));
        assert!(has_matching_network_names("", "anything"));
        assert!(has_matching_network_names("anything", ""));
        assert!(has_matching_network_names("WLAN", "WLAN"));
        assert!(!has_matching_network_names("WLAN", "3GPP:WLAN"));
    }

    #[test]
    fn test_challenge_attribute_validation() {
        let valid = SimAkaTypeData::new(
            SimAkaSubtype::Challenge,
            vec![
                SimAkaAttribute::Kdf(1),
                SimAkaAttribute::KdfInput(b"3GPP:WLAN".to_vec()),
            ],
        );
        assert!(is_valid_challenge_attributes(&valid, "3GPP:WLAN", false));

        // Wrong KDF
        let wrong_kdf = SimAkaTypeData::new(
            SimAkaSubtype::Challenge,
            vec![
                SimAkaAttribute::Kdf(2),
                SimAkaAttribute::KdfInput(b"3GPP:WLAN".to_vec()),
            ],
        );
        assert!(!is_valid_challenge_attributes(&wrong_kdf, "3GPP:WLAN", false));

        // Missing AT_KDF_INPUT
        let missing_input = SimAkaTypeData::new(
            SimAkaSubtype::Challenge,
            vec![SimAkaAttribute::Kdf(1)],
        );
        assert!(!is_valid_challenge_attributes(&missing_input, "WLAN", false));

        // Empty network name from the server
        let empty_input = SimAkaTypeData::new(
            SimAkaSubtype::Challenge,
            vec![
                SimAkaAttribute::Kdf(1),
                SimAkaAttribute::KdfInput(Vec::new()),
            ],
        );
        assert!(!is_valid_challenge_attributes(&empty_input, "WLAN", false));

        // Mismatch tolerated by configuration
        let mismatched = SimAkaTypeData::new(
            SimAkaSubtype::Challenge,
            vec![
                SimAkaAttribute::Kdf(1),
                SimAkaAttribute::KdfInput(b"3GPP:WLAN".to_vec()),
            ],
        );
        assert!(!is_valid_challenge_attributes(&mismatched, "WLAN", false));
        assert!(is_valid_challenge_attributes(&mismatched, "WLAN", true));
    }

    #[test]
    fn test_identity_uses_prime_prefix() {
        let mut machine = machine("WLAN", false);

        let td = SimAkaTypeData::new(
            SimAkaSubtype::Identity,
            vec![SimAkaAttribute::PermanentIdReq],
        );
        let request = EapMessage {
            code: EapCode::Request,
            identifier: 1,
            data: Some(EapData {
                eap_type: TYPE_AKA_PRIME,
                type_data: td.encode(),
            }),
        };

        let result = machine.process(&request).unwrap();
        let response = decode_response(&result);
        match response.get(AT_IDENTITY) {
            Some(SimAkaAttribute::Identity(id)) => {
                assert_eq!(id, &format!("6{}", IMSI).into_bytes());
            }
            other => panic!("Expected AT_IDENTITY, got {:?}", other),
        }
    }

    #[test]
    fn test_network_name_mismatch_emits_authentication_reject() {
        // Peer is configured for "WLAN"; the server names "3GPP:WLAN".
        let mut machine = machine("WLAN", false);
        let identity = format!("6{}", IMSI).into_bytes();

        let challenge = challenge_request(
            2,
            &ScriptedCard::default(),
            &identity,
            TYPE_AKA_PRIME,
            vec![
                SimAkaAttribute::KdfInput(b"3GPP:WLAN".to_vec()),
                SimAkaAttribute::Kdf(1),
            ],
        );

        let result = machine.process(&challenge).unwrap();
        let response = decode_response(&result);
        assert_eq!(response.subtype, SimAkaSubtype::AuthenticationReject);
    }

    #[test]
    fn test_matching_network_name_authenticates() {
        let mut machine = machine("3GPP", false);
        let identity = format!("6{}", IMSI).into_bytes();

        // Server name "3GPP:WLAN" prefix-matches peer name "3GPP".
        let challenge = challenge_request(
            2,
            &ScriptedCard::default(),
            &identity,
            TYPE_AKA_PRIME,
            vec![
                SimAkaAttribute::KdfInput(b"3GPP:WLAN".to_vec()),
                SimAkaAttribute::Kdf(1),
            ],
        );

        // Identity must match what the MAC was derived with.
        machine.identity().unwrap();

        let result = machine.process(&challenge).unwrap();
        let response = decode_response(&result);
        assert_eq!(response.subtype, SimAkaSubtype::Challenge);
        assert!(response.has(crate::eap::simaka::attribute::AT_RES));
    }
}
