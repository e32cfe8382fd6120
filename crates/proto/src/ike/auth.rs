//! IKEv2 Authentication
//!
//! Implements AUTH payload computation as defined in RFC 7296 Section
//! 2.15/2.16. With EAP, the exported MSK takes the place of the shared
//! secret for both directions.

use subtle::ConstantTimeEq;

use super::crypto::PrfAlgorithm;
use super::payload::{AuthMethod, AuthPayload};
use crate::ike::{Error, Result};

/// Key pad for IKEv2 (RFC 7296 Section 2.15)
const KEY_PAD_IKEV2: &[u8] = b"Key Pad for IKEv2";

/// Compute the AUTH payload for shared-secret authentication.
///
/// ```text
/// AUTH = prf(prf(Shared Secret, "Key Pad for IKEv2"), <SignedOctets>)
/// ```
///
/// With EAP (RFC 7296 Section 2.16) the shared secret is the MSK exported
/// by the EAP method.
pub fn compute_psk_auth(
    prf_alg: PrfAlgorithm,
    shared_secret: &[u8],
    signed_octets: &[u8],
) -> Result<AuthPayload> {
    let padded = prf_alg.compute(shared_secret, KEY_PAD_IKEV2)?;
    let auth_data = prf_alg.compute(&padded, signed_octets)?;
    Ok(AuthPayload::new(AuthMethod::SharedKeyMic, auth_data))
}

/// Verify a received AUTH payload for shared-secret authentication.
pub fn verify_psk_auth(
    prf_alg: PrfAlgorithm,
    shared_secret: &[u8],
    signed_octets: &[u8],
    received: &AuthPayload,
) -> Result<()> {
    if received.auth_method != AuthMethod::SharedKeyMic {
        return Err(Error::AuthenticationFailed(format!(
            "Expected shared-key MIC auth, got {:?}",
            received.auth_method
        )));
    }

    let expected = compute_psk_auth(prf_alg, shared_secret, signed_octets)?;

    if expected.auth_data.len() != received.auth_data.len() {
        return Err(Error::AuthenticationFailed(
            "AUTH data length mismatch".to_string(),
        ));
    }

    if expected.auth_data.ct_eq(&received.auth_data).into() {
        Ok(())
    } else {
        Err(Error::AuthenticationFailed(
            "AUTH verification failed".to_string(),
        ))
    }
}

/// Construct the initiator's signed octets (RFC 7296 Section 2.15).
///
/// ```text
/// InitiatorSignedOctets = RealMessage1 | NonceR | prf(SK_pi, IDi')
/// ```
pub fn initiator_signed_octets(
    prf_alg: PrfAlgorithm,
    real_message1: &[u8],
    nonce_r: &[u8],
    sk_pi: &[u8],
    id_i_data: &[u8],
) -> Result<Vec<u8>> {
    let id_hash = prf_alg.compute(sk_pi, id_i_data)?;

    let mut signed = Vec::with_capacity(real_message1.len() + nonce_r.len() + id_hash.len());
    signed.extend_from_slice(real_message1);
    signed.extend_from_slice(nonce_r);
    signed.extend_from_slice(&id_hash);
    Ok(signed)
}

/// Construct the responder's signed octets (RFC 7296 Section 2.15).
///
/// ```text
/// ResponderSignedOctets = RealMessage2 | NonceI | prf(SK_pr, IDr')
/// ```
pub fn responder_signed_octets(
    prf_alg: PrfAlgorithm,
    real_message2: &[u8],
    nonce_i: &[u8],
    sk_pr: &[u8],
    id_r_data: &[u8],
) -> Result<Vec<u8>> {
    let id_hash = prf_alg.compute(sk_pr, id_r_data)?;

    let mut signed = Vec::with_capacity(real_message2.len() + nonce_i.len() + id_hash.len());
    signed.extend_from_slice(real_message2);
    signed.extend_from_slice(nonce_i);
    signed.extend_from_slice(&id_hash);
    Ok(signed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_psk_auth() {
        let auth =
            compute_psk_auth(PrfAlgorithm::HmacSha256, &[0x01; 32], &[0x02; 128]).unwrap();
        assert_eq!(auth.auth_method, AuthMethod::SharedKeyMic);
        assert_eq!(auth.auth_data.len(), 32);
    }

    #[test]
    fn test_psk_auth_deterministic() {
        let auth1 =
            compute_psk_auth(PrfAlgorithm::HmacSha256, &[0xAA; 32], &[0xBB; 64]).unwrap();
        let auth2 =
            compute_psk_auth(PrfAlgorithm::HmacSha256, &[0xAA; 32], &[0xBB; 64]).unwrap();
        assert_eq!(auth1.auth_data, auth2.auth_data);
    }

    #[test]
    fn test_verify_psk_auth_roundtrip() {
        let secret = vec![0x03; 64];
        let octets = vec![0x04; 100];

        let auth = compute_psk_auth(PrfAlgorithm::HmacSha256, &secret, &octets).unwrap();
        verify_psk_auth(PrfAlgorithm::HmacSha256, &secret, &octets, &auth).unwrap();
    }

    #[test]
    fn test_verify_psk_auth_wrong_secret() {
        let octets = vec![0x04; 100];
        let auth = compute_psk_auth(PrfAlgorithm::HmacSha256, &[0x05; 64], &octets).unwrap();

        let result = verify_psk_auth(PrfAlgorithm::HmacSha256, &[0x06; 64], &octets, &auth);
        assert!(matches!(result, Err(Error::AuthenticationFailed(_))));
    }

    #[test]
    fn test_verify_psk_auth_wrong_method() {
        let auth = AuthPayload::new(AuthMethod::RsaSig, vec![0xFF; 32]);
        let result =
            verify_psk_auth(PrfAlgorithm::HmacSha256, &[0x07; 32], &[0x08; 64], &auth);
        assert!(matches!(result, Err(Error::AuthenticationFailed(_))));
    }

    #[test]
    fn test_initiator_signed_octets_layout() {
        let message1 = vec![0x01; 200];
        let nonce_r = vec![0x02; 32];

        let octets = initiator_signed_octets(
            PrfAlgorithm::HmacSha256,
            &message1,
            &nonce_r,
            &[0x03; 32],
            &[0x04; 20],
        )
        .unwrap();

        assert_eq!(octets.len(), 200 + 32 + 32);
        assert_eq!(&octets[0..200], &message1[..]);
        assert_eq!(&octets[200..232], &nonce_r[..]);
    }

    #[test]
    fn test_responder_signed_octets_layout() {
        let message2 = vec![0x05; 250];
        let nonce_i = vec![0x06; 32];

        let octets = responder_signed_octets(
            PrfAlgorithm::HmacSha384,
            &message2,
            &nonce_i,
            &[0x07; 48],
            &[0x08; 25],
        )
        .unwrap();

        // SHA-384 PRF output is 48 bytes
        assert_eq!(octets.len(), 250 + 32 + 48);
        assert_eq!(&octets[0..250], &message2[..]);
    }
}
