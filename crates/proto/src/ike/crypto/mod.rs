//! Cryptographic session for an IKE SA
//!
//! Binds the negotiated PRF, cipher and integrity algorithms to the
//! derived key material and performs SK payload sealing/opening
//! (RFC 7296 Section 3.14, RFC 5282 for combined-mode ciphers).

pub mod cipher;
pub mod dh;
pub mod integ;
pub mod prf;

pub use cipher::CipherAlgorithm;
pub use dh::{DhGroup, DhKeyPair};
pub use integ::IntegAlgorithm;
pub use prf::{KeyMaterial, PrfAlgorithm};

use rand::RngCore;

use super::constants::{IkeFlags, ExchangeType, PayloadType, IKE_HEADER_SIZE, PAYLOAD_HEADER_SIZE};
use super::message::{decode_payload_chain, encode_payload_chain, IkeHeader, IkeMessage};
use super::payload::Payload;
use super::proposal::{Proposal, TransformType};
use crate::ike::{Error, Result};

/// The algorithm suite resolved from a negotiated proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlgorithmSuite {
    /// Negotiated PRF
    pub prf: PrfAlgorithm,
    /// Negotiated cipher
    pub cipher: CipherAlgorithm,
    /// Negotiated integrity algorithm (None for combined-mode)
    pub integ: Option<IntegAlgorithm>,
}

impl AlgorithmSuite {
    /// Resolve the algorithm suite from a negotiated IKE proposal.
    pub fn from_proposal(proposal: &Proposal) -> Result<Self> {
        let encr = proposal
            .get_transform(TransformType::Encr)
            .ok_or_else(|| Error::NoProposalChosen)?;
        let cipher = CipherAlgorithm::from_transform(encr.transform_id, encr.key_length)?;

        let prf_transform = proposal
            .get_transform(TransformType::Prf)
            .ok_or_else(|| Error::NoProposalChosen)?;
        let prf = PrfAlgorithm::from_transform_id(prf_transform.transform_id)?;

        let integ = match proposal.get_transform(TransformType::Integ) {
            Some(t) => IntegAlgorithm::from_transform_id(t.transform_id)?,
            None => None,
        };

        if cipher.is_aead() && integ.is_some() {
            return Err(Error::NoProposalChosen);
        }
        if !cipher.is_aead() && integ.is_none() {
            return Err(Error::NoProposalChosen);
        }

        Ok(AlgorithmSuite { prf, cipher, integ })
    }

    /// SK_e length to derive (cipher key plus AEAD salt)
    pub fn encr_key_len(&self) -> usize {
        self.cipher.keymat_len()
    }

    /// SK_a length to derive (0 for combined-mode)
    pub fn integ_key_len(&self) -> usize {
        self.integ.map(|i| i.key_len()).unwrap_or(0)
    }
}

/// Crypto context of an established (or establishing) IKE SA.
///
/// Owns the key material; dropped (and zeroized) when the SA closes.
pub struct IkeCrypto {
    suite: AlgorithmSuite,
    keys: KeyMaterial,
    is_initiator: bool,
}

impl std::fmt::Debug for IkeCrypto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IkeCrypto")
            .field("suite", &self.suite)
            .field("is_initiator", &self.is_initiator)
            .finish()
    }
}

impl IkeCrypto {
    /// Derive the crypto context for a fresh IKE SA.
    #[allow(clippy::too_many_arguments)]
    pub fn negotiate(
        proposal: &Proposal,
        is_initiator: bool,
        nonce_i: &[u8],
        nonce_r: &[u8],
        shared_secret: &[u8],
        spi_i: &[u8; 8],
        spi_r: &[u8; 8],
    ) -> Result<Self> {
        let suite = AlgorithmSuite::from_proposal(proposal)?;
        let keys = KeyMaterial::derive(
            suite.prf,
            nonce_i,
            nonce_r,
            shared_secret,
            spi_i,
            spi_r,
            suite.encr_key_len(),
            suite.integ_key_len(),
        )?;

        Ok(IkeCrypto {
            suite,
            keys,
            is_initiator,
        })
    }

    /// Derive the crypto context for a rekeyed IKE SA (RFC 7296 Section 2.18).
    #[allow(clippy::too_many_arguments)]
    pub fn rekey(
        &self,
        proposal: &Proposal,
        nonce_i: &[u8],
        nonce_r: &[u8],
        shared_secret: &[u8],
        spi_i: &[u8; 8],
        spi_r: &[u8; 8],
    ) -> Result<Self> {
        let suite = AlgorithmSuite::from_proposal(proposal)?;
        let keys = KeyMaterial::derive_rekeyed(
            suite.prf,
            &self.keys.sk_d,
            nonce_i,
            nonce_r,
            shared_secret,
            spi_i,
            spi_r,
            suite.encr_key_len(),
            suite.integ_key_len(),
        )?;

        Ok(IkeCrypto {
            suite,
            keys,
            is_initiator: self.is_initiator,
        })
    }

    /// Negotiated PRF
    pub fn prf(&self) -> PrfAlgorithm {
        self.suite.prf
    }

    /// SK_d for Child SA key derivation
    pub fn sk_d(&self) -> &[u8] {
        &self.keys.sk_d
    }

    /// Our AUTH payload key (SK_pi for the initiator)
    pub fn sk_p_local(&self) -> &[u8] {
        if self.is_initiator {
            &self.keys.sk_pi
        } else {
            &self.keys.sk_pr
        }
    }

    /// The peer's AUTH payload key (SK_pr for the initiator)
    pub fn sk_p_peer(&self) -> &[u8] {
        if self.is_initiator {
            &self.keys.sk_pr
        } else {
            &self.keys.sk_pi
        }
    }

    fn send_keys(&self) -> (&[u8], &[u8]) {
        if self.is_initiator {
            (&self.keys.sk_ei, &self.keys.sk_ai)
        } else {
            (&self.keys.sk_er, &self.keys.sk_ar)
        }
    }

    fn recv_keys(&self) -> (&[u8], &[u8]) {
        if self.is_initiator {
            (&self.keys.sk_er, &self.keys.sk_ar)
        } else {
            (&self.keys.sk_ei, &self.keys.sk_ai)
        }
    }

    /// Seal `inner` payloads into a complete SK-protected datagram.
    ///
    /// The header's first-payload and length fields are computed here; the
    /// SK payload is the only outer payload, matching what this stack emits.
    pub fn seal_message(&self, header: &IkeHeader, inner: &[Payload]) -> Result<Vec<u8>> {
        let (first_inner, inner_bytes) = encode_payload_chain(inner);
        let (sk_e, sk_a) = self.send_keys();
        let cipher = self.suite.cipher;

        let mut iv = vec![0u8; cipher.iv_len()];
        rand::thread_rng().fill_bytes(&mut iv);

        if cipher.is_aead() {
            // Pad Length byte only: AEAD needs no block alignment.
            let mut plaintext = inner_bytes;
            plaintext.push(0);

            let body_len = iv.len() + plaintext.len() + cipher.tag_len();
            let total_len = IKE_HEADER_SIZE + PAYLOAD_HEADER_SIZE + body_len;

            let mut out = Vec::with_capacity(total_len);
            out.extend_from_slice(&self.sk_header_bytes(header, first_inner, total_len));

            // AAD is everything before the IV.
            let ct = cipher.seal(sk_e, &iv, &plaintext, &out)?;
            out.extend_from_slice(&iv);
            out.extend_from_slice(&ct);
            Ok(out)
        } else {
            let integ = self.suite.integ.ok_or_else(|| {
                Error::Internal("Non-AEAD cipher without integrity algorithm".to_string())
            })?;

            let block = cipher.block_len();
            let pad_len = (block - ((inner_bytes.len() + 1) % block)) % block;
            let mut plaintext = inner_bytes;
            plaintext.extend_from_slice(&vec![0u8; pad_len]);
            plaintext.push(pad_len as u8);

            let ct = cipher.encrypt(sk_e, &iv, &plaintext)?;
            let body_len = iv.len() + ct.len() + integ.checksum_len();
            let total_len = IKE_HEADER_SIZE + PAYLOAD_HEADER_SIZE + body_len;

            let mut out = Vec::with_capacity(total_len);
            out.extend_from_slice(&self.sk_header_bytes(header, first_inner, total_len));
            out.extend_from_slice(&iv);
            out.extend_from_slice(&ct);

            // Checksum over the whole message minus the ICV itself.
            let checksum = integ.compute_checksum(sk_a, &out)?;
            out.extend_from_slice(&checksum);
            Ok(out)
        }
    }

    /// Authenticate and decrypt the SK payload of a received message,
    /// returning the decoded inner payload chain.
    ///
    /// `raw` must be the exact datagram bytes the message was decoded from.
    pub fn open_message(&self, raw: &[u8], message: &IkeMessage) -> Result<Vec<Payload>> {
        let sk = message
            .payloads
            .iter()
            .find_map(|p| match p {
                Payload::Sk(sk) => Some(sk),
                _ => None,
            })
            .ok_or_else(|| {
                Error::MalformedMessage("Expected an SK payload".to_string())
            })?;

        let (sk_e, sk_a) = self.recv_keys();
        let cipher = self.suite.cipher;

        // The SK body is the tail of the datagram.
        if sk.data.len() > raw.len() {
            return Err(Error::Internal(
                "SK payload larger than datagram".to_string(),
            ));
        }
        let before_body = raw.len() - sk.data.len();

        let plaintext = if cipher.is_aead() {
            let (iv, ct_and_tag, _) = sk.split(cipher.iv_len(), 0)?;
            let aad = &raw[..before_body];
            cipher.open(sk_e, iv, ct_and_tag, aad)?
        } else {
            let integ = self.suite.integ.ok_or_else(|| {
                Error::Internal("Non-AEAD cipher without integrity algorithm".to_string())
            })?;
            let csum_len = integ.checksum_len();

            let (iv, ct, icv) = sk.split(cipher.iv_len(), csum_len)?;
            integ.verify_checksum(sk_a, &raw[..raw.len() - csum_len], icv)?;
            cipher.decrypt(sk_e, iv, ct)?
        };

        // Strip RFC 4303-style padding: last byte is the pad length, the
        // pad bytes themselves are not inspected.
        let pad_len = *plaintext.last().ok_or(Error::DecryptionFailure)? as usize;
        if pad_len + 1 > plaintext.len() {
            return Err(Error::DecryptionFailure);
        }
        let inner = &plaintext[..plaintext.len() - 1 - pad_len];

        decode_payload_chain(sk.first_payload, inner)
    }

    fn sk_header_bytes(&self, header: &IkeHeader, first_inner: u8, total_len: usize) -> Vec<u8> {
        let mut hdr = header.clone();
        hdr.first_payload = PayloadType::SK.to_u8();
        hdr.length = total_len as u32;

        let sk_len = (total_len - IKE_HEADER_SIZE) as u16;

        let mut out = Vec::with_capacity(IKE_HEADER_SIZE + PAYLOAD_HEADER_SIZE);
        out.extend_from_slice(&hdr.to_bytes());
        out.push(first_inner);
        out.push(0);
        out.extend_from_slice(&sk_len.to_be_bytes());
        out
    }
}

/// Build a header template for an SK-protected message.
///
/// Length and first-payload are filled in by [`IkeCrypto::seal_message`].
pub fn sk_header(
    initiator_spi: [u8; 8],
    responder_spi: [u8; 8],
    exchange_type: ExchangeType,
    flags: IkeFlags,
    message_id: u32,
) -> IkeHeader {
    IkeHeader::new(
        initiator_spi,
        responder_spi,
        PayloadType::SK.to_u8(),
        exchange_type,
        flags,
        message_id,
        0,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ike::payload::{NoncePayload, NotifyPayload, NotifyType};
    use crate::ike::proposal::{dh, integ as integ_id, prf as prf_id, ProtocolId, Transform};

    fn cbc_proposal() -> Proposal {
        Proposal::new(1, ProtocolId::Ike)
            .add_transform(Transform::encr_aes_cbc(256))
            .add_transform(Transform::prf(prf_id::HMAC_SHA2_256))
            .add_transform(Transform::integ(integ_id::HMAC_SHA2_256_128))
            .add_transform(Transform::dh(dh::MODP_2048))
    }

    fn gcm_proposal() -> Proposal {
        Proposal::new(1, ProtocolId::Ike)
            .add_transform(Transform::encr_aes_gcm_16(128))
            .add_transform(Transform::prf(prf_id::HMAC_SHA2_256))
            .add_transform(Transform::dh(dh::MODP_2048))
    }

    fn crypto_pair(proposal: &Proposal) -> (IkeCrypto, IkeCrypto) {
        let nonce_i = vec![0x01; 32];
        let nonce_r = vec![0x02; 32];
        let secret = vec![0x03; 256];
        let spi_i = [0x0A; 8];
        let spi_r = [0x0B; 8];

        let initiator = IkeCrypto::negotiate(
            proposal, true, &nonce_i, &nonce_r, &secret, &spi_i, &spi_r,
        )
        .unwrap();
        let responder = IkeCrypto::negotiate(
            proposal, false, &nonce_i, &nonce_r, &secret, &spi_i, &spi_r,
        )
        .unwrap();
        (initiator, responder)
    }

    fn inner_payloads() -> Vec<Payload> {
        vec![
            Payload::Nonce(NoncePayload::new(vec![0xAB; 24]).unwrap()),
            Payload::Notify(NotifyPayload::status(NotifyType::InitialContact, Vec::new())),
        ]
    }

    fn header() -> IkeHeader {
        sk_header(
            [1; 8],
            [2; 8],
            ExchangeType::Informational,
            IkeFlags::request(true),
            3,
        )
    }

    #[test]
    fn test_algorithm_suite_resolution() {
        let suite = AlgorithmSuite::from_proposal(&cbc_proposal()).unwrap();
        assert_eq!(suite.prf, PrfAlgorithm::HmacSha256);
        assert_eq!(suite.cipher, CipherAlgorithm::AesCbc256);
        assert_eq!(suite.integ, Some(IntegAlgorithm::HmacSha256_128));
        assert_eq!(suite.encr_key_len(), 32);
        assert_eq!(suite.integ_key_len(), 32);

        let suite = AlgorithmSuite::from_proposal(&gcm_proposal()).unwrap();
        assert_eq!(suite.cipher, CipherAlgorithm::AesGcm16_128);
        assert_eq!(suite.integ, None);
        assert_eq!(suite.encr_key_len(), 20);
        assert_eq!(suite.integ_key_len(), 0);
    }

    #[test]
    fn test_seal_open_roundtrip_cbc() {
        let (initiator, responder) = crypto_pair(&cbc_proposal());
        let inner = inner_payloads();

        let raw = initiator.seal_message(&header(), &inner).unwrap();

        let message = IkeMessage::decode(&raw).unwrap();
        let opened = responder.open_message(&raw, &message).unwrap();
        assert_eq!(opened, inner);
    }

    #[test]
    fn test_seal_open_roundtrip_gcm() {
        let (initiator, responder) = crypto_pair(&gcm_proposal());
        let inner = inner_payloads();

        let raw = initiator.seal_message(&header(), &inner).unwrap();

        let message = IkeMessage::decode(&raw).unwrap();
        let opened = responder.open_message(&raw, &message).unwrap();
        assert_eq!(opened, inner);
    }

    #[test]
    fn test_icv_bit_flip_rejected_cbc() {
        let (initiator, responder) = crypto_pair(&cbc_proposal());
        let mut raw = initiator.seal_message(&header(), &inner_payloads()).unwrap();

        // Flip one bit in the trailing ICV; length fields stay intact.
        let last = raw.len() - 1;
        raw[last] ^= 0x01;

        let message = IkeMessage::decode(&raw).unwrap();
        let result = responder.open_message(&raw, &message);
        assert!(matches!(result, Err(Error::IntegrityFailure)));
    }

    #[test]
    fn test_tag_bit_flip_rejected_gcm() {
        let (initiator, responder) = crypto_pair(&gcm_proposal());
        let mut raw = initiator.seal_message(&header(), &inner_payloads()).unwrap();

        let last = raw.len() - 1;
        raw[last] ^= 0x80;

        let message = IkeMessage::decode(&raw).unwrap();
        let result = responder.open_message(&raw, &message);
        assert!(matches!(result, Err(Error::IntegrityFailure)));
    }

    #[test]
    fn test_wrong_direction_keys_rejected() {
        let (initiator, _responder) = crypto_pair(&cbc_proposal());
        let raw = initiator.seal_message(&header(), &inner_payloads()).unwrap();

        // The initiator cannot open its own message: receive keys differ.
        let message = IkeMessage::decode(&raw).unwrap();
        let result = initiator.open_message(&raw, &message);
        assert!(matches!(result, Err(Error::IntegrityFailure)));
    }

    #[test]
    fn test_ciphertext_tamper_rejected_after_checksum() {
        let (initiator, responder) = crypto_pair(&cbc_proposal());
        let mut raw = initiator.seal_message(&header(), &inner_payloads()).unwrap();

        // Flip a ciphertext byte (just after the 16-byte IV).
        raw[IKE_HEADER_SIZE + PAYLOAD_HEADER_SIZE + 16] ^= 0xFF;

        let message = IkeMessage::decode(&raw).unwrap();
        let result = responder.open_message(&raw, &message);
        assert!(matches!(result, Err(Error::IntegrityFailure)));
    }

    #[test]
    fn test_rekey_derives_fresh_keys() {
        let (initiator, _) = crypto_pair(&cbc_proposal());

        let rekeyed = initiator
            .rekey(
                &cbc_proposal(),
                &[0x11; 32],
                &[0x12; 32],
                &[0x13; 256],
                &[0x21; 8],
                &[0x22; 8],
            )
            .unwrap();

        assert_ne!(initiator.sk_d(), rekeyed.sk_d());
    }

    #[test]
    fn test_sk_header_template() {
        let hdr = header();
        assert_eq!(hdr.first_payload, PayloadType::SK.to_u8());
        assert_eq!(hdr.exchange_type, ExchangeType::Informational);
        assert_eq!(hdr.message_id, 3);
    }
}
