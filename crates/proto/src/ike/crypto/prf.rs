//! Pseudo-Random Function (PRF) implementations
//!
//! Implements PRF algorithms for IKEv2 key derivation as defined in
//! RFC 7296 Section 2.13/2.14.

use crate::ike::proposal::prf as prf_id;
use crate::ike::{Error, Result};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::{Sha256, Sha384, Sha512};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// PRF algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrfAlgorithm {
    /// PRF_HMAC_SHA1
    HmacSha1,
    /// PRF_AES128_XCBC (negotiable; compute path not backed yet)
    Aes128Xcbc,
    /// PRF_HMAC_SHA2_256
    HmacSha256,
    /// PRF_HMAC_SHA2_384
    HmacSha384,
    /// PRF_HMAC_SHA2_512
    HmacSha512,
}

impl PrfAlgorithm {
    /// Resolve a negotiated PRF transform ID
    pub fn from_transform_id(id: u16) -> Result<Self> {
        match id {
            prf_id::HMAC_SHA1 => Ok(PrfAlgorithm::HmacSha1),
            prf_id::AES128_XCBC => Ok(PrfAlgorithm::Aes128Xcbc),
            prf_id::HMAC_SHA2_256 => Ok(PrfAlgorithm::HmacSha256),
            prf_id::HMAC_SHA2_384 => Ok(PrfAlgorithm::HmacSha384),
            prf_id::HMAC_SHA2_512 => Ok(PrfAlgorithm::HmacSha512),
            _ => Err(Error::UnsupportedAlgorithm(format!(
                "PRF transform ID {}",
                id
            ))),
        }
    }

    /// Get PRF output length in bytes
    pub fn output_len(self) -> usize {
        match self {
            PrfAlgorithm::HmacSha1 => 20,
            PrfAlgorithm::Aes128Xcbc => 16,
            PrfAlgorithm::HmacSha256 => 32,
            PrfAlgorithm::HmacSha384 => 48,
            PrfAlgorithm::HmacSha512 => 64,
        }
    }

    /// Compute PRF over `data` keyed with `key`
    ///
    /// # Errors
    ///
    /// `UnsupportedAlgorithm` for PRF_AES128_XCBC, whose backend is not
    /// wired up.
    pub fn compute(self, key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        match self {
            PrfAlgorithm::HmacSha1 => {
                let mut mac =
                    Hmac::<Sha1>::new_from_slice(key).expect("HMAC can take key of any size");
                mac.update(data);
                Ok(mac.finalize().into_bytes().to_vec())
            }
            PrfAlgorithm::Aes128Xcbc => Err(Error::UnsupportedAlgorithm(
                "PRF_AES128_XCBC has no backend implementation".to_string(),
            )),
            PrfAlgorithm::HmacSha256 => {
                let mut mac =
                    Hmac::<Sha256>::new_from_slice(key).expect("HMAC can take key of any size");
                mac.update(data);
                Ok(mac.finalize().into_bytes().to_vec())
            }
            PrfAlgorithm::HmacSha384 => {
                let mut mac =
                    Hmac::<Sha384>::new_from_slice(key).expect("HMAC can take key of any size");
                mac.update(data);
                Ok(mac.finalize().into_bytes().to_vec())
            }
            PrfAlgorithm::HmacSha512 => {
                let mut mac =
                    Hmac::<Sha512>::new_from_slice(key).expect("HMAC can take key of any size");
                mac.update(data);
                Ok(mac.finalize().into_bytes().to_vec())
            }
        }
    }

    /// Compute prf+ (key expansion function)
    ///
    /// Defined in RFC 7296 Section 2.13:
    /// ```text
    /// prf+ (K,S) = T1 | T2 | T3 | T4 | ...
    ///
    /// where:
    /// T1 = prf (K, S | 0x01)
    /// T2 = prf (K, T1 | S | 0x02)
    /// T3 = prf (K, T2 | S | 0x03)
    /// ...
    /// ```
    pub fn prf_plus(self, key: &[u8], seed: &[u8], output_len: usize) -> Result<Vec<u8>> {
        let mut output = Vec::with_capacity(output_len);
        let mut t = Vec::new();
        let mut counter: u8 = 1;

        while output.len() < output_len {
            let mut input = Vec::with_capacity(t.len() + seed.len() + 1);
            input.extend_from_slice(&t);
            input.extend_from_slice(seed);
            input.push(counter);

            t = self.compute(key, &input)?;
            output.extend_from_slice(&t);

            counter = counter.checked_add(1).ok_or_else(|| {
                Error::Internal("prf+ counter exhausted".to_string())
            })?;
        }

        output.truncate(output_len);
        Ok(output)
    }
}

/// IKEv2 key material derived from SKEYSEED
///
/// Contains all keys derived during the IKE_SA_INIT exchange. Zeroized on
/// drop; the session must drop it on every SA close path.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    /// SK_d - Key for deriving Child SA keys
    pub sk_d: Vec<u8>,

    /// SK_ai - Initiator's integrity key
    pub sk_ai: Vec<u8>,

    /// SK_ar - Responder's integrity key
    pub sk_ar: Vec<u8>,

    /// SK_ei - Initiator's encryption key
    pub sk_ei: Vec<u8>,

    /// SK_er - Responder's encryption key
    pub sk_er: Vec<u8>,

    /// SK_pi - Initiator's AUTH payload key
    pub sk_pi: Vec<u8>,

    /// SK_pr - Responder's AUTH payload key
    pub sk_pr: Vec<u8>,
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key bytes stay out of logs.
        f.debug_struct("KeyMaterial")
            .field("sk_d_len", &self.sk_d.len())
            .field("sk_e_len", &self.sk_ei.len())
            .field("sk_a_len", &self.sk_ai.len())
            .field("sk_p_len", &self.sk_pi.len())
            .finish()
    }
}

impl KeyMaterial {
    /// Derive IKEv2 key material.
    ///
    /// Implements RFC 7296 Section 2.14:
    /// ```text
    /// SKEYSEED = prf(Ni | Nr, g^ir)
    /// {SK_d | SK_ai | SK_ar | SK_ei | SK_er | SK_pi | SK_pr}
    ///     = prf+ (SKEYSEED, Ni | Nr | SPIi | SPIr)
    /// ```
    ///
    /// `encr_key_len` includes the AEAD salt for combined-mode ciphers;
    /// `integ_key_len` is 0 for AEAD.
    #[allow(clippy::too_many_arguments)]
    pub fn derive(
        prf_alg: PrfAlgorithm,
        nonce_i: &[u8],
        nonce_r: &[u8],
        shared_secret: &[u8],
        spi_i: &[u8; 8],
        spi_r: &[u8; 8],
        encr_key_len: usize,
        integ_key_len: usize,
    ) -> Result<Self> {
        // SKEYSEED = prf(Ni | Nr, g^ir)
        let mut prf_key = Vec::with_capacity(nonce_i.len() + nonce_r.len());
        prf_key.extend_from_slice(nonce_i);
        prf_key.extend_from_slice(nonce_r);
        let skeyseed = prf_alg.compute(&prf_key, shared_secret)?;

        Self::derive_from_skeyseed(
            prf_alg,
            &skeyseed,
            nonce_i,
            nonce_r,
            spi_i,
            spi_r,
            encr_key_len,
            integ_key_len,
        )
    }

    /// Derive key material for a rekeyed IKE SA.
    ///
    /// RFC 7296 Section 2.18: SKEYSEED = prf(SK_d_old, g^ir | Ni | Nr),
    /// then the usual prf+ expansion over the new nonces and SPIs.
    #[allow(clippy::too_many_arguments)]
    pub fn derive_rekeyed(
        prf_alg: PrfAlgorithm,
        sk_d_old: &[u8],
        nonce_i: &[u8],
        nonce_r: &[u8],
        shared_secret: &[u8],
        spi_i: &[u8; 8],
        spi_r: &[u8; 8],
        encr_key_len: usize,
        integ_key_len: usize,
    ) -> Result<Self> {
        let mut seed = Vec::with_capacity(shared_secret.len() + nonce_i.len() + nonce_r.len());
        seed.extend_from_slice(shared_secret);
        seed.extend_from_slice(nonce_i);
        seed.extend_from_slice(nonce_r);
        let skeyseed = prf_alg.compute(sk_d_old, &seed)?;

        Self::derive_from_skeyseed(
            prf_alg,
            &skeyseed,
            nonce_i,
            nonce_r,
            spi_i,
            spi_r,
            encr_key_len,
            integ_key_len,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn derive_from_skeyseed(
        prf_alg: PrfAlgorithm,
        skeyseed: &[u8],
        nonce_i: &[u8],
        nonce_r: &[u8],
        spi_i: &[u8; 8],
        spi_r: &[u8; 8],
        encr_key_len: usize,
        integ_key_len: usize,
    ) -> Result<Self> {
        // Seed for prf+: Ni | Nr | SPIi | SPIr
        let mut seed = Vec::new();
        seed.extend_from_slice(nonce_i);
        seed.extend_from_slice(nonce_r);
        seed.extend_from_slice(spi_i);
        seed.extend_from_slice(spi_r);

        let prf_len = prf_alg.output_len();
        let total_len = prf_len // SK_d
            + 2 * integ_key_len // SK_ai, SK_ar
            + 2 * encr_key_len // SK_ei, SK_er
            + 2 * prf_len; // SK_pi, SK_pr

        let mut keymat = prf_alg.prf_plus(skeyseed, &seed, total_len)?;

        let mut offset = 0;
        let mut take = |len: usize, keymat: &[u8]| {
            let part = keymat[offset..offset + len].to_vec();
            offset += len;
            part
        };

        let keys = KeyMaterial {
            sk_d: take(prf_len, &keymat),
            sk_ai: take(integ_key_len, &keymat),
            sk_ar: take(integ_key_len, &keymat),
            sk_ei: take(encr_key_len, &keymat),
            sk_er: take(encr_key_len, &keymat),
            sk_pi: take(prf_len, &keymat),
            sk_pr: take(prf_len, &keymat),
        };
        keymat.zeroize();

        Ok(keys)
    }
}
