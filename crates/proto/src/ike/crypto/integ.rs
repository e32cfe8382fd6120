//! Integrity algorithms for the SK payload checksum
//!
//! IKE truncates each MAC to a fixed checksum length (RFC 7296 Section
//! 3.3.2 / RFC 4868). Verification is constant-time.

use crate::ike::proposal::integ as integ_id;
use crate::ike::{Error, Result};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::{Sha256, Sha384, Sha512};
use subtle::ConstantTimeEq;

/// Integrity algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegAlgorithm {
    /// AUTH_HMAC_SHA1_96
    HmacSha1_96,
    /// AUTH_AES_XCBC_96 (negotiable; compute path not backed yet)
    AesXcbc96,
    /// AUTH_HMAC_SHA2_256_128
    HmacSha256_128,
    /// AUTH_HMAC_SHA2_384_192
    HmacSha384_192,
    /// AUTH_HMAC_SHA2_512_256
    HmacSha512_256,
}

impl IntegAlgorithm {
    /// Resolve a negotiated integrity transform ID.
    ///
    /// `AUTH_NONE` resolves to `None`: combined-mode ciphers carry their
    /// own integrity.
    pub fn from_transform_id(id: u16) -> Result<Option<Self>> {
        match id {
            integ_id::NONE => Ok(None),
            integ_id::HMAC_SHA1_96 => Ok(Some(IntegAlgorithm::HmacSha1_96)),
            integ_id::AES_XCBC_96 => Ok(Some(IntegAlgorithm::AesXcbc96)),
            integ_id::HMAC_SHA2_256_128 => Ok(Some(IntegAlgorithm::HmacSha256_128)),
            integ_id::HMAC_SHA2_384_192 => Ok(Some(IntegAlgorithm::HmacSha384_192)),
            integ_id::HMAC_SHA2_512_256 => Ok(Some(IntegAlgorithm::HmacSha512_256)),
            _ => Err(Error::UnsupportedAlgorithm(format!(
                "Integrity transform ID {}",
                id
            ))),
        }
    }

    /// Truncated checksum length in bytes
    pub fn checksum_len(self) -> usize {
        match self {
            IntegAlgorithm::HmacSha1_96 => 12,
            IntegAlgorithm::AesXcbc96 => 12,
            IntegAlgorithm::HmacSha256_128 => 16,
            IntegAlgorithm::HmacSha384_192 => 24,
            IntegAlgorithm::HmacSha512_256 => 32,
        }
    }

    /// Key length in bytes
    pub fn key_len(self) -> usize {
        match self {
            IntegAlgorithm::HmacSha1_96 => 20,
            IntegAlgorithm::AesXcbc96 => 16,
            IntegAlgorithm::HmacSha256_128 => 32,
            IntegAlgorithm::HmacSha384_192 => 48,
            IntegAlgorithm::HmacSha512_256 => 64,
        }
    }

    /// Compute the truncated integrity checksum.
    pub fn compute_checksum(self, key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        if key.len() != self.key_len() {
            return Err(Error::Internal(format!(
                "Integrity key length {} does not match algorithm ({})",
                key.len(),
                self.key_len()
            )));
        }

        let mut full = match self {
            IntegAlgorithm::HmacSha1_96 => {
                let mut mac =
                    Hmac::<Sha1>::new_from_slice(key).expect("HMAC can take key of any size");
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
            IntegAlgorithm::AesXcbc96 => {
                return Err(Error::UnsupportedAlgorithm(
                    "AUTH_AES_XCBC_96 has no backend implementation".to_string(),
                ))
            }
            IntegAlgorithm::HmacSha256_128 => {
                let mut mac =
                    Hmac::<Sha256>::new_from_slice(key).expect("HMAC can take key of any size");
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
            IntegAlgorithm::HmacSha384_192 => {
                let mut mac =
                    Hmac::<Sha384>::new_from_slice(key).expect("HMAC can take key of any size");
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
            IntegAlgorithm::HmacSha512_256 => {
                let mut mac =
                    Hmac::<Sha512>::new_from_slice(key).expect("HMAC can take key of any size");
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
        };

        full.truncate(self.checksum_len());
        Ok(full)
    }

    /// Verify a received checksum in constant time.
    ///
    /// # Errors
    ///
    /// `IntegrityFailure` on any mismatch, including length.
    pub fn verify_checksum(self, key: &[u8], data: &[u8], received: &[u8]) -> Result<()> {
        let expected = self.compute_checksum(key, data)?;
        if expected.len() != received.len() {
            return Err(Error::IntegrityFailure);
        }
        if expected.ct_eq(received).into() {
            Ok(())
        } else {
            Err(Error::IntegrityFailure)
        }
    }
}
