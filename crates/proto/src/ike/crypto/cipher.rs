//! Cipher implementations for SK payload encryption
//!
//! Covers the block ciphers (3DES-CBC, AES-CBC) used with a separate
//! integrity transform, and the combined-mode AES-GCM variants (RFC 4106 /
//! RFC 5282). CBC padding follows RFC 4303: the last byte is the pad
//! length and the pad bytes themselves are arbitrary.

use aes::{Aes128, Aes192, Aes256};
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, Payload},
    AesGcm, Nonce,
};
use cbc::{Decryptor, Encryptor};
use cipher::consts::{U12, U16};
use cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use des::TdesEde3;

use crate::ike::proposal::encr;
use crate::ike::{Error, Result};

type TdesCbcEnc = Encryptor<TdesEde3>;
type TdesCbcDec = Decryptor<TdesEde3>;
type Aes128CbcEnc = Encryptor<Aes128>;
type Aes128CbcDec = Decryptor<Aes128>;
type Aes192CbcEnc = Encryptor<Aes192>;
type Aes192CbcDec = Decryptor<Aes192>;
type Aes256CbcEnc = Encryptor<Aes256>;
type Aes256CbcDec = Decryptor<Aes256>;

type Aes128Gcm12 = AesGcm<Aes128, U12, U12>;
type Aes192Gcm12 = AesGcm<Aes192, U12, U12>;
type Aes256Gcm12 = AesGcm<Aes256, U12, U12>;
type Aes128Gcm16 = AesGcm<Aes128, U12, U16>;
type Aes192Gcm16 = AesGcm<Aes192, U12, U16>;
type Aes256Gcm16 = AesGcm<Aes256, U12, U16>;

/// Cipher algorithm for SK payload encryption
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherAlgorithm {
    /// 3DES-CBC (fixed 192-bit key)
    TripleDesCbc,
    /// AES-CBC with 128-bit key
    AesCbc128,
    /// AES-CBC with 192-bit key
    AesCbc192,
    /// AES-CBC with 256-bit key
    AesCbc256,
    /// AES-GCM with 12-octet ICV, 128-bit key
    AesGcm12_128,
    /// AES-GCM with 12-octet ICV, 192-bit key
    AesGcm12_192,
    /// AES-GCM with 12-octet ICV, 256-bit key
    AesGcm12_256,
    /// AES-GCM with 16-octet ICV, 128-bit key
    AesGcm16_128,
    /// AES-GCM with 16-octet ICV, 192-bit key
    AesGcm16_192,
    /// AES-GCM with 16-octet ICV, 256-bit key
    AesGcm16_256,
}

impl CipherAlgorithm {
    /// Resolve a negotiated ENCR transform (ID plus key length attribute).
    ///
    /// # Errors
    ///
    /// `UnsupportedAlgorithm` for ENCR_AES_GCM_8 (no 8-octet tag backend)
    /// and for unrecognized IDs; `InvalidSyntax` for a key length that
    /// contradicts the transform.
    pub fn from_transform(transform_id: u16, key_length: Option<u16>) -> Result<Self> {
        match (transform_id, key_length) {
            (encr::TRIPLE_DES, None) => Ok(CipherAlgorithm::TripleDesCbc),
            (encr::AES_CBC, Some(128)) => Ok(CipherAlgorithm::AesCbc128),
            (encr::AES_CBC, Some(192)) => Ok(CipherAlgorithm::AesCbc192),
            (encr::AES_CBC, Some(256)) => Ok(CipherAlgorithm::AesCbc256),
            (encr::AES_GCM_12, Some(128)) => Ok(CipherAlgorithm::AesGcm12_128),
            (encr::AES_GCM_12, Some(192)) => Ok(CipherAlgorithm::AesGcm12_192),
            (encr::AES_GCM_12, Some(256)) => Ok(CipherAlgorithm::AesGcm12_256),
            (encr::AES_GCM_16, Some(128)) => Ok(CipherAlgorithm::AesGcm16_128),
            (encr::AES_GCM_16, Some(192)) => Ok(CipherAlgorithm::AesGcm16_192),
            (encr::AES_GCM_16, Some(256)) => Ok(CipherAlgorithm::AesGcm16_256),
            (encr::AES_GCM_8, _) => Err(Error::UnsupportedAlgorithm(
                "ENCR_AES_GCM_8: 8-octet ICV not supported by the crypto backend".to_string(),
            )),
            (id, key_length) => Err(Error::UnsupportedAlgorithm(format!(
                "ENCR transform ID {} with key length {:?}",
                id, key_length
            ))),
        }
    }

    /// Cipher key length in bytes (excluding the AEAD salt)
    pub fn key_len(self) -> usize {
        match self {
            CipherAlgorithm::TripleDesCbc => 24,
            CipherAlgorithm::AesCbc128 | CipherAlgorithm::AesGcm12_128 | CipherAlgorithm::AesGcm16_128 => 16,
            CipherAlgorithm::AesCbc192 | CipherAlgorithm::AesGcm12_192 | CipherAlgorithm::AesGcm16_192 => 24,
            CipherAlgorithm::AesCbc256 | CipherAlgorithm::AesGcm12_256 | CipherAlgorithm::AesGcm16_256 => 32,
        }
    }

    /// AEAD salt length carried at the tail of SK_e (RFC 4106)
    pub fn salt_len(self) -> usize {
        if self.is_aead() {
            4
        } else {
            0
        }
    }

    /// Bytes of SK_e keying material to derive (key plus salt)
    pub fn keymat_len(self) -> usize {
        self.key_len() + self.salt_len()
    }

    /// Explicit IV length in bytes
    pub fn iv_len(self) -> usize {
        match self {
            CipherAlgorithm::TripleDesCbc => 8,
            CipherAlgorithm::AesCbc128
            | CipherAlgorithm::AesCbc192
            | CipherAlgorithm::AesCbc256 => 16,
            // AES-GCM uses an 8-byte explicit IV (RFC 4106)
            _ => 8,
        }
    }

    /// Block size for CBC padding (1 for AEAD: no alignment requirement)
    pub fn block_len(self) -> usize {
        match self {
            CipherAlgorithm::TripleDesCbc => 8,
            CipherAlgorithm::AesCbc128
            | CipherAlgorithm::AesCbc192
            | CipherAlgorithm::AesCbc256 => 16,
            _ => 1,
        }
    }

    /// AEAD tag length appended to the ciphertext (0 for CBC modes)
    pub fn tag_len(self) -> usize {
        match self {
            CipherAlgorithm::AesGcm12_128
            | CipherAlgorithm::AesGcm12_192
            | CipherAlgorithm::AesGcm12_256 => 12,
            CipherAlgorithm::AesGcm16_128
            | CipherAlgorithm::AesGcm16_192
            | CipherAlgorithm::AesGcm16_256 => 16,
            _ => 0,
        }
    }

    /// Whether this is a combined-mode (AEAD) cipher
    pub fn is_aead(self) -> bool {
        self.tag_len() != 0
    }

    /// Encrypt a block-aligned plaintext with CBC.
    ///
    /// The caller applies RFC 4303 padding first.
    pub fn encrypt(self, key: &[u8], iv: &[u8], padded: &[u8]) -> Result<Vec<u8>> {
        self.check_cbc_args(key, iv)?;
        if padded.len() % self.block_len() != 0 {
            return Err(Error::Internal(format!(
                "CBC plaintext length {} not block aligned",
                padded.len()
            )));
        }

        match self {
            CipherAlgorithm::TripleDesCbc => cbc_encrypt::<TdesCbcEnc>(key, iv, padded),
            CipherAlgorithm::AesCbc128 => cbc_encrypt::<Aes128CbcEnc>(key, iv, padded),
            CipherAlgorithm::AesCbc192 => cbc_encrypt::<Aes192CbcEnc>(key, iv, padded),
            CipherAlgorithm::AesCbc256 => cbc_encrypt::<Aes256CbcEnc>(key, iv, padded),
            _ => Err(Error::Internal(
                "encrypt() called on an AEAD cipher".to_string(),
            )),
        }
    }

    /// Decrypt a CBC ciphertext; the padded plaintext is returned as-is.
    pub fn decrypt(self, key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
        self.check_cbc_args(key, iv)?;
        if ciphertext.is_empty() || ciphertext.len() % self.block_len() != 0 {
            return Err(Error::DecryptionFailure);
        }

        match self {
            CipherAlgorithm::TripleDesCbc => cbc_decrypt::<TdesCbcDec>(key, iv, ciphertext),
            CipherAlgorithm::AesCbc128 => cbc_decrypt::<Aes128CbcDec>(key, iv, ciphertext),
            CipherAlgorithm::AesCbc192 => cbc_decrypt::<Aes192CbcDec>(key, iv, ciphertext),
            CipherAlgorithm::AesCbc256 => cbc_decrypt::<Aes256CbcDec>(key, iv, ciphertext),
            _ => Err(Error::Internal(
                "decrypt() called on an AEAD cipher".to_string(),
            )),
        }
    }

    /// AEAD seal: returns ciphertext with the tag appended.
    ///
    /// `keymat` is SK_e including the 4-byte salt at the tail; `iv` is the
    /// 8-byte explicit IV; `aad` is everything in the message before the IV.
    pub fn seal(self, keymat: &[u8], iv: &[u8], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        let (key, salt) = self.split_keymat(keymat)?;
        let nonce = build_nonce(salt, iv)?;

        match self {
            CipherAlgorithm::AesGcm12_128 => gcm_seal::<Aes128Gcm12>(key, &nonce, plaintext, aad),
            CipherAlgorithm::AesGcm12_192 => gcm_seal::<Aes192Gcm12>(key, &nonce, plaintext, aad),
            CipherAlgorithm::AesGcm12_256 => gcm_seal::<Aes256Gcm12>(key, &nonce, plaintext, aad),
            CipherAlgorithm::AesGcm16_128 => gcm_seal::<Aes128Gcm16>(key, &nonce, plaintext, aad),
            CipherAlgorithm::AesGcm16_192 => gcm_seal::<Aes192Gcm16>(key, &nonce, plaintext, aad),
            CipherAlgorithm::AesGcm16_256 => gcm_seal::<Aes256Gcm16>(key, &nonce, plaintext, aad),
            _ => Err(Error::Internal(
                "seal() called on a non-AEAD cipher".to_string(),
            )),
        }
    }

    /// AEAD open: verifies the tag and returns the plaintext.
    ///
    /// # Errors
    ///
    /// `IntegrityFailure` if tag verification fails.
    pub fn open(self, keymat: &[u8], iv: &[u8], ct_and_tag: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        let (key, salt) = self.split_keymat(keymat)?;
        let nonce = build_nonce(salt, iv)?;

        if ct_and_tag.len() < self.tag_len() {
            return Err(Error::BufferTooShort {
                required: self.tag_len(),
                available: ct_and_tag.len(),
            });
        }

        match self {
            CipherAlgorithm::AesGcm12_128 => gcm_open::<Aes128Gcm12>(key, &nonce, ct_and_tag, aad),
            CipherAlgorithm::AesGcm12_192 => gcm_open::<Aes192Gcm12>(key, &nonce, ct_and_tag, aad),
            CipherAlgorithm::AesGcm12_256 => gcm_open::<Aes256Gcm12>(key, &nonce, ct_and_tag, aad),
            CipherAlgorithm::AesGcm16_128 => gcm_open::<Aes128Gcm16>(key, &nonce, ct_and_tag, aad),
            CipherAlgorithm::AesGcm16_192 => gcm_open::<Aes192Gcm16>(key, &nonce, ct_and_tag, aad),
            CipherAlgorithm::AesGcm16_256 => gcm_open::<Aes256Gcm16>(key, &nonce, ct_and_tag, aad),
            _ => Err(Error::Internal(
                "open() called on a non-AEAD cipher".to_string(),
            )),
        }
    }

    fn check_cbc_args(self, key: &[u8], iv: &[u8]) -> Result<()> {
        if key.len() != self.key_len() {
            return Err(Error::Internal(format!(
                "Cipher key length {} does not match algorithm ({})",
                key.len(),
                self.key_len()
            )));
        }
        if iv.len() != self.iv_len() {
            return Err(Error::Internal(format!(
                "IV length {} does not match algorithm ({})",
                iv.len(),
                self.iv_len()
            )));
        }
        Ok(())
    }

    fn split_keymat<'a>(self, keymat: &'a [u8]) -> Result<(&'a [u8], &'a [u8])> {
        if keymat.len() != self.keymat_len() {
            return Err(Error::Internal(format!(
                "AEAD keymat length {} does not match algorithm ({})",
                keymat.len(),
                self.keymat_len()
            )));
        }
        Ok(keymat.split_at(self.key_len()))
    }
}

fn build_nonce(salt: &[u8], iv: &[u8]) -> Result<[u8; 12]> {
    if salt.len() != 4 || iv.len() != 8 {
        return Err(Error::Internal(format!(
            "AEAD nonce parts have lengths {}/{}",
            salt.len(),
            iv.len()
        )));
    }
    let mut nonce = [0u8; 12];
    nonce[..4].copy_from_slice(salt);
    nonce[4..].copy_from_slice(iv);
    Ok(nonce)
}

fn cbc_encrypt<E>(key: &[u8], iv: &[u8], padded: &[u8]) -> Result<Vec<u8>>
where
    E: BlockEncryptMut + KeyIvInit,
{
    let enc = E::new_from_slices(key, iv)
        .map_err(|_| Error::Internal("Failed to initialize CBC encryptor".to_string()))?;
    Ok(enc.encrypt_padded_vec_mut::<NoPadding>(padded))
}

fn cbc_decrypt<D>(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>>
where
    D: BlockDecryptMut + KeyIvInit,
{
    let dec = D::new_from_slices(key, iv)
        .map_err(|_| Error::Internal("Failed to initialize CBC decryptor".to_string()))?;
    dec.decrypt_padded_vec_mut::<NoPadding>(ciphertext)
        .map_err(|_| Error::DecryptionFailure)
}

fn gcm_seal<A>(key: &[u8], nonce: &[u8; 12], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>>
where
    A: Aead + KeyInit + AeadCore<NonceSize = U12>,
{
    let cipher = A::new_from_slice(key)
        .map_err(|_| Error::Internal("Failed to initialize AEAD cipher".to_string()))?;
    cipher
        .encrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| Error::Internal("AEAD encryption failed".to_string()))
}

fn gcm_open<A>(key: &[u8], nonce: &[u8; 12], ct_and_tag: &[u8], aad: &[u8]) -> Result<Vec<u8>>
where
    A: Aead + KeyInit + AeadCore<NonceSize = U12>,
{
    let cipher = A::new_from_slice(key)
        .map_err(|_| Error::Internal("Failed to initialize AEAD cipher".to_string()))?;
    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ct_and_tag,
                aad,
            },
        )
        .map_err(|_| Error::IntegrityFailure)
}
