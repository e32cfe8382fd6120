//! Key derivation for EAP-SIM and EAP-AKA (RFC 4186/4187 Section 7)
//!
//! ```text
//! MK = SHA1(Identity | IK | CK)                      (EAP-AKA)
//! MK = SHA1(Identity | n*Kc | NONCE_MT | Version List | Selected Version)
//!                                                    (EAP-SIM)
//! K_encr (16) | K_aut (16) | MSK (64) | EMSK (64) = FIPS-186-2-PRF(MK)
//! ```
//!
//! The FIPS 186-2 generator (change notice 1, SHA-1 variant) produces
//! pseudo-random x-values by iterating the SHA-1 compression function
//! directly, without the Merkle-Damgard length padding.

use hmac::{Hmac, Mac};
use sha1::{compress, digest::generic_array::GenericArray, Digest, Sha1};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::ike::{Error, Result};

/// Master key length (SHA-1 output)
pub const MK_LEN: usize = 20;

/// AT_MAC value length
pub const MAC_LEN: usize = 16;

/// Exported session key lengths (RFC 4187 Section 7)
pub const MSK_LEN: usize = 64;
/// Extended MSK length
pub const EMSK_LEN: usize = 64;

const K_ENCR_LEN: usize = 16;
const K_AUT_LEN: usize = 16;

/// SHA-1 initial state (FIPS 180-1 Section 7)
const SHA1_INIT: [u32; 5] = [0x67452301, 0xEFCDAB89, 0x98BADCFE, 0x10325476, 0xC3D2E1F0];

/// Session keys derived from the master key.
///
/// Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SimAkaKeys {
    /// Encryption key for AT_ENCR_DATA
    pub k_encr: Vec<u8>,

    /// Authentication key for AT_MAC
    pub k_aut: Vec<u8>,

    /// Master Session Key exported to the authenticator
    pub msk: Vec<u8>,

    /// Extended Master Session Key
    pub emsk: Vec<u8>,
}

impl std::fmt::Debug for SimAkaKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimAkaKeys")
            .field("msk_len", &self.msk.len())
            .field("emsk_len", &self.emsk.len())
            .finish()
    }
}

impl SimAkaKeys {
    /// Derive the full key block from a 20-byte master key.
    pub fn derive(mk: &[u8]) -> Result<Self> {
        if mk.len() != MK_LEN {
            return Err(Error::Internal(format!(
                "Master key length {} (expected {})",
                mk.len(),
                MK_LEN
            )));
        }

        let total = K_ENCR_LEN + K_AUT_LEN + MSK_LEN + EMSK_LEN;
        let mut stream = fips186_2_prf(mk, total);

        let keys = SimAkaKeys {
            k_encr: stream[0..K_ENCR_LEN].to_vec(),
            k_aut: stream[K_ENCR_LEN..K_ENCR_LEN + K_AUT_LEN].to_vec(),
            msk: stream[K_ENCR_LEN + K_AUT_LEN..K_ENCR_LEN + K_AUT_LEN + MSK_LEN].to_vec(),
            emsk: stream[K_ENCR_LEN + K_AUT_LEN + MSK_LEN..total].to_vec(),
        };
        stream.zeroize();

        Ok(keys)
    }
}

/// Compute the EAP-AKA master key: MK = SHA1(Identity | IK | CK).
pub fn aka_master_key(identity: &[u8], ik: &[u8], ck: &[u8]) -> [u8; MK_LEN] {
    let mut sha1 = Sha1::new();
    sha1.update(identity);
    sha1.update(ik);
    sha1.update(ck);
    sha1.finalize().into()
}

/// Compute the EAP-SIM master key:
/// MK = SHA1(Identity | n*Kc | NONCE_MT | Version List | Selected Version).
pub fn sim_master_key(
    identity: &[u8],
    kcs: &[u8],
    nonce_mt: &[u8],
    version_list: &[u8],
    selected_version: u16,
) -> [u8; MK_LEN] {
    let mut sha1 = Sha1::new();
    sha1.update(identity);
    sha1.update(kcs);
    sha1.update(nonce_mt);
    sha1.update(version_list);
    sha1.update(selected_version.to_be_bytes());
    sha1.finalize().into()
}

/// The FIPS 186-2 pseudo-random generator (SHA-1, change notice 1).
///
/// XKEY starts as the master key; each round produces 40 bytes:
///
/// ```text
/// w_i  = G(t, XKEY)            (SHA-1 compression on the zero-padded key)
/// XKEY = (1 + XKEY + w_i) mod 2^160
/// ```
pub fn fips186_2_prf(mk: &[u8], output_len: usize) -> Vec<u8> {
    let mut xkey = [0u8; MK_LEN];
    xkey.copy_from_slice(mk);

    let mut output = Vec::with_capacity(output_len);
    while output.len() < output_len {
        // Two iterations per round in the FIPS formulation; a flat loop
        // produces the identical byte stream.
        let w = g_function(&xkey);
        output.extend_from_slice(&w);
        add_one_mod_2_160(&mut xkey, &w);
    }

    output.truncate(output_len);
    xkey.zeroize();
    output
}

/// G(t, c): one SHA-1 compression over the 64-byte zero-padded block `c`,
/// starting from the standard initial state.
fn g_function(xval: &[u8; MK_LEN]) -> [u8; MK_LEN] {
    let mut block = [0u8; 64];
    block[..MK_LEN].copy_from_slice(xval);

    let mut state = SHA1_INIT;
    let block = GenericArray::clone_from_slice(&block);
    compress(&mut state, core::slice::from_ref(&block));

    let mut out = [0u8; MK_LEN];
    for (i, word) in state.iter().enumerate() {
        out[i * 4..i * 4 + 4].copy_from_slice(&word.to_be_bytes());
    }
    out
}

/// XKEY = (1 + XKEY + w) mod 2^160, big-endian.
fn add_one_mod_2_160(xkey: &mut [u8; MK_LEN], w: &[u8; MK_LEN]) {
    let mut carry = 1u16;
    for i in (0..MK_LEN).rev() {
        let sum = xkey[i] as u16 + w[i] as u16 + carry;
        xkey[i] = sum as u8;
        carry = sum >> 8;
    }
}

/// Compute the AT_MAC value: HMAC-SHA1-128 over the whole EAP packet
/// (with the MAC field zeroed) followed by the method-specific extra data.
pub fn compute_mac(k_aut: &[u8], zeroed_message: &[u8], extra: &[u8]) -> [u8; MAC_LEN] {
    let mut mac =
        Hmac::<Sha1>::new_from_slice(k_aut).expect("HMAC can take key of any size");
    mac.update(zeroed_message);
    mac.update(extra);

    let digest = mac.finalize().into_bytes();
    let mut out = [0u8; MAC_LEN];
    out.copy_from_slice(&digest[..MAC_LEN]);
    out
}
