//! Diffie-Hellman key agreement for IKE_SA_INIT
//!
//! Implements the MODP groups negotiable in this stack (RFC 7296 Appendix
//! B / RFC 3526): group 2 (1024-bit) and group 14 (2048-bit). Public
//! values are validated as 1 < y < p-1 before use.

use num_bigint::{BigUint, RandBigInt};
use once_cell::sync::Lazy;
use zeroize::Zeroize;

use crate::ike::proposal::dh as dh_id;
use crate::ike::{Error, Result};

/// DH Group 2 prime (1024-bit MODP, RFC 7296 Appendix B.2)
static GROUP2_P: Lazy<BigUint> = Lazy::new(|| {
    BigUint::from_bytes_be(
        &hex::decode(
            "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD1\
             29024E088A67CC74020BBEA63B139B22514A08798E3404DD\
             EF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245\
             E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED\
             EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE65381\
             FFFFFFFFFFFFFFFF",
        )
        .expect("Invalid hex"),
    )
});

/// DH Group 14 prime (2048-bit MODP, RFC 3526 Section 3)
static GROUP14_P: Lazy<BigUint> = Lazy::new(|| {
    BigUint::from_bytes_be(
        &hex::decode(
            "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD1\
             29024E088A67CC74020BBEA63B139B22514A08798E3404DD\
             EF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245\
             E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED\
             EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3D\
             C2007CB8A163BF0598DA48361C55D39A69163FA8FD24CF5F\
             83655D23DCA3AD961C62F356208552BB9ED529077096966D\
             670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B\
             E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9\
             DE2BCBF6955817183995497CEA956AE515D2261898FA0510\
             15728E5A8AACAA68FFFFFFFFFFFFFFFF",
        )
        .expect("Invalid hex"),
    )
});

/// Generator for both MODP groups
static GENERATOR: Lazy<BigUint> = Lazy::new(|| BigUint::from(2u32));

/// Negotiable Diffie-Hellman group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DhGroup {
    /// 1024-bit MODP group (2)
    Modp1024,
    /// 2048-bit MODP group (14)
    Modp2048,
}

impl DhGroup {
    /// Resolve a negotiated DH transform ID
    pub fn from_transform_id(id: u16) -> Result<Self> {
        match id {
            dh_id::MODP_1024 => Ok(DhGroup::Modp1024),
            dh_id::MODP_2048 => Ok(DhGroup::Modp2048),
            _ => Err(Error::UnsupportedAlgorithm(format!(
                "DH transform ID {}",
                id
            ))),
        }
    }

    /// Transform ID for this group
    pub fn transform_id(self) -> u16 {
        match self {
            DhGroup::Modp1024 => dh_id::MODP_1024,
            DhGroup::Modp2048 => dh_id::MODP_2048,
        }
    }

    /// Public value / shared secret length in bytes
    pub fn key_len(self) -> usize {
        match self {
            DhGroup::Modp1024 => 128,
            DhGroup::Modp2048 => 256,
        }
    }

    fn prime(self) -> &'static BigUint {
        match self {
            DhGroup::Modp1024 => &GROUP2_P,
            DhGroup::Modp2048 => &GROUP14_P,
        }
    }
}

/// An ephemeral DH key pair for one IKE_SA_INIT exchange
pub struct DhKeyPair {
    group: DhGroup,
    private: BigUint,
    public: Vec<u8>,
}

impl DhKeyPair {
    /// Generate an ephemeral key pair for the group
    pub fn generate(group: DhGroup) -> Self {
        let p = group.prime();
        let mut rng = rand::thread_rng();

        // Private exponent in [2, p-2]
        let two = BigUint::from(2u32);
        let private = rng.gen_biguint_range(&two, &(p - &two));
        let public_int = GENERATOR.modpow(&private, p);
        let public = left_pad(&public_int.to_bytes_be(), group.key_len());

        DhKeyPair {
            group,
            private,
            public,
        }
    }

    /// The group this key pair belongs to
    pub fn group(&self) -> DhGroup {
        self.group
    }

    /// Fixed-width public value for the KE payload
    pub fn public_value(&self) -> &[u8] {
        &self.public
    }

    /// Compute the shared secret g^ir from the peer's public value.
    ///
    /// # Errors
    ///
    /// `InvalidKeyExchange` if the peer value has the wrong length or is
    /// outside (1, p-1).
    pub fn compute_shared(&self, peer_public: &[u8]) -> Result<Vec<u8>> {
        if peer_public.len() != self.group.key_len() {
            return Err(Error::InvalidKeyExchange(format!(
                "Peer public value length {} (expected {})",
                peer_public.len(),
                self.group.key_len()
            )));
        }

        let p = self.group.prime();
        let y = BigUint::from_bytes_be(peer_public);
        let one = BigUint::from(1u32);

        if y <= one || y >= p - &one {
            return Err(Error::InvalidKeyExchange(
                "Peer public value outside (1, p-1)".to_string(),
            ));
        }

        let shared = y.modpow(&self.private, p);
        Ok(left_pad(&shared.to_bytes_be(), self.group.key_len()))
    }
}

impl Drop for DhKeyPair {
    fn drop(&mut self) {
        // BigUint offers no in-place scrub; overwrite with zero and clear
        // the padded public copy.
        self.private = BigUint::from(0u32);
        self.public.zeroize();
    }
}

impl std::fmt::Debug for DhKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DhKeyPair")
            .field("group", &self.group)
            .finish()
    }
}

fn left_pad(bytes: &[u8], width: usize) -> Vec<u8> {
    let mut out = vec![0u8; width.saturating_sub(bytes.len())];
    out.extend_from_slice(bytes);
    out
}
