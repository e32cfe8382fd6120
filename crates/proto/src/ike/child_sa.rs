//! Child SA bookkeeping and key derivation
//!
//! A Child SA is created by the IKE_AUTH or a CREATE_CHILD_SA exchange and
//! closed by a Delete payload. This module tracks its negotiated
//! parameters, lifetime policy and keying material; installing the actual
//! transforms into the kernel is the embedder's concern.

use std::time::{Duration, Instant};

use zeroize::{Zeroize, ZeroizeOnDrop};

use super::crypto::PrfAlgorithm;
use super::proposal::Proposal;
use super::ts::TrafficSelector;
use crate::ike::{Error, Result};

/// Child SA lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildSaState {
    /// Carrying traffic
    Active,
    /// Rekey in flight
    Rekeying,
    /// Replaced by a rekeyed SA, pending deletion
    Rekeyed,
    /// Deleted
    Deleted,
}

/// Rekey and expiry policy for an SA.
///
/// Absolute thresholds are deliberately configuration: deployments tune
/// them per gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaLifetime {
    /// Age at which a rekey should be initiated
    pub soft_time: Duration,

    /// Age at which the SA must no longer be used
    pub hard_time: Duration,

    /// Byte count triggering a rekey (None = no byte budget)
    pub soft_bytes: Option<u64>,

    /// Byte count at which the SA must no longer be used
    pub hard_bytes: Option<u64>,
}

impl Default for SaLifetime {
    fn default() -> Self {
        SaLifetime {
            soft_time: Duration::from_secs(3 * 3600),
            hard_time: Duration::from_secs(4 * 3600),
            soft_bytes: None,
            hard_bytes: None,
        }
    }
}

impl SaLifetime {
    /// Create a time-based lifetime policy
    pub fn new(soft_time: Duration, hard_time: Duration) -> Result<Self> {
        if soft_time >= hard_time {
            return Err(Error::InvalidSyntax(format!(
                "Soft lifetime {:?} must be below hard lifetime {:?}",
                soft_time, hard_time
            )));
        }
        Ok(SaLifetime {
            soft_time,
            hard_time,
            soft_bytes: None,
            hard_bytes: None,
        })
    }

    /// Add byte budgets
    pub fn with_byte_limits(mut self, soft_bytes: u64, hard_bytes: u64) -> Result<Self> {
        if soft_bytes >= hard_bytes {
            return Err(Error::InvalidSyntax(format!(
                "Soft byte limit {} must be below hard limit {}",
                soft_bytes, hard_bytes
            )));
        }
        self.soft_bytes = Some(soft_bytes);
        self.hard_bytes = Some(hard_bytes);
        Ok(self)
    }

    /// Whether a rekey should be initiated
    pub fn is_soft_expired(&self, age: Duration, bytes: u64) -> bool {
        if age >= self.soft_time {
            return true;
        }
        matches!(self.soft_bytes, Some(limit) if bytes >= limit)
    }

    /// Whether the SA must be torn down
    pub fn is_hard_expired(&self, age: Duration, bytes: u64) -> bool {
        if age >= self.hard_time {
            return true;
        }
        matches!(self.hard_bytes, Some(limit) if bytes >= limit)
    }
}

/// Keying material of one Child SA, split per direction.
///
/// Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ChildSaKeys {
    /// Encryption key, initiator-to-responder SA
    pub sk_ei: Vec<u8>,
    /// Integrity key, initiator-to-responder SA (empty for AEAD)
    pub sk_ai: Vec<u8>,
    /// Encryption key, responder-to-initiator SA
    pub sk_er: Vec<u8>,
    /// Integrity key, responder-to-initiator SA (empty for AEAD)
    pub sk_ar: Vec<u8>,
}

impl std::fmt::Debug for ChildSaKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChildSaKeys")
            .field("encr_len", &self.sk_ei.len())
            .field("integ_len", &self.sk_ai.len())
            .finish()
    }
}

/// Derive Child SA keying material (RFC 7296 Section 2.17).
///
/// ```text
/// KEYMAT = prf+(SK_d, [g^ir (new) |] Ni | Nr)
/// ```
///
/// Keys are taken initiator-to-responder first: SK_ei, SK_ai, SK_er, SK_ar.
/// `pfs_secret` carries the fresh DH secret of a CREATE_CHILD_SA exchange
/// with PFS, and is absent for the IKE_AUTH child.
pub fn derive_child_sa_keys(
    prf_alg: PrfAlgorithm,
    sk_d: &[u8],
    pfs_secret: Option<&[u8]>,
    nonce_i: &[u8],
    nonce_r: &[u8],
    encr_key_len: usize,
    integ_key_len: usize,
) -> Result<ChildSaKeys> {
    let mut seed = Vec::new();
    if let Some(secret) = pfs_secret {
        seed.extend_from_slice(secret);
    }
    seed.extend_from_slice(nonce_i);
    seed.extend_from_slice(nonce_r);

    let total = 2 * encr_key_len + 2 * integ_key_len;
    let mut keymat = prf_alg.prf_plus(sk_d, &seed, total)?;

    let mut offset = 0;
    let mut take = |len: usize, keymat: &[u8]| {
        let part = keymat[offset..offset + len].to_vec();
        offset += len;
        part
    };

    let keys = ChildSaKeys {
        sk_ei: take(encr_key_len, &keymat),
        sk_ai: take(integ_key_len, &keymat),
        sk_er: take(encr_key_len, &keymat),
        sk_ar: take(integ_key_len, &keymat),
    };
    keymat.zeroize();

    Ok(keys)
}

/// One negotiated Child SA.
#[derive(Debug)]
pub struct ChildSa {
    /// SPI of the inbound (peer-to-us) SA; we chose it
    pub inbound_spi: [u8; 4],

    /// SPI of the outbound (us-to-peer) SA; the peer chose it
    pub outbound_spi: [u8; 4],

    /// Negotiated ESP proposal
    pub proposal: Proposal,

    /// Local (initiator) traffic selectors
    pub local_ts: Vec<TrafficSelector>,

    /// Remote (responder) traffic selectors
    pub remote_ts: Vec<TrafficSelector>,

    /// Transport mode instead of tunnel mode
    pub transport_mode: bool,

    /// Keying material split per direction
    pub keys: ChildSaKeys,

    /// Lifetime policy
    pub lifetime: SaLifetime,

    state: ChildSaState,
    created_at: Instant,
    bytes_processed: u64,
}

impl ChildSa {
    /// Install a newly negotiated Child SA.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        inbound_spi: [u8; 4],
        outbound_spi: [u8; 4],
        proposal: Proposal,
        local_ts: Vec<TrafficSelector>,
        remote_ts: Vec<TrafficSelector>,
        transport_mode: bool,
        keys: ChildSaKeys,
        lifetime: SaLifetime,
    ) -> Self {
        ChildSa {
            inbound_spi,
            outbound_spi,
            proposal,
            local_ts,
            remote_ts,
            transport_mode,
            keys,
            lifetime,
            state: ChildSaState::Active,
            created_at: Instant::now(),
            bytes_processed: 0,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> ChildSaState {
        self.state
    }

    /// Age of the SA
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Record processed traffic toward the byte budget
    pub fn add_bytes(&mut self, bytes: u64) {
        self.bytes_processed = self.bytes_processed.saturating_add(bytes);
    }

    /// Whether the soft lifetime has been crossed
    pub fn should_rekey(&self) -> bool {
        self.state == ChildSaState::Active
            && self.lifetime.is_soft_expired(self.age(), self.bytes_processed)
    }

    /// Whether the hard lifetime has been crossed
    pub fn is_expired(&self) -> bool {
        self.lifetime.is_hard_expired(self.age(), self.bytes_processed)
    }

    /// Mark a rekey as started
    pub fn initiate_rekey(&mut self) -> Result<()> {
        if self.state != ChildSaState::Active {
            return Err(Error::InvalidState(format!(
                "Cannot rekey Child SA in state {:?}",
                self.state
            )));
        }
        self.state = ChildSaState::Rekeying;
        Ok(())
    }

    /// Mark the SA as replaced by its rekeyed successor
    pub fn mark_rekeyed(&mut self) -> Result<()> {
        if self.state != ChildSaState::Rekeying {
            return Err(Error::InvalidState(format!(
                "Cannot complete rekey from state {:?}",
                self.state
            )));
        }
        self.state = ChildSaState::Rekeyed;
        Ok(())
    }

    /// Abort an in-flight rekey, returning to active
    pub fn abort_rekey(&mut self) -> Result<()> {
        if self.state != ChildSaState::Rekeying {
            return Err(Error::InvalidState(format!(
                "No rekey in flight in state {:?}",
                self.state
            )));
        }
        self.state = ChildSaState::Active;
        Ok(())
    }

    /// Mark the SA deleted
    pub fn mark_deleted(&mut self) {
        self.state = ChildSaState::Deleted;
    }
}
