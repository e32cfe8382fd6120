//! IKE session configuration
//!
//! Assembled through a builder that validates everything in one pass at
//! `build()`. A configuration is immutable once built.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use ikepeer_platform::SimAuthenticator;

use super::child_sa::SaLifetime;
use super::dpd::DpdConfig;
use super::payload::IkeIdentification;
use super::proposal::{dh, esn, integ, prf, Proposal, ProtocolId, Transform};
use super::ts::TrafficSelector;
use crate::ike::{Error, Result};

/// Retransmission policy for request messages.
///
/// Delays double per attempt: 500 ms, 1 s, 2 s, ... up to `max_attempts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetransmitConfig {
    /// Delay before the first retransmission
    pub base_delay: Duration,

    /// Total send attempts before giving up with `Timeout`
    pub max_attempts: u32,
}

impl Default for RetransmitConfig {
    fn default() -> Self {
        RetransmitConfig {
            base_delay: Duration::from_millis(500),
            max_attempts: 8,
        }
    }
}

impl RetransmitConfig {
    /// Backoff delay before attempt `n` (0-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }
}

/// Inner authentication method for IKE_AUTH
#[derive(Clone)]
pub enum EapMethodConfig {
    /// EAP-AKA (RFC 4187)
    Aka {
        /// UICC oracle
        authenticator: Arc<dyn SimAuthenticator>,
    },
    /// EAP-AKA' (RFC 5448)
    AkaPrime {
        /// UICC oracle
        authenticator: Arc<dyn SimAuthenticator>,
        /// Access network name configured locally
        network_name: String,
        /// Accept a server network name that fails the prefix match
        allow_mismatched_network_names: bool,
    },
    /// EAP-SIM (RFC 4186)
    Sim {
        /// UICC oracle
        authenticator: Arc<dyn SimAuthenticator>,
    },
    /// EAP-MSCHAPv2
    MsChapV2 {
        /// User name
        username: String,
        /// Password
        password: String,
    },
}

impl std::fmt::Debug for EapMethodConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EapMethodConfig::Aka { .. } => f.write_str("EapMethodConfig::Aka"),
            EapMethodConfig::AkaPrime { network_name, .. } => f
                .debug_struct("EapMethodConfig::AkaPrime")
                .field("network_name", network_name)
                .finish_non_exhaustive(),
            EapMethodConfig::Sim { .. } => f.write_str("EapMethodConfig::Sim"),
            EapMethodConfig::MsChapV2 { username, .. } => f
                .debug_struct("EapMethodConfig::MsChapV2")
                .field("username", username)
                .finish_non_exhaustive(),
        }
    }
}

/// Validated configuration of one IKE session
#[derive(Clone)]
pub struct SessionConfig {
    /// Local identity (IDi)
    pub local_id: IkeIdentification,

    /// Expected remote identity; when set, the responder's IDr must match
    pub remote_id: Option<IkeIdentification>,

    /// Pre-shared key (mutually exclusive with `eap`)
    pub psk: Option<Vec<u8>>,

    /// EAP method (mutually exclusive with `psk`)
    pub eap: Option<EapMethodConfig>,

    /// IKE SA proposals to offer
    pub ike_proposals: Vec<Proposal>,

    /// Child SA (ESP) proposals to offer
    pub child_proposals: Vec<Proposal>,

    /// Local traffic selectors
    pub local_ts: Vec<TrafficSelector>,

    /// Remote traffic selectors
    pub remote_ts: Vec<TrafficSelector>,

    /// Transport mode instead of tunnel mode
    pub transport_mode: bool,

    /// Request an internal IPv4 address via a configuration payload
    pub request_internal_address: bool,

    /// Retransmission policy
    pub retransmit: RetransmitConfig,

    /// Dead peer detection policy
    pub dpd: DpdConfig,

    /// Rekey policy for the SAs
    pub lifetime: SaLifetime,

    /// Grace period for the Delete notification during close
    pub close_grace: Duration,
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("local_id", &self.local_id)
            .field("remote_id", &self.remote_id)
            .field("psk", &self.psk.as_ref().map(|_| "<redacted>"))
            .field("eap", &self.eap)
            .field("ike_proposals", &self.ike_proposals.len())
            .field("child_proposals", &self.child_proposals.len())
            .field("transport_mode", &self.transport_mode)
            .field("retransmit", &self.retransmit)
            .field("dpd", &self.dpd)
            .finish_non_exhaustive()
    }
}

impl SessionConfig {
    /// Start building a configuration
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::new()
    }
}

/// Default IKE proposals: AES-GCM-16 and AES-CBC-256/HMAC-SHA2-256, both
/// with PRF-HMAC-SHA2-256 and DH group 14.
pub fn default_ike_proposals() -> Vec<Proposal> {
    vec![
        Proposal::new(1, ProtocolId::Ike)
            .add_transform(Transform::encr_aes_gcm_16(256))
            .add_transform(Transform::encr_aes_gcm_16(128))
            .add_transform(Transform::prf(prf::HMAC_SHA2_256))
            .add_transform(Transform::dh(dh::MODP_2048)),
        Proposal::new(2, ProtocolId::Ike)
            .add_transform(Transform::encr_aes_cbc(256))
            .add_transform(Transform::encr_aes_cbc(128))
            .add_transform(Transform::prf(prf::HMAC_SHA2_256))
            .add_transform(Transform::integ(integ::HMAC_SHA2_256_128))
            .add_transform(Transform::dh(dh::MODP_2048)),
    ]
}

/// Default Child SA proposals: ESP with AES-GCM-16.
pub fn default_child_proposals() -> Vec<Proposal> {
    vec![Proposal::new(1, ProtocolId::Esp)
        .add_transform(Transform::encr_aes_gcm_16(256))
        .add_transform(Transform::encr_aes_gcm_16(128))
        .add_transform(Transform::esn(esn::NO_ESN))]
}

fn default_ts() -> Vec<TrafficSelector> {
    vec![TrafficSelector::new(
        IpAddr::from([0u8, 0, 0, 0]),
        IpAddr::from([255u8, 255, 255, 255]),
    )
    .expect("full IPv4 range is a valid selector")]
}

/// Builder for [`SessionConfig`]
#[derive(Debug, Default)]
pub struct SessionConfigBuilder {
    local_id: Option<IkeIdentification>,
    remote_id: Option<IkeIdentification>,
    psk: Option<Vec<u8>>,
    eap: Option<EapMethodConfig>,
    ike_proposals: Option<Vec<Proposal>>,
    child_proposals: Option<Vec<Proposal>>,
    local_ts: Option<Vec<TrafficSelector>>,
    remote_ts: Option<Vec<TrafficSelector>>,
    transport_mode: bool,
    request_internal_address: bool,
    retransmit: Option<RetransmitConfig>,
    dpd: Option<DpdConfig>,
    lifetime: Option<SaLifetime>,
    close_grace: Option<Duration>,
}

impl SessionConfigBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the local identity
    pub fn with_local_id(mut self, id: IkeIdentification) -> Self {
        self.local_id = Some(id);
        self
    }

    /// Set the expected remote identity
    pub fn with_remote_id(mut self, id: IkeIdentification) -> Self {
        self.remote_id = Some(id);
        self
    }

    /// Authenticate with a pre-shared key
    pub fn with_psk(mut self, psk: impl Into<Vec<u8>>) -> Self {
        self.psk = Some(psk.into());
        self
    }

    /// Authenticate with an EAP method
    pub fn with_eap(mut self, eap: EapMethodConfig) -> Self {
        self.eap = Some(eap);
        self
    }

    /// Override the IKE SA proposals
    pub fn with_ike_proposals(mut self, proposals: Vec<Proposal>) -> Self {
        self.ike_proposals = Some(proposals);
        self
    }

    /// Override the Child SA proposals
    pub fn with_child_proposals(mut self, proposals: Vec<Proposal>) -> Self {
        self.child_proposals = Some(proposals);
        self
    }

    /// Set the local traffic selectors
    pub fn with_local_ts(mut self, ts: Vec<TrafficSelector>) -> Self {
        self.local_ts = Some(ts);
        self
    }

    /// Set the remote traffic selectors
    pub fn with_remote_ts(mut self, ts: Vec<TrafficSelector>) -> Self {
        self.remote_ts = Some(ts);
        self
    }

    /// Negotiate transport mode
    pub fn with_transport_mode(mut self, transport: bool) -> Self {
        self.transport_mode = transport;
        self
    }

    /// Request an internal IPv4 address from the gateway
    pub fn with_internal_address_request(mut self) -> Self {
        self.request_internal_address = true;
        self
    }

    /// Override the retransmission policy
    pub fn with_retransmit(mut self, retransmit: RetransmitConfig) -> Self {
        self.retransmit = Some(retransmit);
        self
    }

    /// Override the DPD policy
    pub fn with_dpd(mut self, dpd: DpdConfig) -> Self {
        self.dpd = Some(dpd);
        self
    }

    /// Override the SA lifetime policy
    pub fn with_lifetime(mut self, lifetime: SaLifetime) -> Self {
        self.lifetime = Some(lifetime);
        self
    }

    /// Override the close grace period
    pub fn with_close_grace(mut self, grace: Duration) -> Self {
        self.close_grace = Some(grace);
        self
    }

    /// Validate and build the configuration.
    ///
    /// # Errors
    ///
    /// `InvalidSyntax` if the identity is missing, both or neither of
    /// PSK/EAP are set, or any proposal fails offer validation.
    pub fn build(self) -> Result<SessionConfig> {
        let local_id = self.local_id.ok_or_else(|| {
            Error::InvalidSyntax("Session configuration requires a local identity".to_string())
        })?;

        match (&self.psk, &self.eap) {
            (Some(_), Some(_)) => {
                return Err(Error::InvalidSyntax(
                    "PSK and EAP authentication are mutually exclusive".to_string(),
                ))
            }
            (None, None) => {
                return Err(Error::InvalidSyntax(
                    "Either a PSK or an EAP method is required".to_string(),
                ))
            }
            _ => {}
        }

        let ike_proposals = self.ike_proposals.unwrap_or_else(default_ike_proposals);
        let child_proposals = self
            .child_proposals
            .unwrap_or_else(default_child_proposals);

        if ike_proposals.is_empty() || child_proposals.is_empty() {
            return Err(Error::InvalidSyntax(
                "At least one IKE and one Child proposal are required".to_string(),
            ));
        }
        for proposal in ike_proposals.iter().chain(child_proposals.iter()) {
            proposal.validate_offer()?;
        }

        let local_ts = match self.local_ts {
            Some(ts) if ts.is_empty() => {
                return Err(Error::InvalidSyntax(
                    "Local traffic selector list cannot be empty".to_string(),
                ))
            }
            Some(ts) => ts,
            None => default_ts(),
        };
        let remote_ts = match self.remote_ts {
            Some(ts) if ts.is_empty() => {
                return Err(Error::InvalidSyntax(
                    "Remote traffic selector list cannot be empty".to_string(),
                ))
            }
            Some(ts) => ts,
            None => default_ts(),
        };

        Ok(SessionConfig {
            local_id,
            remote_id: self.remote_id,
            psk: self.psk,
            eap: self.eap,
            ike_proposals,
            child_proposals,
            local_ts,
            remote_ts,
            transport_mode: self.transport_mode,
            request_internal_address: self.request_internal_address,
            retransmit: self.retransmit.unwrap_or_default(),
            dpd: self.dpd.unwrap_or_default(),
            lifetime: self.lifetime.unwrap_or_default(),
            close_grace: self.close_grace.unwrap_or(Duration::from_millis(500)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_id() -> IkeIdentification {
        IkeIdentification::fqdn("client.example.com").unwrap()
    }

    #[test]
    fn test_build_minimal_psk_config() {
        let config = SessionConfig::builder()
            .with_local_id(local_id())
            .with_psk(b"secret".to_vec())
            .build()
            .unwrap();

        assert!(config.psk.is_some());
        assert!(config.eap.is_none());
        assert!(!config.ike_proposals.is_empty());
        assert!(!config.child_proposals.is_empty());
        assert_eq!(config.retransmit.max_attempts, 8);
        assert_eq!(config.retransmit.base_delay, Duration::from_millis(500));
        assert_eq!(config.close_grace, Duration::from_millis(500));
    }

    #[test]
    fn test_build_requires_identity() {
        let result = SessionConfig::builder().with_psk(b"secret".to_vec()).build();
        assert!(matches!(result, Err(Error::InvalidSyntax(_))));
    }

    #[test]
    fn test_build_requires_exactly_one_auth_method() {
        let result = SessionConfig::builder().with_local_id(local_id()).build();
        assert!(matches!(result, Err(Error::InvalidSyntax(_))));

        let result = SessionConfig::builder()
            .with_local_id(local_id())
            .with_psk(b"secret".to_vec())
            .with_eap(EapMethodConfig::MsChapV2 {
                username: "user".to_string(),
                password: "pass".to_string(),
            })
            .build();
        assert!(matches!(result, Err(Error::InvalidSyntax(_))));
    }

    #[test]
    fn test_build_rejects_invalid_proposal() {
        // IKE proposal without PRF
        let bad = Proposal::new(1, ProtocolId::Ike)
            .add_transform(Transform::encr_aes_gcm_16(256))
            .add_transform(Transform::dh(dh::MODP_2048));

        let result = SessionConfig::builder()
            .with_local_id(local_id())
            .with_psk(b"secret".to_vec())
            .with_ike_proposals(vec![bad])
            .build();
        assert!(matches!(result, Err(Error::InvalidSyntax(_))));
    }

    #[test]
    fn test_build_rejects_empty_ts() {
        let result = SessionConfig::builder()
            .with_local_id(local_id())
            .with_psk(b"secret".to_vec())
            .with_local_ts(Vec::new())
            .build();
        assert!(matches!(result, Err(Error::InvalidSyntax(_))));
    }

    #[test]
    fn test_retransmit_backoff_doubles() {
        let retransmit = RetransmitConfig::default();
        assert_eq!(retransmit.delay_for_attempt(0), Duration::from_millis(500));
        assert_eq!(retransmit.delay_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(retransmit.delay_for_attempt(4), Duration::from_millis(8000));
    }

    #[test]
    fn test_default_proposals_are_valid_offers() {
        for proposal in default_ike_proposals()
            .iter()
            .chain(default_child_proposals().iter())
        {
            proposal.validate_offer().unwrap();
        }
    }

    #[test]
    fn test_debug_hides_secrets() {
        let eap = EapMethodConfig::MsChapV2 {
            username: "alice".to_string(),
            password: "hunter2".to_string(),
        };
        let dump = format!("{:?}", eap);
        assert!(dump.contains("alice"));
        assert!(!dump.contains("hunter2"));
    }
}
