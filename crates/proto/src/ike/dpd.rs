//! Dead Peer Detection (RFC 7296 Section 2.4)
//!
//! Liveness is probed with empty INFORMATIONAL exchanges when the SA has
//! been idle. The session consults [`DpdState`] from its timer loop and
//! sends/accounts probes through it.

use std::time::{Duration, Instant};

/// Dead peer detection configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DpdConfig {
    /// Whether DPD is enabled
    pub enabled: bool,

    /// Idle time before a probe is sent
    pub interval: Duration,

    /// Time to wait for a probe response
    pub timeout: Duration,

    /// Probe attempts before the peer is declared dead
    pub max_retries: u32,
}

impl Default for DpdConfig {
    fn default() -> Self {
        DpdConfig {
            enabled: true,
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(5),
            max_retries: 3,
        }
    }
}

impl DpdConfig {
    /// Create a new DPD configuration
    pub fn new(interval: Duration, timeout: Duration, max_retries: u32) -> Self {
        DpdConfig {
            enabled: true,
            interval,
            timeout,
            max_retries,
        }
    }

    /// Disable DPD entirely
    pub fn disabled() -> Self {
        DpdConfig {
            enabled: false,
            ..Default::default()
        }
    }
}

/// Per-SA dead peer detection state
#[derive(Debug, Clone)]
pub struct DpdState {
    /// Last time any authenticated traffic arrived from the peer
    last_activity: Instant,

    /// When the outstanding probe was sent, if any
    probe_sent_at: Option<Instant>,

    /// Consecutive unanswered probes
    failed_probes: u32,
}

impl Default for DpdState {
    fn default() -> Self {
        Self::new()
    }
}

impl DpdState {
    /// Create fresh DPD state
    pub fn new() -> Self {
        DpdState {
            last_activity: Instant::now(),
            probe_sent_at: None,
            failed_probes: 0,
        }
    }

    /// Record authenticated traffic from the peer
    pub fn mark_activity(&mut self) {
        self.last_activity = Instant::now();
        self.probe_sent_at = None;
        self.failed_probes = 0;
    }

    /// Record that a probe went out
    pub fn mark_probe_sent(&mut self) {
        self.probe_sent_at = Some(Instant::now());
    }

    /// Record a probe response
    pub fn mark_probe_answered(&mut self) {
        self.probe_sent_at = None;
        self.failed_probes = 0;
        self.last_activity = Instant::now();
    }

    /// Whether a probe should be sent now
    pub fn should_probe(&self, config: &DpdConfig) -> bool {
        if !config.enabled || self.probe_sent_at.is_some() {
            return false;
        }
        self.last_activity.elapsed() >= config.interval
    }

    /// Whether the outstanding probe has timed out
    pub fn probe_timed_out(&self, config: &DpdConfig) -> bool {
        matches!(self.probe_sent_at, Some(sent) if sent.elapsed() >= config.timeout)
    }

    /// Account a timed-out probe; returns true if the peer is now dead
    pub fn handle_probe_timeout(&mut self, config: &DpdConfig) -> bool {
        self.probe_sent_at = None;
        self.failed_probes += 1;
        self.failed_probes >= config.max_retries
    }

    /// Consecutive unanswered probes
    pub fn failed_probes(&self) -> u32 {
        self.failed_probes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> DpdConfig {
        DpdConfig::new(Duration::from_millis(0), Duration::from_millis(0), 2)
    }

    #[test]
    fn test_disabled_never_probes() {
        let state = DpdState::new();
        let config = DpdConfig::disabled();
        assert!(!state.should_probe(&config));
    }

    #[test]
    fn test_probe_after_idle() {
        let state = DpdState::new();
        // Zero interval: idle immediately
        assert!(state.should_probe(&fast_config()));
    }

    #[test]
    fn test_no_second_probe_while_outstanding() {
        let mut state = DpdState::new();
        state.mark_probe_sent();
        assert!(!state.should_probe(&fast_config()));
    }

    #[test]
    fn test_activity_resets_probe_state() {
        let mut state = DpdState::new();
        state.mark_probe_sent();
        state.handle_probe_timeout(&fast_config());
        assert_eq!(state.failed_probes(), 1);

        state.mark_activity();
        assert_eq!(state.failed_probes(), 0);
    }

    #[test]
    fn test_peer_declared_dead_after_retries() {
        let config = fast_config();
        let mut state = DpdState::new();

        state.mark_probe_sent();
        assert!(!state.handle_probe_timeout(&config));

        state.mark_probe_sent();
        assert!(state.handle_probe_timeout(&config));
    }

    #[test]
    fn test_answered_probe_clears_state() {
        let mut state = DpdState::new();
        state.mark_probe_sent();
        state.mark_probe_answered();
        assert_eq!(state.failed_probes(), 0);
        assert!(!state.probe_timed_out(&fast_config()));
    }
}
