//! IKE session state machine
//!
//! Tracks the client-side IKE SA lifecycle:
//!
//! ```text
//! Initial
//!   ↓ (send IKE_SA_INIT request)
//! IkeInitSent
//!   ↓ (recv IKE_SA_INIT response, derive keys)
//! IkeAuthSent  ──→ EapInProgress ──┐
//!   ↓ (recv IKE_AUTH response)  ←──┘
//! Established ⇄ Rekeying
//!   ↓
//! Deleting → Closed
//! ```

use crate::ike::{Error, Result};

/// IKE SA state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IkeState {
    /// No exchange started
    Initial,

    /// IKE_SA_INIT request sent, waiting for response
    IkeInitSent,

    /// IKE_AUTH request sent, waiting for response
    IkeAuthSent,

    /// IKE_AUTH is running EAP rounds
    EapInProgress,

    /// IKE SA established
    Established,

    /// IKE SA rekey in flight
    Rekeying,

    /// Deletion in progress
    Deleting,

    /// IKE SA closed, resources released
    Closed,
}

impl IkeState {
    /// Check whether `next` is a valid successor state
    pub fn can_transition_to(&self, next: IkeState) -> bool {
        use IkeState::*;

        match (self, next) {
            (Initial, IkeInitSent) => true,
            (IkeInitSent, IkeAuthSent) => true,
            (IkeAuthSent, EapInProgress) => true,
            (EapInProgress, IkeAuthSent) => true,
            (IkeAuthSent, Established) => true,
            (EapInProgress, Established) => true,

            (Established, Rekeying) => true,
            (Rekeying, Established) => true,

            // Closing is reachable from anywhere
            (_, Deleting) => true,
            (Deleting, Closed) => true,
            (_, Closed) => true,

            // Retransmissions keep the current state
            (s1, s2) if *s1 == s2 => true,

            _ => false,
        }
    }

    /// Terminal state check
    pub fn is_terminal(&self) -> bool {
        matches!(self, IkeState::Closed)
    }

    /// Whether the IKE SA is usable for protected exchanges
    pub fn is_established(&self) -> bool {
        matches!(self, IkeState::Established | IkeState::Rekeying)
    }

    /// Whether a response to an in-flight request is expected
    pub fn is_waiting(&self) -> bool {
        matches!(
            self,
            IkeState::IkeInitSent | IkeState::IkeAuthSent | IkeState::EapInProgress
        )
    }
}

/// Message-ID bookkeeping for one IKE SA.
///
/// Requests leave with strictly increasing IDs; responses must echo the
/// outstanding request ID. Inbound peer requests are validated against a
/// one-slot window: a duplicate of the last request is answered from the
/// response cache, anything older or skipping ahead is dropped.
#[derive(Debug, Clone, Default)]
pub struct MessageIdWindow {
    /// Next request ID we will send
    next_request: u32,

    /// Highest peer request ID seen (None before the first)
    last_peer_request: Option<u32>,
}

/// Disposition of an inbound peer request per the message-ID rules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRequestDisposition {
    /// Fresh request; process it
    Process,
    /// Duplicate of the last request; replay the cached response
    ReplayCached,
    /// Outside the window; drop silently
    Drop,
}

impl MessageIdWindow {
    /// Create a fresh window
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next outbound request ID
    pub fn next_request_id(&mut self) -> u32 {
        let id = self.next_request;
        self.next_request += 1;
        id
    }

    /// ID of the request currently awaiting a response
    pub fn outstanding_request_id(&self) -> Option<u32> {
        self.next_request.checked_sub(1)
    }

    /// Validate a response ID against the outstanding request
    pub fn validate_response(&self, received: u32) -> Result<()> {
        match self.outstanding_request_id() {
            Some(expected) if expected == received => Ok(()),
            expected => Err(Error::InvalidState(format!(
                "Response ID {} does not match outstanding request {:?}",
                received, expected
            ))),
        }
    }

    /// Classify an inbound peer request ID
    pub fn classify_peer_request(&self, received: u32) -> PeerRequestDisposition {
        match self.last_peer_request {
            None => {
                if received == 0 {
                    PeerRequestDisposition::Process
                } else {
                    PeerRequestDisposition::Drop
                }
            }
            Some(last) => {
                if received == last + 1 {
                    PeerRequestDisposition::Process
                } else if received == last {
                    PeerRequestDisposition::ReplayCached
                } else {
                    PeerRequestDisposition::Drop
                }
            }
        }
    }

    /// Record a processed peer request ID
    pub fn record_peer_request(&mut self, id: u32) {
        self.last_peer_request = Some(id);
    }
}
