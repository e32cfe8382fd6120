//! Error types for IKEv2 protocol operations
//!
//! This module defines a unified error type for the IKE codec, the crypto
//! session and the session state machine. The EAP module shares it.

use std::fmt;

/// Result type for IKE operations
pub type Result<T> = std::result::Result<T, Error>;

/// IKEv2 protocol errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Message framing or payload chain is malformed
    MalformedMessage(String),

    /// A critical payload with an unrecognized type was received
    UnsupportedPayload(u8),

    /// An unrecognized non-skippable attribute was received
    UnsupportedAttribute(u16),

    /// A negotiable algorithm without a backend implementation was selected
    UnsupportedAlgorithm(String),

    /// No acceptable proposal found during SA negotiation
    NoProposalChosen,

    /// Key exchange payload or DH public value is invalid
    InvalidKeyExchange(String),

    /// Integrity checksum verification failed
    IntegrityFailure,

    /// SK payload decryption failed
    DecryptionFailure,

    /// Peer authentication failed
    AuthenticationFailed(String),

    /// Subscriber identity could not be obtained
    IdentityUnavailable(String),

    /// Field-level value is out of range or inconsistent
    InvalidSyntax(String),

    /// Event received in a state that cannot handle it
    InvalidState(String),

    /// Retransmission attempts exhausted without a response
    Timeout,

    /// Datagram transport failure
    Transport(String),

    /// Buffer too short for operation
    BufferTooShort {
        /// Required length
        required: usize,
        /// Available length
        available: usize,
    },

    /// Encoded length field disagrees with the actual content
    InvalidLength {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Internal invariant violation (should not happen)
    Internal(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::MalformedMessage(msg) => write!(f, "Malformed IKE message: {}", msg),
            Error::UnsupportedPayload(t) => {
                write!(f, "Unsupported critical payload type: {}", t)
            }
            Error::UnsupportedAttribute(t) => {
                write!(f, "Unsupported attribute type: {}", t)
            }
            Error::UnsupportedAlgorithm(msg) => {
                write!(f, "Unsupported algorithm: {}", msg)
            }
            Error::NoProposalChosen => {
                write!(f, "No acceptable proposal found in negotiation")
            }
            Error::InvalidKeyExchange(msg) => write!(f, "Invalid key exchange: {}", msg),
            Error::IntegrityFailure => write!(f, "Integrity checksum verification failed"),
            Error::DecryptionFailure => write!(f, "SK payload decryption failed"),
            Error::AuthenticationFailed(msg) => {
                write!(f, "Authentication failed: {}", msg)
            }
            Error::IdentityUnavailable(msg) => {
                write!(f, "Identity unavailable: {}", msg)
            }
            Error::InvalidSyntax(msg) => write!(f, "Invalid syntax: {}", msg),
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            Error::Timeout => write!(f, "Retransmission attempts exhausted"),
            Error::Transport(msg) => write!(f, "Transport error: {}", msg),
            Error::BufferTooShort {
                required,
                available,
            } => {
                write!(
                    f,
                    "Buffer too short: need {} bytes, have {}",
                    required, available
                )
            }
            Error::InvalidLength { expected, actual } => {
                write!(f, "Invalid length: expected {}, got {}", expected, actual)
            }
            Error::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Transport(err.to_string())
    }
}
