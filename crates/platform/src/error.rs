//! Error types for collaborator implementations

use std::fmt;

/// Unified error type for platform collaborators
#[derive(Debug)]
pub enum PlatformError {
    /// I/O error
    Io(std::io::Error),

    /// Configuration error
    Config(String),

    /// The UICC/SIM application rejected or failed the operation
    Uicc(String),

    /// A required resource (IMSI, key material, socket) is unavailable
    Unavailable(String),

    /// Other error
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl fmt::Display for PlatformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlatformError::Io(e) => write!(f, "IO error: {}", e),
            PlatformError::Config(msg) => write!(f, "Configuration error: {}", msg),
            PlatformError::Uicc(msg) => write!(f, "UICC error: {}", msg),
            PlatformError::Unavailable(msg) => write!(f, "Unavailable: {}", msg),
            PlatformError::Other(e) => write!(f, "Error: {}", e),
        }
    }
}

impl std::error::Error for PlatformError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PlatformError::Io(e) => Some(e),
            PlatformError::Other(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PlatformError {
    fn from(err: std::io::Error) -> Self {
        PlatformError::Io(err)
    }
}

/// Result type for platform operations
pub type PlatformResult<T> = Result<T, PlatformError>;
