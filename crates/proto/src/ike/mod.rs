//! IKEv2 client-side protocol implementation (RFC 7296)
//!
//! This module implements the control plane of an IKEv2 initiator:
//!
//! - **Wire codec** - message framing, payload chain coding, SA
//!   proposal/transform coding, traffic selectors
//! - **Crypto session** - SK payload sealing/opening, PRF key derivation,
//!   Diffie-Hellman key agreement
//! - **State machine** - the IKE SA lifecycle with retransmission,
//!   rekeying, dead peer detection and EAP inner authentication
//!
//! # Architecture
//!
//! ```text
//! IkeSession (UDP 500/4500)
//!   ├── exchange builders/processors (IKE_SA_INIT, IKE_AUTH,
//!   │     CREATE_CHILD_SA, INFORMATIONAL)
//!   ├── IkeCrypto (SK payload, key derivation)
//!   └── Child SA bookkeeping (keys for the kernel data plane)
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use ikepeer_proto::ike::config::SessionConfig;
//! use ikepeer_proto::ike::payload::IkeIdentification;
//! use ikepeer_proto::ike::session::IkeSession;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SessionConfig::builder()
//!         .with_local_id(IkeIdentification::fqdn("client.example.com")?)
//!         .with_psk(b"my-secret-key".to_vec())
//!         .build()?;
//!
//!     let mut session = IkeSession::new(config);
//!     session.connect("203.0.113.1:500".parse()?).await?;
//!
//!     // Child SA keys are now available for the kernel transforms.
//!     session.close().await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod child_sa;
pub mod config;
pub mod constants;
pub mod crypto;
pub mod dpd;
pub mod error;
pub mod exchange;
pub mod logging;
pub mod message;
pub mod payload;
pub mod proposal;
pub mod session;
pub mod state;
pub mod ts;

pub use config::SessionConfig;
pub use error::{Error, Result};
pub use message::{IkeHeader, IkeMessage};
pub use session::IkeSession;
pub use state::IkeState;
