//! # Ikepeer Platform
//!
//! Collaborator interfaces consumed by the ikepeer protocol stack.
//!
//! The protocol crate never talks to the UICC directly: it asks an
//! implementation of [`SimAuthenticator`] for the subscriber identity and
//! for AKA/GSM challenge computation. Embedders provide the real telephony
//! binding; tests use scripted fakes.
//!
//! # Examples
//!
//! ```
//! use ikepeer_platform::{PlatformError, PlatformResult};
//!
//! fn example_function() -> PlatformResult<String> {
//!     Ok("Hello, ikepeer!".to_string())
//! }
//!
//! # fn main() -> PlatformResult<()> {
//! let result = example_function()?;
//! assert_eq!(result, "Hello, ikepeer!");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod error;
pub mod traits;

pub use error::{PlatformError, PlatformResult};
pub use traits::{AkaAppType, SimAuthenticator};

/// Platform version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
