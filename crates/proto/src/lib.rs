//! # Ikepeer Proto
//!
//! Client-side IKEv2 (RFC 7296) peer with EAP inner authentication.
//!
//! This crate implements the control plane of an IPsec VPN client:
//!
//! - **`ike`** - IKEv2 wire codec, SA proposal negotiation, the encrypted
//!   (SK) payload crypto session, and the IKE session state machine
//!   (IKE_SA_INIT, IKE_AUTH, CREATE_CHILD_SA, INFORMATIONAL, retransmission,
//!   rekeying, dead peer detection).
//! - **`eap`** - EAP framing (RFC 3748) and the EAP-SIM (RFC 4186),
//!   EAP-AKA (RFC 4187), EAP-AKA' (RFC 5448) and EAP-MSCHAPv2 method state
//!   machines, exporting MSK/EMSK keys into the IKE AUTH exchange.
//!
//! The kernel transform installation path, certificate verification and the
//! telephony/UICC binding are collaborator concerns; the UICC oracle is
//! consumed through [`ikepeer_platform::SimAuthenticator`].

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod eap;
pub mod ike;

/// Protocol library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
