//! Structured logging helpers for IKE session events
//!
//! Thin wrappers over `tracing` so call sites stay terse and field names
//! stay consistent. Key material and identities never reach the log
//! stream; SPIs and algorithm names do.
//!
//! # Example
//!
//! ```rust,ignore
//! logging::log_exchange_sent("IKE_SA_INIT", 0, 432);
//! ```

use tracing::{debug, info, warn};

/// Log an IKE SA state transition
pub fn log_state_transition(spi_i: &[u8], spi_r: &[u8], state_from: &str, state_to: &str) {
    info!(
        ike_spi_i = %hex::encode(spi_i),
        ike_spi_r = %hex::encode(spi_r),
        state_from = state_from,
        state_to = state_to,
        "IKE SA state transition"
    );
}

/// Log an outbound exchange request
pub fn log_exchange_sent(exchange: &str, message_id: u32, size_bytes: usize) {
    debug!(
        exchange = exchange,
        message_id = message_id,
        size_bytes = size_bytes,
        "Request sent"
    );
}

/// Log a matched exchange response
pub fn log_exchange_completed(exchange: &str, message_id: u32) {
    debug!(
        exchange = exchange,
        message_id = message_id,
        "Response matched"
    );
}

/// Log a retransmission attempt
pub fn log_retransmit(message_id: u32, attempt: u32, backoff_ms: u64) {
    debug!(
        message_id = message_id,
        attempt = attempt,
        backoff_ms = backoff_ms,
        "Retransmitting request"
    );
}

/// Log a dropped inbound datagram
pub fn log_datagram_dropped(reason: &str) {
    debug!(reason = reason, "Inbound datagram dropped");
}

/// Log proposal negotiation outcome
pub fn log_proposal_negotiated(protocol: &str, proposal_num: u8) {
    info!(
        protocol = protocol,
        proposal_num = proposal_num,
        "Proposal negotiated"
    );
}

/// Log Child SA installation
pub fn log_child_sa_created(inbound_spi: u32, outbound_spi: u32, transport_mode: bool) {
    info!(
        inbound_spi = format_args!("0x{:08x}", inbound_spi),
        outbound_spi = format_args!("0x{:08x}", outbound_spi),
        transport_mode = transport_mode,
        "Child SA created"
    );
}

/// Log Child SA deletion
pub fn log_child_sa_deleted(inbound_spi: u32, reason: &str) {
    info!(
        inbound_spi = format_args!("0x{:08x}", inbound_spi),
        reason = reason,
        "Child SA deleted"
    );
}

/// Log the start of a rekey
pub fn log_rekey_start(kind: &str) {
    info!(kind = kind, "Rekey started");
}

/// Log a completed rekey
pub fn log_rekey_complete(kind: &str) {
    info!(kind = kind, "Rekey complete");
}

/// Log an EAP method state transition
pub fn log_eap_transition(method: &str, state_from: &str, state_to: &str) {
    debug!(
        method = method,
        state_from = state_from,
        state_to = state_to,
        "EAP method state transition"
    );
}

/// Log EAP authentication success
pub fn log_eap_success(method: &str) {
    info!(method = method, "EAP authentication succeeded");
}

/// Log a protocol-level failure that closes the SA
pub fn log_fatal_error(context: &str, error: &str) {
    warn!(context = context, error = error, "Fatal IKE SA error");
}

/// Log a dead peer detection probe
pub fn log_dpd_probe(message_id: u32) {
    debug!(message_id = message_id, "DPD probe sent");
}
