//! Shared utilities for xds-server.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Global counter for generating unique nonces.
static NONCE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a unique nonce for discovery responses.
///
/// Nonces correlate a node's ACK/NACK with the response it answers. They
/// combine a timestamp with an atomic counter to stay unique under
/// concurrency.
///
/// # Format
///
/// `{timestamp_hex}-{counter_hex}`, e.g. `18c5a3b2f1-0`.
pub fn generate_nonce() -> String {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;

    let count = NONCE_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{:x}-{:x}", timestamp, count)
}
