//! ID generation utilities for Juggle
//!
//! Item IDs are short content hashes so they stay typeable on the command line.

use std::sync::atomic::{AtomicU64, Ordering};

use sha2::{Digest, Sha256};

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Get current timestamp in nanoseconds since Unix epoch
fn now_nanos() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default()
}

/// Generate a unique work item ID
///
/// Format: `{prefix}-{8 hex chars}`
/// Example: `item-3f9a0c1e`
pub fn generate_item_id(prefix: &str, title: &str) -> String {
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update(now_nanos().to_le_bytes());
    hasher.update(seq.to_le_bytes());
    hasher.update(std::process::id().to_le_bytes());
    let digest = hasher.finalize();
    format!("{}-{}", prefix, hex::encode(&digest[..4]))
}
