use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Custom epoch: 2025-01-01T00:00:00Z
const HUDDLE_EPOCH: u64 = 1_735_689_600_000;

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Generate a Snowflake ID.
/// Format: 42 bits timestamp | 10 bits worker | 12 bits sequence
///
/// Users, groups and messages share one id space, so an id alone is enough to
/// name a realtime room.
pub fn generate(worker_id: u16) -> i64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(HUDDLE_EPOCH);
    let timestamp = now.saturating_sub(HUDDLE_EPOCH);
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed) & 0xFFF;
    let id = (timestamp << 22) | ((worker_id as u64 & 0x3FF) << 12) | seq;
    id as i64
}

/// Extract the Unix timestamp (ms) from a snowflake.
pub fn timestamp_millis(id: i64) -> u64 {
    ((id as u64) >> 22) + HUDDLE_EPOCH
}

/// Parse an id received as text (path segment, socket payload).
pub fn parse(raw: &str) -> Option<i64> {
    raw.trim().parse::<i64>().ok().filter(|id| *id > 0)
}
