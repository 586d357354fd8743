use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use once_cell::sync::Lazy;

static AGENT_ID: Lazy<String> = Lazy::new(|| uuid::Uuid::new_v4().to_string());

/// The identity of this agent process: a random 128-bit value in textual
/// form, generated once at startup and attached to every outbound message.
pub fn agent_id() -> &'static str {
    &AGENT_ID
}

static LAST_STAMP: AtomicU64 = AtomicU64::new(0);

/// Milliseconds since the Unix epoch, clamped so that successive calls never
/// decrease even if the wall clock steps backwards between them.
pub fn monotonic_millis() -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    let prev = LAST_STAMP.fetch_max(now, Ordering::SeqCst);
    prev.max(now)
}
