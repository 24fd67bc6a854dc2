// =============================================================================
// Clock — injectable wall-clock for deterministic tick evaluation
// =============================================================================

use std::time::{SystemTime, UNIX_EPOCH};

/// Source of epoch-millisecond timestamps. Watchers read the clock once per
/// tick so that trigger evaluation and journal fingerprints share a single
/// instant.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// Production clock backed by `SystemTime`.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX epoch")
            .as_millis() as i64
    }
}
