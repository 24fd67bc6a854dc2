// =============================================================================
// Request-Weight Guard — monitors futures API usage to avoid 429s
// =============================================================================
//
// Binance USDT-M futures allows 2 400 request weight per minute; we hard-cap
// ourselves at 2 000. The guard reads the `X-MBX-USED-WEIGHT-1M` response
// header after every request and keeps an atomic counter that any task may
// query lock-free.
// =============================================================================

use std::sync::atomic::{AtomicU32, Ordering};

use tracing::{debug, warn};

/// Hard ceiling at which we refuse to send additional requests.
const WEIGHT_HARD_LIMIT: u32 = 2_000;
/// Soft warning threshold.
const WEIGHT_WARN_THRESHOLD: u32 = 1_600;

/// Thread-safe request-weight guard backed by an atomic counter.
pub struct WeightGuard {
    used_weight_1m: AtomicU32,
}

impl WeightGuard {
    pub fn new() -> Self {
        Self {
            used_weight_1m: AtomicU32::new(0),
        }
    }

    /// Update the counter from the response headers returned by the
    /// exchange.
    pub fn update_from_headers(&self, headers: &reqwest::header::HeaderMap) {
        let Some(val) = headers.get("X-MBX-USED-WEIGHT-1M") else {
            return;
        };
        let Some(w) = val.to_str().ok().and_then(|s| s.parse::<u32>().ok()) else {
            return;
        };

        let prev = self.used_weight_1m.swap(w, Ordering::Relaxed);
        if w >= WEIGHT_WARN_THRESHOLD && prev < WEIGHT_WARN_THRESHOLD {
            warn!(
                used_weight = w,
                hard_limit = WEIGHT_HARD_LIMIT,
                "request weight crossed warning threshold"
            );
        }
        debug!(used_weight_1m = w, "request weight updated from header");
    }

    /// Whether we can afford to spend `weight` more request weight without
    /// exceeding the hard limit.
    pub fn can_send(&self, weight: u32) -> bool {
        let current = self.used_weight_1m.load(Ordering::Relaxed);
        let allowed = current + weight <= WEIGHT_HARD_LIMIT;
        if !allowed {
            warn!(
                current_weight = current,
                requested_weight = weight,
                hard_limit = WEIGHT_HARD_LIMIT,
                "request blocked — would exceed weight limit"
            );
        }
        allowed
    }
}

impl Default for WeightGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for WeightGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeightGuard")
            .field("used_weight_1m", &self.used_weight_1m.load(Ordering::Relaxed))
            .finish()
    }
}
