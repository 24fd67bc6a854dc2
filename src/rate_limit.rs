// =============================================================================
// Advisor Budget — global sliding-window cap on LLM invocations
// =============================================================================
//
// The only cross-symbol shared state in the engine. Watchers call
// `try_acquire` before building a prompt; a refused acquire journals the
// tick as `skipped` without committing advisor baselines. Circuit-breaker
// closes never consult the budget.
// =============================================================================

use std::collections::VecDeque;

use parking_lot::Mutex;
use tracing::warn;

/// Sliding window length in milliseconds.
const WINDOW_MS: i64 = 3_600_000;

/// Thread-safe sliding 1-hour budget of advisor calls.
pub struct AdvisorBudget {
    max_per_hour: u32,
    window: Mutex<VecDeque<i64>>,
}

impl AdvisorBudget {
    pub fn new(max_per_hour: u32) -> Self {
        Self {
            max_per_hour,
            window: Mutex::new(VecDeque::new()),
        }
    }

    /// Try to consume one advisor call at `now_ms`. Returns `false` without
    /// consuming anything when the window is full.
    pub fn try_acquire(&self, now_ms: i64) -> bool {
        let mut window = self.window.lock();
        Self::prune(&mut window, now_ms);

        if window.len() >= self.max_per_hour as usize {
            warn!(
                in_window = window.len(),
                max_per_hour = self.max_per_hour,
                "advisor budget exhausted — skipping LLM call"
            );
            return false;
        }
        window.push_back(now_ms);
        true
    }

    /// Calls still available in the window ending at `now_ms`.
    pub fn remaining(&self, now_ms: i64) -> u32 {
        let mut window = self.window.lock();
        Self::prune(&mut window, now_ms);
        (self.max_per_hour as usize).saturating_sub(window.len()) as u32
    }

    fn prune(window: &mut VecDeque<i64>, now_ms: i64) {
        while let Some(&oldest) = window.front() {
            if now_ms - oldest >= WINDOW_MS {
                window.pop_front();
            } else {
                break;
            }
        }
    }
}

impl std::fmt::Debug for AdvisorBudget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdvisorBudget")
            .field("max_per_hour", &self.max_per_hour)
            .field("in_window", &self.window.lock().len())
            .finish()
    }
}
