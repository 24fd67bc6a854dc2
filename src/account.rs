// =============================================================================
// Day Stats — daily entry count and win/loss streak for advisor context
// =============================================================================
//
// Counters reset automatically when the UTC date rolls over. The advisor's
// account block reads a snapshot; watchers record entries when a position
// first appears and results when it disappears.
// =============================================================================

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Serialisable snapshot of today's counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DayStatsSnapshot {
    pub entries_today: u32,
    pub wins_today: u32,
    pub losses_today: u32,
    /// Positive = consecutive wins, negative = consecutive losses.
    pub streak: i32,
    pub current_date: String,
}

struct Inner {
    entries_today: u32,
    wins_today: u32,
    losses_today: u32,
    streak: i32,
    current_date: String,
}

/// Thread-safe daily counters shared by all watchers.
pub struct DayStats {
    state: RwLock<Inner>,
}

impl DayStats {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(Inner {
                entries_today: 0,
                wins_today: 0,
                losses_today: 0,
                streak: 0,
                current_date: Utc::now().format("%Y-%m-%d").to_string(),
            }),
        }
    }

    /// Count a newly observed position.
    pub fn record_entry(&self) {
        self.maybe_reset_daily();
        let mut s = self.state.write();
        s.entries_today += 1;
        debug!(entries_today = s.entries_today, "position entry recorded");
    }

    /// Count a closed position's result. The streak extends on a win and
    /// flips on a loss.
    pub fn record_trade_result(&self, pnl: f64) {
        self.maybe_reset_daily();
        let mut s = self.state.write();
        if pnl >= 0.0 {
            s.wins_today += 1;
            s.streak = if s.streak > 0 { s.streak + 1 } else { 1 };
        } else {
            s.losses_today += 1;
            s.streak = if s.streak < 0 { s.streak - 1 } else { -1 };
        }
        debug!(
            pnl,
            wins = s.wins_today,
            losses = s.losses_today,
            streak = s.streak,
            "trade result recorded"
        );
    }

    pub fn snapshot(&self) -> DayStatsSnapshot {
        self.maybe_reset_daily();
        let s = self.state.read();
        DayStatsSnapshot {
            entries_today: s.entries_today,
            wins_today: s.wins_today,
            losses_today: s.losses_today,
            streak: s.streak,
            current_date: s.current_date.clone(),
        }
    }

    /// Reset the daily counters when the calendar date has rolled over.
    /// The streak survives the rollover.
    fn maybe_reset_daily(&self) {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        {
            let s = self.state.read();
            if s.current_date == today {
                return;
            }
        }
        let mut s = self.state.write();
        // Double-check after taking the write lock.
        if s.current_date != today {
            info!(
                old_date = %s.current_date,
                new_date = %today,
                "date rolled — resetting daily counters"
            );
            s.entries_today = 0;
            s.wins_today = 0;
            s.losses_today = 0;
            s.current_date = today;
        }
    }
}

impl Default for DayStats {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DayStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.state.read();
        f.debug_struct("DayStats")
            .field("entries_today", &s.entries_today)
            .field("streak", &s.streak)
            .finish()
    }
}
