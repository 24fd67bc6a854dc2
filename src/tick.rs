// =============================================================================
// Position ticks — per-poll snapshots and the per-symbol rolling buffer
// =============================================================================

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::types::PositionSide;

// ---------------------------------------------------------------------------
// PositionTick
// ---------------------------------------------------------------------------

/// Snapshot of one symbol's position and market state at one poll instant.
/// Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionTick {
    /// Milliseconds since the UNIX epoch. Non-decreasing per symbol.
    pub timestamp: i64,
    pub symbol: String,
    pub side: PositionSide,
    /// Notional size of the position in quote units.
    pub position_size: f64,
    pub entry_price: f64,
    pub mark_price: f64,
    pub unrealized_pnl: f64,
    /// Unrealised PnL as a percentage of account equity.
    pub pnl_pct_of_equity: f64,
    pub account_equity: f64,
    pub margin_used: f64,
    pub liquidation_price: f64,
    /// Distance from mark to liquidation as a percentage of mark,
    /// `+inf` when the inputs are unusable.
    pub dist_to_liquidation_pct: f64,
    pub funding_rate: f64,
    #[serde(default)]
    pub stop_loss_price: Option<f64>,
    #[serde(default)]
    pub take_profit_price: Option<f64>,
    #[serde(default)]
    pub stop_loss_order_id: Option<String>,
    #[serde(default)]
    pub take_profit_order_id: Option<String>,
}

/// Compact form of a tick embedded in journal records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactTick {
    pub timestamp: i64,
    pub side: PositionSide,
    pub position_size: f64,
    pub mark_price: f64,
    pub pnl_pct_of_equity: f64,
    pub dist_to_liquidation_pct: f64,
    #[serde(default)]
    pub stop_loss_price: Option<f64>,
    #[serde(default)]
    pub take_profit_price: Option<f64>,
}

impl PositionTick {
    /// Reduce to the compact journal form.
    pub fn compact(&self) -> CompactTick {
        CompactTick {
            timestamp: self.timestamp,
            side: self.side,
            position_size: self.position_size,
            mark_price: self.mark_price,
            pnl_pct_of_equity: self.pnl_pct_of_equity,
            dist_to_liquidation_pct: self.dist_to_liquidation_pct,
            stop_loss_price: self.stop_loss_price,
            take_profit_price: self.take_profit_price,
        }
    }
}

// ---------------------------------------------------------------------------
// RollingBuffer — bounded FIFO of recent ticks, owned by one watcher
// ---------------------------------------------------------------------------

/// Fixed-capacity FIFO of [`PositionTick`] for a single symbol. Oldest
/// entries are evicted on overflow. Created when a position is first
/// observed, dropped when the position closes. Never shared across tasks.
#[derive(Debug)]
pub struct RollingBuffer {
    ticks: VecDeque<PositionTick>,
    capacity: usize,
}

impl RollingBuffer {
    /// Create a buffer holding at most `capacity` ticks (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            ticks: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a tick, evicting the oldest entry when full.
    pub fn push(&mut self, tick: PositionTick) {
        if self.ticks.len() == self.capacity {
            self.ticks.pop_front();
        }
        self.ticks.push_back(tick);
    }

    /// Tick at `offset_from_end` (0 = newest), if present.
    pub fn at(&self, offset_from_end: usize) -> Option<&PositionTick> {
        let len = self.ticks.len();
        if offset_from_end >= len {
            return None;
        }
        self.ticks.get(len - 1 - offset_from_end)
    }

    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }

    /// The last `n` ticks, oldest first.
    pub fn window(&self, n: usize) -> Vec<&PositionTick> {
        let len = self.ticks.len();
        let start = len.saturating_sub(n);
        self.ticks.iter().skip(start).collect()
    }
}
