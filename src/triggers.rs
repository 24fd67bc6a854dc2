// =============================================================================
// Trigger Evaluator — mechanical significance filter between ticks and the
// advisor
// =============================================================================
//
// Pure function, no I/O. Each trigger is a named condition with its own
// cooldown; a trigger fires at most once per cooldown window. Cooldowns are
// advanced if and only if the trigger actually fired. The advisor baselines
// (`last_advisor_*`) are committed separately, only when an advisor pass
// completes, which is what makes `pnl_shift` and `funding_flip` compare
// against the last *advised* state rather than the last tick.
// =============================================================================

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::TriggerConfig;
use crate::tick::{PositionTick, RollingBuffer};
use crate::types::funding_sign;

// ---------------------------------------------------------------------------
// Trigger names
// ---------------------------------------------------------------------------

pub const POSITION_OPENED: &str = "position_opened";
pub const POSITION_CLOSED: &str = "position_closed";
pub const STOP_MISSING: &str = "stop_missing";
pub const PNL_SHIFT: &str = "pnl_shift";
pub const APPROACHING_STOP: &str = "approaching_stop";
pub const APPROACHING_TP: &str = "approaching_tp";
pub const LIQUIDATION_PROXIMITY: &str = "liquidation_proximity";
pub const FUNDING_FLIP: &str = "funding_flip";
pub const FUNDING_SPIKE: &str = "funding_spike";
pub const VOLATILITY_SPIKE: &str = "volatility_spike";
pub const TIME_CEILING: &str = "time_ceiling";

/// Cooldown for `name` in milliseconds. Named defaults take precedence;
/// the generic `trigger_cooldown_seconds` is the fallback.
pub fn cooldown_ms(name: &str, config: &TriggerConfig) -> i64 {
    match name {
        POSITION_OPENED | POSITION_CLOSED | TIME_CEILING => 0,
        STOP_MISSING | LIQUIDATION_PROXIMITY => 60_000,
        APPROACHING_STOP | APPROACHING_TP => 120_000,
        PNL_SHIFT | VOLATILITY_SPIKE => 180_000,
        FUNDING_FLIP | FUNDING_SPIKE => 600_000,
        _ => (config.trigger_cooldown_seconds as i64) * 1000,
    }
}

// ---------------------------------------------------------------------------
// State carried between ticks
// ---------------------------------------------------------------------------

/// Per-symbol, per-position memory carried between ticks. Reset when the
/// position closes and reopens.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggerState {
    /// Timestamp (ms) of the last completed advisor pass. 0 means "never".
    pub last_advisor_check_ms: i64,
    /// PnL-%-of-equity at the last completed advisor pass.
    pub last_advisor_pnl_pct_of_equity: f64,
    /// Mark price at the last completed advisor pass.
    pub last_advisor_mark_price: f64,
    /// Funding-rate sign at the last completed advisor pass: -1, 0, +1.
    pub last_funding_rate_sign: i8,
    /// Per-trigger timestamp (ms) of the last firing.
    pub cooldowns: HashMap<String, i64>,
}

impl TriggerState {
    /// Commit the advisor baselines after a completed advisor pass
    /// (successful, failed, or validated-reject — never on a skip).
    pub fn commit_advisor(&mut self, tick: &PositionTick, now_ms: i64) {
        self.last_advisor_check_ms = now_ms;
        self.last_advisor_pnl_pct_of_equity = tick.pnl_pct_of_equity;
        self.last_advisor_mark_price = tick.mark_price;
        self.last_funding_rate_sign = funding_sign(tick.funding_rate);
    }
}

/// One fired trigger: the catalog name plus a human-readable detail for the
/// advisor prompt and the journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FiredTrigger {
    pub name: String,
    pub detail: String,
}

impl FiredTrigger {
    fn new(name: &str, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            detail: detail.into(),
        }
    }
}

/// Lifecycle flags supplied by the watcher alongside a tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct TickFlags {
    pub position_opened: bool,
    pub position_closed: bool,
}

/// Result of one evaluation: fired triggers plus the advanced state.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub fired: Vec<FiredTrigger>,
    pub next_state: TriggerState,
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Evaluate the full trigger catalog for one tick.
///
/// The input `state` is read-only; the advanced copy is returned in
/// [`Evaluation::next_state`]. If multiple triggers fire they are all
/// emitted and all advance their cooldowns; the caller invokes the advisor
/// once with the union. Non-finite inputs never fire a trigger.
pub fn evaluate(
    now_ms: i64,
    tick: &PositionTick,
    buffer: &RollingBuffer,
    state: &TriggerState,
    config: &TriggerConfig,
    flags: TickFlags,
) -> Evaluation {
    let mut next = state.clone();
    let mut fired: Vec<FiredTrigger> = Vec::new();

    let mut fire = |next: &mut TriggerState, name: &str, detail: String| {
        let eligible = match next.cooldowns.get(name) {
            Some(last) => now_ms - last >= cooldown_ms(name, config),
            None => true,
        };
        if eligible {
            next.cooldowns.insert(name.to_string(), now_ms);
            fired.push(FiredTrigger::new(name, detail));
        }
    };

    // --- Lifecycle ----------------------------------------------------------
    if flags.position_opened {
        fire(
            &mut next,
            POSITION_OPENED,
            format!("{} {} position now open", tick.symbol, tick.side),
        );
    }
    if flags.position_closed {
        fire(
            &mut next,
            POSITION_CLOSED,
            format!("{} position no longer on the exchange", tick.symbol),
        );
    }

    // --- Stop coverage ------------------------------------------------------
    if tick.stop_loss_price.is_none() {
        fire(
            &mut next,
            STOP_MISSING,
            "no stop-loss order on the book".to_string(),
        );
    }

    // --- PnL shift vs last advised ------------------------------------------
    let pnl_delta = tick.pnl_pct_of_equity - state.last_advisor_pnl_pct_of_equity;
    if pnl_delta.is_finite() && pnl_delta.abs() >= config.pnl_shift_pct {
        fire(
            &mut next,
            PNL_SHIFT,
            format!(
                "pnl {:.2}% of equity vs {:.2}% at last review",
                tick.pnl_pct_of_equity, state.last_advisor_pnl_pct_of_equity
            ),
        );
    }

    // --- Proximity to stop / take-profit ------------------------------------
    if let Some(stop) = tick.stop_loss_price {
        if let Some(dist) = pct_distance(tick.mark_price, stop) {
            if dist <= config.approaching_stop_pct {
                fire(
                    &mut next,
                    APPROACHING_STOP,
                    format!("mark {} within {:.2}% of stop {}", tick.mark_price, dist, stop),
                );
            }
        }
    }
    if let Some(tp) = tick.take_profit_price {
        if let Some(dist) = pct_distance(tick.mark_price, tp) {
            if dist <= config.approaching_tp_pct {
                fire(
                    &mut next,
                    APPROACHING_TP,
                    format!(
                        "mark {} within {:.2}% of take-profit {}",
                        tick.mark_price, dist, tp
                    ),
                );
            }
        }
    }

    // --- Liquidation proximity ----------------------------------------------
    if tick.dist_to_liquidation_pct.is_finite()
        && tick.dist_to_liquidation_pct <= config.liquidation_proximity_pct
    {
        fire(
            &mut next,
            LIQUIDATION_PROXIMITY,
            format!(
                "{:.2}% from liquidation (threshold {:.2}%)",
                tick.dist_to_liquidation_pct, config.liquidation_proximity_pct
            ),
        );
    }

    // --- Funding ------------------------------------------------------------
    let sign_now = funding_sign(tick.funding_rate);
    if sign_now != 0 && state.last_funding_rate_sign != 0 && sign_now != state.last_funding_rate_sign
    {
        fire(
            &mut next,
            FUNDING_FLIP,
            format!(
                "funding sign flipped {:+} -> {:+} (rate {:.6})",
                state.last_funding_rate_sign, sign_now, tick.funding_rate
            ),
        );
    }
    if tick.funding_rate.is_finite() && tick.funding_rate.abs() >= config.funding_spike {
        fire(
            &mut next,
            FUNDING_SPIKE,
            format!(
                "funding rate {:.6} beyond spike threshold {:.6}",
                tick.funding_rate, config.funding_spike
            ),
        );
    }

    // --- Volatility over the window -----------------------------------------
    // Silently skipped while the buffer is shorter than the window.
    let window = config.volatility_spike_window_ticks;
    if window >= 1 && buffer.len() >= window {
        if let Some(reference) = buffer.at(window - 1) {
            if let Some(move_pct) = pct_move(reference.mark_price, tick.mark_price) {
                if move_pct >= config.volatility_spike_pct {
                    fire(
                        &mut next,
                        VOLATILITY_SPIKE,
                        format!(
                            "mark moved {:.2}% over last {} ticks ({} -> {})",
                            move_pct, window, reference.mark_price, tick.mark_price
                        ),
                    );
                }
            }
        }
    }

    // --- Time ceiling -------------------------------------------------------
    // Cooldown 0: the advisor-commit of last_advisor_check_ms is what rate
    // limits this trigger.
    let ceiling_ms = (config.time_ceiling_minutes as i64) * 60_000;
    if state.last_advisor_check_ms == 0 {
        fire(&mut next, TIME_CEILING, "position never reviewed".to_string());
    } else if now_ms - state.last_advisor_check_ms >= ceiling_ms {
        fire(
            &mut next,
            TIME_CEILING,
            format!(
                "no advisor review for {} min",
                (now_ms - state.last_advisor_check_ms) / 60_000
            ),
        );
    }

    Evaluation { fired, next_state: next }
}

/// |a - b| / |a| * 100, or None when not computable.
fn pct_distance(mark: f64, level: f64) -> Option<f64> {
    if !mark.is_finite() || !level.is_finite() || mark == 0.0 {
        return None;
    }
    Some((mark - level).abs() / mark.abs() * 100.0)
}

/// (to - from) / from * 100 in absolute value, or None when not computable.
fn pct_move(from: f64, to: f64) -> Option<f64> {
    if !from.is_finite() || !to.is_finite() || from == 0.0 {
        return None;
    }
    Some(((to - from) / from * 100.0).abs())
}
