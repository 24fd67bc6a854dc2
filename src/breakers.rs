// =============================================================================
// Circuit Breakers — hard, LLM-free close rails
// =============================================================================
//
// Evaluated on every tick before trigger evaluation. A trip forces an
// immediate full close through the order gateway; the advisor is never
// consulted on the same tick and the rate limiter never applies.
// =============================================================================

use crate::config::BreakerConfig;
use crate::tick::PositionTick;

/// A tripped breaker: which rail, and the close reason passed to the
/// order gateway and journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerTrip {
    pub rule: &'static str,
    pub reason: String,
}

/// Check both rails against the tick. Non-finite inputs never trip.
pub fn check(tick: &PositionTick, config: &BreakerConfig) -> Option<BreakerTrip> {
    if tick.dist_to_liquidation_pct.is_finite() && tick.dist_to_liquidation_pct < config.liq_pct {
        return Some(BreakerTrip {
            rule: "liquidation_proximity",
            reason: format!("liquidation_proximity<{}%", config.liq_pct),
        });
    }

    if tick.pnl_pct_of_equity.is_finite() && tick.pnl_pct_of_equity < config.loss_pct {
        return Some(BreakerTrip {
            rule: "loss_limit",
            reason: format!("pnl_pct_of_equity<{}%", config.loss_pct),
        });
    }

    None
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PositionSide;

    fn tick(dist_to_liq: f64, pnl_pct: f64) -> PositionTick {
        PositionTick {
            timestamp: 0,
            symbol: "BTCUSDT".to_string(),
            side: PositionSide::Long,
            position_size: 1000.0,
            entry_price: 70_000.0,
            mark_price: 69_000.0,
            unrealized_pnl: -15.0,
            pnl_pct_of_equity: pnl_pct,
            account_equity: 1000.0,
            margin_used: 100.0,
            liquidation_price: 68_000.0,
            dist_to_liquidation_pct: dist_to_liq,
            funding_rate: 0.0001,
            stop_loss_price: None,
            take_profit_price: None,
            stop_loss_order_id: None,
            take_profit_order_id: None,
        }
    }

    #[test]
    fn liquidation_rail_trips_below_threshold() {
        let cfg = BreakerConfig::default();
        let trip = check(&tick(1.5, -1.0), &cfg).unwrap();
        assert_eq!(trip.rule, "liquidation_proximity");
        assert_eq!(trip.reason, "liquidation_proximity<2%");
    }

    #[test]
    fn loss_rail_trips_below_threshold() {
        let cfg = BreakerConfig::default();
        let trip = check(&tick(20.0, -5.1), &cfg).unwrap();
        assert_eq!(trip.rule, "loss_limit");
        assert_eq!(trip.reason, "pnl_pct_of_equity<-5%");
    }

    #[test]
    fn liquidation_rail_wins_when_both_trip() {
        let cfg = BreakerConfig::default();
        let trip = check(&tick(1.0, -9.0), &cfg).unwrap();
        assert_eq!(trip.rule, "liquidation_proximity");
    }

    #[test]
    fn healthy_tick_does_not_trip() {
        let cfg = BreakerConfig::default();
        assert!(check(&tick(20.0, -1.0), &cfg).is_none());
        // Boundary: strictly-less-than comparisons.
        assert!(check(&tick(2.0, -5.0), &cfg).is_none());
    }

    #[test]
    fn non_finite_inputs_do_not_trip() {
        let cfg = BreakerConfig::default();
        assert!(check(&tick(f64::NAN, f64::NAN), &cfg).is_none());
        assert!(check(&tick(f64::INFINITY, f64::NEG_INFINITY), &cfg).is_none());
    }
}
