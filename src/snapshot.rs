// =============================================================================
// Snapshotter — aggregates collaborator state into one PositionTick
// =============================================================================
//
// Four provider calls per tick: open positions, mark/funding, equity, and
// resting trigger orders. Derived fields are computed locally. Any upstream
// error is transient: the tick is skipped and the watcher waits for the
// next interval.
// =============================================================================

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::debug;

use crate::collaborators::{MarketDataProvider, TriggerKind, TriggerOrder};
use crate::tick::PositionTick;
use crate::types::PositionSide;

/// Guards the equity divisor against a zeroed account.
const EQUITY_EPSILON: f64 = 1e-9;

pub struct Snapshotter {
    provider: Arc<dyn MarketDataProvider>,
}

impl Snapshotter {
    pub fn new(provider: Arc<dyn MarketDataProvider>) -> Self {
        Self { provider }
    }

    /// Snapshot `symbol` at `now_ms`.
    ///
    /// `Ok(None)` means the position is no longer listed by the provider —
    /// a close transition, not an error. `Err` means a transient upstream
    /// failure; state must be left untouched by the caller.
    pub async fn snapshot(&self, symbol: &str, now_ms: i64) -> Result<Option<PositionTick>> {
        let positions = self
            .provider
            .list_open_positions()
            .await
            .context("snapshot: list_open_positions")?;

        let Some(position) = positions.into_iter().find(|p| p.symbol == symbol) else {
            return Ok(None);
        };

        let mark = self
            .provider
            .get_mark(symbol)
            .await
            .context("snapshot: get_mark")?;
        let equity = self
            .provider
            .get_equity()
            .await
            .context("snapshot: get_equity")?;
        let trigger_orders = self
            .provider
            .list_open_trigger_orders(symbol)
            .await
            .context("snapshot: list_open_trigger_orders")?;

        // Malformed numbers upstream are a transient failure, not a tick.
        if !mark.mark_price.is_finite() || mark.mark_price <= 0.0 {
            anyhow::bail!("snapshot: non-usable mark price {} for {symbol}", mark.mark_price);
        }
        if !position.size.is_finite() || position.size <= 0.0 {
            anyhow::bail!("snapshot: non-usable position size {} for {symbol}", position.size);
        }

        let direction = position.side.direction();
        let base_qty = position.size / mark.mark_price;
        let unrealized_pnl = if position.entry_price.is_finite() && position.entry_price > 0.0 {
            direction * (mark.mark_price - position.entry_price) * base_qty
        } else {
            0.0
        };
        let pnl_pct_of_equity = unrealized_pnl / equity.max(EQUITY_EPSILON) * 100.0;

        let dist_to_liquidation_pct = dist_to_liquidation_pct(mark.mark_price, position.liquidation_price);

        let stop = pick_trigger(&trigger_orders, TriggerKind::Sl, position.side, mark.mark_price);
        let tp = pick_trigger(&trigger_orders, TriggerKind::Tp, position.side, mark.mark_price);

        let tick = PositionTick {
            timestamp: now_ms,
            symbol: symbol.to_string(),
            side: position.side,
            position_size: position.size,
            entry_price: position.entry_price,
            mark_price: mark.mark_price,
            unrealized_pnl,
            pnl_pct_of_equity,
            account_equity: equity,
            margin_used: position.margin_used,
            liquidation_price: position.liquidation_price,
            dist_to_liquidation_pct,
            funding_rate: mark.funding_rate,
            stop_loss_price: stop.as_ref().map(|o| o.trigger_px),
            take_profit_price: tp.as_ref().map(|o| o.trigger_px),
            stop_loss_order_id: stop.map(|o| o.order_id),
            take_profit_order_id: tp.map(|o| o.order_id),
        };

        debug!(
            symbol,
            mark = tick.mark_price,
            pnl_pct = format!("{:.2}", tick.pnl_pct_of_equity),
            dist_liq_pct = format!("{:.2}", tick.dist_to_liquidation_pct),
            stop = ?tick.stop_loss_price,
            tp = ?tick.take_profit_price,
            "tick snapshotted"
        );

        Ok(Some(tick))
    }
}

/// |mark - liq| / |mark| * 100, or +inf when the inputs are unusable.
fn dist_to_liquidation_pct(mark: f64, liquidation: f64) -> f64 {
    if !mark.is_finite() || !liquidation.is_finite() || mark == 0.0 || liquidation <= 0.0 {
        return f64::INFINITY;
    }
    (mark - liquidation).abs() / mark.abs() * 100.0
}

/// Among trigger orders of `kind`, pick the one closest to mark on the
/// protective side. Orders resting on the wrong side are ignored.
fn pick_trigger(
    orders: &[TriggerOrder],
    kind: TriggerKind,
    side: PositionSide,
    mark: f64,
) -> Option<TriggerOrder> {
    let protective = |px: f64| -> bool {
        match (kind, side) {
            // A long's stop sits below mark; its take-profit above.
            (TriggerKind::Sl, PositionSide::Long) => px < mark,
            (TriggerKind::Tp, PositionSide::Long) => px > mark,
            (TriggerKind::Sl, PositionSide::Short) => px > mark,
            (TriggerKind::Tp, PositionSide::Short) => px < mark,
        }
    };

    orders
        .iter()
        .filter(|o| o.tpsl == kind && o.trigger_px.is_finite() && protective(o.trigger_px))
        .min_by(|a, b| {
            let da = (a.trigger_px - mark).abs();
            let db = (b.trigger_px - mark).abs();
            da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
        })
        .cloned()
}
