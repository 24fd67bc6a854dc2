// =============================================================================
// Collaborator seams — market data and order execution contracts
// =============================================================================
//
// The heartbeat engine consumes the exchange exclusively through these two
// traits. Production wires them to the signed REST client in `exchange::`;
// tests wire scripted in-memory fakes.
// =============================================================================

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::PositionSide;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// One open position as reported by the exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenPosition {
    pub symbol: String,
    pub side: PositionSide,
    /// Notional size in quote units.
    pub size: f64,
    pub entry_price: f64,
    pub liquidation_price: f64,
    pub margin_used: f64,
}

/// Mark price and funding for one symbol.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MarkInfo {
    pub mark_price: f64,
    pub funding_rate: f64,
}

/// Whether a trigger order protects the downside or books the upside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    Sl,
    Tp,
}

/// One resting stop-loss / take-profit order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerOrder {
    pub order_id: String,
    pub tpsl: TriggerKind,
    pub trigger_px: f64,
}

// ---------------------------------------------------------------------------
// Market data provider
// ---------------------------------------------------------------------------

/// Read-only market and account state. Any error is treated as transient by
/// the snapshotter: the tick is skipped and the watcher waits for the next
/// interval.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn list_open_positions(&self) -> anyhow::Result<Vec<OpenPosition>>;
    async fn get_mark(&self, symbol: &str) -> anyhow::Result<MarkInfo>;
    async fn get_equity(&self) -> anyhow::Result<f64>;
    async fn list_open_trigger_orders(&self, symbol: &str) -> anyhow::Result<Vec<TriggerOrder>>;
}

// ---------------------------------------------------------------------------
// Order gateway
// ---------------------------------------------------------------------------

/// Classified failure from the order gateway. `Rejected` is terminal for the
/// attempt; `Transport` and `Timeout` are candidates for the single in-tick
/// retry on idempotent operations.
#[derive(Debug, Error)]
pub enum OrderError {
    #[error("exchange rejected order: {0}")]
    Rejected(String),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("order call timed out")]
    Timeout,
}

impl OrderError {
    /// Whether a second attempt within the same tick is worthwhile.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout)
    }
}

/// Acknowledgement returned for a dispatched order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAck {
    #[serde(default)]
    pub order_id: Option<String>,
    pub detail: String,
}

/// Risk-reducing order operations. The engine only ever tightens, books, or
/// closes — it never opens or widens.
#[async_trait]
pub trait OrderGateway: Send + Sync {
    async fn tighten_stop(&self, symbol: &str, new_price: f64) -> Result<OrderAck, OrderError>;
    async fn adjust_take_profit(&self, symbol: &str, new_price: f64)
        -> Result<OrderAck, OrderError>;
    async fn partial_close(&self, symbol: &str, fraction: f64) -> Result<OrderAck, OrderError>;
    async fn close_position(&self, symbol: &str, reason: &str) -> Result<OrderAck, OrderError>;
}
