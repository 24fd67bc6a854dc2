// =============================================================================
// Test support — scripted in-memory collaborators
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::clock::Clock;
use crate::collaborators::{
    MarkInfo, MarketDataProvider, OpenPosition, OrderAck, OrderError, OrderGateway, TriggerOrder,
};
use crate::journal::{AdvisoryDecision, Journal};
use crate::llm::ChatModel;
use crate::notify::Notifier;
use crate::types::PositionSide;

// ---------------------------------------------------------------------------
// MockProvider
// ---------------------------------------------------------------------------

pub struct MockProvider {
    positions: Mutex<Vec<OpenPosition>>,
    marks: Mutex<HashMap<String, MarkInfo>>,
    equity: Mutex<f64>,
    trigger_orders: Mutex<HashMap<String, Vec<TriggerOrder>>>,
    fail_remaining: AtomicU32,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            positions: Mutex::new(Vec::new()),
            marks: Mutex::new(HashMap::new()),
            equity: Mutex::new(10_000.0),
            trigger_orders: Mutex::new(HashMap::new()),
            fail_remaining: AtomicU32::new(0),
        }
    }

    pub fn set_position(
        &self,
        symbol: &str,
        side: PositionSide,
        size: f64,
        entry_price: f64,
        liquidation_price: f64,
    ) {
        let mut positions = self.positions.lock();
        positions.retain(|p| p.symbol != symbol);
        positions.push(OpenPosition {
            symbol: symbol.to_string(),
            side,
            size,
            entry_price,
            liquidation_price,
            margin_used: size / 10.0,
        });
    }

    pub fn clear_position(&self, symbol: &str) {
        self.positions.lock().retain(|p| p.symbol != symbol);
    }

    pub fn set_mark(&self, symbol: &str, mark_price: f64, funding_rate: f64) {
        self.marks.lock().insert(
            symbol.to_string(),
            MarkInfo {
                mark_price,
                funding_rate,
            },
        );
    }

    pub fn set_equity(&self, equity: f64) {
        *self.equity.lock() = equity;
    }

    pub fn set_trigger_orders(&self, symbol: &str, orders: Vec<TriggerOrder>) {
        self.trigger_orders.lock().insert(symbol.to_string(), orders);
    }

    /// Make the next `n` provider calls fail.
    pub fn fail_next_calls(&self, n: u32) {
        self.fail_remaining.store(n, Ordering::SeqCst);
    }

    fn maybe_fail(&self) -> anyhow::Result<()> {
        let remaining = self.fail_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_remaining.store(remaining - 1, Ordering::SeqCst);
            anyhow::bail!("scripted provider failure");
        }
        Ok(())
    }
}

#[async_trait]
impl MarketDataProvider for MockProvider {
    async fn list_open_positions(&self) -> anyhow::Result<Vec<OpenPosition>> {
        self.maybe_fail()?;
        Ok(self.positions.lock().clone())
    }

    async fn get_mark(&self, symbol: &str) -> anyhow::Result<MarkInfo> {
        self.maybe_fail()?;
        self.marks
            .lock()
            .get(symbol)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("no scripted mark for {symbol}"))
    }

    async fn get_equity(&self) -> anyhow::Result<f64> {
        self.maybe_fail()?;
        Ok(*self.equity.lock())
    }

    async fn list_open_trigger_orders(&self, symbol: &str) -> anyhow::Result<Vec<TriggerOrder>> {
        self.maybe_fail()?;
        Ok(self
            .trigger_orders
            .lock()
            .get(symbol)
            .cloned()
            .unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// MockGateway
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum GatewayCall {
    TightenStop { symbol: String, new_price: f64 },
    AdjustTakeProfit { symbol: String, new_price: f64 },
    PartialClose { symbol: String, fraction: f64 },
    ClosePosition { symbol: String, reason: String },
}

pub struct MockGateway {
    pub calls: Mutex<Vec<GatewayCall>>,
    fail_remaining: AtomicU32,
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail_remaining: AtomicU32::new(0),
        }
    }

    /// Make the next `n` gateway calls fail with a transport error.
    pub fn fail_next_calls(&self, n: u32) {
        self.fail_remaining.store(n, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.calls.lock().clone()
    }

    fn record(&self, call: GatewayCall) -> Result<OrderAck, OrderError> {
        self.calls.lock().push(call);
        let remaining = self.fail_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(OrderError::Transport("scripted gateway failure".into()));
        }
        Ok(OrderAck {
            order_id: Some("mock-1".to_string()),
            detail: "ok".to_string(),
        })
    }
}

#[async_trait]
impl OrderGateway for MockGateway {
    async fn tighten_stop(&self, symbol: &str, new_price: f64) -> Result<OrderAck, OrderError> {
        self.record(GatewayCall::TightenStop {
            symbol: symbol.to_string(),
            new_price,
        })
    }

    async fn adjust_take_profit(
        &self,
        symbol: &str,
        new_price: f64,
    ) -> Result<OrderAck, OrderError> {
        self.record(GatewayCall::AdjustTakeProfit {
            symbol: symbol.to_string(),
            new_price,
        })
    }

    async fn partial_close(&self, symbol: &str, fraction: f64) -> Result<OrderAck, OrderError> {
        self.record(GatewayCall::PartialClose {
            symbol: symbol.to_string(),
            fraction,
        })
    }

    async fn close_position(&self, symbol: &str, reason: &str) -> Result<OrderAck, OrderError> {
        self.record(GatewayCall::ClosePosition {
            symbol: symbol.to_string(),
            reason: reason.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// MockChat
// ---------------------------------------------------------------------------

pub struct MockChat {
    replies: Mutex<VecDeque<anyhow::Result<String>>>,
    pub calls: AtomicU32,
}

impl MockChat {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            calls: AtomicU32::new(0),
        }
    }

    pub fn push_reply(&self, reply: impl Into<String>) {
        self.replies.lock().push_back(Ok(reply.into()));
    }

    pub fn push_failure(&self, message: &str) {
        self.replies
            .lock()
            .push_back(Err(anyhow::anyhow!("{message}")));
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatModel for MockChat {
    async fn complete(
        &self,
        _system: &str,
        _user: &str,
        _temperature: f64,
        _max_tokens: u32,
    ) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.replies.lock().pop_front() {
            Some(reply) => reply,
            None => Ok(r#"{"action": "hold", "reason": "default scripted reply"}"#.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryJournal / MemoryNotifier
// ---------------------------------------------------------------------------

pub struct MemoryJournal {
    pub records: Mutex<Vec<AdvisoryDecision>>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
        }
    }

    pub fn records(&self) -> Vec<AdvisoryDecision> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl Journal for MemoryJournal {
    async fn record(&self, artifact: &AdvisoryDecision) -> anyhow::Result<()> {
        let mut records = self.records.lock();
        if records
            .iter()
            .any(|r| r.fingerprint() == artifact.fingerprint())
        {
            return Ok(());
        }
        records.push(artifact.clone());
        Ok(())
    }
}

pub struct MemoryNotifier {
    pub messages: Mutex<Vec<String>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
        }
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn notify(&self, text: &str) {
        self.messages.lock().push(text.to_string());
    }
}

// ---------------------------------------------------------------------------
// MockClock
// ---------------------------------------------------------------------------

pub struct MockClock {
    now: AtomicI64,
}

impl MockClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now: AtomicI64::new(start_ms),
        }
    }

    pub fn advance(&self, ms: i64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set(&self, ms: i64) {
        self.now.store(ms, Ordering::SeqCst);
    }
}

impl Clock for MockClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}
