// =============================================================================
// Position Watcher — per-symbol heartbeat loop
// =============================================================================
//
// State machine:
//
//   IDLE ── position appears ──▶ ACTIVE
//   ACTIVE ── position disappears ──▶ CLOSING ──▶ IDLE
//   ACTIVE ── circuit breaker close ──▶ CLOSING
//   any ── supervisor shutdown ──▶ TERMINATED
//
// In ACTIVE the watcher ticks at the configured interval:
// snapshot → push to buffer → circuit breakers → trigger evaluator →
// advisor (when anything fired). Ticks are strictly serialized per symbol;
// the buffer and trigger state are owned exclusively by this task.
// =============================================================================

use std::future::Future;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{sleep, timeout, Duration};
use tracing::{error, info, warn};

use crate::account::DayStats;
use crate::advisor::Advisor;
use crate::breakers;
use crate::clock::Clock;
use crate::collaborators::{MarketDataProvider, OrderAck, OrderError, OrderGateway};
use crate::config::SentinelConfig;
use crate::journal::{
    AdvisoryDecision, DecisionDetail, Journal, KIND_CIRCUIT_BREAKER, KIND_HEARTBEAT,
};
use crate::llm::ChatModel;
use crate::notify::Notifier;
use crate::rate_limit::AdvisorBudget;
use crate::snapshot::Snapshotter;
use crate::thesis::ThesisStore;
use crate::tick::{PositionTick, RollingBuffer};
use crate::triggers::{self, TickFlags, TriggerState};
use crate::types::Outcome;

/// Pause before the single retry of a circuit-breaker close.
const BREAKER_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Everything a watcher needs from the outside world. All handles are
/// shared; the per-symbol state (buffer, trigger state) is not.
#[derive(Clone)]
pub struct Collaborators {
    pub provider: Arc<dyn MarketDataProvider>,
    pub orders: Arc<dyn OrderGateway>,
    pub chat: Arc<dyn ChatModel>,
    pub journal: Arc<dyn Journal>,
    pub notifier: Arc<dyn Notifier>,
    pub budget: Arc<AdvisorBudget>,
    pub stats: Arc<DayStats>,
    pub thesis: Arc<ThesisStore>,
    pub clock: Arc<dyn Clock>,
    pub open_position_count: Arc<AtomicUsize>,
}

/// Lifecycle phase, tracked for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherPhase {
    Idle,
    Active,
    Closing,
    Terminated,
}

/// What one tick decided about the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Keep polling.
    Continue,
    /// Position is gone (observed close or breaker close) — stop the loop.
    Closed,
    /// Persistent snapshot failures — stop and let the supervisor retry.
    Fatal,
}

pub struct PositionWatcher {
    symbol: String,
    config: Arc<SentinelConfig>,
    deps: Collaborators,
    snapshotter: Snapshotter,
    advisor: Advisor,
    buffer: RollingBuffer,
    state: TriggerState,
    phase: WatcherPhase,
    consecutive_failures: u32,
    /// Whether the first successful tick should raise `position_opened`.
    announce_open: bool,
    awaiting_first_tick: bool,
    last_tick: Option<PositionTick>,
}

impl PositionWatcher {
    pub fn new(
        symbol: impl Into<String>,
        config: Arc<SentinelConfig>,
        deps: Collaborators,
        announce_open: bool,
    ) -> Self {
        let symbol = symbol.into();
        let snapshotter = Snapshotter::new(deps.provider.clone());
        let advisor = Advisor::new(
            config.clone(),
            deps.chat.clone(),
            deps.orders.clone(),
            deps.journal.clone(),
            deps.notifier.clone(),
            deps.budget.clone(),
            deps.stats.clone(),
            deps.thesis.clone(),
            deps.open_position_count.clone(),
        );
        let buffer = RollingBuffer::new(config.rolling_buffer_size);

        Self {
            symbol,
            config,
            deps,
            snapshotter,
            advisor,
            buffer,
            state: TriggerState::default(),
            phase: WatcherPhase::Idle,
            consecutive_failures: 0,
            announce_open,
            awaiting_first_tick: true,
            last_tick: None,
        }
    }

    /// Drive the tick loop until the position closes, the watcher dies, or
    /// the supervisor signals shutdown.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(symbol = %self.symbol, "watcher started");
        self.phase = WatcherPhase::Active;

        let mut ticker = tokio::time::interval(self.config.tick_interval());
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        self.phase = WatcherPhase::Terminated;
                        break;
                    }
                }
                _ = ticker.tick() => {
                    match self.tick_once().await {
                        TickOutcome::Continue => {}
                        TickOutcome::Closed | TickOutcome::Fatal => break,
                    }
                }
            }
        }

        info!(symbol = %self.symbol, phase = ?self.phase, "watcher stopped");
    }

    /// One complete snapshot-plus-evaluation cycle.
    pub async fn tick_once(&mut self) -> TickOutcome {
        let now_ms = self.deps.clock.now_ms();

        let snapshot = match timeout(
            self.config.snapshot_timeout(),
            self.snapshotter.snapshot(&self.symbol, now_ms),
        )
        .await
        {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(e)) => return self.on_snapshot_failure(&format!("{e:#}")).await,
            Err(_) => return self.on_snapshot_failure("snapshot timed out").await,
        };
        self.consecutive_failures = 0;

        let Some(tick) = snapshot else {
            return self.on_position_closed(now_ms).await;
        };

        let flags = TickFlags {
            position_opened: self.announce_open && self.awaiting_first_tick,
            position_closed: false,
        };
        if flags.position_opened {
            self.deps.stats.record_entry();
        }
        self.awaiting_first_tick = false;

        self.buffer.push(tick.clone());

        // Hard rails come before any trigger evaluation and are never
        // rate-limited.
        if let Some(trip) = breakers::check(&tick, &self.config.circuit_breakers) {
            return self.on_breaker_trip(&tick, trip, now_ms).await;
        }

        let evaluation = triggers::evaluate(
            now_ms,
            &tick,
            &self.buffer,
            &self.state,
            &self.config.triggers,
            flags,
        );
        self.state = evaluation.next_state;

        if !evaluation.fired.is_empty() {
            info!(
                symbol = %self.symbol,
                triggers = ?evaluation.fired.iter().map(|f| f.name.as_str()).collect::<Vec<_>>(),
                "significant tick — consulting advisor"
            );
            let outcome = self
                .advisor
                .review(&tick, &self.buffer, &evaluation.fired, now_ms)
                .await;
            // A skipped advisor leaves the baselines alone so a later tick
            // can still consult once capacity returns.
            if outcome != Outcome::Skipped {
                self.state.commit_advisor(&tick, now_ms);
            }
        }

        self.last_tick = Some(tick);
        TickOutcome::Continue
    }

    pub fn phase(&self) -> WatcherPhase {
        self.phase
    }

    #[cfg(test)]
    pub(crate) fn seed_advised_state(&mut self, tick: &PositionTick, at_ms: i64) {
        self.state.commit_advisor(tick, at_ms);
        self.awaiting_first_tick = false;
        self.announce_open = false;
    }

    #[cfg(test)]
    pub(crate) fn trigger_state(&self) -> &TriggerState {
        &self.state
    }

    // -------------------------------------------------------------------------
    // Transitions
    // -------------------------------------------------------------------------

    async fn on_snapshot_failure(&mut self, message: &str) -> TickOutcome {
        self.consecutive_failures += 1;
        warn!(
            symbol = %self.symbol,
            consecutive = self.consecutive_failures,
            error = message,
            "snapshot failed — skipping tick"
        );

        if self.consecutive_failures == self.config.snapshot_failing_after {
            self.deps
                .notifier
                .notify(&format!(
                    "[{}] snapshot_failing: {} consecutive failures",
                    self.symbol, self.consecutive_failures
                ))
                .await;
        }

        if self.consecutive_failures > self.config.snapshot_fatal_after {
            error!(
                symbol = %self.symbol,
                consecutive = self.consecutive_failures,
                "persistent snapshot failures — watcher giving up"
            );
            self.deps
                .notifier
                .notify(&format!(
                    "[{}] watcher fatal: {} consecutive snapshot failures, supervisor will re-attempt",
                    self.symbol, self.consecutive_failures
                ))
                .await;
            self.phase = WatcherPhase::Idle;
            return TickOutcome::Fatal;
        }

        TickOutcome::Continue
    }

    /// The provider no longer lists the position: raise `position_closed`
    /// once, journal it, and tear down.
    async fn on_position_closed(&mut self, now_ms: i64) -> TickOutcome {
        self.phase = WatcherPhase::Closing;
        info!(symbol = %self.symbol, "position closed — tearing down watcher");

        if let Some(last) = &self.last_tick {
            self.deps.stats.record_trade_result(last.unrealized_pnl);
        }

        let record = AdvisoryDecision::new(
            KIND_HEARTBEAT,
            self.symbol.clone(),
            now_ms,
            vec![triggers::POSITION_CLOSED.to_string()],
            DecisionDetail {
                action: "none".to_string(),
                params: None,
                reason: "position no longer on the exchange".to_string(),
            },
            Outcome::Info,
            self.last_tick.as_ref().map(|t| t.compact()),
        );
        if let Err(e) = self.deps.journal.record(&record).await {
            error!(symbol = %self.symbol, error = %e, "failed to journal position close");
        }
        if self.config.notify {
            self.deps
                .notifier
                .notify(&format!("[{}] position closed", self.symbol))
                .await;
        }

        self.phase = WatcherPhase::Idle;
        TickOutcome::Closed
    }

    async fn on_breaker_trip(
        &mut self,
        tick: &PositionTick,
        trip: breakers::BreakerTrip,
        now_ms: i64,
    ) -> TickOutcome {
        warn!(
            symbol = %self.symbol,
            rule = trip.rule,
            reason = %trip.reason,
            "CIRCUIT BREAKER — closing position"
        );
        self.phase = WatcherPhase::Closing;

        let outcome = match self.close_with_retry(&trip.reason).await {
            Ok(ack) => {
                info!(symbol = %self.symbol, detail = %ack.detail, "breaker close dispatched");
                Outcome::Ok
            }
            Err(e) => {
                error!(symbol = %self.symbol, error = %e, "breaker close dispatch failed");
                self.deps
                    .notifier
                    .notify(&format!("[{}] breaker close FAILED: {e}", self.symbol))
                    .await;
                Outcome::Failed
            }
        };

        self.deps.stats.record_trade_result(tick.unrealized_pnl);

        let record = AdvisoryDecision::new(
            KIND_CIRCUIT_BREAKER,
            self.symbol.clone(),
            now_ms,
            Vec::new(),
            DecisionDetail {
                action: "close".to_string(),
                params: None,
                reason: trip.reason.clone(),
            },
            outcome,
            Some(tick.compact()),
        );
        if let Err(e) = self.deps.journal.record(&record).await {
            error!(symbol = %self.symbol, error = %e, "failed to journal breaker close");
        }
        if self.config.notify {
            self.deps
                .notifier
                .notify(&format!(
                    "[{}] CIRCUIT BREAKER close: {} ({outcome})",
                    self.symbol, trip.reason
                ))
                .await;
        }

        TickOutcome::Closed
    }

    /// Full close with the idempotent-dispatch retry policy.
    async fn close_with_retry(&self, reason: &str) -> Result<OrderAck, OrderError> {
        let call = || self.deps.orders.close_position(&self.symbol, reason);
        let first = self.timed(call()).await;
        match first {
            Ok(ack) => Ok(ack),
            Err(e) if e.is_retryable() => {
                warn!(symbol = %self.symbol, error = %e, "breaker close failed — retrying once");
                sleep(BREAKER_RETRY_DELAY).await;
                self.timed(call()).await
            }
            Err(e) => Err(e),
        }
    }

    async fn timed<F>(&self, fut: F) -> Result<OrderAck, OrderError>
    where
        F: Future<Output = Result<OrderAck, OrderError>>,
    {
        match timeout(self.config.order_timeout(), fut).await {
            Ok(result) => result,
            Err(_) => Err(OrderError::Timeout),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{
        GatewayCall, MemoryJournal, MemoryNotifier, MockChat, MockClock, MockGateway, MockProvider,
    };
    use crate::types::PositionSide;

    const TICK_MS: i64 = 30_000;

    struct Harness {
        provider: Arc<MockProvider>,
        gateway: Arc<MockGateway>,
        chat: Arc<MockChat>,
        journal: Arc<MemoryJournal>,
        notifier: Arc<MemoryNotifier>,
        clock: Arc<MockClock>,
        watcher: PositionWatcher,
        _thesis_dir: tempfile::TempDir,
    }

    fn harness(symbol: &str, config: SentinelConfig, budget: u32) -> Harness {
        let provider = Arc::new(MockProvider::new());
        let gateway = Arc::new(MockGateway::new());
        let chat = Arc::new(MockChat::new());
        let journal = Arc::new(MemoryJournal::new());
        let notifier = Arc::new(MemoryNotifier::new());
        let clock = Arc::new(MockClock::new(1_000_000));
        let thesis_dir = tempfile::tempdir().unwrap();

        let deps = Collaborators {
            provider: provider.clone(),
            orders: gateway.clone(),
            chat: chat.clone(),
            journal: journal.clone(),
            notifier: notifier.clone(),
            budget: Arc::new(AdvisorBudget::new(budget)),
            stats: Arc::new(DayStats::new()),
            thesis: Arc::new(ThesisStore::load(thesis_dir.path().join("theses.json"))),
            clock: clock.clone(),
            open_position_count: Arc::new(AtomicUsize::new(1)),
        };
        let watcher = PositionWatcher::new(symbol, Arc::new(config), deps, true);

        Harness {
            provider,
            gateway,
            chat,
            journal,
            notifier,
            clock,
            watcher,
            _thesis_dir: thesis_dir,
        }
    }

    fn seed_tick(symbol: &str, side: PositionSide, mark: f64, funding: f64) -> PositionTick {
        PositionTick {
            timestamp: 1_000_000,
            symbol: symbol.to_string(),
            side,
            position_size: 1000.0,
            entry_price: mark,
            mark_price: mark,
            unrealized_pnl: 0.0,
            pnl_pct_of_equity: 0.0,
            account_equity: 10_000.0,
            margin_used: 100.0,
            liquidation_price: 1600.0,
            dist_to_liquidation_pct: 23.0,
            funding_rate: funding,
            stop_loss_price: Some(2050.0),
            take_profit_price: Some(2140.0),
            stop_loss_order_id: None,
            take_profit_order_id: None,
        }
    }

    fn sl(px: f64) -> crate::collaborators::TriggerOrder {
        crate::collaborators::TriggerOrder {
            order_id: "sl-1".to_string(),
            tpsl: crate::collaborators::TriggerKind::Sl,
            trigger_px: px,
        }
    }

    fn tp(px: f64) -> crate::collaborators::TriggerOrder {
        crate::collaborators::TriggerOrder {
            order_id: "tp-1".to_string(),
            tpsl: crate::collaborators::TriggerKind::Tp,
            trigger_px: px,
        }
    }

    /// S1 — quiet hold: 60 calm ticks produce exactly one `time_ceiling`
    /// advisor call near the 15-minute mark, journaled as `hold`.
    #[tokio::test]
    async fn s1_quiet_hold_fires_time_ceiling_once() {
        let mut h = harness("ETHUSDT", SentinelConfig::default(), 20);
        h.provider.set_equity(10_000.0);
        h.watcher
            .seed_advised_state(&seed_tick("ETHUSDT", PositionSide::Long, 2080.0, 0.00005), 1_000_000);

        for i in 0..60 {
            let mark = 2081.0 + (i % 3) as f64; // drifts within [2081, 2083]
            h.provider
                .set_position("ETHUSDT", PositionSide::Long, 1000.0, 2080.0, 1600.0);
            h.provider.set_mark("ETHUSDT", mark, 0.00005);
            h.provider
                .set_trigger_orders("ETHUSDT", vec![sl(2050.0), tp(2140.0)]);
            assert_eq!(h.watcher.tick_once().await, TickOutcome::Continue);
            h.clock.advance(TICK_MS);
        }

        assert_eq!(h.chat.call_count(), 1);
        let records = h.journal.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].triggers, vec!["time_ceiling".to_string()]);
        assert_eq!(records[0].outcome, Outcome::Ok);
        assert_eq!(records[0].decision.action, "hold");
        // Fired at the 15-minute mark: tick 30.
        assert_eq!(records[0].timestamp, 1_000_000 + 30 * TICK_MS);
        assert!(h.gateway.calls().is_empty());
    }

    /// S2 — trailing winner: pnl_shift fires at +1.5 % of equity (not at
    /// +1.4 %) and the advised stop tighten is validated and dispatched.
    #[tokio::test]
    async fn s2_trailing_winner_tightens_stop_on_pnl_shift() {
        let mut h = harness("ETHUSDT", SentinelConfig::default(), 20);
        h.provider.set_equity(10_000.0);
        h.chat.push_reply(
            r#"{"action": "tighten_stop", "params": {"newStopPrice": 2080}, "reason": "trail the winner"}"#,
        );
        h.watcher
            .seed_advised_state(&seed_tick("ETHUSDT", PositionSide::Long, 2080.0, 0.00005), 1_000_000);

        // Five base-units long from 2080; notional tracks mark.
        let mark_at = |i: i64| -> f64 {
            match i {
                12..=14 => 2108.0, // +1.4 % of equity
                15 => 2110.0,      // +1.5 % — fires
                _ => 2080.0 + i as f64,
            }
        };

        for i in 1..=15 {
            h.clock.advance(TICK_MS);
            let mark = mark_at(i);
            h.provider
                .set_position("ETHUSDT", PositionSide::Long, 5.0 * mark, 2080.0, 1600.0);
            h.provider.set_mark("ETHUSDT", mark, 0.00005);
            h.provider.set_trigger_orders("ETHUSDT", vec![sl(2050.0)]);
            assert_eq!(h.watcher.tick_once().await, TickOutcome::Continue);
        }

        assert_eq!(h.chat.call_count(), 1);
        assert_eq!(
            h.gateway.calls(),
            vec![GatewayCall::TightenStop {
                symbol: "ETHUSDT".to_string(),
                new_price: 2080.0
            }]
        );
        let records = h.journal.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].triggers, vec!["pnl_shift".to_string()]);
        // Invariant: the commit stamps the advised tick's instant.
        assert_eq!(
            h.watcher.trigger_state().last_advisor_check_ms,
            1_000_000 + 15 * TICK_MS
        );
        assert!((h.watcher.trigger_state().last_advisor_pnl_pct_of_equity - 1.5).abs() < 1e-9);
    }

    /// S3 — adverse spike on a short: volatility_spike and approaching_stop
    /// fire together on the final tick; the advisor closes.
    #[tokio::test]
    async fn s3_adverse_spike_closes_short() {
        let mut config = SentinelConfig::default();
        config.triggers.volatility_spike_window_ticks = 5;
        config.triggers.volatility_spike_pct = 1.5;
        let mut h = harness("BTCUSDT", config, 20);
        h.provider.set_equity(10_000.0);
        h.chat
            .push_reply(r#"{"action": "close", "reason": "momentum against the short"}"#);
        h.watcher.seed_advised_state(
            &seed_tick("BTCUSDT", PositionSide::Short, 69_800.0, 0.00005),
            1_000_000,
        );

        let marks = [69_800.0, 70_000.0, 70_200.0, 70_500.0, 70_900.0];
        for mark in marks {
            h.clock.advance(TICK_MS);
            h.provider
                .set_position("BTCUSDT", PositionSide::Short, 0.1 * mark, 70_000.0, 85_000.0);
            h.provider.set_mark("BTCUSDT", mark, 0.00005);
            h.provider.set_trigger_orders("BTCUSDT", vec![sl(71_500.0)]);
            assert_eq!(h.watcher.tick_once().await, TickOutcome::Continue);
        }

        assert_eq!(h.chat.call_count(), 1);
        let records = h.journal.records();
        assert_eq!(records.len(), 1);
        assert!(records[0].triggers.contains(&"volatility_spike".to_string()));
        assert!(records[0].triggers.contains(&"approaching_stop".to_string()));
        assert_eq!(
            h.gateway.calls(),
            vec![GatewayCall::ClosePosition {
                symbol: "BTCUSDT".to_string(),
                reason: "advisor_close".to_string()
            }]
        );
    }

    /// S5 — circuit breaker: liquidation proximity forces a close before
    /// any trigger evaluation; no LLM call is made.
    #[tokio::test]
    async fn s5_circuit_breaker_closes_without_llm() {
        let mut h = harness("BTCUSDT", SentinelConfig::default(), 20);
        h.provider.set_equity(1_000.0);
        h.watcher.seed_advised_state(
            &seed_tick("BTCUSDT", PositionSide::Long, 70_000.0, 0.00005),
            1_000_000,
        );

        h.clock.advance(TICK_MS);
        // |70000 - 68950| / 70000 = 1.5 % < the 2 % rail.
        h.provider
            .set_position("BTCUSDT", PositionSide::Long, 700.0, 70_000.0, 68_950.0);
        h.provider.set_mark("BTCUSDT", 70_000.0, 0.00005);
        h.provider.set_trigger_orders("BTCUSDT", vec![]);

        assert_eq!(h.watcher.tick_once().await, TickOutcome::Closed);
        assert_eq!(h.chat.call_count(), 0);
        assert_eq!(
            h.gateway.calls(),
            vec![GatewayCall::ClosePosition {
                symbol: "BTCUSDT".to_string(),
                reason: "liquidation_proximity<2%".to_string()
            }]
        );
        let records = h.journal.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, KIND_CIRCUIT_BREAKER);
        assert_eq!(records[0].outcome, Outcome::Ok);
    }

    /// First tick of a fresh watcher unions position_opened with the
    /// never-reviewed time_ceiling into a single advisor call.
    #[tokio::test]
    async fn first_tick_announces_open_with_one_advisor_call() {
        let mut h = harness("ETHUSDT", SentinelConfig::default(), 20);
        h.provider.set_equity(10_000.0);
        h.provider
            .set_position("ETHUSDT", PositionSide::Long, 1000.0, 2080.0, 1600.0);
        h.provider.set_mark("ETHUSDT", 2080.0, 0.00005);
        h.provider
            .set_trigger_orders("ETHUSDT", vec![sl(2050.0), tp(2140.0)]);

        h.clock.advance(TICK_MS);
        assert_eq!(h.watcher.tick_once().await, TickOutcome::Continue);

        assert_eq!(h.chat.call_count(), 1);
        let records = h.journal.records();
        assert_eq!(records.len(), 1);
        assert!(records[0].triggers.contains(&"position_opened".to_string()));
        assert!(records[0].triggers.contains(&"time_ceiling".to_string()));
    }

    /// Position disappearing raises position_closed exactly once and ends
    /// the loop with an info record, no LLM call.
    #[tokio::test]
    async fn disappearing_position_journals_close_and_stops() {
        let mut h = harness("ETHUSDT", SentinelConfig::default(), 20);
        h.provider.set_equity(10_000.0);
        h.provider
            .set_position("ETHUSDT", PositionSide::Long, 1000.0, 2080.0, 1600.0);
        h.provider.set_mark("ETHUSDT", 2080.0, 0.00005);
        h.provider
            .set_trigger_orders("ETHUSDT", vec![sl(2050.0), tp(2140.0)]);

        h.clock.advance(TICK_MS);
        assert_eq!(h.watcher.tick_once().await, TickOutcome::Continue);

        h.provider.clear_position("ETHUSDT");
        h.clock.advance(TICK_MS);
        assert_eq!(h.watcher.tick_once().await, TickOutcome::Closed);
        assert_eq!(h.watcher.phase(), WatcherPhase::Idle);

        let records = h.journal.records();
        let close = records.last().unwrap();
        assert_eq!(close.triggers, vec!["position_closed".to_string()]);
        assert_eq!(close.outcome, Outcome::Info);
        assert!(close.snapshot.is_some());
        assert!(h
            .notifier
            .messages()
            .iter()
            .any(|m| m.contains("position closed")));
    }

    /// Transient snapshot failures skip ticks; the failing threshold
    /// notifies; past the fatal threshold the watcher gives up.
    #[tokio::test]
    async fn snapshot_failures_escalate_then_go_fatal() {
        let mut config = SentinelConfig::default();
        config.snapshot_failing_after = 2;
        config.snapshot_fatal_after = 4;
        let mut h = harness("ETHUSDT", config, 20);
        h.provider.set_equity(10_000.0);
        h.watcher
            .seed_advised_state(&seed_tick("ETHUSDT", PositionSide::Long, 2080.0, 0.00005), 1_000_000);

        h.provider.fail_next_calls(100);
        for i in 1..=4 {
            h.clock.advance(TICK_MS);
            assert_eq!(h.watcher.tick_once().await, TickOutcome::Continue, "tick {i}");
        }
        assert!(h
            .notifier
            .messages()
            .iter()
            .any(|m| m.contains("snapshot_failing")));

        h.clock.advance(TICK_MS);
        assert_eq!(h.watcher.tick_once().await, TickOutcome::Fatal);
        assert!(h.notifier.messages().iter().any(|m| m.contains("fatal")));
        // No journal records and no orders from failures.
        assert!(h.journal.records().is_empty());
        assert!(h.gateway.calls().is_empty());
    }

    /// A skipped advisor (budget exhausted) advances trigger cooldowns but
    /// leaves the advisor baselines uncommitted.
    #[tokio::test]
    async fn skipped_advisor_does_not_commit_baselines() {
        let mut h = harness("ETHUSDT", SentinelConfig::default(), 0);
        h.provider.set_equity(10_000.0);
        let seeded_at = 1_000_000;
        h.watcher
            .seed_advised_state(&seed_tick("ETHUSDT", PositionSide::Long, 2080.0, 0.00005), seeded_at);

        h.clock.advance(TICK_MS);
        h.provider
            .set_position("ETHUSDT", PositionSide::Long, 1000.0, 2080.0, 1600.0);
        h.provider.set_mark("ETHUSDT", 2080.0, 0.00005);
        // No stop resting: stop_missing fires.
        h.provider.set_trigger_orders("ETHUSDT", vec![]);

        assert_eq!(h.watcher.tick_once().await, TickOutcome::Continue);
        assert_eq!(h.chat.call_count(), 0);

        let state = h.watcher.trigger_state();
        assert_eq!(state.last_advisor_check_ms, seeded_at);
        assert!(state.cooldowns.contains_key("stop_missing"));
        let records = h.journal.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].outcome, Outcome::Skipped);
    }
}
