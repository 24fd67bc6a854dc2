// =============================================================================
// Advisor Orchestrator — builds context, consults the LLM, validates, and
// dispatches risk-reducing actions
// =============================================================================
//
// One invocation per significant tick, regardless of how many triggers
// fired. Every outcome is journaled; the caller commits the advisor
// baselines on every outcome except `skipped`.
// =============================================================================

pub mod action;
pub mod prompt;

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::time::{sleep, timeout, Duration};
use tracing::{error, info, warn};

use crate::account::DayStats;
use crate::advisor::action::{parse_reply, validate, AdvisorAction};
use crate::advisor::prompt::{build_user_message, system_preamble, AccountBlock};
use crate::collaborators::{OrderAck, OrderError, OrderGateway};
use crate::config::SentinelConfig;
use crate::journal::{AdvisoryDecision, DecisionDetail, Journal, KIND_HEARTBEAT};
use crate::llm::ChatModel;
use crate::notify::Notifier;
use crate::rate_limit::AdvisorBudget;
use crate::thesis::ThesisStore;
use crate::tick::{PositionTick, RollingBuffer};
use crate::triggers::FiredTrigger;
use crate::types::Outcome;

/// Pause before the single retry of an idempotent order dispatch.
const DISPATCH_RETRY_DELAY: Duration = Duration::from_secs(1);

pub struct Advisor {
    config: Arc<SentinelConfig>,
    chat: Arc<dyn ChatModel>,
    orders: Arc<dyn OrderGateway>,
    journal: Arc<dyn Journal>,
    notifier: Arc<dyn Notifier>,
    budget: Arc<AdvisorBudget>,
    stats: Arc<DayStats>,
    thesis: Arc<ThesisStore>,
    open_position_count: Arc<AtomicUsize>,
}

impl Advisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<SentinelConfig>,
        chat: Arc<dyn ChatModel>,
        orders: Arc<dyn OrderGateway>,
        journal: Arc<dyn Journal>,
        notifier: Arc<dyn Notifier>,
        budget: Arc<AdvisorBudget>,
        stats: Arc<DayStats>,
        thesis: Arc<ThesisStore>,
        open_position_count: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            config,
            chat,
            orders,
            journal,
            notifier,
            budget,
            stats,
            thesis,
            open_position_count,
        }
    }

    /// Run one advisor pass for a tick whose triggers fired.
    ///
    /// Returns the journaled outcome. The caller commits the trigger-state
    /// baselines on every outcome except [`Outcome::Skipped`].
    pub async fn review(
        &self,
        tick: &PositionTick,
        buffer: &RollingBuffer,
        fired: &[FiredTrigger],
        now_ms: i64,
    ) -> Outcome {
        let trigger_names: Vec<String> = fired.iter().map(|f| f.name.clone()).collect();

        // --- 1. Global budget -----------------------------------------------
        if !self.budget.try_acquire(now_ms) {
            let outcome = Outcome::Skipped;
            self.journal_outcome(
                tick,
                &trigger_names,
                DecisionDetail {
                    action: "none".to_string(),
                    params: None,
                    reason: "advisor budget exhausted".to_string(),
                },
                outcome,
            )
            .await;
            return outcome;
        }

        // --- 2-3. Prompt + LLM call ----------------------------------------
        let trajectory = buffer.window(self.config.rolling_buffer_size);
        let account = AccountBlock {
            equity: tick.account_equity,
            open_position_count: self.open_position_count.load(Ordering::Relaxed),
            entries_cap: self.config.max_entries_per_day,
            stats: self.stats.snapshot(),
        };
        let thesis = self.thesis.get(&tick.symbol);
        let user = build_user_message(
            tick,
            &trajectory,
            fired,
            thesis.as_deref(),
            &account,
            self.budget.remaining(now_ms),
        );

        let reply = match timeout(
            self.config.llm_timeout(),
            self.chat.complete(
                system_preamble(),
                &user,
                self.config.llm.temperature,
                self.config.llm.max_tokens,
            ),
        )
        .await
        {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                warn!(symbol = %tick.symbol, error = %e, "advisor LLM call failed");
                return self
                    .finish_failed(tick, &trigger_names, format!("llm call failed: {e}"))
                    .await;
            }
            Err(_) => {
                warn!(symbol = %tick.symbol, "advisor LLM call timed out");
                return self
                    .finish_failed(tick, &trigger_names, "llm call timed out".to_string())
                    .await;
            }
        };

        // --- 4. Parse -------------------------------------------------------
        let advice = match parse_reply(&reply) {
            Ok(advice) => advice,
            Err(e) => {
                warn!(symbol = %tick.symbol, error = %e, "advisor reply unparsable");
                return self
                    .finish_failed(tick, &trigger_names, format!("unparsable reply: {e}"))
                    .await;
            }
        };

        // --- 5. Validate ----------------------------------------------------
        if let Err(reject_reason) = validate(&advice.action, tick, self.config.min_position_notional)
        {
            warn!(
                symbol = %tick.symbol,
                action = advice.action.name(),
                reason = %reject_reason,
                "advisor action rejected by validation"
            );
            let outcome = Outcome::Rejected;
            self.journal_outcome(
                tick,
                &trigger_names,
                DecisionDetail {
                    action: advice.action.name().to_string(),
                    params: advice.params.clone(),
                    reason: reject_reason,
                },
                outcome,
            )
            .await;
            self.notify_event(tick, &trigger_names, advice.action.name(), outcome)
                .await;
            return outcome;
        }

        // --- 6. Dispatch ----------------------------------------------------
        let outcome = match self.dispatch(&advice.action, &tick.symbol).await {
            Ok(ack) => {
                if let Some(ack) = ack {
                    info!(
                        symbol = %tick.symbol,
                        action = advice.action.name(),
                        detail = %ack.detail,
                        "advisor action dispatched"
                    );
                }
                Outcome::Ok
            }
            Err(e) => {
                error!(
                    symbol = %tick.symbol,
                    action = advice.action.name(),
                    error = %e,
                    "advisor action dispatch failed"
                );
                self.notifier
                    .notify(&format!(
                        "[{}] dispatch failed for {}: {e}",
                        tick.symbol,
                        advice.action.name()
                    ))
                    .await;
                Outcome::Failed
            }
        };

        // --- 8. Journal + notify -------------------------------------------
        self.journal_outcome(
            tick,
            &trigger_names,
            DecisionDetail {
                action: advice.action.name().to_string(),
                params: advice.params.clone(),
                reason: advice.reason.clone(),
            },
            outcome,
        )
        .await;
        self.notify_event(tick, &trigger_names, advice.action.name(), outcome)
            .await;

        outcome
    }

    // -------------------------------------------------------------------------
    // Dispatch
    // -------------------------------------------------------------------------

    /// Route the validated action to the order gateway. Idempotent
    /// operations (stop/TP replace, full close) are retried once after a
    /// short pause; `partial_close` never is.
    async fn dispatch(
        &self,
        action: &AdvisorAction,
        symbol: &str,
    ) -> Result<Option<OrderAck>, OrderError> {
        match action {
            AdvisorAction::Hold => Ok(None),
            AdvisorAction::TightenStop { new_stop_price } => {
                let px = *new_stop_price;
                self.call_with_retry(true, || self.orders.tighten_stop(symbol, px))
                    .await
                    .map(Some)
            }
            AdvisorAction::AdjustTakeProfit { new_tp_price } => {
                let px = *new_tp_price;
                self.call_with_retry(true, || self.orders.adjust_take_profit(symbol, px))
                    .await
                    .map(Some)
            }
            AdvisorAction::PartialClose { fraction_of_position } => {
                let fraction = *fraction_of_position;
                self.call_with_retry(false, || self.orders.partial_close(symbol, fraction))
                    .await
                    .map(Some)
            }
            AdvisorAction::Close => self
                .call_with_retry(true, || self.orders.close_position(symbol, "advisor_close"))
                .await
                .map(Some),
        }
    }

    async fn call_with_retry<F, Fut>(
        &self,
        idempotent: bool,
        mut call: F,
    ) -> Result<OrderAck, OrderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<OrderAck, OrderError>>,
    {
        let order_timeout = self.config.order_timeout();

        let first = match timeout(order_timeout, call()).await {
            Ok(result) => result,
            Err(_) => Err(OrderError::Timeout),
        };

        match first {
            Ok(ack) => Ok(ack),
            Err(e) if idempotent && e.is_retryable() => {
                warn!(error = %e, "order dispatch failed — retrying once");
                sleep(DISPATCH_RETRY_DELAY).await;
                match timeout(order_timeout, call()).await {
                    Ok(result) => result,
                    Err(_) => Err(OrderError::Timeout),
                }
            }
            Err(e) => Err(e),
        }
    }

    // -------------------------------------------------------------------------
    // Journal + notify helpers
    // -------------------------------------------------------------------------

    async fn finish_failed(
        &self,
        tick: &PositionTick,
        trigger_names: &[String],
        reason: String,
    ) -> Outcome {
        let outcome = Outcome::Failed;
        self.journal_outcome(
            tick,
            trigger_names,
            DecisionDetail {
                action: "none".to_string(),
                params: None,
                reason,
            },
            outcome,
        )
        .await;
        outcome
    }

    async fn journal_outcome(
        &self,
        tick: &PositionTick,
        trigger_names: &[String],
        decision: DecisionDetail,
        outcome: Outcome,
    ) {
        let record = AdvisoryDecision::new(
            KIND_HEARTBEAT,
            tick.symbol.clone(),
            tick.timestamp,
            trigger_names.to_vec(),
            decision,
            outcome,
            Some(tick.compact()),
        );
        if let Err(e) = self.journal.record(&record).await {
            error!(symbol = %tick.symbol, error = %e, "failed to journal advisor outcome");
        }
    }

    async fn notify_event(
        &self,
        tick: &PositionTick,
        trigger_names: &[String],
        action: &str,
        outcome: Outcome,
    ) {
        if !self.config.notify {
            return;
        }
        self.notifier
            .notify(&format!(
                "[{}] heartbeat: {} -> {action} ({outcome})",
                tick.symbol,
                trigger_names.join("+"),
            ))
            .await;
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{GatewayCall, MemoryJournal, MemoryNotifier, MockChat, MockGateway};
    use crate::types::PositionSide;

    fn tick() -> PositionTick {
        PositionTick {
            timestamp: 1_000,
            symbol: "ETHUSDT".to_string(),
            side: PositionSide::Long,
            position_size: 1000.0,
            entry_price: 2080.0,
            mark_price: 2110.0,
            unrealized_pnl: 150.0,
            pnl_pct_of_equity: 1.5,
            account_equity: 10_000.0,
            margin_used: 100.0,
            liquidation_price: 1600.0,
            dist_to_liquidation_pct: 24.0,
            funding_rate: 0.0001,
            stop_loss_price: Some(2050.0),
            take_profit_price: None,
            stop_loss_order_id: Some("sl-1".to_string()),
            take_profit_order_id: None,
        }
    }

    fn fired() -> Vec<FiredTrigger> {
        vec![FiredTrigger {
            name: "pnl_shift".to_string(),
            detail: "pnl 1.50% of equity vs 0.00% at last review".to_string(),
        }]
    }

    struct Harness {
        advisor: Advisor,
        chat: Arc<MockChat>,
        gateway: Arc<MockGateway>,
        journal: Arc<MemoryJournal>,
        notifier: Arc<MemoryNotifier>,
        budget: Arc<AdvisorBudget>,
    }

    fn harness(max_calls_per_hour: u32) -> Harness {
        let config = Arc::new(SentinelConfig::default());
        let chat = Arc::new(MockChat::new());
        let gateway = Arc::new(MockGateway::new());
        let journal = Arc::new(MemoryJournal::new());
        let notifier = Arc::new(MemoryNotifier::new());
        let budget = Arc::new(AdvisorBudget::new(max_calls_per_hour));
        let dir = tempfile::tempdir().unwrap();
        let thesis = Arc::new(ThesisStore::load(dir.path().join("theses.json")));

        let advisor = Advisor::new(
            config,
            chat.clone(),
            gateway.clone(),
            journal.clone(),
            notifier.clone(),
            budget.clone(),
            Arc::new(DayStats::new()),
            thesis,
            Arc::new(AtomicUsize::new(1)),
        );
        Harness {
            advisor,
            chat,
            gateway,
            journal,
            notifier,
            budget,
        }
    }

    #[tokio::test]
    async fn valid_tighten_stop_is_dispatched_and_journaled_ok() {
        let h = harness(20);
        h.chat.push_reply(
            r#"{"action": "tighten_stop", "params": {"newStopPrice": 2080}, "reason": "lock gains"}"#,
        );
        let buffer = RollingBuffer::new(60);

        let outcome = h.advisor.review(&tick(), &buffer, &fired(), 1_000).await;
        assert_eq!(outcome, Outcome::Ok);
        assert_eq!(
            h.gateway.calls(),
            vec![GatewayCall::TightenStop {
                symbol: "ETHUSDT".to_string(),
                new_price: 2080.0
            }]
        );

        let records = h.journal.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, KIND_HEARTBEAT);
        assert_eq!(records[0].outcome, Outcome::Ok);
        assert_eq!(records[0].decision.action, "tighten_stop");
        assert_eq!(records[0].triggers, vec!["pnl_shift".to_string()]);
        assert!(!h.notifier.messages().is_empty());
    }

    #[tokio::test]
    async fn exhausted_budget_skips_without_llm_call() {
        let h = harness(0);
        let buffer = RollingBuffer::new(60);
        let outcome = h.advisor.review(&tick(), &buffer, &fired(), 1_000).await;
        assert_eq!(outcome, Outcome::Skipped);
        assert_eq!(h.chat.call_count(), 0);
        assert!(h.gateway.calls().is_empty());
        let records = h.journal.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].outcome, Outcome::Skipped);
    }

    #[tokio::test]
    async fn non_json_reply_fails_without_dispatch() {
        let h = harness(20);
        h.chat.push_reply("I think you should definitely hold here.");
        let buffer = RollingBuffer::new(60);
        let outcome = h.advisor.review(&tick(), &buffer, &fired(), 1_000).await;
        assert_eq!(outcome, Outcome::Failed);
        assert!(h.gateway.calls().is_empty());
        assert_eq!(h.journal.records()[0].decision.action, "none");
    }

    #[tokio::test]
    async fn loosening_stop_is_rejected_with_offending_params() {
        // S6: long with stop 2050, mark 2110 — advisor proposes 2040.
        let h = harness(20);
        h.chat.push_reply(
            r#"{"action": "tighten_stop", "params": {"newStopPrice": 2040}, "reason": "give it room"}"#,
        );
        let buffer = RollingBuffer::new(60);
        let outcome = h.advisor.review(&tick(), &buffer, &fired(), 1_000).await;
        assert_eq!(outcome, Outcome::Rejected);
        assert!(h.gateway.calls().is_empty());

        let records = h.journal.records();
        assert_eq!(records[0].outcome, Outcome::Rejected);
        assert_eq!(
            records[0].decision.params,
            Some(serde_json::json!({ "newStopPrice": 2040 }))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn idempotent_dispatch_retries_once_on_transport_failure() {
        let h = harness(20);
        h.chat
            .push_reply(r#"{"action": "close", "reason": "adverse move"}"#);
        h.gateway.fail_next_calls(1);
        let buffer = RollingBuffer::new(60);

        let outcome = h.advisor.review(&tick(), &buffer, &fired(), 1_000).await;
        assert_eq!(outcome, Outcome::Ok);
        // Two close attempts: the failed one and the retry.
        assert_eq!(h.gateway.calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn partial_close_is_never_retried() {
        let h = harness(20);
        h.chat.push_reply(
            r#"{"action": "partial_close", "params": {"fractionOfPosition": 0.5}, "reason": "derisk"}"#,
        );
        h.gateway.fail_next_calls(1);
        let buffer = RollingBuffer::new(60);

        let outcome = h.advisor.review(&tick(), &buffer, &fired(), 1_000).await;
        assert_eq!(outcome, Outcome::Failed);
        assert_eq!(h.gateway.calls().len(), 1);
    }

    #[tokio::test]
    async fn hold_dispatches_nothing_and_journals_ok() {
        let h = harness(20);
        h.chat
            .push_reply(r#"{"action": "hold", "reason": "nothing actionable"}"#);
        let buffer = RollingBuffer::new(60);
        let outcome = h.advisor.review(&tick(), &buffer, &fired(), 1_000).await;
        assert_eq!(outcome, Outcome::Ok);
        assert!(h.gateway.calls().is_empty());
        assert_eq!(h.journal.records()[0].decision.action, "hold");
    }

    #[tokio::test]
    async fn budget_is_consumed_only_when_the_call_proceeds() {
        let h = harness(2);
        h.chat.push_reply(r#"{"action": "hold", "reason": "a"}"#);
        h.chat.push_reply(r#"{"action": "hold", "reason": "b"}"#);
        let buffer = RollingBuffer::new(60);

        assert_eq!(h.advisor.review(&tick(), &buffer, &fired(), 0).await, Outcome::Ok);
        assert_eq!(h.budget.remaining(0), 1);
        assert_eq!(h.advisor.review(&tick(), &buffer, &fired(), 1).await, Outcome::Ok);
        assert_eq!(h.advisor.review(&tick(), &buffer, &fired(), 2).await, Outcome::Skipped);
    }
}
