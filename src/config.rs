// =============================================================================
// Sentinel Configuration — hot-loadable heartbeat settings with atomic save
// =============================================================================
//
// Every tunable of the heartbeat engine lives here. Persistence uses an
// atomic tmp + rename pattern to prevent corruption on crash. All fields
// carry `#[serde(default)]` so that adding new fields never breaks loading
// an older config file. Out-of-range values are clamped on load with a
// warning rather than rejected.
// =============================================================================

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_true() -> bool {
    true
}

fn default_tick_interval_seconds() -> u64 {
    30
}

fn default_supervisor_interval_seconds() -> u64 {
    60
}

fn default_rolling_buffer_size() -> usize {
    60
}

fn default_pnl_shift_pct() -> f64 {
    1.5
}

fn default_approaching_stop_pct() -> f64 {
    1.0
}

fn default_approaching_tp_pct() -> f64 {
    1.0
}

fn default_liquidation_proximity_pct() -> f64 {
    5.0
}

fn default_funding_spike() -> f64 {
    0.0001
}

fn default_volatility_spike_pct() -> f64 {
    2.0
}

fn default_volatility_spike_window_ticks() -> usize {
    10
}

fn default_time_ceiling_minutes() -> u64 {
    15
}

fn default_trigger_cooldown_seconds() -> u64 {
    180
}

fn default_breaker_liq_pct() -> f64 {
    2.0
}

fn default_breaker_loss_pct() -> f64 {
    -5.0
}

fn default_max_advisor_calls_per_hour() -> u32 {
    20
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_model() -> String {
    "anthropic/claude-3.5-haiku".to_string()
}

fn default_temperature() -> f64 {
    0.2
}

fn default_min_position_notional() -> f64 {
    10.0
}

fn default_max_entries_per_day() -> u32 {
    10
}

fn default_journal_path() -> String {
    "sentinel_journal.jsonl".to_string()
}

fn default_thesis_path() -> String {
    "position_theses.json".to_string()
}

fn default_snapshot_timeout_seconds() -> u64 {
    10
}

fn default_order_timeout_seconds() -> u64 {
    15
}

fn default_llm_timeout_seconds() -> u64 {
    30
}

fn default_snapshot_failing_after() -> u32 {
    5
}

fn default_snapshot_fatal_after() -> u32 {
    10
}

// =============================================================================
// TriggerConfig
// =============================================================================

/// Thresholds and the generic cooldown fallback for the trigger catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Absolute change in PnL-as-%-of-equity vs the last advised value that
    /// fires `pnl_shift`.
    #[serde(default = "default_pnl_shift_pct")]
    pub pnl_shift_pct: f64,

    /// Distance (% of mark) to the stop that fires `approaching_stop`.
    #[serde(default = "default_approaching_stop_pct")]
    pub approaching_stop_pct: f64,

    /// Distance (% of mark) to the take-profit that fires `approaching_tp`.
    #[serde(default = "default_approaching_tp_pct")]
    pub approaching_tp_pct: f64,

    /// Distance-to-liquidation (%) at or below which `liquidation_proximity`
    /// fires.
    #[serde(default = "default_liquidation_proximity_pct")]
    pub liquidation_proximity_pct: f64,

    /// Absolute funding rate at or above which `funding_spike` fires.
    #[serde(default = "default_funding_spike")]
    pub funding_spike: f64,

    /// Mark move (%) over the volatility window that fires `volatility_spike`.
    #[serde(default = "default_volatility_spike_pct")]
    pub volatility_spike_pct: f64,

    /// Number of ticks the volatility comparison looks back.
    #[serde(default = "default_volatility_spike_window_ticks")]
    pub volatility_spike_window_ticks: usize,

    /// Maximum quiet period before `time_ceiling` forces an advisor review.
    #[serde(default = "default_time_ceiling_minutes")]
    pub time_ceiling_minutes: u64,

    /// Fallback cooldown for triggers without a named default.
    #[serde(default = "default_trigger_cooldown_seconds")]
    pub trigger_cooldown_seconds: u64,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            pnl_shift_pct: default_pnl_shift_pct(),
            approaching_stop_pct: default_approaching_stop_pct(),
            approaching_tp_pct: default_approaching_tp_pct(),
            liquidation_proximity_pct: default_liquidation_proximity_pct(),
            funding_spike: default_funding_spike(),
            volatility_spike_pct: default_volatility_spike_pct(),
            volatility_spike_window_ticks: default_volatility_spike_window_ticks(),
            time_ceiling_minutes: default_time_ceiling_minutes(),
            trigger_cooldown_seconds: default_trigger_cooldown_seconds(),
        }
    }
}

// =============================================================================
// BreakerConfig
// =============================================================================

/// Hard, LLM-free close rails evaluated before any advisor path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Distance-to-liquidation (%) below which the position is force-closed.
    #[serde(default = "default_breaker_liq_pct")]
    pub liq_pct: f64,

    /// PnL-as-%-of-equity below which the position is force-closed.
    /// Negative (e.g. -5.0 means a 5 % equity loss).
    #[serde(default = "default_breaker_loss_pct")]
    pub loss_pct: f64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            liq_pct: default_breaker_liq_pct(),
            loss_pct: default_breaker_loss_pct(),
        }
    }
}

// =============================================================================
// LlmConfig
// =============================================================================

/// Advisor model settings and the global call budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Model identifier passed to the chat-completions endpoint.
    #[serde(default = "default_model")]
    pub model: String,

    /// Sampling temperature. The advisor contract requires <= 0.3.
    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// Sliding 1-hour budget of advisor invocations across all symbols.
    #[serde(default = "default_max_advisor_calls_per_hour")]
    pub max_advisor_calls_per_hour: u32,

    /// Token budget per advisor reply.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            temperature: default_temperature(),
            max_advisor_calls_per_hour: default_max_advisor_calls_per_hour(),
            max_tokens: default_max_tokens(),
        }
    }
}

// =============================================================================
// SentinelConfig
// =============================================================================

/// Top-level configuration for the sentinel heartbeat engine.
///
/// Every field has a serde default so that older JSON files missing new
/// fields will still deserialise correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentinelConfig {
    /// Master switch for the heartbeat engine.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Per-symbol polling interval in seconds. Clamped to [5, 600].
    #[serde(default = "default_tick_interval_seconds")]
    pub tick_interval_seconds: u64,

    /// Supervisor reconcile interval in seconds.
    #[serde(default = "default_supervisor_interval_seconds")]
    pub supervisor_interval_seconds: u64,

    /// Per-symbol tick history retained for the advisor trajectory.
    /// Clamped to [1, 10000].
    #[serde(default = "default_rolling_buffer_size")]
    pub rolling_buffer_size: usize,

    /// Trigger thresholds and cooldown fallback.
    #[serde(default)]
    pub triggers: TriggerConfig,

    /// Hard close rails.
    #[serde(default)]
    pub circuit_breakers: BreakerConfig,

    /// Advisor model and budget.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Whether to push heartbeat events to the notifier.
    #[serde(default = "default_true")]
    pub notify: bool,

    /// Exchange minimum position notional; a partial close must leave at
    /// least this much open.
    #[serde(default = "default_min_position_notional")]
    pub min_position_notional: f64,

    /// Daily entry cap surfaced in the advisor's account block.
    #[serde(default = "default_max_entries_per_day")]
    pub max_entries_per_day: u32,

    /// Path of the append-only decision journal (JSONL).
    #[serde(default = "default_journal_path")]
    pub journal_path: String,

    /// Path of the per-symbol thesis store (JSON).
    #[serde(default = "default_thesis_path")]
    pub thesis_path: String,

    /// Timeout for one full snapshot aggregation.
    #[serde(default = "default_snapshot_timeout_seconds")]
    pub snapshot_timeout_seconds: u64,

    /// Timeout for one order-gateway call.
    #[serde(default = "default_order_timeout_seconds")]
    pub order_timeout_seconds: u64,

    /// Timeout for one LLM call.
    #[serde(default = "default_llm_timeout_seconds")]
    pub llm_timeout_seconds: u64,

    /// Consecutive snapshot failures before a `snapshot_failing`
    /// notification is sent.
    #[serde(default = "default_snapshot_failing_after")]
    pub snapshot_failing_after: u32,

    /// Consecutive snapshot failures before the watcher gives up and lets
    /// the supervisor re-attempt on its next reconcile.
    #[serde(default = "default_snapshot_fatal_after")]
    pub snapshot_fatal_after: u32,
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_interval_seconds: default_tick_interval_seconds(),
            supervisor_interval_seconds: default_supervisor_interval_seconds(),
            rolling_buffer_size: default_rolling_buffer_size(),
            triggers: TriggerConfig::default(),
            circuit_breakers: BreakerConfig::default(),
            llm: LlmConfig::default(),
            notify: true,
            min_position_notional: default_min_position_notional(),
            max_entries_per_day: default_max_entries_per_day(),
            journal_path: default_journal_path(),
            thesis_path: default_thesis_path(),
            snapshot_timeout_seconds: default_snapshot_timeout_seconds(),
            order_timeout_seconds: default_order_timeout_seconds(),
            llm_timeout_seconds: default_llm_timeout_seconds(),
            snapshot_failing_after: default_snapshot_failing_after(),
            snapshot_fatal_after: default_snapshot_fatal_after(),
        }
    }
}

impl SentinelConfig {
    /// Load configuration from a JSON file at `path`, clamping out-of-range
    /// values.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read sentinel config from {}", path.display()))?;

        let mut config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse sentinel config from {}", path.display()))?;

        config.clamp_ranges();

        info!(
            path = %path.display(),
            tick_interval_seconds = config.tick_interval_seconds,
            rolling_buffer_size = config.rolling_buffer_size,
            max_advisor_calls_per_hour = config.llm.max_advisor_calls_per_hour,
            "sentinel config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise sentinel config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "sentinel config saved (atomic)");
        Ok(())
    }

    /// Clamp range-bounded fields into their documented intervals.
    pub fn clamp_ranges(&mut self) {
        let tick = self.tick_interval_seconds.clamp(5, 600);
        if tick != self.tick_interval_seconds {
            warn!(
                configured = self.tick_interval_seconds,
                clamped = tick,
                "tick_interval_seconds out of range [5, 600] — clamped"
            );
            self.tick_interval_seconds = tick;
        }

        let buf = self.rolling_buffer_size.clamp(1, 10_000);
        if buf != self.rolling_buffer_size {
            warn!(
                configured = self.rolling_buffer_size,
                clamped = buf,
                "rolling_buffer_size out of range [1, 10000] — clamped"
            );
            self.rolling_buffer_size = buf;
        }

        let ceiling = self.triggers.time_ceiling_minutes.clamp(1, 10_000);
        if ceiling != self.triggers.time_ceiling_minutes {
            warn!(
                configured = self.triggers.time_ceiling_minutes,
                clamped = ceiling,
                "time_ceiling_minutes out of range [1, 10000] — clamped"
            );
            self.triggers.time_ceiling_minutes = ceiling;
        }

        // The advisor contract caps temperature at 0.3.
        if self.llm.temperature > 0.3 {
            warn!(
                configured = self.llm.temperature,
                "llm.temperature above 0.3 — clamped"
            );
            self.llm.temperature = 0.3;
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_seconds)
    }

    pub fn supervisor_interval(&self) -> Duration {
        Duration::from_secs(self.supervisor_interval_seconds)
    }

    pub fn snapshot_timeout(&self) -> Duration {
        Duration::from_secs(self.snapshot_timeout_seconds)
    }

    pub fn order_timeout(&self) -> Duration {
        Duration::from_secs(self.order_timeout_seconds)
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_seconds)
    }
}
