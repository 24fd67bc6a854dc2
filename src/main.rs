// =============================================================================
// Aurora Perps Sentinel — Main Entry Point
// =============================================================================
//
// Autonomous position-management heartbeat for a perpetual-futures account.
// While positions are open it polls market and account state, filters for
// significance with mechanical triggers, and only then consults the LLM
// advisor for a risk-reducing action. Circuit breakers close positions
// without consulting anyone.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod account;
mod advisor;
mod breakers;
mod clock;
mod collaborators;
mod config;
mod exchange;
mod journal;
mod llm;
mod notify;
mod rate_limit;
mod snapshot;
mod supervisor;
mod thesis;
mod tick;
mod triggers;
mod types;
mod watcher;

#[cfg(test)]
mod testutil;

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::account::DayStats;
use crate::clock::SystemClock;
use crate::config::SentinelConfig;
use crate::exchange::client::FuturesClient;
use crate::journal::FileJournal;
use crate::llm::OpenRouterClient;
use crate::notify::{LogNotifier, Notifier, TelegramNotifier};
use crate::rate_limit::AdvisorBudget;
use crate::supervisor::HeartbeatSupervisor;
use crate::thesis::ThesisStore;
use crate::watcher::Collaborators;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Aurora Perps Sentinel — Starting Up              ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let config_path =
        std::env::var("SENTINEL_CONFIG").unwrap_or_else(|_| "sentinel_config.json".into());
    let mut config = SentinelConfig::load(&config_path).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        SentinelConfig::default()
    });
    config.clamp_ranges();

    if !config.enabled {
        warn!("heartbeat disabled in config — nothing to do");
        return Ok(());
    }

    info!(
        tick_interval_seconds = config.tick_interval_seconds,
        supervisor_interval_seconds = config.supervisor_interval_seconds,
        max_advisor_calls_per_hour = config.llm.max_advisor_calls_per_hour,
        model = %config.llm.model,
        "Sentinel configured"
    );
    let config = Arc::new(config);

    // ── 2. Exchange client (market data + orders) ────────────────────────
    let api_key = std::env::var("BINANCE_API_KEY").unwrap_or_default();
    let api_secret = std::env::var("BINANCE_API_SECRET").unwrap_or_default();
    let exchange = Arc::new(FuturesClient::new(api_key, api_secret));

    // ── 3. Advisor LLM ───────────────────────────────────────────────────
    let chat = Arc::new(OpenRouterClient::from_env(
        config.llm.model.clone(),
        config.llm_timeout(),
    )?);

    // ── 4. Journal, notifier, shared state ───────────────────────────────
    let journal = Arc::new(FileJournal::open(&config.journal_path)?);
    let notifier: Arc<dyn Notifier> = match TelegramNotifier::from_env() {
        Some(telegram) => Arc::new(telegram),
        None => {
            info!("telegram not configured — notifications go to the log");
            Arc::new(LogNotifier)
        }
    };
    let thesis = Arc::new(ThesisStore::load(&config.thesis_path));
    let budget = Arc::new(AdvisorBudget::new(config.llm.max_advisor_calls_per_hour));

    let deps = Collaborators {
        provider: exchange.clone(),
        orders: exchange,
        chat,
        journal,
        notifier,
        budget,
        stats: Arc::new(DayStats::new()),
        thesis,
        clock: Arc::new(SystemClock),
        open_position_count: Arc::new(AtomicUsize::new(0)),
    };

    // ── 5. Supervisor ────────────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let supervisor = HeartbeatSupervisor::new(config.clone(), deps);
    let supervisor_task = tokio::spawn(supervisor.run(shutdown_rx));

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 6. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received — stopping gracefully");

    let _ = shutdown_tx.send(true);
    if let Err(e) = supervisor_task.await {
        warn!(error = %e, "supervisor task join failed");
    }

    info!("Aurora Perps Sentinel shut down complete.");
    Ok(())
}
