// =============================================================================
// Heartbeat Supervisor — discovers positions, spawns and retires watchers
// =============================================================================
//
// One task, slower than the watchers. Every reconcile it lists open
// positions and diffs against the live watcher set: new symbols get a
// watcher (announcing `position_opened` on the first tick), finished
// watchers are reaped, and a symbol whose watcher died fatally while the
// position is still listed is re-attempted without re-announcing the open.
// Watchers hold only a shutdown receiver and collaborator handles — never a
// reference back to the supervisor.
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::config::SentinelConfig;
use crate::watcher::{Collaborators, PositionWatcher};

pub struct HeartbeatSupervisor {
    config: Arc<SentinelConfig>,
    deps: Collaborators,
}

impl HeartbeatSupervisor {
    pub fn new(config: Arc<SentinelConfig>, deps: Collaborators) -> Self {
        Self { config, deps }
    }

    /// Run until `shutdown` flips. On shutdown every watcher is cancelled
    /// cooperatively and awaited so no in-flight tick is abandoned.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.supervisor_interval_seconds,
            "heartbeat supervisor started"
        );

        let (watcher_tx, watcher_rx) = watch::channel(false);
        let mut watchers: HashMap<String, JoinHandle<()>> = HashMap::new();
        let mut known: HashSet<String> = HashSet::new();

        let mut ticker = tokio::time::interval(self.config.supervisor_interval());
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.reconcile_once(&mut watchers, &mut known, &watcher_rx).await;
                }
            }
        }

        warn!(watchers = watchers.len(), "supervisor shutting down — cancelling watchers");
        let _ = watcher_tx.send(true);
        for (symbol, handle) in watchers.drain() {
            if let Err(e) = handle.await {
                warn!(symbol = %symbol, error = %e, "watcher task join failed");
            }
        }
        info!("heartbeat supervisor stopped");
    }

    /// One reconcile pass: list positions, reap finished watchers, spawn
    /// missing ones.
    pub async fn reconcile_once(
        &self,
        watchers: &mut HashMap<String, JoinHandle<()>>,
        known: &mut HashSet<String>,
        watcher_shutdown: &watch::Receiver<bool>,
    ) {
        let listed = match timeout(
            self.config.snapshot_timeout(),
            self.deps.provider.list_open_positions(),
        )
        .await
        {
            Ok(Ok(positions)) => positions,
            Ok(Err(e)) => {
                warn!(error = %e, "reconcile: failed to list open positions");
                return;
            }
            Err(_) => {
                warn!("reconcile: list_open_positions timed out");
                return;
            }
        };

        let symbols: HashSet<String> = listed.into_iter().map(|p| p.symbol).collect();
        self.deps
            .open_position_count
            .store(symbols.len(), Ordering::Relaxed);

        // Reap watchers that finished (position closed, or fatal).
        watchers.retain(|symbol, handle| {
            if handle.is_finished() {
                info!(symbol = %symbol, "watcher retired");
                false
            } else {
                true
            }
        });

        // Forget symbols the exchange no longer lists, so a future reopen
        // announces `position_opened` again.
        known.retain(|symbol| symbols.contains(symbol));

        for symbol in &symbols {
            if watchers.contains_key(symbol) {
                continue;
            }
            // A known symbol without a live watcher is a fatal-death
            // re-attempt: the position never closed, so don't re-announce.
            let announce_open = !known.contains(symbol);
            info!(symbol = %symbol, announce_open, "spawning watcher");

            let watcher = PositionWatcher::new(
                symbol.clone(),
                self.config.clone(),
                self.deps.clone(),
                announce_open,
            );
            let rx = watcher_shutdown.clone();
            watchers.insert(symbol.clone(), tokio::spawn(watcher.run(rx)));
            known.insert(symbol.clone());
        }
    }
}
