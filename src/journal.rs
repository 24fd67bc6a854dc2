// =============================================================================
// Decision Journal — append-only record of every advisor outcome and
// circuit-breaker firing
// =============================================================================
//
// Records are idempotent on the fingerprint `heartbeat:<symbol>:<timestamp>`:
// a watcher retrying after a partial failure never duplicates a line. The
// on-disk shape is one JSON object per line.
// =============================================================================

use std::collections::HashSet;
use std::io::{BufRead, Write as _};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::tick::CompactTick;
use crate::types::Outcome;

pub const KIND_HEARTBEAT: &str = "position_heartbeat";
pub const KIND_CIRCUIT_BREAKER: &str = "circuit_breaker";

// ---------------------------------------------------------------------------
// Record shape
// ---------------------------------------------------------------------------

/// The action half of a journal record: what was decided and why.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionDetail {
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
    pub reason: String,
}

/// One journal artifact, covering both heartbeat advisories and
/// circuit-breaker closes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvisoryDecision {
    /// Unique record id (UUID v4).
    pub id: String,
    /// `position_heartbeat` or `circuit_breaker`.
    pub kind: String,
    pub symbol: String,
    /// Tick timestamp in epoch ms; part of the idempotence fingerprint.
    pub timestamp: i64,
    /// Names of the fired triggers (empty for circuit-breaker records).
    pub triggers: Vec<String>,
    pub decision: DecisionDetail,
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<CompactTick>,
    /// ISO 8601 wall-clock time the record was written.
    pub recorded_at: String,
}

impl AdvisoryDecision {
    pub fn new(
        kind: &str,
        symbol: impl Into<String>,
        timestamp: i64,
        triggers: Vec<String>,
        decision: DecisionDetail,
        outcome: Outcome,
        snapshot: Option<CompactTick>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind: kind.to_string(),
            symbol: symbol.into(),
            timestamp,
            triggers,
            decision,
            outcome,
            snapshot,
            recorded_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Idempotence key: one record per symbol per tick instant.
    pub fn fingerprint(&self) -> String {
        format!("heartbeat:{}:{}", self.symbol, self.timestamp)
    }
}

// ---------------------------------------------------------------------------
// Journal trait
// ---------------------------------------------------------------------------

/// Persistent sink for decision artifacts. Must be safe for concurrent
/// calls from multiple watchers; implementations serialize internally.
#[async_trait]
pub trait Journal: Send + Sync {
    async fn record(&self, artifact: &AdvisoryDecision) -> Result<()>;
}

// ---------------------------------------------------------------------------
// File journal (JSONL)
// ---------------------------------------------------------------------------

/// Append-only JSONL journal. Known fingerprints are kept in memory so a
/// duplicate record becomes a no-op; on startup they are rebuilt from the
/// existing file. Writes run on the blocking pool so watcher ticks never
/// stall a runtime worker on disk I/O.
pub struct FileJournal {
    path: PathBuf,
    seen: Arc<Mutex<HashSet<String>>>,
}

impl FileJournal {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut seen = HashSet::new();

        if path.exists() {
            let file = std::fs::File::open(&path)
                .with_context(|| format!("failed to open journal at {}", path.display()))?;
            for line in std::io::BufReader::new(file).lines() {
                let line = line.context("failed to read journal line")?;
                if line.trim().is_empty() {
                    continue;
                }
                if let Ok(record) = serde_json::from_str::<AdvisoryDecision>(&line) {
                    seen.insert(record.fingerprint());
                }
            }
            info!(path = %path.display(), records = seen.len(), "journal reopened");
        }

        Ok(Self {
            path,
            seen: Arc::new(Mutex::new(seen)),
        })
    }
}

#[async_trait]
impl Journal for FileJournal {
    async fn record(&self, artifact: &AdvisoryDecision) -> Result<()> {
        let line = serde_json::to_string(artifact).context("failed to serialise journal record")?;
        let fingerprint = artifact.fingerprint();
        let path = self.path.clone();
        let seen = self.seen.clone();

        // Dedup check and append happen as one unit on the blocking pool;
        // the lock serializes writers from different watchers.
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut seen = seen.lock();
            if seen.contains(&fingerprint) {
                debug!(%fingerprint, "journal record already present — skipping");
                return Ok(());
            }

            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("failed to open journal at {}", path.display()))?;
            writeln!(file, "{line}")
                .with_context(|| format!("failed to append journal record to {}", path.display()))?;

            seen.insert(fingerprint);
            Ok(())
        })
        .await
        .context("journal write task failed")?
    }
}
