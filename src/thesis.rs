// =============================================================================
// Thesis Store — optional per-symbol entry rationale surfaced to the advisor
// =============================================================================

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use parking_lot::RwLock;
use tracing::{info, warn};

/// Per-symbol thesis texts backed by a JSON file. A missing file is an
/// empty store, not an error.
pub struct ThesisStore {
    path: PathBuf,
    theses: RwLock<HashMap<String, String>>,
}

impl ThesisStore {
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let theses = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<HashMap<String, String>>(&content) {
                Ok(map) => {
                    info!(path = %path.display(), count = map.len(), "thesis store loaded");
                    map
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "thesis store unparsable — starting empty");
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };
        Self {
            path,
            theses: RwLock::new(theses),
        }
    }

    pub fn get(&self, symbol: &str) -> Option<String> {
        self.theses.read().get(symbol).cloned()
    }

    /// Record or replace the thesis for `symbol` and persist atomically.
    pub fn set(&self, symbol: &str, thesis: impl Into<String>) -> Result<()> {
        {
            let mut map = self.theses.write();
            map.insert(symbol.to_string(), thesis.into());
        }
        self.save()
    }

    /// Drop the thesis once the position is gone.
    pub fn remove(&self, symbol: &str) -> Result<()> {
        let removed = self.theses.write().remove(symbol).is_some();
        if removed {
            self.save()?;
        }
        Ok(())
    }

    fn save(&self) -> Result<()> {
        let content = {
            let map = self.theses.read();
            serde_json::to_string_pretty(&*map).context("failed to serialise thesis store")?
        };
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, &content)
            .with_context(|| format!("failed to write tmp thesis store to {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to rename tmp thesis store to {}", self.path.display()))?;
        Ok(())
    }
}
