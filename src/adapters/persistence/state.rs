//! State Store - Atomic JSON Indicator-State Persistence
//!
//! Saves indicator snapshots to one JSON file per indicator kind
//! using atomic writes (write to tmp file, then rename). This
//! guarantees crash safety: the file on disk is always either the
//! old or the new snapshot, never a partial write.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::fs;
use tracing::{info, warn};

use crate::domain::indicator::IndicatorKind;
use crate::ports::indicator_store::IndicatorStore;

/// Atomic JSON store for indicator state, one document per kind.
pub struct StateStore {
    data_dir: PathBuf,
}

impl StateStore {
    /// Create a store rooted at `data_dir`, creating it if missing.
    pub async fn new(data_dir: &str) -> Result<Self> {
        let dir = Path::new(data_dir);
        fs::create_dir_all(dir)
            .await
            .context("failed to create data directory")?;
        Ok(Self {
            data_dir: dir.to_path_buf(),
        })
    }

    fn paths(&self, kind: IndicatorKind) -> (PathBuf, PathBuf) {
        let final_path = self.data_dir.join(kind.state_file());
        let tmp_path = self.data_dir.join(format!("{}.tmp", kind.state_file()));
        (final_path, tmp_path)
    }
}

#[async_trait]
impl IndicatorStore for StateStore {
    async fn save(&self, kind: IndicatorKind, snapshot: &serde_json::Value) -> Result<()> {
        let (final_path, tmp_path) = self.paths(kind);

        let json =
            serde_json::to_string_pretty(snapshot).context("failed to serialize snapshot")?;

        fs::write(&tmp_path, &json)
            .await
            .context("failed to write tmp state file")?;
        fs::rename(&tmp_path, &final_path)
            .await
            .context("failed to rename state file")?;

        info!(
            kind = %kind,
            path = %final_path.display(),
            bytes = json.len(),
            "indicator state saved"
        );
        Ok(())
    }

    async fn load(&self, kind: IndicatorKind) -> Result<Option<serde_json::Value>> {
        let (final_path, _) = self.paths(kind);
        if !final_path.exists() {
            info!(kind = %kind, "no persisted state, starting fresh");
            return Ok(None);
        }

        let json = fs::read_to_string(&final_path)
            .await
            .context("failed to read state file")?;
        let value: serde_json::Value =
            serde_json::from_str(&json).context("failed to parse state JSON")?;

        info!(kind = %kind, path = %final_path.display(), "indicator state loaded");
        Ok(Some(value))
    }

    async fn is_healthy(&self) -> bool {
        match fs::metadata(&self.data_dir).await {
            Ok(meta) => meta.is_dir(),
            Err(e) => {
                warn!(error = %e, "state store directory unavailable");
                false
            }
        }
    }
}
