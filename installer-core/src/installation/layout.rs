// Filesystem view of the application being installed: the configuration artifact and the
// runtime directories that finalization fixes up.

use super::files::{
    ensure_dir_with_retries, probe_writable, set_mode_with_retries, write_file_with_retries,
};
use crate::models::responses::ItemOutcome;
use anyhow::{Context, Result};
use log::{info, warn};
use std::path::{Path, PathBuf};

pub const RUNTIME_DIR_MODE: u32 = 0o755;

#[derive(Debug, Clone)]
pub struct InstallLayout {
    app_root: PathBuf,
    artifact_name: String,
}

impl InstallLayout {
    pub fn new(app_root: impl Into<PathBuf>, artifact_name: impl Into<String>) -> Self {
        Self {
            app_root: app_root.into(),
            artifact_name: artifact_name.into(),
        }
    }

    pub fn app_root(&self) -> &Path {
        &self.app_root
    }

    pub fn artifact_path(&self) -> PathBuf {
        self.app_root.join(&self.artifact_name)
    }

    /// The "already installed" marker.
    pub async fn artifact_exists(&self) -> bool {
        tokio::fs::try_exists(self.artifact_path())
            .await
            .unwrap_or(false)
    }

    pub async fn read_artifact(&self) -> Result<Option<String>> {
        let path = self.artifact_path();
        if !self.artifact_exists().await {
            return Ok(None);
        }
        let text = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read configuration artifact {:?}", path))?;
        Ok(Some(text))
    }

    pub async fn write_artifact(&self, contents: &str) -> Result<()> {
        let path = self.artifact_path();
        write_file_with_retries(&path, contents.as_bytes(), "write_artifact").await?;
        info!(
            "[PHASE: finalize] [STEP: write_config] Wrote configuration artifact {:?} ({} bytes)",
            path,
            contents.len()
        );
        Ok(())
    }

    /// The artifact can be (re)written: existing file is writable, or the root accepts new files.
    pub async fn artifact_writable(&self) -> Result<()> {
        let path = self.artifact_path();
        if self.artifact_exists().await {
            let meta = tokio::fs::metadata(&path)
                .await
                .with_context(|| format!("Failed to stat {:?}", path))?;
            if meta.permissions().readonly() {
                anyhow::bail!("{:?} is read-only", path);
            }
            Ok(())
        } else {
            probe_writable(&self.app_root).await
        }
    }

    /// Create (if missing) and chmod each directory; every directory gets its own outcome.
    pub async fn fix_permissions(&self, dirs: &[String]) -> Vec<ItemOutcome> {
        let mut items = Vec::with_capacity(dirs.len());
        for rel in dirs {
            let dir = self.app_root.join(rel);
            let result = async {
                ensure_dir_with_retries(&dir, "ensure_runtime_dir").await?;
                set_mode_with_retries(&dir, RUNTIME_DIR_MODE, "chmod_runtime_dir").await
            }
            .await;
            match result {
                Ok(()) => items.push(ItemOutcome {
                    target: rel.clone(),
                    succeeded: true,
                    detail: None,
                }),
                Err(e) => {
                    warn!(
                        "[PHASE: finalize] [STEP: set_permissions] {} failed: {:#}",
                        rel, e
                    );
                    items.push(ItemOutcome {
                        target: rel.clone(),
                        succeeded: false,
                        detail: Some(format!("{:#}", e)),
                    });
                }
            }
        }
        items
    }
}
