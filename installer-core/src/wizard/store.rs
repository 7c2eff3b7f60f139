// StepStore
//
// Per-attempt persistence of submitted step data and progress. Each attempt is isolated by its
// `AttemptId`; nothing here is shared between attempts.

use crate::installation::files::{ensure_dir_with_retries, write_file_with_retries};
use crate::models::state::{AttemptId, InstallationAttempt};
use crate::models::steps::{FieldSet, StepData, StepNumber};
use crate::security::secret_protector::SecretProtector;
use crate::utils::logging::is_secret_field;
use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, info};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

#[async_trait]
pub trait StepStore: Send + Sync {
    async fn load(&self, id: &AttemptId) -> Result<Option<InstallationAttempt>>;

    /// Replace the stored attempt (progress and all step data) in one write.
    async fn save(&self, attempt: &InstallationAttempt) -> Result<()>;

    /// Reset the attempt. Clearing an unknown attempt is not an error.
    async fn clear(&self, id: &AttemptId) -> Result<()>;

    /// Replace the stored fields of one step, creating the attempt if needed.
    async fn put(&self, id: &AttemptId, step: StepNumber, fields: FieldSet) -> Result<()> {
        let mut attempt = self
            .load(id)
            .await?
            .unwrap_or_else(|| InstallationAttempt::new(id.clone()));
        attempt.steps.insert(step, fields);
        attempt.touch();
        self.save(&attempt).await
    }

    /// Fields of one step; empty if never submitted.
    async fn get(&self, id: &AttemptId, step: StepNumber) -> Result<FieldSet> {
        Ok(self
            .load(id)
            .await?
            .and_then(|a| a.steps.get(&step).cloned())
            .unwrap_or_default())
    }

    async fn all_steps(&self, id: &AttemptId) -> Result<StepData> {
        Ok(self.load(id).await?.map(|a| a.steps).unwrap_or_default())
    }
}

/// Map guarded by a mutex. Lives as long as the process.
#[derive(Debug, Default)]
pub struct MemoryStepStore {
    attempts: Mutex<HashMap<AttemptId, InstallationAttempt>>,
}

impl MemoryStepStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StepStore for MemoryStepStore {
    async fn load(&self, id: &AttemptId) -> Result<Option<InstallationAttempt>> {
        Ok(self.attempts.lock().await.get(id).cloned())
    }

    async fn save(&self, attempt: &InstallationAttempt) -> Result<()> {
        self.attempts
            .lock()
            .await
            .insert(attempt.id.clone(), attempt.clone());
        Ok(())
    }

    async fn clear(&self, id: &AttemptId) -> Result<()> {
        self.attempts.lock().await.remove(id);
        Ok(())
    }
}

/// One JSON document per attempt under `<state_dir>/attempts/`. Secret fields are sealed with
/// the `SecretProtector` before they touch the disk.
pub struct FileStepStore {
    dir: PathBuf,
    protector: Arc<SecretProtector>,
    // Serializes read-modify-write cycles from `put`.
    write_lock: Mutex<()>,
}

impl FileStepStore {
    pub fn new(state_dir: &Path, protector: Arc<SecretProtector>) -> Self {
        Self {
            dir: state_dir.join("attempts"),
            protector,
            write_lock: Mutex::new(()),
        }
    }

    fn path_for(&self, id: &AttemptId) -> PathBuf {
        // AttemptId is restricted to [A-Za-z0-9_-], so it is always a plain file name.
        self.dir.join(format!("{}.json", id.as_str()))
    }

    async fn seal(&self, attempt: &InstallationAttempt) -> Result<InstallationAttempt> {
        let mut sealed = attempt.clone();
        for fields in sealed.steps.values_mut() {
            for (name, value) in fields.iter_mut() {
                if is_secret_field(name) {
                    *value = self
                        .protector
                        .encrypt(value)
                        .await
                        .with_context(|| format!("Failed to seal field '{}'", name))?;
                }
            }
        }
        Ok(sealed)
    }

    async fn unseal(&self, mut attempt: InstallationAttempt) -> Result<InstallationAttempt> {
        for fields in attempt.steps.values_mut() {
            // Only secret fields are sealed; anything else is stored verbatim, prefix or not.
            for (name, value) in fields.iter_mut().filter(|(name, _)| is_secret_field(name)) {
                if !self.protector.is_encrypted(value) {
                    anyhow::bail!("Secret field '{}' was stored unsealed", name);
                }
                *value = self
                    .protector
                    .decrypt(value)
                    .await
                    .with_context(|| format!("Failed to unseal field '{}'", name))?;
            }
        }
        Ok(attempt)
    }
}

#[async_trait]
impl StepStore for FileStepStore {
    async fn load(&self, id: &AttemptId) -> Result<Option<InstallationAttempt>> {
        let path = self.path_for(id);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(anyhow::Error::new(e))
                    .with_context(|| format!("Failed to read attempt state {:?}", path))
            }
        };
        let stored: InstallationAttempt = serde_json::from_str(&text)
            .with_context(|| format!("Attempt state {:?} is corrupt", path))?;
        if stored.id != *id {
            anyhow::bail!("Attempt state {:?} belongs to attempt {}", path, stored.id);
        }
        debug!(
            "[PHASE: wizard] [STEP: store] Loaded attempt {} (current_step={})",
            id, stored.current_step
        );
        Ok(Some(self.unseal(stored).await?))
    }

    async fn save(&self, attempt: &InstallationAttempt) -> Result<()> {
        let sealed = self.seal(attempt).await?;
        let json = serde_json::to_vec_pretty(&sealed).context("Failed to encode attempt state")?;
        ensure_dir_with_retries(&self.dir, "ensure_state_dir").await?;
        write_file_with_retries(&self.path_for(&attempt.id), &json, "save_attempt").await
    }

    async fn clear(&self, id: &AttemptId) -> Result<()> {
        let path = self.path_for(id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                info!("[PHASE: wizard] [STEP: store] Cleared attempt {}", id);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(anyhow::Error::new(e))
                .with_context(|| format!("Failed to remove attempt state {:?}", path)),
        }
    }

    async fn put(&self, id: &AttemptId, step: StepNumber, fields: FieldSet) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut attempt = self
            .load(id)
            .await?
            .unwrap_or_else(|| InstallationAttempt::new(id.clone()));
        attempt.steps.insert(step, fields);
        attempt.touch();
        self.save(&attempt).await
    }
}
