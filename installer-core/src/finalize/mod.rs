// Finalizer
//
// Ordered, non-transactional commit sequence. Every action records an outcome; nothing is
// rolled back. `write_config` and `generate_secrets` abort the sequence when they fail, the
// rest always run. Every action is safe to repeat on a retry.

pub mod commands;

use crate::database::admin::{AdminAccounts, AdminCreation, NewAdmin};
use crate::database::connection::ConnectionParams;
use crate::envfile::{self, ConfigurationDocument, EnvFile, SecretOrigin, SECRET_KEYS};
use crate::error::FinalizeError;
use crate::installation::layout::InstallLayout;
use crate::models::responses::{ActionKind, ActionOutcome, FinalizationResult, ItemOutcome};
use crate::models::steps::{fields, fields_of, supplied, StepData, StepKind};
use crate::security::crypto;
use crate::utils::logging::mask_sensitive;
use commands::{CommandRunner, CACHE_COMMANDS};
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Instant;

pub struct Finalizer {
    layout: InstallLayout,
    runner: Arc<dyn CommandRunner>,
    admins: Arc<dyn AdminAccounts>,
    permission_dirs: Vec<String>,
}

impl Finalizer {
    pub fn new(
        layout: InstallLayout,
        runner: Arc<dyn CommandRunner>,
        admins: Arc<dyn AdminAccounts>,
        permission_dirs: Vec<String>,
    ) -> Self {
        Self {
            layout,
            runner,
            admins,
            permission_dirs,
        }
    }

    pub async fn run(&self, steps: &StepData) -> FinalizationResult {
        let started = Instant::now();
        info!(
            "[PHASE: finalize] [STEP: start] Finalization started (artifact={:?})",
            self.layout.artifact_path()
        );
        let mut outcomes = Vec::with_capacity(ActionKind::ORDER.len());

        let (mut doc, prior) = match self.write_config(steps).await {
            Ok((doc, prior, detail)) => {
                outcomes.push(record(ActionOutcome::ok(ActionKind::WriteConfig, detail)));
                (doc, prior)
            }
            Err(e) => {
                outcomes.push(record(ActionOutcome::failed(
                    ActionKind::WriteConfig,
                    e.to_string(),
                )));
                return finish(outcomes, started);
            }
        };

        match self.generate_secrets(&mut doc, prior.as_ref()).await {
            Ok(detail) => outcomes.push(record(ActionOutcome::ok(
                ActionKind::GenerateSecrets,
                detail,
            ))),
            Err(e) => {
                outcomes.push(record(ActionOutcome::failed(
                    ActionKind::GenerateSecrets,
                    e.to_string(),
                )));
                return finish(outcomes, started);
            }
        }

        outcomes.push(record(self.run_migrations().await));
        outcomes.push(record(self.create_admin(steps).await));
        outcomes.push(record(ActionOutcome::from_items(
            ActionKind::SetPermissions,
            self.layout.fix_permissions(&self.permission_dirs).await,
        )));
        outcomes.push(record(self.clear_caches().await));

        finish(outcomes, started)
    }

    /// Build the document (prior secrets carried over, no new ones yet) and write it.
    async fn write_config(
        &self,
        steps: &StepData,
    ) -> Result<(ConfigurationDocument, Option<EnvFile>, String), FinalizeError> {
        let prior = match self
            .layout
            .read_artifact()
            .await
            .map_err(|e| FinalizeError::WriteConfig(format!("{:#}", e)))?
        {
            // An unreadable artifact would lose its secrets if overwritten.
            Some(text) => Some(envfile::parse(&text).map_err(|e| {
                FinalizeError::WriteConfig(format!(
                    "existing {:?} cannot be parsed ({}); fix or remove it first",
                    self.layout.artifact_path(),
                    e
                ))
            })?),
            None => None,
        };

        let mut doc = envfile::build_settings(steps)
            .map_err(|e| FinalizeError::IncompleteConfig(e.to_string()))?;
        let carried = envfile::carry_over_secrets(&mut doc, prior.as_ref());

        self.layout
            .write_artifact(&envfile::serialize(&doc))
            .await
            .map_err(|e| FinalizeError::WriteConfig(format!("{:#}", e)))?;

        let detail = format!(
            "wrote {} settings ({} secret(s) carried over)",
            doc.entries().count(),
            carried.len()
        );
        Ok((doc, prior, detail))
    }

    /// Fill the secret slots, rewrite the artifact and read it back.
    async fn generate_secrets(
        &self,
        doc: &mut ConfigurationDocument,
        prior: Option<&EnvFile>,
    ) -> Result<String, FinalizeError> {
        let origins = envfile::ensure_secrets(doc, prior)
            .map_err(|e| FinalizeError::Secrets(e.to_string()))?;

        self.layout
            .write_artifact(&envfile::serialize(doc))
            .await
            .map_err(|e| FinalizeError::Secrets(format!("{:#}", e)))?;

        let written = self
            .layout
            .read_artifact()
            .await
            .map_err(|e| FinalizeError::Secrets(format!("{:#}", e)))?
            .ok_or_else(|| FinalizeError::Secrets("artifact vanished after write".to_string()))?;
        let written =
            envfile::parse(&written).map_err(|e| FinalizeError::Secrets(e.to_string()))?;

        let mut parts = Vec::with_capacity(SECRET_KEYS.len());
        for key in SECRET_KEYS {
            let expected = doc.get(key).unwrap_or_default();
            if expected.is_empty() || written.get(key) != Some(expected) {
                return Err(FinalizeError::Secrets(format!(
                    "{} did not persist",
                    key
                )));
            }
            let origin = match origins.get(key) {
                Some(SecretOrigin::Preserved) => "preserved",
                _ => "generated",
            };
            info!(
                "[PHASE: finalize] [STEP: generate_secrets] {} {} ({})",
                key,
                origin,
                crypto::secret_fingerprint(expected)
            );
            parts.push(format!("{} {}", key, origin));
        }
        Ok(parts.join(", "))
    }

    async fn run_migrations(&self) -> ActionOutcome {
        match self.runner.run_migrations().await {
            Ok(out) if out.success() => ActionOutcome::ok(
                ActionKind::RunMigrations,
                format!("migrations applied in {}ms", out.duration_ms),
            ),
            Ok(out) => {
                let code = out
                    .exit_code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "none".to_string());
                let tail = out.diagnostic_tail();
                ActionOutcome::failed(
                    ActionKind::RunMigrations,
                    if tail.is_empty() {
                        format!("exit code {}", code)
                    } else {
                        format!("exit code {}: {}", code, tail)
                    },
                )
            }
            Err(e) => ActionOutcome::failed(ActionKind::RunMigrations, format!("{:#}", e)),
        }
    }

    async fn create_admin(&self, steps: &StepData) -> ActionOutcome {
        let admin_fields = fields_of(steps, StepKind::Admin);
        let (Some(name), Some(email)) = (
            supplied(&admin_fields, fields::ADMIN_NAME),
            supplied(&admin_fields, fields::ADMIN_EMAIL),
        ) else {
            return ActionOutcome::failed(
                ActionKind::CreateAdmin,
                "administrator name and email are missing",
            );
        };
        let password = admin_fields
            .get(fields::ADMIN_PASSWORD)
            .cloned()
            .unwrap_or_default();
        if password.is_empty() {
            return ActionOutcome::failed(ActionKind::CreateAdmin, "administrator password is missing");
        }

        let params = match ConnectionParams::from_fields(&fields_of(steps, StepKind::Database)) {
            Ok(p) => p,
            Err(msg) => return ActionOutcome::failed(ActionKind::CreateAdmin, msg),
        };

        // bcrypt is slow by construction; keep it off the async workers.
        let hashed = tokio::task::spawn_blocking(move || crypto::hash_password(&password)).await;
        let password_hash = match hashed {
            Ok(Ok(h)) => h,
            Ok(Err(e)) => {
                return ActionOutcome::failed(ActionKind::CreateAdmin, format!("{:#}", e))
            }
            Err(e) => {
                return ActionOutcome::failed(
                    ActionKind::CreateAdmin,
                    format!("password hashing task failed: {}", e),
                )
            }
        };

        let admin = NewAdmin {
            name: name.to_string(),
            email: email.to_string(),
            password_hash,
        };
        match self.admins.create_super_admin(&params, &admin).await {
            Ok(AdminCreation::Created) => ActionOutcome::ok(
                ActionKind::CreateAdmin,
                format!("created {}", mask_sensitive(email)),
            ),
            Ok(AdminCreation::AlreadyExists) => {
                ActionOutcome::ok(ActionKind::CreateAdmin, "already exists")
            }
            Err(e) => ActionOutcome::failed(ActionKind::CreateAdmin, format!("{:#}", e)),
        }
    }

    async fn clear_caches(&self) -> ActionOutcome {
        let mut items = Vec::with_capacity(CACHE_COMMANDS.len());
        for command in CACHE_COMMANDS {
            let item = match self.runner.clear_cache(command).await {
                Ok(out) if out.success() => ItemOutcome {
                    target: command.to_string(),
                    succeeded: true,
                    detail: None,
                },
                Ok(out) => ItemOutcome {
                    target: command.to_string(),
                    succeeded: false,
                    detail: Some(format!(
                        "exit code {:?}: {}",
                        out.exit_code,
                        out.diagnostic_tail()
                    )),
                },
                Err(e) => ItemOutcome {
                    target: command.to_string(),
                    succeeded: false,
                    detail: Some(format!("{:#}", e)),
                },
            };
            items.push(item);
        }
        ActionOutcome::from_items(ActionKind::ClearCaches, items)
    }
}

fn record(outcome: ActionOutcome) -> ActionOutcome {
    let detail = outcome.detail.as_deref().unwrap_or("");
    if outcome.succeeded {
        info!(
            "[PHASE: finalize] [STEP: {}] ok: {}",
            outcome.action, detail
        );
    } else if outcome.action.is_fatal() {
        error!(
            "[PHASE: finalize] [STEP: {}] failed, aborting: {}",
            outcome.action, detail
        );
    } else {
        warn!(
            "[PHASE: finalize] [STEP: {}] failed: {}",
            outcome.action, detail
        );
    }
    outcome
}

fn finish(outcomes: Vec<ActionOutcome>, started: Instant) -> FinalizationResult {
    let result = FinalizationResult::from_outcomes(outcomes);
    info!(
        "[PHASE: finalize] [STEP: done] Finalization finished (summary={:?}, actions={}, duration_ms={})",
        result.summary(),
        result.outcomes.len(),
        started.elapsed().as_millis()
    );
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::responses::FinalizationSummary;
    use crate::test_support::{app_root_fixture, sample_steps, MemoryAdminAccounts, StubRunner};
    use std::sync::atomic::Ordering;

    fn finalizer(
        root: &std::path::Path,
        runner: Arc<StubRunner>,
        admins: Arc<MemoryAdminAccounts>,
    ) -> Finalizer {
        Finalizer::new(
            InstallLayout::new(root, ".env"),
            runner,
            admins,
            vec![
                "storage".to_string(),
                "bootstrap/cache".to_string(),
                "storage/logs".to_string(),
            ],
        )
    }

    fn env_of(root: &std::path::Path) -> EnvFile {
        envfile::parse(&std::fs::read_to_string(root.join(".env")).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn happy_path_runs_every_action_in_order() {
        let root = app_root_fixture();
        let admins = Arc::new(MemoryAdminAccounts::default());
        let f = finalizer(root.path(), Arc::new(StubRunner::ok()), admins.clone());

        let result = f.run(&sample_steps()).await;
        assert!(result.success);
        assert_eq!(result.summary(), FinalizationSummary::Completed);
        let order: Vec<ActionKind> = result.outcomes.iter().map(|o| o.action).collect();
        assert_eq!(order, ActionKind::ORDER.to_vec());

        let env = env_of(root.path());
        assert_eq!(env.get("DB_DATABASE"), Some("app_db"));
        assert!(env.get("APP_KEY").unwrap().starts_with("base64:"));
        assert_eq!(env.get("JWT_SECRET").unwrap().len(), 64);
        assert_eq!(admins.rows().len(), 1);
        // INTENT: the plaintext never reaches the account store.
        assert!(crypto::verify_password("password123", &admins.rows()[0].password_hash));
        // The application's default hasher only accepts bcrypt.
        assert!(admins.rows()[0].password_hash.starts_with("$2y$"));
        assert!(root.path().join("storage/logs").is_dir());
    }

    #[tokio::test]
    async fn second_run_with_existing_admin_is_successful_and_keeps_secrets() {
        let root = app_root_fixture();
        let admins = Arc::new(MemoryAdminAccounts::default());
        let f = finalizer(root.path(), Arc::new(StubRunner::ok()), admins.clone());

        assert!(f.run(&sample_steps()).await.success);
        let first = env_of(root.path());

        let second = f.run(&sample_steps()).await;
        assert!(second.success);
        assert_eq!(
            second
                .outcome(ActionKind::CreateAdmin)
                .and_then(|o| o.detail.as_deref()),
            Some("already exists")
        );
        assert_eq!(admins.rows().len(), 1);

        let again = env_of(root.path());
        assert_eq!(again.get("APP_KEY"), first.get("APP_KEY"));
        assert_eq!(again.get("JWT_SECRET"), first.get("JWT_SECRET"));
    }

    #[tokio::test]
    async fn migration_failure_is_a_warning_not_a_failure() {
        let root = app_root_fixture();
        let admins = Arc::new(MemoryAdminAccounts::default());
        let runner = Arc::new(StubRunner::failing_migrations(1));
        let f = finalizer(root.path(), runner.clone(), admins.clone());

        let result = f.run(&sample_steps()).await;
        assert!(result.success);
        assert_eq!(result.summary(), FinalizationSummary::CompletedWithWarnings);
        let migrate = result.outcome(ActionKind::RunMigrations).unwrap();
        assert!(!migrate.succeeded);
        assert!(migrate.detail.as_deref().unwrap().contains("exit code 1"));
        // Later actions still ran.
        assert_eq!(result.outcomes.len(), 6);
        assert_eq!(admins.rows().len(), 1);
        assert_eq!(runner.cache_calls.load(Ordering::SeqCst), 3);
        assert_eq!(result.warnings().len(), 1);
    }

    #[tokio::test]
    async fn admin_store_failure_flips_success() {
        let root = app_root_fixture();
        let admins = Arc::new(MemoryAdminAccounts::unreachable());
        let f = finalizer(root.path(), Arc::new(StubRunner::ok()), admins);

        let result = f.run(&sample_steps()).await;
        assert!(!result.success);
        assert_eq!(result.summary(), FinalizationSummary::Failed);
        assert!(result.failure_reason().unwrap().starts_with("create_admin failed"));
        assert_eq!(result.outcomes.len(), 6);
    }

    #[tokio::test]
    async fn incomplete_data_aborts_before_anything_else() {
        let root = app_root_fixture();
        let runner = Arc::new(StubRunner::ok());
        let admins = Arc::new(MemoryAdminAccounts::default());
        let f = finalizer(root.path(), runner.clone(), admins.clone());

        let mut steps = sample_steps();
        steps.remove(&2);
        let result = f.run(&steps).await;
        assert!(!result.success);
        assert_eq!(result.outcomes.len(), 1);
        assert_eq!(result.outcomes[0].action, ActionKind::WriteConfig);
        assert!(!root.path().join(".env").exists());
        assert_eq!(runner.migration_calls.load(Ordering::SeqCst), 0);
        assert!(admins.rows().is_empty());
    }

    #[tokio::test]
    async fn unparseable_existing_artifact_is_not_overwritten() {
        let root = app_root_fixture();
        std::fs::write(root.path().join(".env"), "APP_KEY=\"unterminated\n").unwrap();
        let f = finalizer(
            root.path(),
            Arc::new(StubRunner::ok()),
            Arc::new(MemoryAdminAccounts::default()),
        );
        let result = f.run(&sample_steps()).await;
        assert!(!result.success);
        assert_eq!(result.outcomes.len(), 1);
        assert_eq!(
            std::fs::read_to_string(root.path().join(".env")).unwrap(),
            "APP_KEY=\"unterminated\n"
        );
    }

    #[tokio::test]
    async fn cache_failures_are_recorded_per_command() {
        let root = app_root_fixture();
        let runner = Arc::new(StubRunner::failing_cache("route:cache"));
        let f = finalizer(
            root.path(),
            runner,
            Arc::new(MemoryAdminAccounts::default()),
        );
        let result = f.run(&sample_steps()).await;
        assert!(result.success);
        let caches = result.outcome(ActionKind::ClearCaches).unwrap();
        assert!(!caches.succeeded);
        let failed: Vec<&str> = caches
            .items
            .iter()
            .filter(|i| !i.succeeded)
            .map(|i| i.target.as_str())
            .collect();
        assert_eq!(failed, vec!["route:cache"]);
    }
}
