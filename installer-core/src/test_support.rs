// Shared stubs for unit tests.

use crate::database::admin::{AdminAccounts, AdminCreation, NewAdmin};
use crate::database::connection::{ConnectError, ConnectErrorKind, ConnectionParams, DbConnector};
use crate::finalize::commands::CommandRunner;
use crate::finalize::Finalizer;
use crate::installation::layout::InstallLayout;
use crate::installation::CommandOutput;
use crate::models::steps::{FieldSet, StepData};
use crate::preflight::{PreconditionChecker, RuntimeProbe};
use crate::settings::InstallerSettings;
use crate::wizard::{MemoryStepStore, WizardController};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub fn fields(pairs: &[(&str, &str)]) -> FieldSet {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Valid answers for steps 1..=5.
pub fn sample_steps() -> StepData {
    let mut data = StepData::new();
    data.insert(1, FieldSet::new());
    data.insert(
        2,
        fields(&[
            ("db_host", "localhost"),
            ("db_port", "3306"),
            ("db_database", "app_db"),
            ("db_username", "root"),
            ("db_password", ""),
        ]),
    );
    data.insert(
        3,
        fields(&[
            ("app_name", "Waslne"),
            ("app_url", "https://waslne.test"),
            ("support_phone", "+20 100 000 0000"),
            ("support_email", "support@waslne.test"),
        ]),
    );
    data.insert(
        4,
        fields(&[
            ("name", "Admin"),
            ("email", "admin@example.com"),
            ("password", "password123"),
        ]),
    );
    data.insert(5, FieldSet::new());
    data
}

/// Application root with the runtime directories present.
pub fn app_root_fixture() -> TempDir {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(tmp.path().join("storage")).unwrap();
    std::fs::create_dir_all(tmp.path().join("bootstrap/cache")).unwrap();
    tmp
}

// =========================
// Runtime
// =========================

pub struct FixedRuntime {
    pub version: Result<String, String>,
    pub extensions: Result<Vec<String>, String>,
}

impl FixedRuntime {
    pub fn healthy() -> Self {
        Self {
            version: Ok("8.2.12".to_string()),
            extensions: Ok(InstallerSettings::default().required_extensions),
        }
    }
}

#[async_trait]
impl RuntimeProbe for FixedRuntime {
    async fn version(&self) -> Result<String> {
        self.version.clone().map_err(anyhow::Error::msg)
    }

    async fn extensions(&self) -> Result<Vec<String>> {
        self.extensions.clone().map_err(anyhow::Error::msg)
    }
}

// =========================
// Database connectors
// =========================

#[derive(Default)]
pub struct OkConnector {
    pub call_count: AtomicU32,
}

#[async_trait]
impl DbConnector for OkConnector {
    async fn ensure_database(&self, _params: &ConnectionParams) -> Result<(), ConnectError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Never answers; only the per-attempt timeout ends a call.
pub struct HangingStub {
    pub call_count: AtomicU32,
    timeout: Duration,
    retries: u32,
}

impl HangingStub {
    pub fn new(timeout: Duration, retries: u32) -> Self {
        Self {
            call_count: AtomicU32::new(0),
            timeout,
            retries,
        }
    }
}

#[async_trait]
impl DbConnector for HangingStub {
    async fn ensure_database(&self, _params: &ConnectionParams) -> Result<(), ConnectError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }

    fn timeout_duration(&self) -> Duration {
        self.timeout
    }

    fn max_retries(&self) -> u32 {
        self.retries
    }
}

pub struct ImmediateFailureStub {
    pub call_count: AtomicU32,
    kind: ConnectErrorKind,
    user_message: String,
    internal_details: String,
}

impl ImmediateFailureStub {
    pub fn new(kind: ConnectErrorKind, user_message: &str, internal_details: &str) -> Self {
        Self {
            call_count: AtomicU32::new(0),
            kind,
            user_message: user_message.to_string(),
            internal_details: internal_details.to_string(),
        }
    }
}

#[async_trait]
impl DbConnector for ImmediateFailureStub {
    async fn ensure_database(&self, _params: &ConnectionParams) -> Result<(), ConnectError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        Err(ConnectError::new(
            self.kind,
            self.user_message.clone(),
            self.internal_details.clone(),
        ))
    }
}

/// Fails with a transient error `failures` times, then succeeds.
pub struct FailThenSucceedStub {
    pub call_count: AtomicU32,
    failures: u32,
}

impl FailThenSucceedStub {
    pub fn new(failures: u32) -> Self {
        Self {
            call_count: AtomicU32::new(0),
            failures,
        }
    }
}

#[async_trait]
impl DbConnector for FailThenSucceedStub {
    async fn ensure_database(&self, _params: &ConnectionParams) -> Result<(), ConnectError> {
        let n = self.call_count.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            Err(ConnectError::new(
                ConnectErrorKind::Unreachable,
                "Unable to reach the database server.",
                "connection refused",
            ))
        } else {
            Ok(())
        }
    }
}

// =========================
// Admin accounts
// =========================

#[derive(Default)]
pub struct MemoryAdminAccounts {
    rows: Mutex<Vec<NewAdmin>>,
    unreachable: bool,
    fail_next: AtomicU32,
}

impl MemoryAdminAccounts {
    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::default()
        }
    }

    /// Make the next `n` calls fail as if the server went away.
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn rows(&self) -> Vec<NewAdmin> {
        self.rows.lock().unwrap().clone()
    }
}

#[async_trait]
impl AdminAccounts for MemoryAdminAccounts {
    async fn create_super_admin(
        &self,
        _params: &ConnectionParams,
        admin: &NewAdmin,
    ) -> Result<AdminCreation> {
        if self.unreachable {
            anyhow::bail!("Unable to reach the database server.");
        }
        let pending = self.fail_next.load(Ordering::SeqCst);
        if pending > 0 {
            self.fail_next.store(pending - 1, Ordering::SeqCst);
            anyhow::bail!("Lost connection to the database server.");
        }
        let mut rows = self.rows.lock().unwrap();
        if rows.iter().any(|r| r.email == admin.email) {
            return Ok(AdminCreation::AlreadyExists);
        }
        rows.push(admin.clone());
        Ok(AdminCreation::Created)
    }
}

// =========================
// Command runner
// =========================

pub struct StubRunner {
    pub migration_calls: AtomicU32,
    pub cache_calls: AtomicU32,
    migration_exit: i32,
    failing_cache: Option<String>,
    migration_delay: Duration,
}

impl StubRunner {
    pub fn ok() -> Self {
        Self {
            migration_calls: AtomicU32::new(0),
            cache_calls: AtomicU32::new(0),
            migration_exit: 0,
            failing_cache: None,
            migration_delay: Duration::ZERO,
        }
    }

    pub fn failing_migrations(exit_code: i32) -> Self {
        Self {
            migration_exit: exit_code,
            ..Self::ok()
        }
    }

    pub fn failing_cache(command: &str) -> Self {
        Self {
            failing_cache: Some(command.to_string()),
            ..Self::ok()
        }
    }

    pub fn with_migration_delay(mut self, delay: Duration) -> Self {
        self.migration_delay = delay;
        self
    }

    fn output(exit_code: i32, stderr: &str) -> CommandOutput {
        CommandOutput {
            exit_code: Some(exit_code),
            stdout: String::new(),
            stderr: stderr.to_string(),
            duration_ms: 1,
        }
    }
}

#[async_trait]
impl CommandRunner for StubRunner {
    async fn run_migrations(&self) -> Result<CommandOutput> {
        self.migration_calls.fetch_add(1, Ordering::SeqCst);
        if !self.migration_delay.is_zero() {
            tokio::time::sleep(self.migration_delay).await;
        }
        if self.migration_exit == 0 {
            Ok(Self::output(0, ""))
        } else {
            Ok(Self::output(
                self.migration_exit,
                "SQLSTATE[42S01]: Base table or view already exists",
            ))
        }
    }

    async fn clear_cache(&self, command: &str) -> Result<CommandOutput> {
        self.cache_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_cache.as_deref() == Some(command) {
            Ok(Self::output(1, "Unable to prepare route for serialization"))
        } else {
            Ok(Self::output(0, ""))
        }
    }
}

// =========================
// Wired controller
// =========================

pub struct Harness {
    pub root: TempDir,
    pub store: Arc<MemoryStepStore>,
    pub connector: Arc<OkConnector>,
    pub admins: Arc<MemoryAdminAccounts>,
    pub runner: Arc<StubRunner>,
    pub controller: WizardController,
}

pub fn harness(runner: StubRunner) -> Harness {
    let connector = Arc::new(OkConnector::default());
    build_harness(runner, FixedRuntime::healthy(), connector.clone(), connector)
}

/// Like `harness`, with a custom runtime and database connector for preflight.
pub fn harness_with(
    runner: StubRunner,
    runtime: FixedRuntime,
    db: Arc<dyn DbConnector>,
) -> Harness {
    build_harness(runner, runtime, db, Arc::new(OkConnector::default()))
}

fn build_harness(
    runner: StubRunner,
    runtime: FixedRuntime,
    db: Arc<dyn DbConnector>,
    connector: Arc<OkConnector>,
) -> Harness {
    let root = app_root_fixture();
    let settings = InstallerSettings::default();
    let layout = InstallLayout::new(root.path(), ".env");
    let store = Arc::new(MemoryStepStore::new());
    let admins = Arc::new(MemoryAdminAccounts::default());
    let runner = Arc::new(runner);

    let checker = Arc::new(PreconditionChecker::new(
        &settings,
        layout.clone(),
        Arc::new(runtime),
        db,
    ));
    let finalizer = Arc::new(Finalizer::new(
        layout.clone(),
        runner.clone(),
        admins.clone(),
        settings.permission_dirs.clone(),
    ));
    let controller = WizardController::new(store.clone(), checker, finalizer, layout);

    Harness {
        root,
        store,
        connector,
        admins,
        runner,
        controller,
    }
}
