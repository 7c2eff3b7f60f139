// PreconditionChecker
//
// Environment checks never abort: every probing error becomes a failed checklist item with a
// detail string. The database probe is bounded per attempt and retries only transient failures.

use crate::database::connection::{ConnectError, ConnectionParams, DbConnector};
use crate::installation::files::probe_writable;
use crate::installation::layout::InstallLayout;
use crate::installation::run_cmd_with_timeout;
use crate::models::responses::Checklist;
use crate::settings::InstallerSettings;
use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{info, warn};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{timeout, Duration};
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

/// `major.minor.patch`, tolerating vendor suffixes (`8.2.12-1ubuntu1`) and missing parts.
pub fn parse_version(raw: &str) -> Option<(u32, u32, u32)> {
    let mut parts = raw.trim().split('.').map(|p| {
        let digits: String = p.chars().take_while(|c| c.is_ascii_digit()).collect();
        digits.parse::<u32>().ok()
    });
    let major = parts.next().flatten()?;
    let minor = parts.next().flatten().unwrap_or(0);
    let patch = parts.next().flatten().unwrap_or(0);
    Some((major, minor, patch))
}

fn version_label(min: (u32, u32, u32)) -> String {
    if min.2 == 0 {
        format!("PHP Version >= {}.{}", min.0, min.1)
    } else {
        format!("PHP Version >= {}.{}.{}", min.0, min.1, min.2)
    }
}

fn extension_label(ext: &str) -> String {
    let name = match ext.to_ascii_lowercase().as_str() {
        "openssl" => "OpenSSL".to_string(),
        "pdo" => "PDO".to_string(),
        "xml" => "XML".to_string(),
        "json" => "JSON".to_string(),
        "bcmath" => "BCMath".to_string(),
        "gd" => "GD".to_string(),
        "curl" => "cURL".to_string(),
        other => {
            let mut c = other.chars();
            match c.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + c.as_str(),
                None => String::new(),
            }
        }
    };
    format!("{} Extension", name)
}

/// Interpreter the application runs on.
#[async_trait]
pub trait RuntimeProbe: Send + Sync {
    async fn version(&self) -> Result<String>;
    /// Loaded extension names, lowercase.
    async fn extensions(&self) -> Result<Vec<String>>;
}

pub struct PhpRuntimeProbe {
    binary: String,
    timeout: Duration,
}

impl PhpRuntimeProbe {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    async fn run(&self, args: &[&str], operation: &str) -> Result<String> {
        let program = which::which(&self.binary)
            .with_context(|| format!("PHP binary '{}' not found on PATH", self.binary))?;
        let program = program.to_string_lossy().to_string();
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        let out = run_cmd_with_timeout(&program, &args, None, self.timeout, operation).await?;
        if !out.success() {
            anyhow::bail!(
                "'{} {}' exited with {:?}: {}",
                self.binary,
                args.join(" "),
                out.exit_code,
                out.diagnostic_tail()
            );
        }
        Ok(out.stdout)
    }
}

#[async_trait]
impl RuntimeProbe for PhpRuntimeProbe {
    async fn version(&self) -> Result<String> {
        let out = self
            .run(&["-r", "echo PHP_VERSION;"], "php_version")
            .await?;
        Ok(out.trim().to_string())
    }

    async fn extensions(&self) -> Result<Vec<String>> {
        let out = self.run(&["-m"], "php_modules").await?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('['))
            .map(|l| l.to_ascii_lowercase())
            .collect())
    }
}

pub struct PreconditionChecker {
    layout: InstallLayout,
    min_version: String,
    required_extensions: Vec<String>,
    writable_dirs: Vec<String>,
    runtime: Arc<dyn RuntimeProbe>,
    db: Arc<dyn DbConnector>,
}

impl PreconditionChecker {
    pub fn new(
        settings: &InstallerSettings,
        layout: InstallLayout,
        runtime: Arc<dyn RuntimeProbe>,
        db: Arc<dyn DbConnector>,
    ) -> Self {
        Self {
            layout,
            min_version: settings.min_php_version.clone(),
            required_extensions: settings.required_extensions.clone(),
            writable_dirs: settings.writable_dirs.clone(),
            runtime,
            db,
        }
    }

    /// Runtime version, required extensions, writable directories and the artifact slot.
    pub async fn check_environment(&self) -> Checklist {
        let started = Instant::now();
        let mut checklist = Checklist::default();

        let min = parse_version(&self.min_version).unwrap_or((0, 0, 0));
        match self.runtime.version().await {
            Ok(v) => match parse_version(&v) {
                Some(found) => checklist.push(
                    version_label(min),
                    found >= min,
                    Some(format!("found {}", v)),
                ),
                None => checklist.push(
                    version_label(min),
                    false,
                    Some(format!("unrecognised version '{}'", v)),
                ),
            },
            Err(e) => {
                warn!("[PHASE: preflight] [STEP: runtime] Version probe failed: {:#}", e);
                checklist.push(version_label(min), false, Some(format!("{:#}", e)));
            }
        }

        match self.runtime.extensions().await {
            Ok(loaded) => {
                for ext in &self.required_extensions {
                    let present = loaded.iter().any(|l| l.eq_ignore_ascii_case(ext));
                    checklist.push(
                        extension_label(ext),
                        present,
                        (!present).then(|| "not loaded".to_string()),
                    );
                }
            }
            Err(e) => {
                warn!("[PHASE: preflight] [STEP: runtime] Extension probe failed: {:#}", e);
                let detail = format!("{:#}", e);
                for ext in &self.required_extensions {
                    checklist.push(extension_label(ext), false, Some(detail.clone()));
                }
            }
        }

        for rel in &self.writable_dirs {
            let dir = self.layout.app_root().join(rel);
            let label = format!("{}/", rel.trim_end_matches('/'));
            match probe_writable(&dir).await {
                Ok(()) => checklist.push(label, true, None),
                Err(e) => checklist.push(label, false, Some(format!("{:#}", e))),
            }
        }

        let artifact_label = self
            .layout
            .artifact_path()
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| ".env".to_string());
        match self.layout.artifact_writable().await {
            Ok(()) => checklist.push(artifact_label, true, None),
            Err(e) => checklist.push(artifact_label, false, Some(format!("{:#}", e))),
        }

        info!(
            "[PHASE: preflight] [STEP: environment] Checklist done (items={}, failed={:?}, duration_ms={})",
            checklist.items.len(),
            checklist.failed_labels(),
            started.elapsed().as_millis()
        );
        checklist
    }

    /// Connect and create the target database if absent. Each attempt is bounded by the
    /// connector's timeout; only unreachable/timed-out attempts are retried.
    pub async fn probe_database(&self, params: &ConnectionParams) -> Result<(), ConnectError> {
        let started = Instant::now();
        let connector: &dyn DbConnector = self.db.as_ref();
        let per_attempt = connector.timeout_duration();
        let attempts = connector.max_retries().max(1);

        info!(
            "[PHASE: preflight] [STEP: database] Probing {:?} (timeout_ms={}, attempts={})",
            params,
            per_attempt.as_millis(),
            attempts
        );

        let strategy = ExponentialBackoff::from_millis(100)
            .factor(2)
            .max_delay(Duration::from_secs(1))
            .take((attempts - 1) as usize)
            .map(jitter);

        let attempt = move || async move {
            match timeout(per_attempt, connector.ensure_database(params)).await {
                Ok(r) => r,
                Err(_) => Err(ConnectError::timed_out(per_attempt)),
            }
        };

        let result = RetryIf::spawn(strategy, attempt, |e: &ConnectError| {
            let retry = e.kind.is_transient();
            if retry {
                warn!(
                    "[PHASE: preflight] [STEP: database] Transient failure, retrying: {}",
                    e.internal_details
                );
            }
            retry
        })
        .await;

        match &result {
            Ok(()) => info!(
                "[PHASE: preflight] [STEP: database] Probe ok (duration_ms={})",
                started.elapsed().as_millis()
            ),
            Err(e) => warn!(
                "[PHASE: preflight] [STEP: database] Probe failed (kind={:?}, duration_ms={}, details={})",
                e.kind,
                started.elapsed().as_millis(),
                e.internal_details
            ),
        }
        result
    }
}
