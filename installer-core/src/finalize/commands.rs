// Process collaborator for finalization: schema migrations and cache rebuilds.

use crate::installation::{run_cmd_with_timeout, run_cmd_with_timeout_once, CommandOutput};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::time::Duration;

/// Cache rebuild commands, in the order they are run.
pub const CACHE_COMMANDS: [&str; 3] = ["config:cache", "route:cache", "view:cache"];

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Apply pending schema migrations. Non-zero exit is reported through the output.
    async fn run_migrations(&self) -> Result<CommandOutput>;

    async fn clear_cache(&self, command: &str) -> Result<CommandOutput>;
}

/// Runs `php artisan …` inside the application root.
pub struct ArtisanRunner {
    php_binary: String,
    app_root: PathBuf,
    migration_timeout: Duration,
    cache_timeout: Duration,
}

impl ArtisanRunner {
    pub fn new(
        php_binary: impl Into<String>,
        app_root: impl Into<PathBuf>,
        migration_timeout: Duration,
        cache_timeout: Duration,
    ) -> Self {
        Self {
            php_binary: php_binary.into(),
            app_root: app_root.into(),
            migration_timeout,
            cache_timeout,
        }
    }

    fn program(&self) -> Result<String> {
        let resolved = which::which(&self.php_binary)
            .with_context(|| format!("PHP binary '{}' not found on PATH", self.php_binary))?;
        Ok(resolved.to_string_lossy().to_string())
    }

    fn artisan(args: &[&str]) -> Vec<String> {
        std::iter::once("artisan")
            .chain(args.iter().copied())
            .map(str::to_string)
            .collect()
    }
}

#[async_trait]
impl CommandRunner for ArtisanRunner {
    async fn run_migrations(&self) -> Result<CommandOutput> {
        let program = self.program()?;
        // Migrations are not safely repeatable mid-flight; run exactly once.
        run_cmd_with_timeout_once(
            &program,
            &Self::artisan(&["migrate", "--force"]),
            Some(self.app_root.as_path()),
            self.migration_timeout,
            "artisan_migrate",
        )
        .await
    }

    async fn clear_cache(&self, command: &str) -> Result<CommandOutput> {
        let program = self.program()?;
        run_cmd_with_timeout(
            &program,
            &Self::artisan(&[command]),
            Some(self.app_root.as_path()),
            self.cache_timeout,
            "artisan_cache",
        )
        .await
    }
}
