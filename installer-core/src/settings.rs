// Layered installer settings: built-in defaults, then `installer.toml`, then `INSTALLER_*`
// environment variables (lists are comma separated).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_SETTINGS_FILE: &str = "installer.toml";
const ENV_PREFIX: &str = "INSTALLER";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallerSettings {
    /// Root of the application being installed.
    pub app_root: PathBuf,
    /// Configuration artifact file name, relative to `app_root`.
    pub artifact_name: String,
    pub state_dir: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
    pub php_binary: String,
    pub min_php_version: String,
    pub required_extensions: Vec<String>,
    /// Directories (relative to `app_root`) that must be writable before step 1 passes.
    pub writable_dirs: Vec<String>,
    /// Directories (relative to `app_root`) chmod-ed during finalization.
    pub permission_dirs: Vec<String>,
    pub db_probe_timeout_secs: u64,
    pub db_probe_retries: u32,
    pub migration_timeout_secs: u64,
    pub cache_timeout_secs: u64,
}

impl Default for InstallerSettings {
    fn default() -> Self {
        Self {
            app_root: PathBuf::from("."),
            artifact_name: ".env".to_string(),
            state_dir: None,
            log_dir: None,
            php_binary: "php".to_string(),
            min_php_version: "8.1.0".to_string(),
            required_extensions: [
                "openssl", "pdo", "mbstring", "tokenizer", "xml", "ctype", "json", "bcmath",
                "fileinfo", "gd", "curl",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            writable_dirs: vec!["storage".to_string(), "bootstrap/cache".to_string()],
            permission_dirs: [
                "storage",
                "bootstrap/cache",
                "storage/app",
                "storage/framework",
                "storage/logs",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            db_probe_timeout_secs: 10,
            db_probe_retries: 3,
            migration_timeout_secs: 300,
            cache_timeout_secs: 60,
        }
    }
}

impl InstallerSettings {
    /// Load settings. `file` defaults to `installer.toml` in the working directory; a missing
    /// file is not an error.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let file = file
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_FILE));
        Self::load_from(&file, true)
    }

    fn load_from(file: &Path, with_env: bool) -> Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::File::from(file).required(false));
        if with_env {
            builder = builder.add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("required_extensions")
                    .with_list_parse_key("writable_dirs")
                    .with_list_parse_key("permission_dirs"),
            );
        }
        let settings: InstallerSettings = builder
            .build()
            .with_context(|| format!("Failed to read installer settings from {:?}", file))?
            .try_deserialize()
            .context("Invalid installer settings")?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.artifact_name.trim().is_empty()
            || self.artifact_name.contains('/')
            || self.artifact_name.contains('\\')
        {
            anyhow::bail!("artifact_name must be a plain file name");
        }
        if crate::preflight::parse_version(&self.min_php_version).is_none() {
            anyhow::bail!("min_php_version is not a version: {}", self.min_php_version);
        }
        if self.db_probe_timeout_secs == 0 || self.db_probe_retries == 0 {
            anyhow::bail!("db_probe_timeout_secs and db_probe_retries must be positive");
        }
        Ok(())
    }

    pub fn db_probe_timeout(&self) -> Duration {
        Duration::from_secs(self.db_probe_timeout_secs)
    }

    pub fn migration_timeout(&self) -> Duration {
        Duration::from_secs(self.migration_timeout_secs)
    }

    pub fn cache_timeout(&self) -> Duration {
        Duration::from_secs(self.cache_timeout_secs)
    }
}
