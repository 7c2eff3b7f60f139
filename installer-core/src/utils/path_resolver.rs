use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

const LOG_FOLDER_NAME: &str = "installer";
const STATE_FOLDER_NAME: &str = "waslne-installer";

/// Resolve deployment folder (absolute path)
pub fn resolve_deployment_folder() -> PathBuf {
    // Prefer the folder where the binary is running from
    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(dir) = exe_path.parent() {
            return dir.to_path_buf();
        }
    }

    // Fallback: current working directory
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

/// Resolve the application root the wizard installs into (absolute path).
pub fn resolve_app_root(configured: &Path) -> Result<PathBuf> {
    let root = if configured.is_absolute() {
        configured.to_path_buf()
    } else {
        std::env::current_dir()
            .context("Failed to resolve current directory")?
            .join(configured)
    };
    root.canonicalize()
        .with_context(|| format!("Application root not found: {:?}", root))
}

/// Resolve log folder (absolute path) and create it.
///
/// Order: explicit setting, then `<app_root>/storage/logs/installer/` when the application
/// already has a storage tree, then `installer_logs/` next to the binary.
pub fn resolve_log_folder(configured: Option<&Path>, app_root: &Path) -> Result<PathBuf> {
    let dir = match configured {
        Some(p) => p.to_path_buf(),
        None => {
            let storage_logs = app_root.join("storage").join("logs");
            if storage_logs.is_dir() {
                storage_logs.join(LOG_FOLDER_NAME)
            } else {
                resolve_deployment_folder().join("installer_logs")
            }
        }
    };
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create log folder: {:?}", dir))?;
    Ok(dir)
}

/// Resolve the folder holding durable per-attempt wizard state (step data, master key).
pub fn resolve_state_folder(configured: Option<&Path>, app_root: &Path) -> Result<PathBuf> {
    let dir = match configured {
        Some(p) => p.to_path_buf(),
        None => match dirs::data_local_dir() {
            Some(base) => base.join(STATE_FOLDER_NAME),
            None => app_root.join("storage").join(STATE_FOLDER_NAME),
        },
    };
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create state folder: {:?}", dir))?;
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_log_folder_is_created() {
        let tmp = tempfile::tempdir().unwrap();
        let wanted = tmp.path().join("a").join("b");
        let got = resolve_log_folder(Some(&wanted), tmp.path()).unwrap();
        assert_eq!(got, wanted);
        assert!(wanted.is_dir());
    }

    #[test]
    fn log_folder_prefers_app_storage_logs() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("storage").join("logs")).unwrap();
        let got = resolve_log_folder(None, tmp.path()).unwrap();
        assert_eq!(got, tmp.path().join("storage").join("logs").join("installer"));
    }

    #[test]
    fn app_root_must_exist() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(resolve_app_root(&tmp.path().join("missing")).is_err());
        assert!(resolve_app_root(tmp.path()).is_ok());
    }
}
