//! Filesystem helpers used by finalization.
//!
//! - Async I/O only (tokio)
//! - Retry transient lock/busy errors, bounded by a per-operation timeout
//! - Writes are atomic (temp file + rename) so a crash never leaves a half-written artifact

use anyhow::{Context, Result};
use log::{debug, warn};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio::time::{timeout, Duration};

const FS_OP_TIMEOUT: Duration = Duration::from_secs(30);
const FS_ATTEMPTS: u32 = 3;

pub fn is_transient_fs_error(e: &anyhow::Error) -> bool {
    let msg = format!("{:#}", e).to_ascii_lowercase();
    msg.contains("resource busy")
        || msg.contains("temporarily")
        || msg.contains("text file busy")
        || msg.contains("interrupted")
        || msg.contains("timed out")
}

async fn with_fs_retries<T, F, Fut>(label: &str, target: &Path, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let started = Instant::now();
    let mut last_err: Option<anyhow::Error> = None;

    for attempt in 1..=FS_ATTEMPTS {
        match timeout(FS_OP_TIMEOUT, op()).await {
            Ok(Ok(v)) => {
                debug!(
                    "[PHASE: installation] [STEP: files] {} ok (target={:?}, attempt={}, duration_ms={})",
                    label,
                    target,
                    attempt,
                    started.elapsed().as_millis()
                );
                return Ok(v);
            }
            Ok(Err(e)) => {
                let transient = is_transient_fs_error(&e);
                warn!(
                    "[PHASE: installation] [STEP: files] {} failed (target={:?}, attempt={}, transient={}, err={:#})",
                    label, target, attempt, transient, e
                );
                last_err = Some(e);
                if !transient {
                    break;
                }
            }
            Err(_) => {
                warn!(
                    "[PHASE: installation] [STEP: files] {} timed out (target={:?}, attempt={})",
                    label, target, attempt
                );
                last_err = Some(anyhow::anyhow!(
                    "{} timed out after {}s",
                    label,
                    FS_OP_TIMEOUT.as_secs()
                ));
            }
        }

        if attempt < FS_ATTEMPTS {
            let backoff_ms = 100_u64.saturating_mul(1_u64 << (attempt - 1));
            tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("{} failed", label)))
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "artifact".to_string());
    path.with_file_name(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4().simple()))
}

async fn write_atomic_once(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp = temp_sibling(path);
    let result = async {
        let mut f = tokio::fs::File::create(&tmp)
            .await
            .with_context(|| format!("create failed: {:?}", tmp))?;
        f.write_all(contents).await?;
        f.flush().await?;
        f.sync_all().await?;
        drop(f);
        tokio::fs::rename(&tmp, path)
            .await
            .with_context(|| format!("rename failed: {:?} -> {:?}", tmp, path))?;
        Ok::<(), anyhow::Error>(())
    }
    .await;
    if result.is_err() {
        let _ = tokio::fs::remove_file(&tmp).await;
    }
    result
}

/// Atomically replace `path` with `contents`. The parent directory must exist.
pub async fn write_file_with_retries(path: &Path, contents: &[u8], label: &str) -> Result<()> {
    with_fs_retries(label, path, || write_atomic_once(path, contents)).await
}

pub async fn ensure_dir_with_retries(path: &Path, label: &str) -> Result<()> {
    with_fs_retries(label, path, move || async move {
        tokio::fs::create_dir_all(path)
            .await
            .with_context(|| format!("create_dir_all failed: {:?}", path))
    })
    .await
}

/// Set unix permission bits. No-op elsewhere.
pub async fn set_mode_with_retries(path: &Path, mode: u32, label: &str) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        with_fs_retries(label, path, move || async move {
            tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
                .await
                .with_context(|| format!("chmod {:o} failed: {:?}", mode, path))
        })
        .await
    }
    #[cfg(not(unix))]
    {
        let _ = (mode, label);
        debug!(
            "[PHASE: installation] [STEP: files] permission bits not applicable on this platform ({:?})",
            path
        );
        Ok(())
    }
}

/// Whether a file can be created inside `dir` right now (probe file is removed again).
pub async fn probe_writable(dir: &Path) -> Result<()> {
    let probe = dir.join(format!(".install-probe-{}", uuid::Uuid::new_v4().simple()));
    tokio::fs::write(&probe, b"probe")
        .await
        .with_context(|| format!("{:?} is not writable", dir))?;
    tokio::fs::remove_file(&probe)
        .await
        .with_context(|| format!("failed to remove probe file {:?}", probe))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn atomic_write_replaces_contents_without_leftovers() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join(".env");
        write_file_with_retries(&target, b"A=1\n", "write_test").await.unwrap();
        write_file_with_retries(&target, b"A=2\n", "write_test").await.unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "A=2\n");
        let entries: Vec<_> = std::fs::read_dir(tmp.path()).unwrap().collect();
        assert_eq!(entries.len(), 1, "temp files must not be left behind");
    }

    #[tokio::test]
    async fn write_into_missing_directory_fails_without_retrying_forever() {
        let tmp = tempfile::tempdir().unwrap();
        let started = Instant::now();
        let res = write_file_with_retries(&tmp.path().join("missing").join(".env"), b"x", "w").await;
        assert!(res.is_err());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn set_mode_applies_bits() {
        use std::os::unix::fs::PermissionsExt;
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("storage");
        ensure_dir_with_retries(&dir, "mkdir").await.unwrap();
        set_mode_with_retries(&dir, 0o755, "chmod").await.unwrap();
        let mode = std::fs::metadata(&dir).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o755);
    }

    #[tokio::test]
    async fn probe_writable_leaves_directory_clean() {
        let tmp = tempfile::tempdir().unwrap();
        probe_writable(tmp.path()).await.unwrap();
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
        assert!(probe_writable(&tmp.path().join("nope")).await.is_err());
    }

    #[test]
    fn transient_classification() {
        assert!(is_transient_fs_error(&anyhow::anyhow!("Resource busy (os error 16)")));
        assert!(!is_transient_fs_error(&anyhow::anyhow!("No such file or directory")));
    }
}
