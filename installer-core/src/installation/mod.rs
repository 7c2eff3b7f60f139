// Installation plumbing
//
// External command execution with timeouts/retries, and the filesystem layout of the
// application being installed.
//
// IMPORTANT:
// - Never log secrets (passwords, generated keys).
// - All I/O is async.

pub mod files;
pub mod layout;

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use std::path::Path;
use std::process::Stdio;
use std::time::Instant;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::time::{timeout, Duration};
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u128,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Last non-empty line of stderr (or stdout), for outcome details.
    pub fn diagnostic_tail(&self) -> String {
        let pick = |s: &str| {
            s.lines()
                .rev()
                .map(str::trim)
                .find(|l| !l.is_empty())
                .map(str::to_string)
        };
        pick(&self.stderr)
            .or_else(|| pick(&self.stdout))
            .unwrap_or_default()
    }
}

fn mask_arg_for_log(arg: &str) -> String {
    let lower = arg.to_ascii_lowercase();
    if lower.contains("password")
        || lower.contains("secret")
        || lower.contains("token")
        || lower.contains("key=")
    {
        return "***".to_string();
    }
    if arg.contains("://") {
        return crate::utils::logging::mask_dsn(arg);
    }
    if arg.len() > 48 {
        return crate::utils::logging::mask_sensitive(arg);
    }
    arg.to_string()
}

fn is_transient_exec_error(e: &anyhow::Error) -> bool {
    let msg = e.to_string().to_ascii_lowercase();
    msg.contains("temporarily")
        || msg.contains("resource busy")
        || msg.contains("text file busy")
        || msg.contains("interrupted")
}

/// Run a command once. Returns captured output even when the exit code is non-zero.
pub async fn run_cmd_with_timeout_once(
    program: &str,
    args: &[String],
    cwd: Option<&Path>,
    timeout_dur: Duration,
    operation: &str,
) -> Result<CommandOutput> {
    let started = Instant::now();

    debug!(
        "[PHASE: installation] [STEP: cmd] run_cmd_with_timeout_once entered (operation={}, program={}, args=[{}], timeout_ms={})",
        operation,
        program,
        args.iter().map(|a| mask_arg_for_log(a)).collect::<Vec<_>>().join(", "),
        timeout_dur.as_millis()
    );

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    let mut child = cmd.spawn().with_context(|| {
        format!(
            "Failed to spawn command '{}' (operation={})",
            program, operation
        )
    })?;

    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow::anyhow!("Failed to capture stdout (operation={})", operation))?;
    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow::anyhow!("Failed to capture stderr (operation={})", operation))?;

    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stdout.read_to_end(&mut buf).await?;
        Ok::<String, std::io::Error>(String::from_utf8_lossy(&buf).to_string())
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stderr.read_to_end(&mut buf).await?;
        Ok::<String, std::io::Error>(String::from_utf8_lossy(&buf).to_string())
    });

    let status = match timeout(timeout_dur, child.wait()).await {
        Ok(Ok(s)) => s,
        Ok(Err(e)) => {
            return Err(anyhow::Error::new(e)).with_context(|| {
                format!(
                    "Command wait failed (operation={}, program={})",
                    operation, program
                )
            });
        }
        Err(_) => {
            warn!(
                "[PHASE: installation] [STEP: cmd] Timeout reached (operation={}, program={}, timeout_ms={}); killing process",
                operation,
                program,
                timeout_dur.as_millis()
            );
            if let Err(e) = child.kill().await {
                warn!(
                    "[PHASE: installation] [STEP: cmd] Failed to kill timed-out process (operation={}, program={}): {}",
                    operation, program, e
                );
            }
            let _ = timeout(Duration::from_secs(5), child.wait()).await;
            stdout_task.abort();
            stderr_task.abort();

            return Err(anyhow::anyhow!(
                "Command timed out after {}ms (operation={}, program={})",
                timeout_dur.as_millis(),
                operation,
                program
            ));
        }
    };

    let stdout_str = stdout_task
        .await
        .context("stdout join failed")?
        .context("stdout read failed")?;
    let stderr_str = stderr_task
        .await
        .context("stderr join failed")?
        .context("stderr read failed")?;

    let out = CommandOutput {
        exit_code: status.code(),
        stdout: stdout_str,
        stderr: stderr_str,
        duration_ms: started.elapsed().as_millis(),
    };

    debug!(
        "[PHASE: installation] [STEP: cmd] run_cmd_with_timeout_once exit (operation={}, program={}, exit_code={:?}, duration_ms={}, stdout_len={}, stderr_len={})",
        operation,
        program,
        out.exit_code,
        out.duration_ms,
        out.stdout.len(),
        out.stderr.len()
    );

    Ok(out)
}

/// Run a command with a timeout and up to 3 retries for transient spawn/exec failures.
///
/// A non-zero exit code is not retried; the caller decides what it means.
pub async fn run_cmd_with_timeout(
    program: &str,
    args: &[String],
    cwd: Option<&Path>,
    timeout_dur: Duration,
    operation: &str,
) -> Result<CommandOutput> {
    let started = Instant::now();
    info!(
        "[PHASE: installation] [STEP: cmd] run_cmd_with_timeout entered (operation={}, program={}, args_count={}, timeout_ms={})",
        operation,
        program,
        args.len(),
        timeout_dur.as_millis()
    );

    let attempt = || run_cmd_with_timeout_once(program, args, cwd, timeout_dur, operation);

    let retry_strategy = ExponentialBackoff::from_millis(200)
        .factor(2)
        .max_delay(Duration::from_secs(2))
        .take(3)
        .map(jitter);

    let result = RetryIf::spawn(retry_strategy, attempt, |e: &anyhow::Error| {
        let transient = is_transient_exec_error(e);
        if transient {
            warn!(
                "[PHASE: installation] [STEP: cmd] Transient command failure; will retry (operation={}, program={}, err={})",
                operation, program, e
            );
        }
        transient
    })
    .await;

    match &result {
        Ok(out) => info!(
            "[PHASE: installation] [STEP: cmd] run_cmd_with_timeout exit (operation={}, program={}, exit_code={:?}, duration_ms={})",
            operation,
            program,
            out.exit_code,
            started.elapsed().as_millis()
        ),
        Err(e) => error!(
            "[PHASE: installation] [STEP: cmd] run_cmd_with_timeout error (operation={}, program={}, duration_ms={}, err={:#})",
            operation,
            program,
            started.elapsed().as_millis(),
            e
        ),
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_arg_for_log_redacts_secretish_values() {
        assert_eq!(mask_arg_for_log("--password=PASSWORD_SHOULD_BE_REDACTED"), "***");
        assert_eq!(mask_arg_for_log("APP_KEY=base64:abc"), "***");
        assert_eq!(mask_arg_for_log("migrate"), "migrate");
        assert!(!mask_arg_for_log("mysql://root:pw@localhost/db").contains("pw@"));
    }

    #[test]
    fn diagnostic_tail_prefers_stderr() {
        let out = CommandOutput {
            exit_code: Some(1),
            stdout: "line one\nline two\n".into(),
            stderr: "\nSQLSTATE[HY000] connection refused\n\n".into(),
            duration_ms: 1,
        };
        assert_eq!(out.diagnostic_tail(), "SQLSTATE[HY000] connection refused");
        assert!(!out.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_cmd_captures_output_in_cwd() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("marker.txt"), "x").unwrap();
        let out = run_cmd_with_timeout(
            "sh",
            &["-c".to_string(), "ls; echo done".to_string()],
            Some(tmp.path()),
            Duration::from_secs(5),
            "test_ls",
        )
        .await
        .unwrap();
        assert!(out.success());
        assert!(out.stdout.contains("marker.txt"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_cmd_times_out_and_reports_it() {
        let started = Instant::now();
        let res = run_cmd_with_timeout_once(
            "sh",
            &["-c".to_string(), "sleep 10".to_string()],
            None,
            Duration::from_millis(200),
            "test_sleep",
        )
        .await;
        assert!(started.elapsed() < Duration::from_secs(5));
        let err = res.unwrap_err().to_string();
        assert!(err.contains("timed out"), "{}", err);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_returned_not_raised() {
        let out = run_cmd_with_timeout(
            "sh",
            &["-c".to_string(), "echo boom >&2; exit 3".to_string()],
            None,
            Duration::from_secs(5),
            "test_exit",
        )
        .await
        .unwrap();
        assert_eq!(out.exit_code, Some(3));
        assert_eq!(out.diagnostic_tail(), "boom");
    }
}
