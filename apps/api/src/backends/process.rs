//! Bounded external-process invocation shared by the CLI adapters.

use std::io::ErrorKind;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use crate::backends::BackendError;

const VERSION_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Captured output of a process that exited zero.
#[derive(Debug)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Spawns `binary args...`, waits at most `limit`, and returns its output.
///
/// The child is spawned with `kill_on_drop`, so it is terminated on every exit
/// path: timeout, error, or the calling future being dropped by cancellation.
pub async fn run_bounded(
    backend: &str,
    binary: &str,
    args: &[&str],
    limit: Duration,
) -> Result<ProcessOutput, BackendError> {
    let child = Command::new(binary)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| spawn_error(backend, binary, e))?;

    debug!("Spawned {binary} for backend {backend} (pid {:?})", child.id());

    // On timeout the `wait_with_output` future is dropped, which drops the child
    // and kills it.
    let output = match timeout(limit, child.wait_with_output()).await {
        Ok(result) => result.map_err(|e| BackendError::Process {
            code: None,
            stderr: format!("failed to collect output from {binary}: {e}"),
        })?,
        Err(_) => return Err(BackendError::Timeout(limit)),
    };

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if !output.status.success() {
        let stderr = if stderr.trim().is_empty() {
            "Unknown error".to_string()
        } else {
            stderr.trim().to_string()
        };
        return Err(BackendError::Process {
            code: output.status.code(),
            stderr,
        });
    }

    Ok(ProcessOutput { stdout, stderr })
}

/// `binary --version` exits zero within the check bound.
pub async fn check_version(backend: &str, binary: &str) -> bool {
    match run_bounded(backend, binary, &["--version"], VERSION_CHECK_TIMEOUT).await {
        Ok(_) => true,
        Err(e) => {
            debug!("Version check for backend {backend} failed: {e}");
            false
        }
    }
}

fn spawn_error(backend: &str, binary: &str, error: std::io::Error) -> BackendError {
    let reason = match error.kind() {
        ErrorKind::NotFound => format!("command '{binary}' not found; is the CLI installed?"),
        ErrorKind::PermissionDenied => format!("command '{binary}' is not executable"),
        _ => format!("failed to start '{binary}': {error}"),
    };
    BackendError::Unavailable {
        backend: backend.to_string(),
        reason,
    }
}
