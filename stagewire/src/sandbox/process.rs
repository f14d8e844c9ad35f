//! Running `.command.sh` under a deadline and the run's cancellation token.

use super::{SCRIPT_FILE, STDERR_FILE, STDOUT_FILE};
use crate::cancellation::CancellationToken;
use crate::errors::ExecutionError;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// Runs `<shell> .command.sh` inside `work_dir`.
///
/// Standard output and error go to `.command.out` and `.command.err`. The
/// shell leads its own process group, and the whole group is killed when
/// `timeout` elapses or `token` is cancelled.
///
/// # Errors
///
/// `Spawn`, `Timeout`, `Cancelled`, or `NonZeroExit` carrying the last
/// `tail_lines` lines of standard error.
pub async fn run_script(
    shell: &str,
    work_dir: &Path,
    timeout: Option<Duration>,
    tail_lines: usize,
    token: &CancellationToken,
) -> Result<(), ExecutionError> {
    let stdout = tokio::fs::File::create(work_dir.join(STDOUT_FILE))
        .await?
        .into_std()
        .await;
    let stderr = tokio::fs::File::create(work_dir.join(STDERR_FILE))
        .await?
        .into_std()
        .await;

    let mut command = Command::new(shell);
    command
        .arg(SCRIPT_FILE)
        .current_dir(work_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr))
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);

    let mut child = command.spawn().map_err(|err| ExecutionError::Spawn {
        message: format!("'{shell}': {err}"),
    })?;
    debug!(work_dir = %work_dir.display(), pid = ?child.id(), "Spawned stage process");

    let deadline = async {
        match timeout {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending().await,
        }
    };

    let status = tokio::select! {
        status = child.wait() => status?,
        () = deadline => {
            kill(&mut child).await;
            return Err(ExecutionError::Timeout {
                millis: timeout.map_or(0, |t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX)),
            });
        }
        () = token.cancelled() => {
            kill(&mut child).await;
            return Err(ExecutionError::Cancelled {
                reason: token.reason().unwrap_or_default(),
            });
        }
    };

    if status.success() {
        Ok(())
    } else {
        Err(ExecutionError::NonZeroExit {
            code: status.code().unwrap_or(-1),
            stderr_tail: stderr_tail(&work_dir.join(STDERR_FILE), tail_lines).await,
        })
    }
}

/// Kills the shell's process group, then reaps the shell.
async fn kill(child: &mut Child) {
    kill_group(child);
    if let Err(err) = child.kill().await {
        warn!(error = %err, "Failed to kill stage process");
    }
}

#[cfg(unix)]
fn kill_group(child: &Child) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    if let Err(err) = killpg(Pid::from_raw(pid), Signal::SIGKILL) {
        warn!(pid, error = %err, "Failed to kill stage process group");
    }
}

#[cfg(not(unix))]
fn kill_group(_child: &Child) {}

/// The last `lines` lines of a log file; empty if unreadable.
pub async fn stderr_tail(path: &Path, lines: usize) -> String {
    let Ok(bytes) = tokio::fs::read(path).await else {
        return String::new();
    };
    let text = String::from_utf8_lossy(&bytes);
    let all: Vec<&str> = text.lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}
