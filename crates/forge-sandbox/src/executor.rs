//! Isolated executor
//!
//! Runs one self-contained code unit as a separate process inside a scoped
//! working directory, under a wall-clock deadline and a resident-memory
//! ceiling.
//!
//! # Enforcement
//!
//! Limits are advisory. The child is reniced, runs in its own
//! process group, with a restrictive umask; it is killed when a watcher
//! fires. None of this is a hardened sandbox and it must not be relied on to
//! contain hostile code.

use crate::limits::{SandboxConfig, SandboxLimits};
use crate::outcome::{ExecutionOutcome, FailureCategory};
use crate::umask::UmaskGuard;
use crate::watch::{deadline_watcher, kill_process_group, memory_poller, terminate, WatchVerdict};
use parking_lot::Mutex;
use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

/// Anything that can run a code unit and classify the result.
///
/// Implemented by [`Sandbox`]; tests substitute scripted executors.
#[async_trait::async_trait]
pub trait CodeExecutor: Send + Sync {
    /// Execute `code` under `limits`
    async fn execute(&self, code: &str, limits: &SandboxLimits) -> ExecutionOutcome;
}

/// Process-backed executor
#[derive(Debug, Clone, Default)]
pub struct Sandbox {
    config: SandboxConfig,
}

enum Race {
    Exited(io::Result<ExitStatus>),
    Watcher(WatchVerdict),
}

impl Sandbox {
    /// Create a new sandbox
    #[inline]
    #[must_use]
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    /// Get sandbox configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    fn scoped_dir(&self) -> io::Result<tempfile::TempDir> {
        let builder = {
            let mut b = tempfile::Builder::new();
            b.prefix("forge-exec-");
            b
        };
        match &self.config.work_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
    }

    fn spawn(&self, workdir: &Path) -> io::Result<Child> {
        let mut cmd = Command::new(&self.config.interpreter);
        cmd.arg(&self.config.script_name)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        cmd.spawn()
    }

    async fn supervise(
        &self,
        mut child: Child,
        limits: &SandboxLimits,
        workdir: &Path,
        started: Instant,
    ) -> ExecutionOutcome {
        let pid = child.id();
        if let (Some(increment), Some(pid)) = (self.config.nice_increment, pid) {
            tokio::spawn(deprioritize(pid, increment));
        }
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let race = tokio::select! {
            status = child.wait() => Race::Exited(status),
            verdict = deadline_watcher(limits.timeout) => Race::Watcher(verdict),
            verdict = memory_poller(pid, limits.memory_ceiling_mb, limits.poll_interval) => {
                Race::Watcher(verdict)
            }
        };

        match race {
            Race::Exited(Ok(status)) => {
                // Background processes the candidate left behind.
                if let Some(pid) = pid {
                    kill_process_group(pid);
                }
                let (stdout, stderr) = collect(stdout, stderr, limits.poll_interval).await;
                ExecutionOutcome::completed(
                    stdout,
                    scrub_workdir(stderr, workdir),
                    status.code(),
                    exit_signal(&status),
                    started.elapsed(),
                    pid,
                )
            }
            Race::Exited(Err(e)) => {
                terminate(&mut child).await;
                tracing::error!("Failed to wait for candidate process: {}", e);
                ExecutionOutcome::setup_failure(
                    format!("failed to wait for child: {e}"),
                    started.elapsed(),
                )
            }
            Race::Watcher(verdict) => {
                let status = terminate(&mut child).await;
                let (stdout, stderr) = collect(stdout, stderr, limits.poll_interval).await;
                let (category, diagnostic) = match verdict {
                    WatchVerdict::DeadlineElapsed(timeout) => {
                        tracing::warn!("Execution timed out, terminated process");
                        (
                            FailureCategory::Timeout,
                            format!(
                                "TimeoutError: execution exceeded {:.1}s",
                                timeout.as_secs_f64()
                            ),
                        )
                    }
                    WatchVerdict::MemoryExceeded {
                        observed_mb,
                        ceiling_mb,
                    } => {
                        tracing::warn!(
                            "Memory limit exceeded ({} MB > {} MB), terminated process",
                            observed_mb,
                            ceiling_mb
                        );
                        (
                            FailureCategory::MemoryExceeded,
                            format!("MemoryError: exceeded memory ceiling {ceiling_mb} MB"),
                        )
                    }
                };
                ExecutionOutcome::terminated(
                    category,
                    diagnostic,
                    stdout,
                    scrub_workdir(stderr, workdir),
                    status.and_then(|s| s.code()),
                    started.elapsed(),
                    pid,
                )
            }
        }
    }
}

#[async_trait::async_trait]
impl CodeExecutor for Sandbox {
    async fn execute(&self, code: &str, limits: &SandboxLimits) -> ExecutionOutcome {
        let started = Instant::now();
        if !limits.is_valid() {
            return ExecutionOutcome::setup_failure(
                format!("invalid limits: {limits:?}"),
                started.elapsed(),
            );
        }
        tracing::info!(
            "Starting sandbox execution with timeout {:?} and max memory {}MB",
            limits.timeout,
            limits.memory_ceiling_mb
        );

        // Removed when dropped, whichever way this function returns.
        let workdir = match self.scoped_dir() {
            Ok(dir) => dir,
            Err(e) => {
                tracing::error!("Failed to create scoped working directory: {}", e);
                return ExecutionOutcome::setup_failure(
                    format!("cannot create working directory: {e}"),
                    started.elapsed(),
                );
            }
        };

        let script = workdir.path().join(&self.config.script_name);
        if let Err(e) = tokio::fs::write(&script, code).await {
            tracing::error!("Failed to write candidate to {}: {}", script.display(), e);
            return ExecutionOutcome::setup_failure(
                format!("cannot write {}: {e}", script.display()),
                started.elapsed(),
            );
        }

        let spawned = {
            // The child inherits the mask at creation; nothing after needs it.
            let _umask = UmaskGuard::restrict(self.config.restrictive_umask);
            self.spawn(workdir.path())
        };
        let child = match spawned {
            Ok(child) => child,
            Err(e) => {
                tracing::error!("Failed to spawn {}: {}", self.config.interpreter, e);
                return ExecutionOutcome::setup_failure(
                    format!("cannot spawn {}: {e}", self.config.interpreter),
                    started.elapsed(),
                );
            }
        };

        let outcome = self.supervise(child, limits, workdir.path(), started).await;
        if let Some(failure) = outcome.failure() {
            tracing::debug!("Execution failed: {}", failure.label());
        }
        tracing::info!("Sandbox execution complete in {:?}", outcome.elapsed());
        outcome
    }
}

/// Lower the child's scheduling priority. Best effort, runs beside the child.
async fn deprioritize(pid: u32, increment: u8) {
    let result = Command::new("renice")
        .arg("-n")
        .arg(increment.to_string())
        .arg("-p")
        .arg(pid.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    match result {
        Ok(status) if status.success() => {}
        Ok(status) => tracing::debug!("renice exited with {}", status),
        Err(e) => tracing::debug!("renice unavailable: {}", e),
    }
}

type Captured = (Arc<Mutex<Vec<u8>>>, JoinHandle<()>);

/// Read a pipe to the end into a shared buffer.
///
/// The buffer is shared so that partial output survives if the reader has to
/// be abandoned (a grandchild may still hold the pipe open).
fn drain<R>(mut pipe: R) -> Captured
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let buffer = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&buffer);
    let handle = tokio::spawn(async move {
        let mut chunk = [0u8; 8192];
        loop {
            match pipe.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => sink.lock().extend_from_slice(&chunk[..n]),
            }
        }
    });
    (buffer, handle)
}

/// Wait up to `grace` in total for both readers to finish, then decode
/// lossily.
async fn collect(
    stdout: Option<Captured>,
    stderr: Option<Captured>,
    grace: Duration,
) -> (String, String) {
    let deadline = tokio::time::Instant::now() + grace;
    let stdout = finish_reader(stdout, deadline).await;
    let stderr = finish_reader(stderr, deadline).await;
    (stdout, stderr)
}

async fn finish_reader(captured: Option<Captured>, deadline: tokio::time::Instant) -> String {
    let Some((buffer, mut handle)) = captured else {
        return String::new();
    };
    if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
        tracing::debug!("Output pipe still open after exit, abandoning reader");
        handle.abort();
    }
    let bytes = std::mem::take(&mut *buffer.lock());
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Remove the scoped directory from interpreter output.
///
/// Tracebacks name the script by absolute path, and the scoped directory is
/// random per run; stripping it keeps identical failures byte-identical.
fn scrub_workdir(text: String, workdir: &Path) -> String {
    let mut prefixes = vec![format!("{}/", workdir.display())];
    if let Ok(canonical) = std::fs::canonicalize(workdir) {
        prefixes.push(format!("{}/", canonical.display()));
    }
    // Longest first: a canonical path may contain the raw one as a suffix.
    prefixes.sort_by_key(|p| std::cmp::Reverse(p.len()));
    prefixes.dedup();
    prefixes
        .iter()
        .fold(text, |acc, prefix| acc.replace(prefix.as_str(), ""))
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}
