//! Supervisory routines that race the child process
//!
//! Both watchers are plain futures. The executor polls them alongside the
//! child's exit inside one `select!`, so whichever completes first is the
//! only one whose verdict is used.

use std::time::Duration;
use tokio::process::Child;

/// Why a watcher fired
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WatchVerdict {
    /// Deadline elapsed
    DeadlineElapsed(Duration),
    /// Resident memory exceeded the ceiling (observed MB, ceiling MB)
    MemoryExceeded {
        /// Observed resident set in megabytes
        observed_mb: u64,
        /// Configured ceiling in megabytes
        ceiling_mb: u64,
    },
}

/// Resolve once `timeout` has elapsed.
pub async fn deadline_watcher(timeout: Duration) -> WatchVerdict {
    tokio::time::sleep(timeout).await;
    WatchVerdict::DeadlineElapsed(timeout)
}

/// Resolve once the process's resident set exceeds `ceiling_mb`.
///
/// Samples every `interval`. If the usage cannot be read (process gone, or no
/// procfs on this platform) the poller keeps waiting and the child's own exit
/// wins the race.
pub async fn memory_poller(pid: Option<u32>, ceiling_mb: u64, interval: Duration) -> WatchVerdict {
    let Some(pid) = pid else {
        return std::future::pending().await;
    };
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if let Some(observed_mb) = resident_set_mb(pid) {
            if observed_mb > ceiling_mb {
                return WatchVerdict::MemoryExceeded {
                    observed_mb,
                    ceiling_mb,
                };
            }
        }
    }
}

/// Resident set size of `pid` in megabytes, read from `/proc/<pid>/status`.
#[cfg(target_os = "linux")]
#[must_use]
pub fn resident_set_mb(pid: u32) -> Option<u64> {
    let status = std::fs::read_to_string(format!("/proc/{pid}/status")).ok()?;
    parse_vm_rss_kb(&status).map(|kb| kb / 1024)
}

/// Resident set size is only sampled where procfs is available.
#[cfg(not(target_os = "linux"))]
#[must_use]
pub fn resident_set_mb(_pid: u32) -> Option<u64> {
    None
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_vm_rss_kb(status: &str) -> Option<u64> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("VmRSS:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|kb| kb.parse().ok())
}

/// Kill the child and everything in its process group, then reap it.
///
/// Idempotent: on an already-exited (or already-reaped) child this only
/// returns the recorded status. "No such process" is never an error.
pub async fn terminate(child: &mut Child) -> Option<std::process::ExitStatus> {
    match child.try_wait() {
        Ok(Some(status)) => return Some(status),
        Ok(None) => {}
        Err(e) => {
            tracing::debug!("try_wait before terminate failed: {}", e);
        }
    }

    if let Some(pid) = child.id() {
        kill_process_group(pid);
    }

    if let Err(e) = child.start_kill() {
        tracing::debug!("start_kill ignored: {}", e);
    }

    match child.wait().await {
        Ok(status) => Some(status),
        Err(e) => {
            tracing::warn!("Failed to reap terminated child: {}", e);
            None
        }
    }
}

/// SIGKILL every process in the group led by `pgid`.
///
/// The child is spawned as a group leader, so this also reaches anything it
/// forked. An empty group is not an error.
pub fn kill_process_group(pgid: u32) {
    #[cfg(unix)]
    if let Ok(raw) = i32::try_from(pgid) {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;
        match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
            Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
            Err(e) => tracing::debug!("killpg({}) failed: {}", pgid, e),
        }
    }
    #[cfg(not(unix))]
    let _ = pgid;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_vm_rss() {
        let status = "Name:\tpython3\nVmPeak:\t  20000 kB\nVmRSS:\t   10240 kB\nThreads:\t1\n";
        assert_eq!(parse_vm_rss_kb(status), Some(10240));
        assert_eq!(parse_vm_rss_kb("Name:\tzombie\n"), None);
    }

    #[tokio::test]
    async fn test_deadline_watcher_reports_timeout() {
        let verdict = deadline_watcher(Duration::from_millis(10)).await;
        assert_eq!(verdict, WatchVerdict::DeadlineElapsed(Duration::from_millis(10)));
    }

    #[tokio::test]
    async fn test_memory_poller_without_pid_never_fires() {
        let poll = memory_poller(None, 1, Duration::from_millis(5));
        let raced = tokio::time::timeout(Duration::from_millis(50), poll).await;
        assert!(raced.is_err());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_memory_poller_fires_on_tiny_ceiling() {
        // Our own test process is certainly above 0 MB resident.
        let pid = std::process::id();
        let verdict = memory_poller(Some(pid), 0, Duration::from_millis(5)).await;
        assert!(matches!(verdict, WatchVerdict::MemoryExceeded { ceiling_mb: 0, .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_is_idempotent_on_exited_child() {
        let mut child = tokio::process::Command::new("true")
            .spawn()
            .expect("spawn true");
        let first = child.wait().await.expect("wait");
        let second = terminate(&mut child).await;
        let third = terminate(&mut child).await;
        assert_eq!(second, Some(first));
        assert_eq!(third, Some(first));
    }
}
