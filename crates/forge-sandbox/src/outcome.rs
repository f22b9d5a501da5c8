//! Execution outcomes
//!
//! An [`ExecutionOutcome`] is the only thing the executor hands back. It can
//! only be built through the constructors below, which keep the failure
//! descriptor consistent with how the process ended.

use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Why a run did not succeed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    /// The environment could not run the candidate at all
    ExecutorSetup,
    /// The deadline watcher terminated the process
    Timeout,
    /// The memory poller terminated the process
    MemoryExceeded,
    /// The candidate ran and exited non-zero (or was signalled externally)
    Runtime,
}

impl FailureCategory {
    /// Whether the failure belongs to the machinery rather than the candidate
    #[inline]
    #[must_use]
    pub fn is_machinery(&self) -> bool {
        matches!(self, Self::ExecutorSetup)
    }

    /// Whether the executor itself killed the process
    #[inline]
    #[must_use]
    pub fn is_termination(&self) -> bool {
        matches!(self, Self::Timeout | Self::MemoryExceeded)
    }
}

/// Classified failure attached to an outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureDescriptor {
    /// Failure category
    pub category: FailureCategory,
    /// Diagnostic text (stderr for runtime failures)
    pub diagnostic: String,
}

impl FailureDescriptor {
    /// Stable label used for fingerprinting and reporting.
    ///
    /// Runtime failures are labelled with the exception class found on the
    /// last diagnostic line, e.g. `NameError` for
    /// `NameError: name 'x' is not defined`.
    #[must_use]
    pub fn label(&self) -> String {
        match self.category {
            FailureCategory::ExecutorSetup => "ExecutorSetupError".to_string(),
            FailureCategory::Timeout => "TimeoutError".to_string(),
            FailureCategory::MemoryExceeded => "MemoryError".to_string(),
            FailureCategory::Runtime => {
                exception_class(&self.diagnostic).unwrap_or_else(|| "Unknown".to_string())
            }
        }
    }
}

impl fmt::Display for FailureDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.label(), self.diagnostic)
    }
}

/// Extract the exception class from a traceback's final line.
fn exception_class(diagnostic: &str) -> Option<String> {
    let last = diagnostic.lines().rev().find(|l| !l.trim().is_empty())?.trim();
    let head = last.split(':').next()?.trim();
    // Dotted names like `json.decoder.JSONDecodeError` keep only the class.
    let class = head.rsplit('.').next()?;
    let valid = !class.is_empty()
        && class.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
        && class.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    valid.then(|| class.to_string())
}

/// Result of running one code unit
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionOutcome {
    stdout: String,
    stderr: String,
    exit_code: Option<i32>,
    failure: Option<FailureDescriptor>,
    #[serde(with = "duration_millis")]
    elapsed: Duration,
    pid: Option<u32>,
}

impl ExecutionOutcome {
    /// Process ran to completion on its own.
    ///
    /// `exit_code` of `None` means the process was killed by a signal that the
    /// executor did not send.
    #[must_use]
    pub fn completed(
        stdout: String,
        stderr: String,
        exit_code: Option<i32>,
        signal: Option<i32>,
        elapsed: Duration,
        pid: Option<u32>,
    ) -> Self {
        let failure = match exit_code {
            Some(0) => None,
            Some(_) => {
                let trimmed = stderr.trim();
                Some(FailureDescriptor {
                    category: FailureCategory::Runtime,
                    diagnostic: if trimmed.is_empty() {
                        "Unknown error".to_string()
                    } else {
                        trimmed.to_string()
                    },
                })
            }
            None => Some(FailureDescriptor {
                category: FailureCategory::Runtime,
                diagnostic: match signal {
                    Some(sig) => format!("ProcessKilled: terminated by signal {sig}"),
                    None => "ProcessKilled: terminated without exit status".to_string(),
                },
            }),
        };
        Self {
            stdout,
            stderr,
            exit_code,
            failure,
            elapsed,
            pid,
        }
    }

    /// Process was killed by one of the executor's watchers.
    ///
    /// # Panics
    /// Debug builds assert that `category` is a termination category.
    #[must_use]
    pub fn terminated(
        category: FailureCategory,
        diagnostic: String,
        stdout: String,
        stderr: String,
        exit_code: Option<i32>,
        elapsed: Duration,
        pid: Option<u32>,
    ) -> Self {
        debug_assert!(category.is_termination());
        Self {
            stdout,
            stderr,
            exit_code,
            failure: Some(FailureDescriptor {
                category,
                diagnostic,
            }),
            elapsed,
            pid,
        }
    }

    /// The executor could not set up or supervise the run.
    #[must_use]
    pub fn setup_failure(message: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
            failure: Some(FailureDescriptor {
                category: FailureCategory::ExecutorSetup,
                diagnostic: format!("ExecutorSetupError: {}", message.into()),
            }),
            elapsed,
            pid: None,
        }
    }

    /// Captured standard output
    #[inline]
    #[must_use]
    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    /// Captured standard error
    #[inline]
    #[must_use]
    pub fn stderr(&self) -> &str {
        &self.stderr
    }

    /// Exit code, if the process exited normally
    #[inline]
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// Failure descriptor, present iff the run did not succeed
    #[inline]
    #[must_use]
    pub fn failure(&self) -> Option<&FailureDescriptor> {
        self.failure.as_ref()
    }

    /// Wall-clock time spent in the executor
    #[inline]
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Pid of the child process, if one was spawned
    #[inline]
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Check if the run succeeded
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// Category of the failure, if any
    #[inline]
    #[must_use]
    pub fn category(&self) -> Option<FailureCategory> {
        self.failure.as_ref().map(|f| f.category)
    }
}

mod duration_millis {
    use serde::Serializer;
    use std::time::Duration;

    pub(super) fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }
}
