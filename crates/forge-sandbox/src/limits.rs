//! Per-execution ceilings and executor settings
//!
//! Limits are passed into every `execute` call. Nothing here is read from
//! process-wide state.

use std::path::PathBuf;
use std::time::Duration;

/// Default wall-clock ceiling
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
/// Default resident memory ceiling in megabytes
pub const DEFAULT_MEMORY_CEILING_MB: u64 = 512;
/// Default watcher poll interval
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Ceilings enforced on a single execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SandboxLimits {
    /// Wall-clock deadline
    pub timeout: Duration,
    /// Resident set ceiling in megabytes
    pub memory_ceiling_mb: u64,
    /// How often the memory poller samples the child
    pub poll_interval: Duration,
}

impl SandboxLimits {
    /// Create limits with the default poll interval
    #[inline]
    #[must_use]
    pub fn new(timeout: Duration, memory_ceiling_mb: u64) -> Self {
        Self {
            timeout,
            memory_ceiling_mb,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// With poll interval
    #[inline]
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Check that every ceiling is positive
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.timeout.is_zero() && self.memory_ceiling_mb > 0 && !self.poll_interval.is_zero()
    }
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT, DEFAULT_MEMORY_CEILING_MB)
    }
}

/// How the executor launches candidates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxConfig {
    /// Interpreter used to run the candidate file
    pub interpreter: String,
    /// File name the candidate is written to inside the scoped directory
    pub script_name: String,
    /// Niceness added to the child; `None` runs at normal priority
    pub nice_increment: Option<u8>,
    /// Install a `0o077` umask for the duration of each call
    pub restrictive_umask: bool,
    /// Parent directory for scoped working directories (system temp if unset)
    pub work_root: Option<PathBuf>,
}

impl SandboxConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With interpreter
    #[inline]
    #[must_use]
    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = interpreter.into();
        self
    }

    /// With niceness increment
    #[inline]
    #[must_use]
    pub fn with_nice_increment(mut self, increment: Option<u8>) -> Self {
        self.nice_increment = increment;
        self
    }

    /// With work root
    #[inline]
    #[must_use]
    pub fn with_work_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.work_root = Some(root.into());
        self
    }

    /// With or without the restrictive umask
    #[inline]
    #[must_use]
    pub fn with_restrictive_umask(mut self, enabled: bool) -> Self {
        self.restrictive_umask = enabled;
        self
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            interpreter: "python3".to_string(),
            script_name: "candidate.py".to_string(),
            nice_increment: Some(10),
            restrictive_umask: true,
            work_root: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits_are_valid() {
        assert!(SandboxLimits::default().is_valid());
    }

    #[test]
    fn test_zero_ceilings_are_invalid() {
        assert!(!SandboxLimits::new(Duration::ZERO, 256).is_valid());
        assert!(!SandboxLimits::new(Duration::from_secs(1), 0).is_valid());
        assert!(!SandboxLimits::default()
            .with_poll_interval(Duration::ZERO)
            .is_valid());
    }
}
