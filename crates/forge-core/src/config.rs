//! Forge configuration
//!
//! Loaded once from YAML and passed explicitly to the executor and the
//! controller:
//!
//! ```yaml
//! sandbox:
//!   timeout_sec: 10
//!   max_memory_mb: 512
//!   poll_interval_ms: 100
//!   interpreter: python3
//!   nice_increment: 10
//!   restrictive_umask: true
//! agent:
//!   max_iterations: 10
//!   log_level: info
//!   generator_timeout_sec: 300
//! ```
//!
//! Every field is optional.

use crate::error::ConfigError;
use forge_sandbox::limits::{
    DEFAULT_MEMORY_CEILING_MB, DEFAULT_POLL_INTERVAL, DEFAULT_TIMEOUT,
};
use forge_sandbox::{SandboxConfig, SandboxLimits};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ForgeConfig {
    /// Executor settings
    pub sandbox: SandboxSettings,
    /// Controller settings
    pub agent: AgentSettings,
}

/// Executor settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxSettings {
    /// Wall-clock limit per execution, in seconds
    pub timeout_sec: u64,
    /// Resident memory ceiling, in megabytes
    pub max_memory_mb: u64,
    /// Watcher poll interval, in milliseconds
    pub poll_interval_ms: u64,
    /// Interpreter used to run candidates
    pub interpreter: String,
    /// Scheduling priority increment (`None` disables renicing)
    pub nice_increment: Option<u8>,
    /// Install a `0o077` umask during execution
    pub restrictive_umask: bool,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            timeout_sec: DEFAULT_TIMEOUT.as_secs(),
            max_memory_mb: DEFAULT_MEMORY_CEILING_MB,
            poll_interval_ms: u64::try_from(DEFAULT_POLL_INTERVAL.as_millis()).unwrap_or(100),
            interpreter: "python3".to_string(),
            nice_increment: Some(10),
            restrictive_umask: true,
        }
    }
}

/// Controller settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    /// Evaluation rounds allowed per run
    pub max_iterations: u32,
    /// Default log filter when `RUST_LOG` is unset
    pub log_level: String,
    /// Time allowed for one generator or repairer call, in seconds
    pub generator_timeout_sec: u64,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            log_level: "info".to_string(),
            generator_timeout_sec: 300,
        }
    }
}

impl ForgeConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a YAML file; a missing file yields defaults.
    ///
    /// # Errors
    /// Returns error if the file cannot be read, is not valid YAML, or holds
    /// out-of-range values
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!("Config {} not found, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        Self::from_yaml_str(&text)
    }

    /// Parse and validate YAML text.
    ///
    /// # Errors
    /// Returns error on malformed YAML or out-of-range values
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] naming the first bad field
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field, reason: &str| {
            Err(ConfigError::Invalid {
                field,
                reason: reason.to_string(),
            })
        };
        if self.sandbox.timeout_sec == 0 {
            return invalid("sandbox.timeout_sec", "must be positive");
        }
        if self.sandbox.max_memory_mb == 0 {
            return invalid("sandbox.max_memory_mb", "must be positive");
        }
        if self.sandbox.poll_interval_ms == 0 || self.sandbox.poll_interval_ms >= 1000 {
            return invalid("sandbox.poll_interval_ms", "must be between 1 and 999");
        }
        if self.sandbox.interpreter.trim().is_empty() {
            return invalid("sandbox.interpreter", "must not be empty");
        }
        if self.agent.max_iterations == 0 {
            return invalid("agent.max_iterations", "must be positive");
        }
        if self.agent.generator_timeout_sec == 0 {
            return invalid("agent.generator_timeout_sec", "must be positive");
        }
        Ok(())
    }

    /// Per-execution limits
    #[must_use]
    pub fn limits(&self) -> SandboxLimits {
        SandboxLimits::new(
            Duration::from_secs(self.sandbox.timeout_sec),
            self.sandbox.max_memory_mb,
        )
        .with_poll_interval(Duration::from_millis(self.sandbox.poll_interval_ms))
    }

    /// Executor configuration
    #[must_use]
    pub fn sandbox_config(&self) -> SandboxConfig {
        SandboxConfig::new()
            .with_interpreter(self.sandbox.interpreter.clone())
            .with_nice_increment(self.sandbox.nice_increment)
            .with_restrictive_umask(self.sandbox.restrictive_umask)
    }

    /// Collaborator timeout
    #[inline]
    #[must_use]
    pub fn generator_timeout(&self) -> Duration {
        Duration::from_secs(self.agent.generator_timeout_sec)
    }

    /// With execution timeout
    #[inline]
    #[must_use]
    pub fn with_timeout_sec(mut self, secs: u64) -> Self {
        self.sandbox.timeout_sec = secs;
        self
    }

    /// With memory ceiling
    #[inline]
    #[must_use]
    pub fn with_max_memory_mb(mut self, mb: u64) -> Self {
        self.sandbox.max_memory_mb = mb;
        self
    }

    /// With interpreter
    #[inline]
    #[must_use]
    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.sandbox.interpreter = interpreter.into();
        self
    }

    /// With iteration budget
    #[inline]
    #[must_use]
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.agent.max_iterations = max;
        self
    }

    /// With log level
    #[inline]
    #[must_use]
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.agent.log_level = level.into();
        self
    }
}
