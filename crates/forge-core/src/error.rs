//! Error types for Forge Core
//!
//! Failures of the candidate code are data and never appear here. These
//! enums cover the machinery:
//! - configuration loading
//! - test-suite extraction
//! - external collaborators (generator, repairer)
//! - the iteration controller itself

use crate::state::Phase;
use forge_ledger::LedgerError;
use std::path::PathBuf;

/// Controller error type
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    /// Phase change not permitted by the state machine
    #[error("illegal transition: {from} -> {to}")]
    IllegalTransition {
        /// Current phase
        from: Phase,
        /// Requested phase
        to: Phase,
    },

    /// Operation requires a different phase
    #[error("operation not allowed in phase {0}")]
    WrongPhase(Phase),

    /// Coding cannot start without test cases
    #[error("no test cases to verify against")]
    EmptySuite,

    /// Ledger read or write failed
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Test suite could not be built
    #[error("suite error: {0}")]
    Suite(#[from] SuiteError),

    /// Project file I/O failed
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

impl ControllerError {
    /// Whether the outer driver may continue with the next attempt
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Ledger(_) | Self::Io { .. })
    }
}

/// Test-suite extraction errors
#[derive(Debug, thiserror::Error)]
pub enum SuiteError {
    /// Source does not define a `test_` function
    #[error("no test function found in test case: {0}")]
    NoTestFunction(String),

    /// Python source could not be parsed
    #[error("cannot parse test source: {0}")]
    Parse(String),

    /// Reading the test source failed
    #[error("cannot read {path}: {source}")]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

/// Errors from external collaborators
#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    /// Collaborator process could not be started or talked to
    #[error("cannot run `{program}`: {source}")]
    Spawn {
        /// Program name
        program: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Collaborator exited unsuccessfully
    #[error("`{program}` exited with {status}: {stderr}")]
    Failed {
        /// Program name
        program: String,
        /// Exit status text
        status: String,
        /// Captured standard error
        stderr: String,
    },

    /// Collaborator did not answer in time
    #[error("`{program}` timed out after {duration_secs}s")]
    Timeout {
        /// Program name
        program: String,
        /// Timeout in seconds
        duration_secs: u64,
    },

    /// Collaborator produced no code
    #[error("empty response from `{0}`")]
    EmptyResponse(String),

    /// Request could not be encoded
    #[error("request encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),

    /// Any other collaborator failure
    #[error("{0}")]
    Other(String),
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Reading the config file failed
    #[error("cannot read config {path}: {source}")]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// YAML could not be decoded
    #[error("invalid config YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A value is out of range
    #[error("invalid config value `{field}`: {reason}")]
    Invalid {
        /// Offending field
        field: &'static str,
        /// Why it was rejected
        reason: String,
    },
}
