//! External collaborators
//!
//! The controller depends on two things it does not implement: a
//! [`CodeGenerator`] that proposes candidates and a [`MicroRepairer`] that
//! attempts narrow fixes. Both are traits; the command-backed adapters here
//! talk to any program that reads a JSON request on stdin and writes code on
//! stdout.

use crate::error::CollaboratorError;
use forge_ledger::{FailureRecord, LedgerEntry};
use serde::Serialize;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Sentinel a repairer prints to decline
pub const NO_FIX: &str = "NO_FIX";

/// Everything a generator is told about the run
#[derive(Debug, Clone, Serialize)]
pub struct GenerationRequest {
    /// Frozen specification text
    pub specification: String,
    /// Ledger entries so far
    pub history: Vec<LedgerEntry>,
    /// Whether the previous round saw a regression
    pub is_regression_round: bool,
    /// Iteration the candidate will be evaluated at
    pub iteration: u32,
}

/// Proposes candidate code
#[async_trait::async_trait]
pub trait CodeGenerator: Send + Sync {
    /// Produce a candidate for `request`
    async fn generate(&self, request: &GenerationRequest) -> Result<String, CollaboratorError>;
}

/// Result of a repair attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairAttempt {
    /// Candidate code after the attempt (unchanged when declined)
    pub code: String,
    /// Whether a fix is being proposed
    pub succeeded: bool,
}

impl RepairAttempt {
    /// Proposed fix
    #[inline]
    #[must_use]
    pub fn repaired(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            succeeded: true,
        }
    }

    /// No fix; keep `code`
    #[inline]
    #[must_use]
    pub fn declined(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            succeeded: false,
        }
    }
}

/// Attempts a narrow fix for a single trivial failure
#[async_trait::async_trait]
pub trait MicroRepairer: Send + Sync {
    /// Try to repair `code` given `failure`. Declining is not an error.
    async fn attempt_repair(
        &self,
        code: &str,
        failure: &FailureRecord,
    ) -> Result<RepairAttempt, CollaboratorError>;
}

/// Repairer that always declines
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRepair;

#[async_trait::async_trait]
impl MicroRepairer for NoRepair {
    async fn attempt_repair(
        &self,
        code: &str,
        _failure: &FailureRecord,
    ) -> Result<RepairAttempt, CollaboratorError> {
        Ok(RepairAttempt::declined(code))
    }
}

/// Generator backed by a shell command
///
/// The request is written to the command's stdin as JSON; stdout is the
/// candidate.
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    command: String,
    timeout: Duration,
}

impl CommandGenerator {
    /// Run `command` through `sh -c`, allowing `timeout` per call
    #[inline]
    #[must_use]
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
        }
    }
}

#[async_trait::async_trait]
impl CodeGenerator for CommandGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, CollaboratorError> {
        let input = serde_json::to_vec(request)?;
        let output = run_command(&self.command, &input, self.timeout).await?;
        let code = strip_code_fence(&output);
        if code.trim().is_empty() {
            return Err(CollaboratorError::EmptyResponse(self.command.clone()));
        }
        Ok(code.to_string())
    }
}

/// Repairer backed by a shell command
///
/// Receives `{"code": ..., "failure": ...}` as JSON on stdin. Printing
/// [`NO_FIX`] or nothing declines.
#[derive(Debug, Clone)]
pub struct CommandRepairer {
    command: String,
    timeout: Duration,
}

impl CommandRepairer {
    /// Run `command` through `sh -c`, allowing `timeout` per call
    #[inline]
    #[must_use]
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
        }
    }
}

#[derive(Serialize)]
struct RepairRequest<'a> {
    code: &'a str,
    failure: &'a FailureRecord,
}

#[async_trait::async_trait]
impl MicroRepairer for CommandRepairer {
    async fn attempt_repair(
        &self,
        code: &str,
        failure: &FailureRecord,
    ) -> Result<RepairAttempt, CollaboratorError> {
        let input = serde_json::to_vec(&RepairRequest { code, failure })?;
        let output = run_command(&self.command, &input, self.timeout).await?;
        let fixed = strip_code_fence(&output).trim();
        if fixed.is_empty() || fixed == NO_FIX {
            tracing::info!("Repairer declined");
            return Ok(RepairAttempt::declined(code));
        }
        Ok(RepairAttempt::repaired(fixed))
    }
}

/// Run `command` with `input` on stdin and return its stdout.
async fn run_command(
    command: &str,
    input: &[u8],
    timeout: Duration,
) -> Result<String, CollaboratorError> {
    let spawn_err = |source: std::io::Error| CollaboratorError::Spawn {
        program: command.to_string(),
        source,
    };
    let mut child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(spawn_err)?;

    if let Some(mut stdin) = child.stdin.take() {
        // A collaborator may exit without reading its input.
        if let Err(e) = stdin.write_all(input).await {
            tracing::debug!("Collaborator closed stdin early: {}", e);
        }
    }

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result.map_err(spawn_err)?,
        Err(_) => {
            return Err(CollaboratorError::Timeout {
                program: command.to_string(),
                duration_secs: timeout.as_secs(),
            })
        }
    };

    if !output.status.success() {
        return Err(CollaboratorError::Failed {
            program: command.to_string(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Body of a single fenced block if the whole output is one, else the output.
fn strip_code_fence(output: &str) -> &str {
    let trimmed = output.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return output;
    };
    let Some(body_start) = rest.find('\n') else {
        return output;
    };
    rest[body_start + 1..]
        .strip_suffix("```")
        .map_or(output, str::trim_end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_sandbox::ExecutionOutcome;

    fn name_error() -> FailureRecord {
        let outcome = ExecutionOutcome::completed(
            String::new(),
            "NameError: name 'subtrct' is not defined".into(),
            Some(1),
            None,
            Duration::ZERO,
            None,
        );
        FailureRecord::from_outcome(&outcome, "test_sub", "def test_sub():\n    subtract(1, 1)\n")
            .unwrap()
    }

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("```python\nx = 1\n```\n"), "x = 1");
        assert_eq!(strip_code_fence("x = 1\n"), "x = 1\n");
        assert_eq!(strip_code_fence("```python\nunterminated"), "```python\nunterminated");
    }

    #[tokio::test]
    async fn test_no_repair_declines() {
        let attempt = NoRepair.attempt_repair("x = 1", &name_error()).await.unwrap();
        assert_eq!(attempt, RepairAttempt::declined("x = 1"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_generator_reads_stdout() {
        let generator = CommandGenerator::new(
            "cat > /dev/null; printf 'def add(a, b):\\n    return a + b\\n'",
            Duration::from_secs(5),
        );
        let request = GenerationRequest {
            specification: "add numbers".into(),
            history: Vec::new(),
            is_regression_round: false,
            iteration: 1,
        };
        let code = generator.generate(&request).await.unwrap();
        assert!(code.starts_with("def add(a, b):"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_generator_failure_is_error() {
        let generator = CommandGenerator::new("echo boom >&2; exit 3", Duration::from_secs(5));
        let request = GenerationRequest {
            specification: String::new(),
            history: Vec::new(),
            is_regression_round: false,
            iteration: 1,
        };
        let err = generator.generate(&request).await.unwrap_err();
        assert!(matches!(err, CollaboratorError::Failed { ref stderr, .. } if stderr == "boom"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_generator_times_out() {
        let generator = CommandGenerator::new("sleep 5", Duration::from_millis(100));
        let request = GenerationRequest {
            specification: String::new(),
            history: Vec::new(),
            is_regression_round: false,
            iteration: 1,
        };
        assert!(matches!(
            generator.generate(&request).await,
            Err(CollaboratorError::Timeout { .. })
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_repairer_no_fix_sentinel() {
        let repairer = CommandRepairer::new("cat > /dev/null; echo NO_FIX", Duration::from_secs(5));
        let attempt = repairer.attempt_repair("x = 1", &name_error()).await.unwrap();
        assert!(!attempt.succeeded);
        assert_eq!(attempt.code, "x = 1");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_repairer_sees_failure_json() {
        // Echo back the failure label to prove the request reached the command.
        let repairer = CommandRepairer::new(
            "grep -o '\"label\":\"[A-Za-z]*\"' | head -n 1",
            Duration::from_secs(5),
        );
        let attempt = repairer.attempt_repair("x = 1", &name_error()).await.unwrap();
        assert!(attempt.succeeded);
        assert_eq!(attempt.code, "\"label\":\"NameError\"");
    }
}
