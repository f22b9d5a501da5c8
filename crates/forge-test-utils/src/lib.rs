//! Testing utilities for the Forge workspace
//!
//! Scripted collaborators, canned outcomes and scratch projects.

#![allow(missing_docs)]

use forge_core::collaborators::{CodeGenerator, GenerationRequest, MicroRepairer, RepairAttempt};
use forge_core::error::CollaboratorError;
use forge_core::project::{ProjectLayout, SPEC_FILE_NAME};
use forge_core::ForgeConfig;
use forge_ledger::FailureRecord;
use forge_sandbox::{CodeExecutor, ExecutionOutcome, SandboxLimits};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

pub fn passing_outcome() -> ExecutionOutcome {
    ExecutionOutcome::completed(
        String::new(),
        String::new(),
        Some(0),
        None,
        Duration::from_millis(5),
        Some(4242),
    )
}

pub fn runtime_failure(stderr: &str) -> ExecutionOutcome {
    ExecutionOutcome::completed(
        String::new(),
        stderr.to_string(),
        Some(1),
        None,
        Duration::from_millis(5),
        Some(4242),
    )
}

pub fn name_error(name: &str) -> ExecutionOutcome {
    runtime_failure(&format!(
        "Traceback (most recent call last):\n  File \"<harness>\", line 9, in <module>\nNameError: name '{name}' is not defined"
    ))
}

pub fn assertion_error() -> ExecutionOutcome {
    runtime_failure(
        "Traceback (most recent call last):\n  File \"<harness>\", line 7, in test_add\nAssertionError",
    )
}

pub fn setup_failure() -> ExecutionOutcome {
    ExecutionOutcome::setup_failure("interpreter not found", Duration::ZERO)
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

type OutcomeFn = dyn Fn(&str) -> ExecutionOutcome + Send + Sync;

/// Executor whose outcome is decided by a closure over the harness program
pub struct ScriptedExecutor {
    decide: Box<OutcomeFn>,
    programs: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    pub fn new(decide: impl Fn(&str) -> ExecutionOutcome + Send + Sync + 'static) -> Self {
        Self {
            decide: Box::new(decide),
            programs: Mutex::new(Vec::new()),
        }
    }

    /// Every harness passes
    pub fn always_passing() -> Self {
        Self::new(|_| passing_outcome())
    }

    /// Passes when the harness contains `marker`, otherwise `failure`
    pub fn passing_when(
        marker: &'static str,
        failure: impl Fn() -> ExecutionOutcome + Send + Sync + 'static,
    ) -> Self {
        Self::new(move |program| {
            if program.contains(marker) {
                passing_outcome()
            } else {
                failure()
            }
        })
    }

    /// Harness programs executed so far
    pub fn programs(&self) -> Vec<String> {
        self.programs.lock().clone()
    }

    pub fn executions(&self) -> usize {
        self.programs.lock().len()
    }
}

#[async_trait::async_trait]
impl CodeExecutor for ScriptedExecutor {
    async fn execute(&self, code: &str, _limits: &SandboxLimits) -> ExecutionOutcome {
        self.programs.lock().push(code.to_string());
        (self.decide)(code)
    }
}

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// Generator that hands out queued responses, repeating the last one
pub struct ScriptedGenerator {
    responses: Mutex<VecDeque<Result<String, String>>>,
    last: Mutex<Option<Result<String, String>>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new<I, S>(candidates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_responses(candidates.into_iter().map(|c| Ok(c.into())))
    }

    /// `Err` responses become [`CollaboratorError::Other`]
    pub fn with_responses(responses: impl IntoIterator<Item = Result<String, String>>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            last: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Requests received so far
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait::async_trait]
impl CodeGenerator for ScriptedGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, CollaboratorError> {
        self.requests.lock().push(request.clone());
        let next = self.responses.lock().pop_front();
        let response = match next {
            Some(response) => {
                *self.last.lock() = Some(response.clone());
                response
            }
            None => self
                .last
                .lock()
                .clone()
                .unwrap_or_else(|| Err("no scripted response".to_string())),
        };
        response.map_err(CollaboratorError::Other)
    }
}

/// Repairer that hands out queued fixes; `None` declines
pub struct ScriptedRepairer {
    fixes: Mutex<VecDeque<Option<String>>>,
    seen: Mutex<Vec<FailureRecord>>,
}

impl ScriptedRepairer {
    pub fn new(fixes: impl IntoIterator<Item = Option<String>>) -> Self {
        Self {
            fixes: Mutex::new(fixes.into_iter().collect()),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Always returns `code`
    pub fn fixing_with(code: impl Into<String>) -> Self {
        Self::new([Some(code.into())])
    }

    /// Failures the repairer was asked about
    pub fn seen(&self) -> Vec<FailureRecord> {
        self.seen.lock().clone()
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().len()
    }
}

#[async_trait::async_trait]
impl MicroRepairer for ScriptedRepairer {
    async fn attempt_repair(
        &self,
        code: &str,
        failure: &FailureRecord,
    ) -> Result<RepairAttempt, CollaboratorError> {
        self.seen.lock().push(failure.clone());
        let mut fixes = self.fixes.lock();
        // The last fix sticks.
        let fix = if fixes.len() > 1 {
            fixes.pop_front().flatten()
        } else {
            fixes.front().cloned().flatten()
        };
        Ok(match fix {
            Some(fixed) => RepairAttempt::repaired(fixed),
            None => RepairAttempt::declined(code),
        })
    }
}

// ---------------------------------------------------------------------------
// Projects
// ---------------------------------------------------------------------------

/// Scratch project directory, removed on drop
pub struct TempProject {
    dir: TempDir,
}

impl TempProject {
    /// Project whose specification holds `tests` as fenced python blocks
    pub fn with_tests(tests: &[&str]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(SPEC_FILE_NAME), spec_markdown(tests)).unwrap();
        Self { dir }
    }

    pub fn layout(&self) -> ProjectLayout {
        ProjectLayout::new(self.dir.path())
    }

    pub fn read_candidate(&self) -> String {
        std::fs::read_to_string(self.layout().candidate_path()).unwrap()
    }

    pub fn read_report(&self) -> String {
        std::fs::read_to_string(self.layout().report_path()).unwrap()
    }
}

/// Specification markdown with one fenced python block per test
pub fn spec_markdown(tests: &[&str]) -> String {
    let mut out = String::from("# Calculator\n\nAdd and subtract integers.\n\n## Tests\n");
    for test in tests {
        out.push_str("\n```python\n");
        out.push_str(test.trim_end());
        out.push_str("\n```\n");
    }
    out
}

/// Configuration with `max_iterations` and fast limits
pub fn test_config(max_iterations: u32) -> ForgeConfig {
    ForgeConfig::default()
        .with_max_iterations(max_iterations)
        .with_timeout_sec(2)
        .with_max_memory_mb(128)
}

/// Whether `python3` can be spawned
pub fn python3_available() -> bool {
    std::process::Command::new("python3")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}
