//! Iteration controller
//!
//! Drives a project through `NEGOTIATING -> CODING -> PASS | FAILED`.
//!
//! One evaluation round runs every test case against the candidate, records
//! failures in the ledger and, when exactly one trivial failure remains,
//! gives the repairer one shot before the next round. Rounds started by a
//! successful repair and rounds started by a new candidate draw from the same
//! [`IterationBudget`], so repair can never loop past the cap.

use crate::collaborators::{CodeGenerator, GenerationRequest, MicroRepairer};
use crate::config::ForgeConfig;
use crate::error::ControllerError;
use crate::project::ProjectLayout;
use crate::report::{CaseResult, RunReport};
use crate::state::{validate_transition, IterationBudget, Phase};
use crate::suite::TestSuite;
use forge_ledger::{FailureLedger, FailureRecord, Fingerprint};
use forge_sandbox::{CodeExecutor, FailureCategory, SandboxLimits};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

/// How one call to [`IterationController::run_iteration`] ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundOutcome {
    /// Every case passed; the controller is in `PASS`
    Passed {
        /// Iteration that passed
        iteration: u32,
    },
    /// Failures remain; a new candidate is needed
    NeedsRevision {
        /// Iteration of the last evaluated round
        iteration: u32,
        /// Failures of that round
        failures: Vec<FailureRecord>,
        /// Fingerprints among `failures` that had been fixed before
        regressions: Vec<Fingerprint>,
    },
    /// The executor could not run a case; nothing was recorded
    Aborted {
        /// Iteration that was aborted
        iteration: u32,
        /// Executor diagnostic
        reason: String,
    },
    /// No budget was left; the controller is in `FAILED`
    BudgetExhausted,
}

impl RoundOutcome {
    /// Check if the round passed
    #[inline]
    #[must_use]
    pub fn is_passed(&self) -> bool {
        matches!(self, Self::Passed { .. })
    }
}

/// Final verdict of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    /// All tests passed
    Pass,
    /// Budget exhausted
    Failed,
}

/// Result of [`IterationController::run`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunResult {
    /// Final verdict
    pub verdict: Verdict,
    /// Evaluation rounds performed
    pub iterations: u32,
    /// Budget slots consumed, including failed generations
    pub budget_spent: u32,
    /// Ledger store
    pub ledger_path: PathBuf,
    /// Report artifact
    pub report_path: PathBuf,
}

enum Evaluation {
    Completed(Vec<FailureRecord>),
    Aborted(String),
}

/// The generate -> verify -> repair state machine for one project
pub struct IterationController {
    layout: ProjectLayout,
    ledger: FailureLedger,
    executor: Arc<dyn CodeExecutor>,
    repairer: Arc<dyn MicroRepairer>,
    limits: SandboxLimits,
    phase: Phase,
    iteration: u32,
    budget: IterationBudget,
    candidate: Option<String>,
    suite: TestSuite,
    specification: String,
    last_cases: Vec<CaseResult>,
    last_regressions: Vec<FailureRecord>,
}

impl IterationController {
    /// Create a controller in `NEGOTIATING` with no specification or tests
    #[must_use]
    pub fn new(
        layout: ProjectLayout,
        config: &ForgeConfig,
        executor: Arc<dyn CodeExecutor>,
        repairer: Arc<dyn MicroRepairer>,
    ) -> Self {
        Self {
            ledger: layout.ledger(),
            layout,
            executor,
            repairer,
            limits: config.limits(),
            phase: Phase::Negotiating,
            iteration: 0,
            budget: IterationBudget::new(config.agent.max_iterations),
            candidate: None,
            suite: TestSuite::default(),
            specification: String::new(),
            last_cases: Vec::new(),
            last_regressions: Vec::new(),
        }
    }

    /// Create a controller and load the project's specification and tests.
    ///
    /// # Errors
    /// Returns error if the specification cannot be read or its test blocks
    /// are malformed
    pub async fn open(
        layout: ProjectLayout,
        config: &ForgeConfig,
        executor: Arc<dyn CodeExecutor>,
        repairer: Arc<dyn MicroRepairer>,
    ) -> Result<Self, ControllerError> {
        let spec = layout.read_spec().await?;
        let mut controller = Self::new(layout, config, executor, repairer);
        controller.replace_specification(spec)?;
        Ok(controller)
    }

    /// Current phase
    #[inline]
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Evaluation rounds performed
    #[inline]
    #[must_use]
    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    /// Shared budget
    #[inline]
    #[must_use]
    pub fn budget(&self) -> IterationBudget {
        self.budget
    }

    /// Candidate of the last round
    #[inline]
    #[must_use]
    pub fn candidate(&self) -> Option<&str> {
        self.candidate.as_deref()
    }

    /// Test cases
    #[inline]
    #[must_use]
    pub fn suite(&self) -> &TestSuite {
        &self.suite
    }

    /// Specification text
    #[inline]
    #[must_use]
    pub fn specification(&self) -> &str {
        &self.specification
    }

    /// Project layout
    #[inline]
    #[must_use]
    pub fn layout(&self) -> &ProjectLayout {
        &self.layout
    }

    /// Project ledger
    #[inline]
    #[must_use]
    pub fn ledger(&self) -> &FailureLedger {
        &self.ledger
    }

    /// Per-case results of the last completed round
    #[inline]
    #[must_use]
    pub fn last_cases(&self) -> &[CaseResult] {
        &self.last_cases
    }

    /// Replace the specification and re-extract its test cases.
    ///
    /// # Errors
    /// Returns [`ControllerError::WrongPhase`] once coding has started, or a
    /// suite error for malformed test blocks
    pub fn replace_specification(&mut self, specification: String) -> Result<(), ControllerError> {
        self.require_phase(Phase::Negotiating)?;
        self.suite = TestSuite::from_markdown(&specification)?;
        self.specification = specification;
        Ok(())
    }

    /// Replace the test cases.
    ///
    /// # Errors
    /// Returns [`ControllerError::WrongPhase`] once coding has started
    pub fn replace_test_cases(&mut self, suite: TestSuite) -> Result<(), ControllerError> {
        self.require_phase(Phase::Negotiating)?;
        self.suite = suite;
        Ok(())
    }

    /// Freeze tests and enter `CODING`.
    ///
    /// # Errors
    /// Returns error if there are no test cases or the phase is not
    /// `NEGOTIATING`
    pub fn begin_coding(&mut self) -> Result<(), ControllerError> {
        validate_transition(self.phase, Phase::Coding)?;
        if self.suite.is_empty() {
            return Err(ControllerError::EmptySuite);
        }
        self.transition(Phase::Coding)?;
        tracing::info!("Frozen {} test cases, budget {}", self.suite.len(), self.budget.limit());
        Ok(())
    }

    /// Evaluate `candidate`, repairing and re-evaluating while a single
    /// trivial failure is fixed by the repairer.
    ///
    /// # Errors
    /// Returns error if not in `CODING`, or if the ledger or candidate file
    /// cannot be written (the round is abandoned)
    pub async fn run_iteration(&mut self, candidate: String) -> Result<RoundOutcome, ControllerError> {
        self.require_phase(Phase::Coding)?;
        let mut candidate = candidate;

        loop {
            if !self.budget.try_consume() {
                tracing::error!("Iteration budget of {} exhausted", self.budget.limit());
                self.finish(Phase::Failed).await?;
                return Ok(RoundOutcome::BudgetExhausted);
            }
            self.iteration += 1;
            let iteration = self.iteration;
            tracing::info!(
                "Starting iteration {} ({} left in budget)",
                iteration,
                self.budget.remaining()
            );

            self.layout.write_candidate(&candidate).await?;
            self.candidate = Some(candidate.clone());

            let failures = match self.evaluate(&candidate).await {
                Evaluation::Completed(failures) => failures,
                Evaluation::Aborted(reason) => {
                    tracing::error!("Iteration {} aborted: {}", iteration, reason);
                    return Ok(RoundOutcome::Aborted { iteration, reason });
                }
            };

            if failures.is_empty() {
                tracing::info!("All tests passed at iteration {}", iteration);
                self.last_regressions.clear();
                self.finish(Phase::Pass).await?;
                return Ok(RoundOutcome::Passed { iteration });
            }

            let regressions = self
                .ledger
                .regressions(failures.iter().map(|f| &f.fingerprint))?;
            self.last_regressions = failures
                .iter()
                .filter(|f| regressions.contains(&f.fingerprint))
                .cloned()
                .collect();
            for regression in &self.last_regressions {
                tracing::error!(
                    "Regression {}: {}",
                    regression.fingerprint.short(),
                    regression.abstract_text
                );
            }

            let created = self.ledger.append_records(&failures, iteration)?;
            tracing::info!(
                "Iteration {}: {} failures, {} new ledger entries",
                iteration,
                failures.len(),
                created
            );

            if let Some(repaired) = self.try_micro_repair(&candidate, &failures).await {
                self.layout.write_candidate(&repaired).await?;
                self.ledger
                    .backfill_fixed(&failures[0].fingerprint, iteration)?;
                tracing::info!("Micro-repair applied, re-evaluating");
                candidate = repaired;
                continue;
            }

            tracing::info!("Iteration {} failed, awaiting a new candidate", iteration);
            return Ok(RoundOutcome::NeedsRevision {
                iteration,
                failures,
                regressions,
            });
        }
    }

    /// Ask `generator` for candidates until a round passes or the budget
    /// runs out.
    ///
    /// # Errors
    /// Returns error if not in `CODING`, or on an unrecoverable controller
    /// error
    pub async fn run(&mut self, generator: &dyn CodeGenerator) -> Result<RunResult, ControllerError> {
        self.require_phase(Phase::Coding)?;

        while self.phase == Phase::Coding && self.budget.has_remaining() {
            let request = self.generation_request();
            let candidate = match generator.generate(&request).await {
                Ok(code) => code,
                Err(e) => {
                    tracing::error!("Code generation failed: {}", e);
                    self.budget.try_consume();
                    continue;
                }
            };
            match self.run_iteration(candidate).await {
                Ok(outcome) if outcome.is_passed() => break,
                Ok(_) => {}
                Err(e) if e.is_recoverable() => {
                    tracing::error!("Iteration abandoned: {}", e);
                }
                Err(e) => return Err(e),
            }
        }

        if self.phase == Phase::Coding {
            tracing::error!(
                "Budget exhausted after {} iterations without passing",
                self.iteration
            );
            self.finish(Phase::Failed).await?;
        }
        Ok(self.result())
    }

    /// Snapshot of the run for reporting
    #[must_use]
    pub fn report(&self) -> RunReport {
        let open_failures = match self.ledger.open_entries() {
            Ok(entries) => entries.len(),
            Err(e) => {
                tracing::warn!("Cannot read ledger for report: {}", e);
                0
            }
        };
        RunReport {
            project: self.layout.root().to_path_buf(),
            phase: self.phase,
            iterations: self.iteration,
            budget_spent: self.budget.spent(),
            budget_limit: self.budget.limit(),
            cases: self.last_cases.clone(),
            regressions: self
                .last_regressions
                .iter()
                .map(|r| r.abstract_text.clone())
                .collect(),
            open_failures,
        }
    }

    /// Run result; the verdict is `FAILED` unless the phase is `PASS`
    #[must_use]
    pub fn result(&self) -> RunResult {
        RunResult {
            verdict: if self.phase == Phase::Pass {
                Verdict::Pass
            } else {
                Verdict::Failed
            },
            iterations: self.iteration,
            budget_spent: self.budget.spent(),
            ledger_path: self.ledger.path().to_path_buf(),
            report_path: self.layout.report_path(),
        }
    }

    async fn evaluate(&mut self, candidate: &str) -> Evaluation {
        let mut failures = Vec::new();
        let mut cases = Vec::with_capacity(self.suite.len());

        for case in &self.suite {
            let harness = case.harness(candidate);
            let outcome = self.executor.execute(&harness, &self.limits).await;
            if outcome.category() == Some(FailureCategory::ExecutorSetup) {
                let reason = outcome
                    .failure()
                    .map(|f| f.diagnostic.clone())
                    .unwrap_or_default();
                return Evaluation::Aborted(reason);
            }

            let record = FailureRecord::from_outcome(&outcome, case.name(), &case.adjusted_source());
            match &record {
                Some(r) => tracing::debug!("{} failed: {}", case.name(), r.abstract_text),
                None => tracing::debug!("{} passed", case.name()),
            }
            cases.push(CaseResult {
                test_name: case.name().to_string(),
                passed: record.is_none(),
                label: record.as_ref().map(|r| r.label.clone()),
                summary: record.as_ref().map(|r| r.abstract_text.clone()),
                elapsed: outcome.elapsed(),
            });
            failures.extend(record);
        }

        self.last_cases = cases;
        Evaluation::Completed(failures)
    }

    async fn try_micro_repair(&self, candidate: &str, failures: &[FailureRecord]) -> Option<String> {
        let [failure] = failures else {
            return None;
        };
        let kind = failure.trivial_kind()?;
        if !self.budget.has_remaining() {
            tracing::info!("No budget left to re-evaluate a repair, skipping");
            return None;
        }

        tracing::info!("Attempting micro-repair ({:?}) for {}", kind, failure.test_name);
        match self.repairer.attempt_repair(candidate, failure).await {
            Ok(attempt) if attempt.succeeded && attempt.code.trim() != candidate.trim() => {
                Some(attempt.code)
            }
            Ok(_) => {
                tracing::info!("Repairer offered no fix");
                None
            }
            Err(e) => {
                tracing::warn!("Micro-repair failed: {}", e);
                None
            }
        }
    }

    fn generation_request(&self) -> GenerationRequest {
        let history = self.ledger.entries().unwrap_or_else(|e| {
            tracing::warn!("Cannot read ledger history: {}", e);
            Vec::new()
        });
        GenerationRequest {
            specification: self.specification.clone(),
            history,
            is_regression_round: !self.last_regressions.is_empty(),
            iteration: self.iteration + 1,
        }
    }

    fn require_phase(&self, expected: Phase) -> Result<(), ControllerError> {
        if self.phase == expected {
            Ok(())
        } else {
            Err(ControllerError::WrongPhase(self.phase))
        }
    }

    fn transition(&mut self, to: Phase) -> Result<(), ControllerError> {
        validate_transition(self.phase, to)?;
        tracing::info!("Transitioned {} -> {}", self.phase, to);
        self.phase = to;
        Ok(())
    }

    async fn finish(&mut self, to: Phase) -> Result<(), ControllerError> {
        self.transition(to)?;
        let path = self.layout.report_path();
        if let Err(e) = self.report().write_to(&path).await {
            tracing::error!("Failed to write report {}: {}", path.display(), e);
        }
        Ok(())
    }
}

impl std::fmt::Debug for IterationController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IterationController")
            .field("project", &self.layout.root())
            .field("phase", &self.phase)
            .field("iteration", &self.iteration)
            .field("budget", &self.budget)
            .field("cases", &self.suite.len())
            .finish_non_exhaustive()
    }
}
