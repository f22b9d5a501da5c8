//! Verification report
//!
//! Plain-text summary written to `verification_report.txt` when a run ends.

use crate::state::Phase;
use serde::Serialize;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Result of one test case in the last evaluated round
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaseResult {
    /// Test function name
    pub test_name: String,
    /// Whether the case passed
    pub passed: bool,
    /// Failure label, when failed
    pub label: Option<String>,
    /// Failure abstract, when failed
    pub summary: Option<String>,
    /// Time spent executing
    #[serde(serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

/// Final state of a run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Project root
    pub project: PathBuf,
    /// Final phase
    pub phase: Phase,
    /// Evaluation rounds performed
    pub iterations: u32,
    /// Budget slots consumed
    pub budget_spent: u32,
    /// Budget limit
    pub budget_limit: u32,
    /// Per-case results of the last round
    pub cases: Vec<CaseResult>,
    /// Abstracts of regressions seen in the last round
    pub regressions: Vec<String>,
    /// Ledger entries still open
    pub open_failures: usize,
}

impl RunReport {
    /// Number of passing cases
    #[must_use]
    pub fn passed_count(&self) -> usize {
        self.cases.iter().filter(|c| c.passed).count()
    }

    /// Render as plain text
    #[must_use]
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "=== Forge Verification Report ===\n");
        let _ = writeln!(out, "Project: {}", self.project.display());
        let _ = writeln!(out, "Iterations: {}", self.iterations);
        let _ = writeln!(out, "Budget: {} of {} spent", self.budget_spent, self.budget_limit);
        let _ = writeln!(
            out,
            "Test cases: {} passed, {} failed",
            self.passed_count(),
            self.cases.len() - self.passed_count()
        );
        let _ = writeln!(out, "Open ledger entries: {}", self.open_failures);

        if !self.cases.is_empty() {
            let _ = writeln!(out, "\n=== Test Cases ===");
            for case in &self.cases {
                let status = if case.passed { "PASS" } else { "FAIL" };
                let _ = write!(
                    out,
                    "[{status}] {} ({} ms)",
                    case.test_name,
                    case.elapsed.as_millis()
                );
                if let Some(summary) = &case.summary {
                    let _ = write!(out, " - {summary}");
                }
                out.push('\n');
            }
        }

        if !self.regressions.is_empty() {
            let _ = writeln!(out, "\n=== Regressions ===");
            for (i, r) in self.regressions.iter().enumerate() {
                let _ = writeln!(out, "{}. {r}", i + 1);
            }
        }

        let _ = writeln!(out, "\n=== Result: {} ===", self.phase);
        out
    }

    /// Write the rendered report to `path`.
    ///
    /// # Errors
    /// Returns error if the file cannot be written
    pub async fn write_to(&self, path: &Path) -> std::io::Result<()> {
        tokio::fs::write(path, self.render_text()).await
    }
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(phase: Phase) -> RunReport {
        RunReport {
            project: PathBuf::from("/tmp/calc"),
            phase,
            iterations: 2,
            budget_spent: 3,
            budget_limit: 10,
            cases: vec![
                CaseResult {
                    test_name: "test_add".into(),
                    passed: true,
                    label: None,
                    summary: None,
                    elapsed: Duration::from_millis(12),
                },
                CaseResult {
                    test_name: "test_sub".into(),
                    passed: false,
                    label: Some("NameError".into()),
                    summary: Some("NameError in test_sub: NameError: name 'subtract' is not defined".into()),
                    elapsed: Duration::from_millis(9),
                },
            ],
            regressions: vec!["NameError in test_sub".into()],
            open_failures: 1,
        }
    }

    #[test]
    fn test_render_lists_each_case() {
        let text = report(Phase::Failed).render_text();
        assert!(text.contains("Iterations: 2\n"));
        assert!(text.contains("Budget: 3 of 10 spent"));
        assert!(text.contains("1 passed, 1 failed"));
        assert!(text.contains("[PASS] test_add (12 ms)"));
        assert!(text.contains("[FAIL] test_sub (9 ms) - NameError in test_sub"));
        assert!(text.contains("=== Regressions ===\n1. NameError in test_sub"));
        assert!(text.trim_end().ends_with("=== Result: FAILED ==="));
    }

    #[tokio::test]
    async fn test_write_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("verification_report.txt");
        report(Phase::Pass).write_to(&path).await.unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.contains("Result: PASS"));
    }
}
