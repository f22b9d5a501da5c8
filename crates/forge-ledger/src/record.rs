//! Per-run failure records

use crate::fingerprint::{fingerprint, Fingerprint};
use forge_sandbox::{ExecutionOutcome, FailureCategory};
use serde::Serialize;

/// Maximum length of an abstract, in characters
pub const ABSTRACT_MAX_CHARS: usize = 100;

/// A failure observed while running one test case
///
/// Only built from a failing outcome, so every field is populated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
    /// Failure fingerprint
    pub fingerprint: Fingerprint,
    /// Human-readable one-line summary
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    /// Offending test-case source
    pub case: String,
    /// Name of the failing test function
    pub test_name: String,
    /// Failure category
    pub category: FailureCategory,
    /// Stable failure label (`NameError`, `TimeoutError`, ...)
    pub label: String,
    /// Raw diagnostic text
    pub diagnostic: String,
}

impl FailureRecord {
    /// Build a record from an outcome, or `None` if the run succeeded.
    ///
    /// `case` is the test-case source the failure is attributed to; it is the
    /// code whose structure goes into the fingerprint.
    #[must_use]
    pub fn from_outcome(outcome: &ExecutionOutcome, test_name: &str, case: &str) -> Option<Self> {
        let failure = outcome.failure()?;
        let label = failure.label();
        let fingerprint = fingerprint(&label, &failure.diagnostic, case);
        let abstract_text = abstract_for(&label, test_name, &failure.diagnostic);
        Some(Self {
            fingerprint,
            abstract_text,
            case: case.to_string(),
            test_name: test_name.to_string(),
            category: failure.category,
            label,
            diagnostic: failure.diagnostic.clone(),
        })
    }

    /// Trivial failure kind, if the diagnostic matches one
    #[inline]
    #[must_use]
    pub fn trivial_kind(&self) -> Option<TrivialKind> {
        TrivialKind::classify(&self.diagnostic)
    }
}

/// Failure shapes simple enough for automatic micro-repair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrivialKind {
    /// `SyntaxError`
    MalformedSyntax,
    /// `IndentationError`
    MalformedIndentation,
    /// `NameError`
    UndefinedReference,
}

impl TrivialKind {
    /// Classify a diagnostic, case-insensitively
    #[must_use]
    pub fn classify(diagnostic: &str) -> Option<Self> {
        let lower = diagnostic.to_ascii_lowercase();
        if lower.contains("indentationerror") {
            Some(Self::MalformedIndentation)
        } else if lower.contains("syntaxerror") {
            Some(Self::MalformedSyntax)
        } else if lower.contains("nameerror") {
            Some(Self::UndefinedReference)
        } else {
            None
        }
    }
}

/// `"<label> in <test>: <summary line>"`, truncated to [`ABSTRACT_MAX_CHARS`].
fn abstract_for(label: &str, test_name: &str, diagnostic: &str) -> String {
    let full = format!("{label} in {test_name}: {}", summary_line(diagnostic));
    full.chars().take(ABSTRACT_MAX_CHARS).collect()
}

/// The exception line of a traceback: the last non-empty, non-indented line.
/// Falls back to the first non-empty line.
fn summary_line(diagnostic: &str) -> &str {
    let mut lines = diagnostic.lines().filter(|l| !l.trim().is_empty());
    diagnostic
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty() && !l.starts_with(char::is_whitespace))
        .or_else(|| lines.next())
        .map_or("", str::trim)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    const CASE: &str = "def test_sub():\n    assert subtract(3, 1) == 2\n";

    fn runtime_failure(stderr: &str) -> ExecutionOutcome {
        ExecutionOutcome::completed(
            String::new(),
            stderr.to_string(),
            Some(1),
            None,
            Duration::ZERO,
            None,
        )
    }

    #[test]
    fn test_passing_outcome_yields_no_record() {
        let ok = ExecutionOutcome::completed(
            "ok\n".into(),
            String::new(),
            Some(0),
            None,
            Duration::ZERO,
            None,
        );
        assert!(FailureRecord::from_outcome(&ok, "test_sub", CASE).is_none());
    }

    #[test]
    fn test_record_from_name_error() {
        let outcome = runtime_failure(
            "Traceback (most recent call last):\n  File \"candidate.py\", line 9, in <module>\n    test_sub()\nNameError: name 'subtract' is not defined\n",
        );
        let record = FailureRecord::from_outcome(&outcome, "test_sub", CASE).unwrap();
        assert_eq!(record.label, "NameError");
        assert_eq!(
            record.abstract_text,
            "NameError in test_sub: NameError: name 'subtract' is not defined"
        );
        assert_eq!(record.case, CASE);
        assert_eq!(record.category, FailureCategory::Runtime);
        assert_eq!(record.trivial_kind(), Some(TrivialKind::UndefinedReference));
    }

    #[test]
    fn test_abstract_is_truncated() {
        let long = format!("ValueError: {}", "x".repeat(300));
        let record =
            FailureRecord::from_outcome(&runtime_failure(&long), "test_sub", CASE).unwrap();
        assert_eq!(record.abstract_text.chars().count(), ABSTRACT_MAX_CHARS);
        assert!(record.abstract_text.starts_with("ValueError in test_sub: ValueError: xxx"));
    }

    #[test]
    fn test_same_failure_same_fingerprint() {
        let stderr = "AssertionError\n";
        let a = FailureRecord::from_outcome(&runtime_failure(stderr), "test_sub", CASE).unwrap();
        let b = FailureRecord::from_outcome(&runtime_failure(stderr), "test_sub", CASE).unwrap();
        assert_eq!(a.fingerprint, b.fingerprint);
    }

    #[test]
    fn test_trivial_kind_classification() {
        assert_eq!(
            TrivialKind::classify("  File \"x\"\nIndentationError: unexpected indent"),
            Some(TrivialKind::MalformedIndentation)
        );
        assert_eq!(
            TrivialKind::classify("syntaxerror: invalid syntax"),
            Some(TrivialKind::MalformedSyntax)
        );
        assert_eq!(TrivialKind::classify("NAMEERROR"), Some(TrivialKind::UndefinedReference));
        assert_eq!(TrivialKind::classify("TypeError: bad operand"), None);
        assert_eq!(TrivialKind::classify("TimeoutError: execution exceeded 1.0s"), None);
    }

    #[test]
    fn test_summary_line_prefers_exception_line() {
        assert_eq!(summary_line("single line"), "single line");
        assert_eq!(summary_line("    only indented\n"), "only indented");
        assert_eq!(summary_line(""), "");
    }
}
