//! Controller phases and the iteration budget

use crate::error::ControllerError;
use serde::Serialize;
use std::fmt;

/// Phase of a project run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    /// Requirements and tests not yet frozen
    Negotiating,
    /// Actively iterating on candidates
    Coding,
    /// Every test case passed (terminal)
    Pass,
    /// Budget exhausted without passing (terminal)
    Failed,
}

impl Phase {
    /// Check if phase is terminal
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Pass | Self::Failed)
    }

    /// Upper-case name, as shown in reports
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Negotiating => "NEGOTIATING",
            Self::Coding => "CODING",
            Self::Pass => "PASS",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phases reachable from `from` in one step
#[must_use]
pub fn allowed_transitions(from: Phase) -> &'static [Phase] {
    match from {
        Phase::Negotiating => &[Phase::Coding],
        Phase::Coding => &[Phase::Pass, Phase::Failed],
        Phase::Pass | Phase::Failed => &[],
    }
}

/// Validates a phase transition.
///
/// # Errors
/// Returns [`ControllerError::IllegalTransition`] for anything not listed by
/// [`allowed_transitions`]
pub fn validate_transition(from: Phase, to: Phase) -> Result<(), ControllerError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(ControllerError::IllegalTransition { from, to })
    }
}

/// Shared cap on evaluation rounds.
///
/// Every evaluation round spends one slot, whether it was started by the
/// outer driver or by a successful micro-repair. Failed generation attempts
/// spend one too.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IterationBudget {
    limit: u32,
    spent: u32,
}

impl IterationBudget {
    /// Budget of `limit` slots
    #[inline]
    #[must_use]
    pub fn new(limit: u32) -> Self {
        Self { limit, spent: 0 }
    }

    /// Spend one slot; `false` if none remain
    #[inline]
    pub fn try_consume(&mut self) -> bool {
        if self.spent < self.limit {
            self.spent += 1;
            true
        } else {
            false
        }
    }

    /// Slots left
    #[inline]
    #[must_use]
    pub fn remaining(&self) -> u32 {
        self.limit - self.spent
    }

    /// Check if at least one slot is left
    #[inline]
    #[must_use]
    pub fn has_remaining(&self) -> bool {
        self.spent < self.limit
    }

    /// Slots spent so far
    #[inline]
    #[must_use]
    pub fn spent(&self) -> u32 {
        self.spent
    }

    /// Total slots
    #[inline]
    #[must_use]
    pub fn limit(&self) -> u32 {
        self.limit
    }
}
