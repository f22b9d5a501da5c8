//! Forge Core - iteration controller
//!
//! Drives a project from a frozen specification to passing code:
//!
//! 1. **Negotiating**: specification and test cases may still change
//! 2. **Coding**: tests are frozen; candidates are evaluated in the sandbox,
//!    failures go to the ledger, single trivial failures get one micro-repair
//! 3. **Pass / Failed**: terminal; a report is written
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use forge_core::prelude::*;
//! use std::sync::Arc;
//!
//! let config = ForgeConfig::load("calc/forge.yaml")?;
//! let executor = Arc::new(Sandbox::new(config.sandbox_config()));
//! let mut controller =
//!     IterationController::open(ProjectLayout::new("calc"), &config, executor, Arc::new(NoRepair))
//!         .await?;
//! controller.begin_coding()?;
//! let result = controller.run(&generator).await?;
//! ```

pub mod collaborators;
pub mod config;
pub mod controller;
pub mod error;
pub mod project;
pub mod report;
pub mod state;
pub mod suite;
pub mod telemetry;

pub use collaborators::{
    CodeGenerator, CommandGenerator, CommandRepairer, GenerationRequest, MicroRepairer, NoRepair,
    RepairAttempt, NO_FIX,
};
pub use config::{AgentSettings, ForgeConfig, SandboxSettings};
pub use controller::{IterationController, RoundOutcome, RunResult, Verdict};
pub use error::{CollaboratorError, ConfigError, ControllerError, SuiteError};
pub use project::ProjectLayout;
pub use report::{CaseResult, RunReport};
pub use state::{IterationBudget, Phase};
pub use suite::{TestCase, TestSuite};

/// Re-export common types for convenience
pub mod prelude {
    pub use crate::collaborators::{CodeGenerator, MicroRepairer, NoRepair, RepairAttempt};
    pub use crate::config::ForgeConfig;
    pub use crate::controller::{IterationController, RoundOutcome, RunResult, Verdict};
    pub use crate::error::ControllerError;
    pub use crate::project::ProjectLayout;
    pub use crate::state::Phase;
    pub use crate::suite::{TestCase, TestSuite};
    pub use forge_sandbox::{CodeExecutor, ExecutionOutcome, Sandbox, SandboxLimits};
}
