//! Forge Sandbox - isolated executor for generated code
//!
//! Runs one code unit per call as a child process under a wall-clock deadline
//! and a resident-memory ceiling, and returns a classified
//! [`ExecutionOutcome`].
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use forge_sandbox::prelude::*;
//! use std::time::Duration;
//!
//! let sandbox = Sandbox::new(SandboxConfig::new());
//! let limits = SandboxLimits::new(Duration::from_secs(5), 256);
//! let outcome = sandbox.execute("print(\"ok\")", &limits).await;
//! assert!(outcome.is_success());
//! ```
//!
//! Enforcement is best-effort: see [`executor`] for what is and is not
//! guaranteed.

pub mod executor;
pub mod limits;
pub mod outcome;
pub mod umask;
pub mod watch;

pub use executor::{CodeExecutor, Sandbox};
pub use limits::{SandboxConfig, SandboxLimits};
pub use outcome::{ExecutionOutcome, FailureCategory, FailureDescriptor};

/// Re-export common types for convenience
pub mod prelude {
    pub use crate::executor::{CodeExecutor, Sandbox};
    pub use crate::limits::{SandboxConfig, SandboxLimits};
    pub use crate::outcome::{ExecutionOutcome, FailureCategory, FailureDescriptor};
}
