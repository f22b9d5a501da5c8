//! Forge Ledger - failure identity and history
//!
//! - [`fingerprint`]: stable fingerprints for observed failures
//! - [`record`]: per-run [`FailureRecord`]s built from execution outcomes
//! - [`ledger`]: the persistent [`FailureLedger`] with regression queries

pub mod fingerprint;
pub mod ledger;
pub mod record;

pub use fingerprint::{fingerprint, parse_python, Fingerprint, FingerprintError};
pub use ledger::{FailureLedger, LedgerEntry, LedgerError, LedgerResult, LEDGER_FILE_NAME};
pub use record::{FailureRecord, TrivialKind};
