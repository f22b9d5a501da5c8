//! Failure ledger
//!
//! Durable, per-project record of every failure ever observed, keyed by
//! fingerprint. Stored as a JSON array in `error_history.json`:
//!
//! ```json
//! [
//!   {
//!     "hash": "9f2c...",
//!     "first_iter": 1,
//!     "fixed_iter": null,
//!     "abstract": "NameError in test_sub: NameError: name 'subtract' is not defined",
//!     "case": "def test_sub():\n    assert subtract(3, 1) == 2"
//!   }
//! ]
//! ```
//!
//! Every mutation loads the whole file, changes it and rewrites it through a
//! temporary file and an atomic rename. There is a single writer per project
//! and no locking.
//!
//! Invariants kept by the mutating operations:
//! - at most one entry per fingerprint has `fixed_iter` absent (open);
//! - `fixed_iter` is never cleared once set, and is `>= first_iter`;
//! - a fingerprint seen again after being fixed gets a new entry.

use crate::fingerprint::Fingerprint;
use crate::record::FailureRecord;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Default store file name inside a project directory
pub const LEDGER_FILE_NAME: &str = "error_history.json";

/// One persisted failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Failure fingerprint
    #[serde(rename = "hash")]
    pub fingerprint: Fingerprint,
    /// Iteration the failure was first observed at
    pub first_iter: u32,
    /// Iteration the failure was believed fixed at
    #[serde(default)]
    pub fixed_iter: Option<u32>,
    /// Human-readable summary
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    /// Offending test-case source
    pub case: String,
}

impl LedgerEntry {
    /// Whether the entry is still open (not yet fixed)
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.fixed_iter.is_none()
    }
}

/// Ledger errors
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Reading or writing the store failed
    #[error("ledger I/O error on {path}: {source}")]
    Io {
        /// Store path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// Encoding the store failed
    #[error("ledger serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Attempt to mark an entry fixed before it was first seen
    #[error("cannot mark {fingerprint} fixed at iteration {iteration}: first seen at {first_iter}")]
    FixedBeforeFirstSeen {
        /// Fingerprint of the entry
        fingerprint: Fingerprint,
        /// Requested fix iteration
        iteration: u32,
        /// Iteration the entry was opened at
        first_iter: u32,
    },
}

/// Result type for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Handle on a project's failure ledger
#[derive(Debug, Clone)]
pub struct FailureLedger {
    path: PathBuf,
}

impl FailureLedger {
    /// Ledger stored at `path`
    #[inline]
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Ledger stored as [`LEDGER_FILE_NAME`] inside `dir`
    #[inline]
    #[must_use]
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join(LEDGER_FILE_NAME))
    }

    /// Store path
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load all entries.
    ///
    /// A missing store is an empty ledger. A store that cannot be decoded is
    /// moved aside to `<name>.corrupt` and also treated as empty.
    ///
    /// # Errors
    /// Returns error if the store exists but cannot be read
    pub fn load(&self) -> LedgerResult<Vec<LedgerEntry>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::warn!("Ledger {} not found, starting empty", self.path.display());
                return Ok(Vec::new());
            }
            Err(source) => {
                return Err(LedgerError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        match serde_json::from_str(&content) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                tracing::error!("Ledger {} is corrupt: {}", self.path.display(), e);
                self.preserve_corrupt(&content);
                Ok(Vec::new())
            }
        }
    }

    /// Replace the store with `entries` atomically.
    ///
    /// # Errors
    /// Returns error if the temporary file cannot be written, synced or
    /// renamed over the store
    pub fn save(&self, entries: &[LedgerEntry]) -> LedgerResult<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let io_err = |source: io::Error| LedgerError::Io {
            path: self.path.clone(),
            source,
        };
        fs::create_dir_all(dir).map_err(io_err)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
        serde_json::to_writer_pretty(&mut tmp, entries)?;
        tmp.write_all(b"\n").map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&self.path).map_err(|e| io_err(e.error))?;
        tracing::debug!("Saved {} ledger entries to {}", entries.len(), self.path.display());
        Ok(())
    }

    /// Record a failure observed at `iteration`.
    ///
    /// If the fingerprint already has an open entry, nothing changes and
    /// `false` is returned; otherwise a new open entry is written.
    ///
    /// # Errors
    /// Returns error if the store cannot be read or written
    pub fn append(
        &self,
        fingerprint: Fingerprint,
        iteration: u32,
        abstract_text: &str,
        case: &str,
    ) -> LedgerResult<bool> {
        let mut entries = self.load()?;
        let created = push_if_not_open(&mut entries, fingerprint, iteration, abstract_text, case);
        if created {
            self.save(&entries)?;
        }
        Ok(created)
    }

    /// Record a batch of failures observed at `iteration` with one rewrite.
    ///
    /// Returns the number of new entries.
    ///
    /// # Errors
    /// Returns error if the store cannot be read or written
    pub fn append_records(&self, records: &[FailureRecord], iteration: u32) -> LedgerResult<usize> {
        let mut entries = self.load()?;
        let mut created = 0;
        for record in records {
            if push_if_not_open(
                &mut entries,
                record.fingerprint,
                iteration,
                &record.abstract_text,
                &record.case,
            ) {
                created += 1;
            }
        }
        if created > 0 {
            self.save(&entries)?;
        }
        Ok(created)
    }

    /// Mark the first open entry for `fingerprint` as fixed at `iteration`.
    ///
    /// Returns whether an entry was closed.
    ///
    /// # Errors
    /// Returns [`LedgerError::FixedBeforeFirstSeen`] if `iteration` precedes
    /// the entry's `first_iter`, or an I/O error
    pub fn backfill_fixed(&self, fingerprint: &Fingerprint, iteration: u32) -> LedgerResult<bool> {
        let mut entries = self.load()?;
        let Some(entry) = entries
            .iter_mut()
            .find(|e| e.fingerprint == *fingerprint && e.is_open())
        else {
            tracing::debug!("No open ledger entry for {}", fingerprint.short());
            return Ok(false);
        };
        if iteration < entry.first_iter {
            return Err(LedgerError::FixedBeforeFirstSeen {
                fingerprint: *fingerprint,
                iteration,
                first_iter: entry.first_iter,
            });
        }
        entry.fixed_iter = Some(iteration);
        tracing::info!("Marked {} fixed at iteration {}", fingerprint.short(), iteration);
        self.save(&entries)?;
        Ok(true)
    }

    /// Whether `fingerprint` was ever marked fixed.
    ///
    /// # Errors
    /// Returns error if the store cannot be read
    pub fn is_regression(&self, fingerprint: &Fingerprint) -> LedgerResult<bool> {
        Ok(self
            .load()?
            .iter()
            .any(|e| e.fingerprint == *fingerprint && e.fixed_iter.is_some()))
    }

    /// The subset of `fingerprints` that are regressions, in input order.
    ///
    /// # Errors
    /// Returns error if the store cannot be read
    pub fn regressions<'a, I>(&self, fingerprints: I) -> LedgerResult<Vec<Fingerprint>>
    where
        I: IntoIterator<Item = &'a Fingerprint>,
    {
        let fixed: HashSet<Fingerprint> = self
            .load()?
            .into_iter()
            .filter(|e| e.fixed_iter.is_some())
            .map(|e| e.fingerprint)
            .collect();
        Ok(fingerprints
            .into_iter()
            .filter(|fp| fixed.contains(fp))
            .copied()
            .collect())
    }

    /// All entries, in insertion order.
    ///
    /// # Errors
    /// Returns error if the store cannot be read
    #[inline]
    pub fn entries(&self) -> LedgerResult<Vec<LedgerEntry>> {
        self.load()
    }

    /// Entries not yet fixed.
    ///
    /// # Errors
    /// Returns error if the store cannot be read
    pub fn open_entries(&self) -> LedgerResult<Vec<LedgerEntry>> {
        let mut entries = self.load()?;
        entries.retain(LedgerEntry::is_open);
        Ok(entries)
    }

    /// Every entry recorded for `fingerprint`, oldest first.
    ///
    /// # Errors
    /// Returns error if the store cannot be read
    pub fn history_for(&self, fingerprint: &Fingerprint) -> LedgerResult<Vec<LedgerEntry>> {
        let mut entries = self.load()?;
        entries.retain(|e| e.fingerprint == *fingerprint);
        Ok(entries)
    }

    /// Entries recorded after an earlier entry with the same fingerprint had
    /// been fixed, oldest first.
    ///
    /// # Errors
    /// Returns error if the store cannot be read
    pub fn reopened_entries(&self) -> LedgerResult<Vec<LedgerEntry>> {
        let mut fixed = HashSet::new();
        let mut reopened = Vec::new();
        for entry in self.load()? {
            if fixed.contains(&entry.fingerprint) {
                reopened.push(entry.clone());
            }
            if !entry.is_open() {
                fixed.insert(entry.fingerprint);
            }
        }
        Ok(reopened)
    }

    fn corrupt_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_else(|| LEDGER_FILE_NAME.into());
        name.push(".corrupt");
        self.path.with_file_name(name)
    }

    fn preserve_corrupt(&self, content: &str) {
        let corrupt = self.corrupt_path();
        if let Err(e) = fs::rename(&self.path, &corrupt) {
            tracing::warn!("Could not move corrupt ledger aside ({}), copying instead", e);
            if let Err(e) = fs::write(&corrupt, content) {
                tracing::error!("Failed to preserve corrupt ledger at {}: {}", corrupt.display(), e);
                return;
            }
        }
        tracing::warn!("Corrupt ledger preserved at {}", corrupt.display());
    }
}

fn push_if_not_open(
    entries: &mut Vec<LedgerEntry>,
    fingerprint: Fingerprint,
    iteration: u32,
    abstract_text: &str,
    case: &str,
) -> bool {
    if entries
        .iter()
        .any(|e| e.fingerprint == fingerprint && e.is_open())
    {
        tracing::debug!("{} already open, not appending", fingerprint.short());
        return false;
    }
    entries.push(LedgerEntry {
        fingerprint,
        first_iter: iteration,
        fixed_iter: None,
        abstract_text: abstract_text.to_string(),
        case: case.to_string(),
    });
    true
}
