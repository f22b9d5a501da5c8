//! On-disk project layout
//!
//! ```text
//! <root>/
//!   project.srs.md           frozen specification with test blocks
//!   src/src.py               current candidate
//!   error_history.json       failure ledger
//!   verification_report.txt  last report
//!   forge.yaml               optional configuration
//! ```

use crate::error::ControllerError;
use forge_ledger::{FailureLedger, LEDGER_FILE_NAME};
use std::path::{Path, PathBuf};

/// Specification file name
pub const SPEC_FILE_NAME: &str = "project.srs.md";
/// Report file name
pub const REPORT_FILE_NAME: &str = "verification_report.txt";
/// Configuration file name
pub const CONFIG_FILE_NAME: &str = "forge.yaml";

/// Paths of one project
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectLayout {
    root: PathBuf,
}

impl ProjectLayout {
    /// Layout rooted at `root`
    #[inline]
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Project root
    #[inline]
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Frozen specification
    #[must_use]
    pub fn spec_path(&self) -> PathBuf {
        self.root.join(SPEC_FILE_NAME)
    }

    /// Directory holding the candidate
    #[must_use]
    pub fn source_dir(&self) -> PathBuf {
        self.root.join("src")
    }

    /// Current candidate
    #[must_use]
    pub fn candidate_path(&self) -> PathBuf {
        self.source_dir().join("src.py")
    }

    /// Ledger store
    #[must_use]
    pub fn ledger_path(&self) -> PathBuf {
        self.root.join(LEDGER_FILE_NAME)
    }

    /// Verification report
    #[must_use]
    pub fn report_path(&self) -> PathBuf {
        self.root.join(REPORT_FILE_NAME)
    }

    /// Optional configuration file
    #[must_use]
    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE_NAME)
    }

    /// Ledger handle for this project
    #[must_use]
    pub fn ledger(&self) -> FailureLedger {
        FailureLedger::new(self.ledger_path())
    }

    /// Read the specification text.
    ///
    /// # Errors
    /// Returns error if the file cannot be read
    pub async fn read_spec(&self) -> Result<String, ControllerError> {
        let path = self.spec_path();
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| ControllerError::Io { path, source })
    }

    /// Overwrite the current candidate.
    ///
    /// # Errors
    /// Returns error if the source directory or file cannot be written
    pub async fn write_candidate(&self, code: &str) -> Result<(), ControllerError> {
        let dir = self.source_dir();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| ControllerError::Io { path: dir, source })?;
        let path = self.candidate_path();
        tokio::fs::write(&path, code)
            .await
            .map_err(|source| ControllerError::Io { path, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        let layout = ProjectLayout::new("/tmp/proj");
        assert_eq!(layout.spec_path(), Path::new("/tmp/proj/project.srs.md"));
        assert_eq!(layout.candidate_path(), Path::new("/tmp/proj/src/src.py"));
        assert_eq!(layout.ledger_path(), Path::new("/tmp/proj/error_history.json"));
        assert_eq!(layout.report_path(), Path::new("/tmp/proj/verification_report.txt"));
        assert_eq!(layout.ledger().path(), layout.ledger_path());
    }

    #[tokio::test]
    async fn test_write_candidate_creates_src_dir() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ProjectLayout::new(dir.path());
        layout.write_candidate("x = 1\n").await.unwrap();
        layout.write_candidate("x = 2\n").await.unwrap();
        let written = std::fs::read_to_string(layout.candidate_path()).unwrap();
        assert_eq!(written, "x = 2\n");
    }

    #[tokio::test]
    async fn test_missing_spec_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ProjectLayout::new(dir.path());
        assert!(matches!(
            layout.read_spec().await,
            Err(ControllerError::Io { .. })
        ));
    }
}
