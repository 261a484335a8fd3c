//! File modification tracking.

use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Remembers the last seen modification time of a file.
#[derive(Debug, Clone)]
pub struct ModifiedStamp {
    path: PathBuf,
    modified: Option<SystemTime>,
}

impl ModifiedStamp {
    /// Track `path`; nothing is read until the first [`check`](Self::check).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            modified: None,
        }
    }

    /// Track `path` starting from an already observed modification time.
    pub fn with_modified(path: impl Into<PathBuf>, modified: SystemTime) -> Self {
        Self {
            path: path.into(),
            modified: Some(modified),
        }
    }

    /// Tracked path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last recorded modification time.
    pub fn modified(&self) -> Option<SystemTime> {
        self.modified
    }

    /// Forget the recorded time so the next successful check reports `true`.
    pub fn reset(&mut self) {
        self.modified = None;
    }

    /// Report whether the file changed since the last successful check.
    ///
    /// The first successful stat always reports `true`. Later calls report
    /// `true` only for a strictly newer modification time. A stat error is
    /// returned and leaves the recorded time untouched.
    pub async fn check(&mut self) -> io::Result<bool> {
        let current = tokio::fs::metadata(&self.path).await?.modified()?;

        match self.modified {
            None => {
                self.modified = Some(current);
                Ok(true)
            }
            Some(previous) if current > previous => {
                tracing::debug!(
                    path = %self.path.display(),
                    "File modification time advanced"
                );
                self.modified = Some(current);
                Ok(true)
            }
            Some(_) => Ok(false),
        }
    }
}
