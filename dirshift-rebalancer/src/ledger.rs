//! Failure Ledger
//!
//! Records every source directory whose transfer failed. Entries are never
//! removed: a failed source is excluded from matching for the rest of the
//! process lifetime. The ledger lives in memory only.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// A source that failed to transfer
#[derive(Debug, Clone, Serialize)]
pub struct LedgerEntry {
    /// Source directory that failed
    pub path: PathBuf,
    /// Destination root it was assigned to
    pub destination: Option<PathBuf>,
    /// Error reported by the transfer
    pub reason: String,
    /// When the failure was recorded
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct LedgerState {
    /// Insertion order, for reporting
    entries: Vec<LedgerEntry>,
    index: HashSet<PathBuf>,
}

/// Shared handle to the failure ledger
///
/// Cloning the handle shares the same underlying set. Every read and write
/// goes through one mutex, so concurrent transfers can record failures
/// without losing updates.
#[derive(Debug, Clone, Default)]
pub struct FailureLedger {
    inner: Arc<Mutex<LedgerState>>,
}

impl FailureLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failed source
    ///
    /// Returns `false` if the path was already present; the existing entry
    /// is kept untouched.
    pub fn record(
        &self,
        path: impl Into<PathBuf>,
        destination: Option<PathBuf>,
        reason: impl Into<String>,
    ) -> bool {
        let path = path.into();
        let mut state = self.inner.lock();

        if !state.index.insert(path.clone()) {
            debug!(path = %path.display(), "Source already in failure ledger");
            return false;
        }

        let entry = LedgerEntry {
            path,
            destination,
            reason: reason.into(),
            recorded_at: Utc::now(),
        };
        info!(
            path = %entry.path.display(),
            reason = %entry.reason,
            "Source added to failure ledger"
        );
        state.entries.push(entry);
        true
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.inner.lock().index.contains(path)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Point-in-time copy of the failed paths, for matching
    pub fn snapshot(&self) -> HashSet<PathBuf> {
        self.inner.lock().index.clone()
    }

    /// All entries in the order they were recorded
    pub fn entries(&self) -> Vec<LedgerEntry> {
        self.inner.lock().entries.clone()
    }

    /// Failed paths in the order they were recorded
    pub fn paths(&self) -> Vec<PathBuf> {
        self.inner
            .lock()
            .entries
            .iter()
            .map(|e| e.path.clone())
            .collect()
    }

    /// Human-readable report, one path per line; empty when nothing failed
    pub fn render_report(&self) -> String {
        let paths = self.paths();
        if paths.is_empty() {
            return String::new();
        }

        let mut report = String::from("Sources that could not be moved:\n");
        for path in paths {
            report.push_str(&path.display().to_string());
            report.push('\n');
        }
        report
    }

    /// Write all entries as pretty JSON
    pub fn write_json(&self, path: &Path) -> std::io::Result<()> {
        let entries = self.entries();
        let json = serde_json::to_string_pretty(&entries)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }
}
