//! Candidate Selector
//!
//! Scans the immediate children of a source root and picks the first
//! directory that passes the name and size filter.
//!
//! Children are visited in the order the OS returns them from `read_dir`.
//! That order is not sorted and differs between filesystems and platforms,
//! so which eligible child wins is not deterministic across machines.

use dirshift_core::{Result, SizeFilter, SizeProbe};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// A source child directory eligible for moving this round
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Full path of the child directory
    pub path: PathBuf,
    /// Source root it was found under
    pub source_root: PathBuf,
    /// Subtree size in bytes at selection time
    pub size: u64,
}

impl Candidate {
    /// Base name, used as the entry name under the destination
    pub fn name(&self) -> Option<&OsStr> {
        self.path.file_name()
    }
}

/// Candidate selector
pub struct Selector {
    filter: SizeFilter,
    probe: Arc<dyn SizeProbe>,
}

impl Selector {
    pub fn new(filter: SizeFilter, probe: Arc<dyn SizeProbe>) -> Self {
        Self { filter, probe }
    }

    pub fn filter(&self) -> &SizeFilter {
        &self.filter
    }

    /// Select the first eligible child of `source_root`
    ///
    /// An unreadable source root yields `Ok(None)`, the same as a root with
    /// no eligible children. A failure while sizing a child is returned as
    /// an error and must stop the process.
    #[instrument(skip(self), fields(root = %source_root.display()))]
    pub fn select(&self, source_root: &Path) -> Result<Option<Candidate>> {
        let entries = match std::fs::read_dir(source_root) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "Cannot list source root, skipping");
                return Ok(None);
            }
        };

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "Listing of source root failed, skipping");
                    return Ok(None);
                }
            };

            // file_type() does not follow symlinks
            let is_dir = match entry.file_type() {
                Ok(ft) => ft.is_dir(),
                Err(e) => {
                    warn!(path = %entry.path().display(), error = %e, "Cannot stat entry");
                    false
                }
            };
            if !is_dir {
                continue;
            }

            let name = entry.file_name();
            if !self.filter.matches_name(&name.to_string_lossy()) {
                continue;
            }

            let path = entry.path();
            let size = self.probe.subtree_size(&path)?;

            if self.filter.contains_size(size) {
                debug!(path = %path.display(), size, "Selected candidate");
                return Ok(Some(Candidate {
                    path,
                    source_root: source_root.to_path_buf(),
                    size,
                }));
            }

            debug!(path = %path.display(), size, "Size outside filter range");
        }

        Ok(None)
    }
}
