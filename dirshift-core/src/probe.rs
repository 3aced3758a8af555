//! Size probing
//!
//! Free space of destination volumes and total size of source subtrees.

use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{Result, ShiftError};

/// Filesystem size queries used by the selector and the planner
pub trait SizeProbe: Send + Sync {
    /// Available (not total) bytes on the filesystem containing `path`
    fn free_space(&self, path: &Path) -> Result<u64>;

    /// Sum of the sizes of every non-directory entry under `path`
    fn subtree_size(&self, path: &Path) -> Result<u64>;
}

/// Probe backed by the local filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct FsProbe;

impl FsProbe {
    pub fn new() -> Self {
        Self
    }
}

impl SizeProbe for FsProbe {
    fn free_space(&self, path: &Path) -> Result<u64> {
        // statvfs: f_bavail * f_frsize
        fs2::available_space(path).map_err(|source| ShiftError::FreeSpace {
            path: path.to_path_buf(),
            source,
        })
    }

    fn subtree_size(&self, path: &Path) -> Result<u64> {
        let mut total = 0u64;

        // Symlinks are counted by their own size and never followed.
        // Any walk error aborts instead of under-reporting.
        for entry in WalkDir::new(path).follow_links(false) {
            let entry = entry?;
            if entry.file_type().is_dir() {
                continue;
            }
            total += entry.metadata()?.len();
        }

        debug!(path = %path.display(), bytes = total, "Computed subtree size");
        Ok(total)
    }
}
