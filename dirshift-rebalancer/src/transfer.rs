//! Directory transfer
//!
//! Moves one candidate directory under a destination root. The mechanism
//! that moves bytes is a pluggable [`TransferOperation`]:
//! - [`CopyTransfer`]: in-process recursive copy. Partial output is removed
//!   when the copy fails.
//! - [`RsyncTransfer`]: external `rsync --partial`. Partial output is kept so
//!   a later run can resume it. A marker file named `.<name>.dirshift-partial`
//!   next to the output records which source it belongs to. Only that source
//!   may resume into it; an existing entry without a matching marker is never
//!   touched.
//!
//! Either way the source is deleted only after the operation succeeds.

use async_trait::async_trait;
use dirshift_core::{RsyncSettings, TransferMode, TransferSettings};
use std::ffi::{OsStr, OsString};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

/// Transfer errors
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Source directory does not exist: {0}")]
    SourceMissing(PathBuf),

    #[error("Source is not a directory: {0}")]
    SourceNotDirectory(PathBuf),

    #[error("Destination already contains {0}, resolve it manually")]
    DestinationExists(PathBuf),

    #[error("Copy failed at {path}: {reason}")]
    CopyFailed { path: PathBuf, reason: String },

    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Sync exited with {status}: {stderr}")]
    SyncFailed { status: String, stderr: String },

    #[error("Failed to remove source {path} after transfer: {source}")]
    RemoveSource {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Transfer task failed: {0}")]
    Task(String),
}

/// Result type for transfer operations
pub type Result<T> = std::result::Result<T, TransferError>;

/// Mechanism that materializes `source` at `target`
///
/// Implementations only copy; existence checks and source removal belong to
/// [`DirectoryMover`].
#[async_trait]
pub trait TransferOperation: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether output left by a failed attempt is kept for resumption
    fn keeps_partial(&self) -> bool {
        false
    }

    async fn transfer(&self, source: &Path, target: &Path) -> Result<()>;
}

// =============================================================================
// IN-PROCESS COPY
// =============================================================================

/// Recursive copy on a blocking thread
#[derive(Debug, Clone, Copy, Default)]
pub struct CopyTransfer;

#[async_trait]
impl TransferOperation for CopyTransfer {
    fn name(&self) -> &'static str {
        "copy"
    }

    async fn transfer(&self, source: &Path, target: &Path) -> Result<()> {
        let source = source.to_path_buf();
        let target = target.to_path_buf();

        let bytes = tokio::task::spawn_blocking(move || copy_tree(&source, &target))
            .await
            .map_err(|e| TransferError::Task(e.to_string()))??;

        debug!(bytes, "Copy finished");
        Ok(())
    }
}

fn copy_failed(path: &Path, reason: impl std::fmt::Display) -> TransferError {
    TransferError::CopyFailed {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// Copy a directory tree, returning the number of file bytes written
///
/// The top-level target is created with `create_dir`, so an entry that
/// appears concurrently is reported as [`TransferError::DestinationExists`]
/// and never merged into.
fn copy_tree(source: &Path, target: &Path) -> Result<u64> {
    let mut bytes = 0u64;
    let mut dir_permissions = Vec::new();

    for entry in WalkDir::new(source).follow_links(false) {
        let entry = entry.map_err(|e| copy_failed(e.path().unwrap_or(source), &e))?;

        let dest = if entry.depth() == 0 {
            target.to_path_buf()
        } else {
            let relative = entry
                .path()
                .strip_prefix(source)
                .map_err(|e| copy_failed(entry.path(), e))?;
            target.join(relative)
        };

        let file_type = entry.file_type();
        if file_type.is_dir() {
            if let Err(e) = std::fs::create_dir(&dest) {
                if entry.depth() == 0 && e.kind() == io::ErrorKind::AlreadyExists {
                    return Err(TransferError::DestinationExists(dest));
                }
                return Err(copy_failed(&dest, e));
            }
            let metadata = entry.metadata().map_err(|e| copy_failed(entry.path(), e))?;
            dir_permissions.push((dest, metadata.permissions()));
        } else if file_type.is_file() {
            bytes += std::fs::copy(entry.path(), &dest).map_err(|e| copy_failed(&dest, e))?;
        } else if file_type.is_symlink() {
            let link = std::fs::read_link(entry.path()).map_err(|e| copy_failed(entry.path(), e))?;
            create_symlink(&link, &dest).map_err(|e| copy_failed(&dest, e))?;
        } else {
            // Sockets, FIFOs and devices would be lost when the source is removed
            return Err(copy_failed(entry.path(), "unsupported file type"));
        }
    }

    // Applied last so read-only directories can still be filled
    for (dir, permissions) in dir_permissions.into_iter().rev() {
        std::fs::set_permissions(&dir, permissions).map_err(|e| copy_failed(&dir, e))?;
    }

    Ok(bytes)
}

#[cfg(unix)]
fn create_symlink(link: &Path, dest: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(link, dest)
}

#[cfg(not(unix))]
fn create_symlink(_link: &Path, _dest: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "symlinks are not supported on this platform",
    ))
}

// =============================================================================
// EXTERNAL RSYNC
// =============================================================================

/// Resumable transfer through an external `rsync`
#[derive(Debug, Clone)]
pub struct RsyncTransfer {
    binary: String,
    extra_args: Vec<String>,
}

impl RsyncTransfer {
    pub fn new(settings: &RsyncSettings) -> Self {
        Self {
            binary: settings.binary.clone(),
            extra_args: settings.extra_args.clone(),
        }
    }

    /// `rsync -a --partial [extra..] <source>/ <target>/`
    fn command(&self, source: &Path, target: &Path) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("-a")
            .arg("--partial")
            .args(&self.extra_args)
            .arg(with_trailing_slash(source))
            .arg(with_trailing_slash(target))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        cmd
    }
}

fn with_trailing_slash(path: &Path) -> OsString {
    let mut s = path.as_os_str().to_os_string();
    s.push("/");
    s
}

#[async_trait]
impl TransferOperation for RsyncTransfer {
    fn name(&self) -> &'static str {
        "rsync"
    }

    fn keeps_partial(&self) -> bool {
        true
    }

    async fn transfer(&self, source: &Path, target: &Path) -> Result<()> {
        let output = self
            .command(source, target)
            .output()
            .await
            .map_err(|e| TransferError::Spawn {
                program: self.binary.clone(),
                source: e,
            })?;

        if output.status.success() {
            return Ok(());
        }

        Err(TransferError::SyncFailed {
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

// =============================================================================
// MOVER
// =============================================================================

/// Enforces the move contract around a [`TransferOperation`]
pub struct DirectoryMover {
    operation: Arc<dyn TransferOperation>,
}

impl DirectoryMover {
    pub fn new(operation: Arc<dyn TransferOperation>) -> Self {
        Self { operation }
    }

    /// Build the mover selected by configuration
    pub fn from_settings(settings: &TransferSettings) -> Self {
        let operation: Arc<dyn TransferOperation> = match settings.mode {
            TransferMode::Copy => Arc::new(CopyTransfer),
            TransferMode::Rsync => Arc::new(RsyncTransfer::new(&settings.rsync)),
        };
        Self::new(operation)
    }

    pub fn operation_name(&self) -> &'static str {
        self.operation.name()
    }

    /// Move `source` to `destination_root/<name of source>`
    ///
    /// Returns the final path of the moved directory.
    #[instrument(skip(self), fields(op = self.operation.name()))]
    pub async fn move_dir(&self, source: &Path, destination_root: &Path) -> Result<PathBuf> {
        let metadata = match tokio::fs::symlink_metadata(source).await {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(TransferError::SourceMissing(source.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };
        if !metadata.is_dir() {
            return Err(TransferError::SourceNotDirectory(source.to_path_buf()));
        }

        let name = source
            .file_name()
            .ok_or_else(|| TransferError::SourceNotDirectory(source.to_path_buf()))?;
        let target = destination_root.join(name);
        let marker = partial_marker(destination_root, name);
        let keeps_partial = self.operation.keeps_partial();

        // A marker reserves the name for the source that wrote it, with or
        // without output next to it
        let owner = marker_owner(&marker, source).await?;
        if owner == MarkerOwner::Other {
            return Err(TransferError::DestinationExists(target));
        }

        if entry_exists(&target).await? {
            if keeps_partial && owner == MarkerOwner::Source {
                info!(target = %target.display(), "Resuming partial transfer");
            } else {
                return Err(TransferError::DestinationExists(target));
            }
        }

        if keeps_partial && owner == MarkerOwner::None {
            tokio::fs::write(&marker, source.as_os_str().as_encoded_bytes()).await?;
        }

        if let Err(e) = self.operation.transfer(source, &target).await {
            if !keeps_partial && !matches!(e, TransferError::DestinationExists(_)) {
                discard_partial(&target).await;
            }
            return Err(e);
        }

        if keeps_partial {
            if let Err(e) = tokio::fs::remove_file(&marker).await {
                warn!(marker = %marker.display(), error = %e, "Failed to remove partial marker");
            }
        }

        tokio::fs::remove_dir_all(source)
            .await
            .map_err(|e| TransferError::RemoveSource {
                path: source.to_path_buf(),
                source: e,
            })?;

        debug!(target = %target.display(), "Source removed after transfer");
        Ok(target)
    }
}

/// Marker that flags `destination_root/<name>` as resumable partial output
pub fn partial_marker(destination_root: &Path, name: &OsStr) -> PathBuf {
    let mut file_name = OsString::from(".");
    file_name.push(name);
    file_name.push(".dirshift-partial");
    destination_root.join(file_name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MarkerOwner {
    None,
    Source,
    Other,
}

/// Which source, if any, left the partial marker
async fn marker_owner(marker: &Path, source: &Path) -> io::Result<MarkerOwner> {
    match tokio::fs::read(marker).await {
        Ok(contents) if contents == source.as_os_str().as_encoded_bytes() => {
            Ok(MarkerOwner::Source)
        }
        Ok(_) => Ok(MarkerOwner::Other),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(MarkerOwner::None),
        Err(e) => Err(e),
    }
}

/// Existence check that does not follow symlinks
async fn entry_exists(path: &Path) -> io::Result<bool> {
    match tokio::fs::symlink_metadata(path).await {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

async fn discard_partial(target: &Path) {
    match tokio::fs::remove_dir_all(target).await {
        Ok(()) => debug!(target = %target.display(), "Removed partial copy"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(
            target = %target.display(),
            error = %e,
            "Failed to remove partial copy"
        ),
    }
}
