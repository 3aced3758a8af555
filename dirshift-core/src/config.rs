//! Configuration model for dirshift
//!
//! Supports loading from TOML or YAML files. YAML files written for the
//! original mover (`fromPaths`, `toPaths`, `fromPathFilter`) load unchanged.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Result, ShiftError};

/// Complete file-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShiftConfig {
    /// Source roots, scanned in this order every round
    #[serde(alias = "fromPaths")]
    pub source_paths: Vec<PathBuf>,

    /// Destination roots, capacity-checked in this order every round
    #[serde(alias = "toPaths", default)]
    pub destination_paths: Vec<PathBuf>,

    /// Which source children are eligible for moving
    #[serde(alias = "fromPathFilter")]
    pub filter: SizeFilter,

    /// How directories are moved
    #[serde(default)]
    pub transfer: TransferSettings,
}

impl ShiftConfig {
    /// Load configuration from a TOML or YAML file, chosen by extension
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ShiftError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;

        let config: ShiftConfig = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)?,
            _ => toml::from_str(&content)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.source_paths.is_empty() {
            return Err(ShiftError::Configuration(
                "at least one source path is required".to_string(),
            ));
        }

        self.filter.validate()?;

        if let Some(dup) = first_duplicate(&self.source_paths) {
            return Err(ShiftError::Configuration(format!(
                "source path {} is listed more than once",
                dup.display()
            )));
        }

        // A destination listed twice could receive two candidates in one round
        if let Some(dup) = first_duplicate(&self.destination_paths) {
            return Err(ShiftError::Configuration(format!(
                "destination path {} is listed more than once",
                dup.display()
            )));
        }

        if self.transfer.mode == TransferMode::Rsync && self.transfer.rsync.binary.is_empty() {
            return Err(ShiftError::Configuration(
                "rsync mode requires a binary".to_string(),
            ));
        }

        Ok(())
    }
}

fn first_duplicate(paths: &[PathBuf]) -> Option<&PathBuf> {
    let mut seen = HashSet::new();
    paths.iter().find(|p| !seen.insert(p.as_path()))
}

/// Name and size filter applied to the children of every source root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeFilter {
    /// Minimum subtree size in bytes (inclusive)
    #[serde(alias = "minSize", default)]
    pub min_size: u64,

    /// Maximum subtree size in bytes (exclusive)
    #[serde(alias = "maxSize")]
    pub max_size: u64,

    /// Required name prefix; empty matches every name
    #[serde(default)]
    pub prefix: String,
}

impl SizeFilter {
    pub fn new(min_size: u64, max_size: u64, prefix: impl Into<String>) -> Self {
        Self {
            min_size,
            max_size,
            prefix: prefix.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_size > self.max_size {
            return Err(ShiftError::Configuration(format!(
                "filter min_size ({}) exceeds max_size ({})",
                self.min_size, self.max_size
            )));
        }
        Ok(())
    }

    /// Check the name prefix
    pub fn matches_name(&self, name: &str) -> bool {
        name.starts_with(&self.prefix)
    }

    /// Check `min_size <= size < max_size`
    pub fn contains_size(&self, size: u64) -> bool {
        self.min_size <= size && size < self.max_size
    }

    /// Free space a destination must strictly exceed to receive any candidate
    pub fn required_free_space(&self) -> u64 {
        self.max_size
    }
}

/// Mechanism used to move a directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferMode {
    /// In-process recursive copy, then delete the source
    #[default]
    Copy,
    /// External resumable `rsync`, then delete the source
    Rsync,
}

impl FromStr for TransferMode {
    type Err = ShiftError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "copy" => Ok(TransferMode::Copy),
            "rsync" => Ok(TransferMode::Rsync),
            other => Err(ShiftError::Configuration(format!(
                "unknown transfer mode: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for TransferMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferMode::Copy => write!(f, "copy"),
            TransferMode::Rsync => write!(f, "rsync"),
        }
    }
}

/// Transfer settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferSettings {
    #[serde(default)]
    pub mode: TransferMode,

    /// Maximum simultaneous transfers per round (0 = one per assignment)
    #[serde(default)]
    pub max_concurrent: usize,

    #[serde(default)]
    pub rsync: RsyncSettings,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            mode: TransferMode::Copy,
            max_concurrent: 0,
            rsync: RsyncSettings::default(),
        }
    }
}

/// External rsync invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RsyncSettings {
    #[serde(default = "default_rsync_binary")]
    pub binary: String,

    /// Appended after the built-in `-a --partial`
    #[serde(default)]
    pub extra_args: Vec<String>,
}

impl Default for RsyncSettings {
    fn default() -> Self {
        Self {
            binary: default_rsync_binary(),
            extra_args: Vec::new(),
        }
    }
}

fn default_rsync_binary() -> String {
    "rsync".to_string()
}
