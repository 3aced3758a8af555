//! Error types for dirshift
//!
//! Provides a unified error type for configuration and size probing.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for dirshift core operations
pub type Result<T> = std::result::Result<T, ShiftError>;

/// Unified error type for dirshift
#[derive(Error, Debug)]
pub enum ShiftError {
    // ===== Size Probe Errors =====
    #[error("Failed to compute size of {path}: {reason}")]
    SubtreeSize { path: PathBuf, reason: String },

    #[error("Failed to query free space of {path}: {source}")]
    FreeSpace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ===== I/O Errors =====
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // ===== Configuration Errors =====
    #[error("Failed to read config file {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    ConfigParse(String),

    #[error("Invalid configuration: {0}")]
    Configuration(String),
}

impl From<toml::de::Error> for ShiftError {
    fn from(err: toml::de::Error) -> Self {
        ShiftError::ConfigParse(err.to_string())
    }
}

impl From<serde_yaml::Error> for ShiftError {
    fn from(err: serde_yaml::Error) -> Self {
        ShiftError::ConfigParse(err.to_string())
    }
}

impl From<walkdir::Error> for ShiftError {
    fn from(err: walkdir::Error) -> Self {
        let path = err.path().map(PathBuf::from).unwrap_or_default();
        ShiftError::SubtreeSize {
            path,
            reason: err.to_string(),
        }
    }
}

impl ShiftError {
    /// Errors that must halt the whole process rather than a single transfer
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ShiftError::FreeSpace { .. })
    }
}
