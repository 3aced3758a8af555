//! dirshift Core Library
//!
//! Shared building blocks for the dirshift volume rebalancer:
//! - Configuration model (TOML or YAML) with validation
//! - Size probing (destination free space, source subtree size)
//! - Common error handling

pub mod config;
pub mod error;
pub mod probe;

pub use config::{RsyncSettings, ShiftConfig, SizeFilter, TransferMode, TransferSettings};
pub use error::{Result, ShiftError};
pub use probe::{FsProbe, SizeProbe};
