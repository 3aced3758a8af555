//! Rebalancer configuration
//!
//! File configuration plus runtime settings, with command-line and
//! environment overrides.

use dirshift_core::{ShiftConfig, TransferMode};
use std::path::{Path, PathBuf};

use crate::executor::ExecutorConfig;
use crate::planner::PlannerConfig;

/// Rebalancer configuration
#[derive(Debug, Clone)]
pub struct RebalancerConfig {
    /// Sources, destinations, filter and transfer settings
    pub shift: ShiftConfig,

    /// Plan a single round and stop without transferring
    pub dry_run: bool,

    /// Write the failure ledger here as JSON on exit
    pub report_path: Option<PathBuf>,
}

impl RebalancerConfig {
    pub fn new(shift: ShiftConfig) -> Self {
        Self {
            shift,
            dry_run: false,
            report_path: None,
        }
    }

    /// Load the file configuration
    pub fn from_file(path: impl AsRef<Path>) -> dirshift_core::Result<Self> {
        Ok(Self::new(ShiftConfig::from_file(path)?))
    }

    /// Override config with CLI arguments
    pub fn with_overrides(
        mut self,
        max_concurrent: Option<usize>,
        mode: Option<TransferMode>,
        dry_run: bool,
        report_path: Option<PathBuf>,
    ) -> Self {
        if let Some(n) = max_concurrent {
            self.shift.transfer.max_concurrent = n;
        }
        if let Some(mode) = mode {
            self.shift.transfer.mode = mode;
        }
        if dry_run {
            self.dry_run = true;
        }
        if report_path.is_some() {
            self.report_path = report_path;
        }
        self
    }

    /// Apply `DIRSHIFT_*` environment variables; unparsable values are ignored
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(n) = std::env::var("DIRSHIFT_MAX_CONCURRENT")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.shift.transfer.max_concurrent = n;
        }

        if let Some(mode) = std::env::var("DIRSHIFT_TRANSFER_MODE")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.shift.transfer.mode = mode;
        }

        if let Ok(v) = std::env::var("DIRSHIFT_DRY_RUN") {
            if v == "true" || v == "1" {
                self.dry_run = true;
            }
        }

        self
    }

    /// Apply environment then command-line overrides and re-validate
    ///
    /// Command-line values take precedence over `DIRSHIFT_*` variables.
    pub fn resolve(
        self,
        max_concurrent: Option<usize>,
        mode: Option<TransferMode>,
        dry_run: bool,
        report_path: Option<PathBuf>,
    ) -> dirshift_core::Result<Self> {
        let config = self
            .with_env_overrides()
            .with_overrides(max_concurrent, mode, dry_run, report_path);
        config.shift.validate()?;
        Ok(config)
    }

    pub fn planner_config(&self) -> PlannerConfig {
        PlannerConfig {
            source_paths: self.shift.source_paths.clone(),
            destination_paths: self.shift.destination_paths.clone(),
            filter: self.shift.filter.clone(),
        }
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            max_concurrent: self.shift.transfer.max_concurrent,
        }
    }
}
