//! Round Loop
//!
//! Drives rounds of Scanning → Matching → Transferring → Deciding until the
//! planner reports that sources or destinations are exhausted.
//!
//! Every round runs to completion: all transfers are awaited before the
//! next scan. A stop request is only honoured between rounds.

use dirshift_core::{ShiftError, SizeProbe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::config::RebalancerConfig;
use crate::executor::{ExecutionResult, Executor};
use crate::ledger::{FailureLedger, LedgerEntry};
use crate::planner::{Assignment, MatchPlan, Planner, RoundPlan};

/// Fatal round errors
#[derive(Error, Debug)]
pub enum RoundError {
    #[error("Scan failed: {0}")]
    Scan(#[from] ShiftError),

    #[error("Scan task failed: {0}")]
    ScanTask(String),
}

pub type Result<T> = std::result::Result<T, RoundError>;

/// Phase of the current round, for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundPhase {
    Scanning,
    Matching,
    Transferring,
    Deciding,
}

/// Why the loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// No source root has an eligible, non-failed candidate
    SourcesExhausted,
    /// No destination has room for another candidate
    DestinationsExhausted,
    /// Dry run planned one round
    DryRun,
    /// Stop requested between rounds
    Interrupted,
}

impl StopReason {
    /// Message shown to the operator on exit
    pub fn message(&self) -> &'static str {
        match self {
            StopReason::SourcesExhausted => "source volumes are empty, swap in new disks",
            StopReason::DestinationsExhausted => "destination volumes are full, run complete",
            StopReason::DryRun => "dry run complete, nothing was moved",
            StopReason::Interrupted => "stopped on request",
        }
    }
}

/// Outcome of one round that reached the Transferring phase
#[derive(Debug)]
pub struct RoundReport {
    pub round: u64,
    pub result: ExecutionResult,
    /// Candidates left without a destination
    pub unassigned: usize,
    pub duration: Duration,
}

impl RoundReport {
    pub fn summary(&self) -> String {
        format!(
            "round {}: {} moved, {} failed, {} unassigned, {} bytes in {:?}",
            self.round,
            self.result.succeeded.len(),
            self.result.failed.len(),
            self.unassigned,
            self.result.total_bytes,
            self.duration
        )
    }
}

/// Result of a single call to [`Rebalancer::run_round`]
#[derive(Debug)]
pub enum RoundStep {
    /// Transfers ran; the loop should scan again
    Transferred(RoundReport),
    /// Dry run: the plan that would have executed
    Planned(MatchPlan),
    /// Terminal condition reached
    Stopped(StopReason),
}

/// Final outcome of [`Rebalancer::run`]
#[derive(Debug)]
pub struct RunOutcome {
    pub reason: StopReason,
    /// Rounds that executed transfers
    pub rounds: u64,
    pub moved: usize,
    pub failed: usize,
    pub bytes_moved: u64,
    /// Assignments planned by a dry run
    pub planned: Vec<Assignment>,
    /// Failure ledger at exit
    pub failures: Vec<LedgerEntry>,
}

/// Cloneable stop flag checked between rounds
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle(Arc<AtomicBool>);

impl ShutdownHandle {
    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Round-based rebalancer
pub struct Rebalancer {
    planner: Arc<Planner>,
    executor: Executor,
    ledger: FailureLedger,
    dry_run: bool,
    shutdown: ShutdownHandle,
}

impl Rebalancer {
    pub fn new(config: &RebalancerConfig, probe: Arc<dyn SizeProbe>, executor: Executor) -> Self {
        Self {
            planner: Arc::new(Planner::new(config.planner_config(), probe)),
            executor,
            ledger: FailureLedger::new(),
            dry_run: config.dry_run,
            shutdown: ShutdownHandle::default(),
        }
    }

    /// Handle to the ledger shared with transfer tasks
    pub fn ledger(&self) -> &FailureLedger {
        &self.ledger
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Run rounds until a terminal condition
    ///
    /// Returns an error only for fatal scan failures; transfer failures end
    /// up in the ledger.
    pub async fn run(&mut self) -> Result<RunOutcome> {
        info!(
            sources = self.planner.config().source_paths.len(),
            destinations = self.planner.config().destination_paths.len(),
            operation = self.executor.mover().operation_name(),
            dry_run = self.dry_run,
            "Rebalancer started"
        );

        let mut outcome = RunOutcome {
            reason: StopReason::SourcesExhausted,
            rounds: 0,
            moved: 0,
            failed: 0,
            bytes_moved: 0,
            planned: Vec::new(),
            failures: Vec::new(),
        };

        let mut round = 0u64;
        outcome.reason = loop {
            if self.shutdown.is_requested() {
                info!("Stop requested, not starting another round");
                break StopReason::Interrupted;
            }

            round += 1;
            match self.run_round(round).await? {
                RoundStep::Stopped(reason) => break reason,
                RoundStep::Planned(plan) => {
                    outcome.planned = plan.assignments;
                    break StopReason::DryRun;
                }
                RoundStep::Transferred(report) => {
                    debug!(round, phase = ?RoundPhase::Deciding, "Round finished");
                    info!(summary = %report.summary(), "Round complete");
                    outcome.rounds += 1;
                    outcome.moved += report.result.succeeded.len();
                    outcome.failed += report.result.failed.len();
                    outcome.bytes_moved += report.result.total_bytes;
                }
            }
        };

        outcome.failures = self.ledger.entries();

        info!(
            reason = ?outcome.reason,
            rounds = outcome.rounds,
            moved = outcome.moved,
            failed = outcome.failed,
            bytes = outcome.bytes_moved,
            "Rebalancer stopped"
        );

        Ok(outcome)
    }

    /// Run a single round
    #[instrument(skip(self))]
    pub async fn run_round(&self, round: u64) -> Result<RoundStep> {
        let start = Instant::now();

        debug!(phase = ?RoundPhase::Scanning, "Scanning source roots");
        let planner = self.planner.clone();
        let failed = self.ledger.snapshot();

        // Subtree walks and statvfs block
        let plan = tokio::task::spawn_blocking(move || planner.create_plan(&failed))
            .await
            .map_err(|e| RoundError::ScanTask(e.to_string()))??;

        debug!(phase = ?RoundPhase::Matching, "Matching complete");
        let plan = match plan {
            RoundPlan::SourcesExhausted => {
                return Ok(RoundStep::Stopped(StopReason::SourcesExhausted));
            }
            RoundPlan::DestinationsExhausted { candidates } => {
                warn!(candidates, "Candidates remain but no destination can take them");
                return Ok(RoundStep::Stopped(StopReason::DestinationsExhausted));
            }
            RoundPlan::Ready(plan) => plan,
        };

        if self.dry_run {
            for a in &plan.assignments {
                info!(
                    task_id = %a.task_id,
                    source = %a.source.display(),
                    destination = %a.destination.display(),
                    bytes = a.size,
                    "Would move"
                );
            }
            return Ok(RoundStep::Planned(plan));
        }

        debug!(
            phase = ?RoundPhase::Transferring,
            transfers = plan.assignments.len(),
            "Starting transfers"
        );
        let unassigned = plan.unassigned.len();
        let result = self.executor.execute(plan.assignments, &self.ledger).await;

        Ok(RoundStep::Transferred(RoundReport {
            round,
            result,
            unassigned,
            duration: start.elapsed(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecutorConfig;
    use crate::transfer::{CopyTransfer, DirectoryMover};
    use dirshift_core::{ShiftConfig, SizeFilter, TransferSettings};
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    /// Real subtree sizes, fixed free space for every destination
    struct FixedFreeProbe(u64);

    impl SizeProbe for FixedFreeProbe {
        fn free_space(&self, _path: &Path) -> dirshift_core::Result<u64> {
            Ok(self.0)
        }

        fn subtree_size(&self, path: &Path) -> dirshift_core::Result<u64> {
            dirshift_core::FsProbe::new().subtree_size(path)
        }
    }

    fn make_rebalancer(
        sources: Vec<PathBuf>,
        destinations: Vec<PathBuf>,
        free: u64,
        dry_run: bool,
    ) -> Rebalancer {
        let mut config = RebalancerConfig::new(ShiftConfig {
            source_paths: sources,
            destination_paths: destinations,
            filter: SizeFilter::new(1, 100, "vol_"),
            transfer: TransferSettings::default(),
        });
        config.dry_run = dry_run;

        let executor = Executor::new(
            ExecutorConfig::default(),
            DirectoryMover::new(Arc::new(CopyTransfer)),
        );
        Rebalancer::new(&config, Arc::new(FixedFreeProbe(free)), executor)
    }

    fn make_volume(root: &Path, name: &str, bytes: usize) {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("data"), vec![0u8; bytes]).unwrap();
    }

    #[test]
    fn test_stop_reason_messages() {
        assert!(StopReason::SourcesExhausted.message().contains("empty"));
        assert!(StopReason::DestinationsExhausted.message().contains("full"));
    }

    #[test]
    fn test_shutdown_handle_shared() {
        let handle = ShutdownHandle::default();
        let other = handle.clone();
        other.request();
        assert!(handle.is_requested());
    }

    #[tokio::test]
    async fn test_no_candidates_stops_without_transfers() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("src");
        let dst = temp_dir.path().join("dst");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::create_dir_all(&dst).unwrap();
        make_volume(&src, "other", 10);

        let mut rebalancer = make_rebalancer(vec![src.clone()], vec![dst.clone()], 1000, false);
        let outcome = rebalancer.run().await.unwrap();

        assert_eq!(outcome.reason, StopReason::SourcesExhausted);
        assert_eq!(outcome.rounds, 0);
        assert!(src.join("other").exists());
        assert_eq!(std::fs::read_dir(&dst).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_full_destinations_stop() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("src");
        make_volume(&src, "vol_a", 10);

        let mut rebalancer = make_rebalancer(
            vec![src.clone()],
            vec![temp_dir.path().join("dst")],
            100,
            false,
        );
        let outcome = rebalancer.run().await.unwrap();

        assert_eq!(outcome.reason, StopReason::DestinationsExhausted);
        assert!(src.join("vol_a").exists());
    }

    #[tokio::test]
    async fn test_dry_run_plans_without_moving() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("src");
        let dst = temp_dir.path().join("dst");
        make_volume(&src, "vol_a", 10);
        std::fs::create_dir_all(&dst).unwrap();

        let mut rebalancer = make_rebalancer(vec![src.clone()], vec![dst.clone()], 1000, true);
        let outcome = rebalancer.run().await.unwrap();

        assert_eq!(outcome.reason, StopReason::DryRun);
        assert_eq!(outcome.planned.len(), 1);
        assert_eq!(outcome.planned[0].source, src.join("vol_a"));
        assert!(src.join("vol_a").exists());
        assert!(!dst.join("vol_a").exists());
    }

    #[tokio::test]
    async fn test_stop_requested_before_first_round() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("src");
        make_volume(&src, "vol_a", 10);

        let mut rebalancer = make_rebalancer(vec![src.clone()], vec![], 1000, false);
        rebalancer.shutdown_handle().request();
        let outcome = rebalancer.run().await.unwrap();

        assert_eq!(outcome.reason, StopReason::Interrupted);
        assert!(src.join("vol_a").exists());
    }

    /// Free space is plentiful but no subtree can be measured
    struct UnmeasurableProbe;

    impl SizeProbe for UnmeasurableProbe {
        fn free_space(&self, _path: &Path) -> dirshift_core::Result<u64> {
            Ok(u64::MAX)
        }

        fn subtree_size(&self, path: &Path) -> dirshift_core::Result<u64> {
            Err(ShiftError::SubtreeSize {
                path: path.to_path_buf(),
                reason: "permission denied".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_size_failure_aborts_run() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("src");
        let dst = temp_dir.path().join("dst");
        make_volume(&src, "vol_a", 10);
        std::fs::create_dir_all(&dst).unwrap();

        let config = RebalancerConfig::new(ShiftConfig {
            source_paths: vec![src.clone()],
            destination_paths: vec![dst.clone()],
            filter: SizeFilter::new(1, 100, "vol_"),
            transfer: TransferSettings::default(),
        });
        let executor = Executor::new(
            ExecutorConfig::default(),
            DirectoryMover::new(Arc::new(CopyTransfer)),
        );
        let mut rebalancer = Rebalancer::new(&config, Arc::new(UnmeasurableProbe), executor);

        let err = rebalancer.run().await.unwrap_err();

        assert!(matches!(err, RoundError::Scan(ShiftError::SubtreeSize { .. })));
        assert!(rebalancer.ledger().is_empty());
        assert!(src.join("vol_a/data").exists());
        assert_eq!(std::fs::read_dir(&dst).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_failed_source_excluded_next_round() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("src");
        let dst = temp_dir.path().join("dst");
        make_volume(&src, "vol_a", 10);
        // Same-named entry already at the destination forces a failure
        std::fs::create_dir_all(dst.join("vol_a")).unwrap();

        let mut rebalancer = make_rebalancer(vec![src.clone()], vec![dst.clone()], 1000, false);
        let outcome = rebalancer.run().await.unwrap();

        assert_eq!(outcome.reason, StopReason::SourcesExhausted);
        assert_eq!(outcome.rounds, 1);
        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].path, src.join("vol_a"));
        assert!(src.join("vol_a/data").exists());
    }
}
