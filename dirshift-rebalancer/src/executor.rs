//! Transfer Executor
//!
//! Runs one round's assignments with:
//! - One spawned task per assignment, started together
//! - Optional cap on simultaneous transfers
//! - Progress reporting over a channel
//! - Failed sources recorded in the failure ledger
//!
//! `execute` returns only after every task has finished.

use futures::future::join_all;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Semaphore};
use tracing::{error, info, instrument, warn};

use crate::ledger::FailureLedger;
use crate::planner::Assignment;
use crate::transfer::DirectoryMover;

/// Result of a single transfer task
#[derive(Debug, Clone)]
pub struct TaskResult {
    pub task_id: String,
    pub source: PathBuf,
    pub destination: PathBuf,
    /// Final path on success
    pub target: Option<PathBuf>,
    pub success: bool,
    pub error: Option<String>,
    pub bytes_transferred: u64,
    pub duration: Duration,
}

/// Overall result of one round's transfers
#[derive(Debug, Default)]
pub struct ExecutionResult {
    /// Tasks that completed successfully
    pub succeeded: Vec<TaskResult>,
    /// Tasks that failed
    pub failed: Vec<TaskResult>,
    /// Total bytes moved
    pub total_bytes: u64,
    /// Wall time of the round's transfer phase
    pub duration: Duration,
}

impl ExecutionResult {
    /// Success rate as percentage
    pub fn success_rate(&self) -> f64 {
        let total = self.succeeded.len() + self.failed.len();
        if total == 0 {
            100.0
        } else {
            (self.succeeded.len() as f64 / total as f64) * 100.0
        }
    }

    /// Summary string
    pub fn summary(&self) -> String {
        format!(
            "{} succeeded, {} failed, {} bytes in {:?} ({:.1}% success rate)",
            self.succeeded.len(),
            self.failed.len(),
            self.total_bytes,
            self.duration,
            self.success_rate()
        )
    }
}

/// Executor configuration
#[derive(Debug, Clone, Default)]
pub struct ExecutorConfig {
    /// Maximum simultaneous transfers (0 = one per assignment)
    pub max_concurrent: usize,
}

/// Progress update for a task
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub task_id: String,
    pub source: PathBuf,
    pub destination: PathBuf,
    pub status: ProgressStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressStatus {
    Started,
    Completed,
    Failed(String),
}

/// Transfer executor
pub struct Executor {
    config: ExecutorConfig,
    mover: Arc<DirectoryMover>,
    /// Progress channel
    progress_tx: Option<mpsc::Sender<ProgressUpdate>>,
}

impl Executor {
    /// Create a new executor
    pub fn new(config: ExecutorConfig, mover: DirectoryMover) -> Self {
        Self {
            config,
            mover: Arc::new(mover),
            progress_tx: None,
        }
    }

    /// Create executor with progress channel
    pub fn with_progress(
        config: ExecutorConfig,
        mover: DirectoryMover,
    ) -> (Self, mpsc::Receiver<ProgressUpdate>) {
        let (tx, rx) = mpsc::channel(100);
        let mut executor = Self::new(config, mover);
        executor.progress_tx = Some(tx);
        (executor, rx)
    }

    pub fn mover(&self) -> &DirectoryMover {
        &self.mover
    }

    /// Run every assignment concurrently and wait for all of them
    #[instrument(skip(self, assignments, ledger), fields(assignments = assignments.len()))]
    pub async fn execute(
        &self,
        assignments: Vec<Assignment>,
        ledger: &FailureLedger,
    ) -> ExecutionResult {
        let start = Instant::now();
        let mut result = ExecutionResult::default();

        if assignments.is_empty() {
            info!("No transfers to execute");
            return result;
        }

        let permits = match self.config.max_concurrent {
            0 => assignments.len(),
            n => n,
        };
        let semaphore = Arc::new(Semaphore::new(permits));

        let mut pending = Vec::with_capacity(assignments.len());
        let mut handles = Vec::with_capacity(assignments.len());

        for assignment in assignments {
            pending.push(assignment.clone());

            let mover = self.mover.clone();
            let ledger = ledger.clone();
            let semaphore = semaphore.clone();
            let progress_tx = self.progress_tx.clone();

            handles.push(tokio::spawn(async move {
                run_task(assignment, mover, ledger, semaphore, progress_tx).await
            }));
        }

        // Round barrier
        let outcomes = join_all(handles).await;

        for (assignment, outcome) in pending.into_iter().zip(outcomes) {
            let task_result = match outcome {
                Ok(task_result) => task_result,
                Err(e) => {
                    error!(task_id = %assignment.task_id, error = %e, "Transfer task panicked");
                    let reason = format!("transfer task panicked: {e}");
                    ledger.record(
                        assignment.source.clone(),
                        Some(assignment.destination.clone()),
                        reason.clone(),
                    );
                    TaskResult {
                        task_id: assignment.task_id,
                        source: assignment.source,
                        destination: assignment.destination,
                        target: None,
                        success: false,
                        error: Some(reason),
                        bytes_transferred: 0,
                        duration: start.elapsed(),
                    }
                }
            };

            result.total_bytes += task_result.bytes_transferred;
            if task_result.success {
                result.succeeded.push(task_result);
            } else {
                result.failed.push(task_result);
            }
        }

        result.duration = start.elapsed();
        info!(summary = %result.summary(), "Round transfers complete");

        result
    }
}

async fn run_task(
    assignment: Assignment,
    mover: Arc<DirectoryMover>,
    ledger: FailureLedger,
    semaphore: Arc<Semaphore>,
    progress_tx: Option<mpsc::Sender<ProgressUpdate>>,
) -> TaskResult {
    let report = |status: ProgressStatus| {
        let update = ProgressUpdate {
            task_id: assignment.task_id.clone(),
            source: assignment.source.clone(),
            destination: assignment.destination.clone(),
            status,
        };
        let tx = progress_tx.clone();
        async move {
            if let Some(tx) = tx {
                let _ = tx.send(update).await;
            }
        }
    };

    // The semaphore is never closed
    let _permit = semaphore.acquire_owned().await.ok();

    let start = Instant::now();
    info!(
        task_id = %assignment.task_id,
        source = %assignment.source.display(),
        destination = %assignment.destination.display(),
        "Transfer started"
    );
    report(ProgressStatus::Started).await;

    match mover
        .move_dir(&assignment.source, &assignment.destination)
        .await
    {
        Ok(target) => {
            info!(
                task_id = %assignment.task_id,
                target = %target.display(),
                bytes = assignment.size,
                "Transfer succeeded"
            );
            report(ProgressStatus::Completed).await;
            TaskResult {
                task_id: assignment.task_id.clone(),
                source: assignment.source.clone(),
                destination: assignment.destination.clone(),
                target: Some(target),
                success: true,
                error: None,
                bytes_transferred: assignment.size,
                duration: start.elapsed(),
            }
        }
        Err(e) => {
            let reason = e.to_string();
            warn!(
                task_id = %assignment.task_id,
                source = %assignment.source.display(),
                error = %reason,
                "Transfer failed"
            );
            ledger.record(
                assignment.source.clone(),
                Some(assignment.destination.clone()),
                reason.clone(),
            );
            report(ProgressStatus::Failed(reason.clone())).await;
            TaskResult {
                task_id: assignment.task_id.clone(),
                source: assignment.source.clone(),
                destination: assignment.destination.clone(),
                target: None,
                success: false,
                error: Some(reason),
                bytes_transferred: 0,
                duration: start.elapsed(),
            }
        }
    }
}
