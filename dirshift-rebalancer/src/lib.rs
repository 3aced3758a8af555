//! dirshift Rebalancer Library
//!
//! Drains directories from source volumes into destination volumes, one
//! round at a time:
//! - Candidate selection (first child per source root passing the filter)
//! - Matching (greedy one-to-one pairing with destinations that have room)
//! - Concurrent transfers (copy or resumable rsync, then delete the source)
//! - Failure ledger (failed sources are never scheduled again)

pub mod config;
pub mod executor;
pub mod ledger;
pub mod planner;
pub mod rounds;
pub mod selector;
pub mod transfer;

// Re-export main types
pub use config::RebalancerConfig;
pub use executor::{
    ExecutionResult, Executor, ExecutorConfig, ProgressStatus, ProgressUpdate, TaskResult,
};
pub use ledger::{FailureLedger, LedgerEntry};
pub use planner::{Assignment, MatchPlan, Planner, PlannerConfig, RoundPlan};
pub use rounds::{
    Rebalancer, RoundError, RoundPhase, RoundReport, RoundStep, RunOutcome, ShutdownHandle,
    StopReason,
};
pub use selector::{Candidate, Selector};
pub use transfer::{
    CopyTransfer, DirectoryMover, RsyncTransfer, TransferError, TransferOperation,
};
