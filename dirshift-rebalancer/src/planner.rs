//! Round Planner
//!
//! Builds one round's work: a candidate from each source root, then a greedy
//! one-to-one pairing with destination roots that have room for the largest
//! directory the filter admits.
//!
//! A destination qualifies when its free space strictly exceeds the filter's
//! `max_size`, regardless of the actual candidate size. Each destination
//! takes at most one candidate per round.

use dirshift_core::{Result, SizeFilter, SizeProbe};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::selector::{Candidate, Selector};

/// One round's pairing of a candidate with a destination root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    /// Task ID, unique within the process
    pub task_id: String,
    /// Candidate directory to move
    pub source: PathBuf,
    /// Destination root that receives it
    pub destination: PathBuf,
    /// Subtree size at selection time
    pub size: u64,
}

impl Assignment {
    /// Final location of the moved directory
    pub fn target_path(&self) -> Option<PathBuf> {
        self.source
            .file_name()
            .map(|name| self.destination.join(name))
    }
}

/// Assignments for a round that has work
#[derive(Debug, Default)]
pub struct MatchPlan {
    pub assignments: Vec<Assignment>,
    /// Candidates left without a destination this round
    pub unassigned: Vec<Candidate>,
    /// Destinations skipped for lack of free space
    pub skipped_destinations: Vec<PathBuf>,
}

impl MatchPlan {
    /// Total bytes scheduled
    pub fn total_bytes(&self) -> u64 {
        self.assignments.iter().map(|a| a.size).sum()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} assignments, {} bytes scheduled, {} candidates unassigned, {} destinations skipped",
            self.assignments.len(),
            self.total_bytes(),
            self.unassigned.len(),
            self.skipped_destinations.len()
        )
    }
}

/// Outcome of planning one round
#[derive(Debug)]
pub enum RoundPlan {
    /// No source root produced a usable candidate
    SourcesExhausted,
    /// Candidates exist but no destination can take one
    DestinationsExhausted { candidates: usize },
    /// At least one assignment was made
    Ready(MatchPlan),
}

/// Planner configuration
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    /// Source roots in scan order
    pub source_paths: Vec<PathBuf>,
    /// Destination roots in assignment order
    pub destination_paths: Vec<PathBuf>,
    pub filter: SizeFilter,
}

/// Round planner
pub struct Planner {
    config: PlannerConfig,
    selector: Selector,
    probe: Arc<dyn SizeProbe>,
    /// Task ID counter, shared across rounds
    task_counter: AtomicU64,
}

impl Planner {
    /// Create a new planner
    pub fn new(config: PlannerConfig, probe: Arc<dyn SizeProbe>) -> Self {
        let selector = Selector::new(config.filter.clone(), probe.clone());
        Self {
            config,
            selector,
            probe,
            task_counter: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Plan one round against a snapshot of the failure ledger
    #[instrument(skip(self, failed))]
    pub fn create_plan(&self, failed: &HashSet<PathBuf>) -> Result<RoundPlan> {
        let candidates = self.collect_candidates(failed)?;

        if candidates.is_empty() {
            info!("No eligible candidates in any source root");
            return Ok(RoundPlan::SourcesExhausted);
        }

        Ok(self.assign_destinations(candidates))
    }

    /// One candidate per source root, in source order, skipping failed paths
    pub fn collect_candidates(&self, failed: &HashSet<PathBuf>) -> Result<Vec<Candidate>> {
        let mut candidates = Vec::new();

        for root in &self.config.source_paths {
            let Some(candidate) = self.selector.select(root)? else {
                debug!(root = %root.display(), "No candidate in source root");
                continue;
            };

            // A failed candidate stays first in its root, so the root is
            // effectively retired until the process restarts
            if failed.contains(&candidate.path) {
                debug!(
                    path = %candidate.path.display(),
                    "Candidate is in failure ledger, skipping"
                );
                continue;
            }

            candidates.push(candidate);
        }

        Ok(candidates)
    }

    /// Greedily pair candidates with destinations in configured order
    pub fn assign_destinations(&self, candidates: Vec<Candidate>) -> RoundPlan {
        let required = self.config.filter.required_free_space();
        let candidate_count = candidates.len();
        let mut pending = candidates.into_iter();
        let mut plan = MatchPlan::default();

        for destination in &self.config.destination_paths {
            if plan.assignments.len() >= candidate_count {
                break;
            }

            let free = match self.probe.free_space(destination) {
                Ok(free) => free,
                Err(e) => {
                    warn!(
                        destination = %destination.display(),
                        error = %e,
                        "Free space query failed, treating destination as full"
                    );
                    0
                }
            };

            if free <= required {
                debug!(
                    destination = %destination.display(),
                    free,
                    required,
                    "Destination lacks space for the largest admissible directory"
                );
                plan.skipped_destinations.push(destination.clone());
                continue;
            }

            let Some(candidate) = pending.next() else {
                break;
            };

            let task_number = self.task_counter.fetch_add(1, Ordering::Relaxed) + 1;
            plan.assignments.push(Assignment {
                task_id: format!("move-{task_number}"),
                source: candidate.path,
                destination: destination.clone(),
                size: candidate.size,
            });
        }

        plan.unassigned = pending.collect();

        if plan.assignments.is_empty() {
            info!(
                candidates = candidate_count,
                "No destination has enough free space"
            );
            return RoundPlan::DestinationsExhausted {
                candidates: candidate_count,
            };
        }

        info!(summary = %plan.summary(), "Round plan created");
        RoundPlan::Ready(plan)
    }
}
