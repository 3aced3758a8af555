//! End-to-end rebalancing tests
//!
//! Drives whole runs against temporary source and destination trees. Free
//! space is simulated per destination so the tests do not depend on the
//! host filesystem.
//!
//! Run with: cargo test -p dirshift-rebalancer --test rebalance

use dirshift_core::{FsProbe, Result, SizeProbe};
use dirshift_rebalancer::{
    DirectoryMover, Executor, ExecutorConfig, RebalancerConfig, Rebalancer, StopReason,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Each destination has a fixed capacity; free space shrinks as data lands
struct CapacityProbe {
    capacity: HashMap<PathBuf, u64>,
}

impl SizeProbe for CapacityProbe {
    fn free_space(&self, path: &Path) -> Result<u64> {
        let capacity = self.capacity.get(path).copied().unwrap_or(0);
        let used = FsProbe::new().subtree_size(path)?;
        Ok(capacity.saturating_sub(used))
    }

    fn subtree_size(&self, path: &Path) -> Result<u64> {
        FsProbe::new().subtree_size(path)
    }
}

fn make_volume(root: &Path, name: &str, bytes: usize) -> PathBuf {
    let dir = root.join(name);
    std::fs::create_dir_all(dir.join("inner")).unwrap();
    std::fs::write(dir.join("inner/data.bin"), vec![9u8; bytes]).unwrap();
    dir
}

fn write_config(dir: &Path, sources: &[PathBuf], destinations: &[PathBuf]) -> PathBuf {
    let list = |paths: &[PathBuf]| {
        paths
            .iter()
            .map(|p| format!("  - {}\n", p.display()))
            .collect::<String>()
    };
    let yaml = format!(
        "fromPaths:\n{}toPaths:\n{}fromPathFilter:\n  minSize: 10\n  maxSize: 100\n  prefix: vol_\n",
        list(sources),
        list(destinations)
    );
    let path = dir.join("config.yaml");
    std::fs::write(&path, yaml).unwrap();
    path
}

fn build(config: &RebalancerConfig, capacity: &[(PathBuf, u64)]) -> Rebalancer {
    let probe = CapacityProbe {
        capacity: capacity.iter().cloned().collect(),
    };
    let executor = Executor::new(
        ExecutorConfig::default(),
        DirectoryMover::from_settings(&config.shift.transfer),
    );
    Rebalancer::new(config, Arc::new(probe), executor)
}

#[tokio::test]
async fn test_drains_all_sources() {
    let temp_dir = TempDir::new().unwrap();
    let src1 = temp_dir.path().join("a1");
    let src2 = temp_dir.path().join("a2");
    let dst1 = temp_dir.path().join("b1");
    let dst2 = temp_dir.path().join("b2");
    for d in [&dst1, &dst2] {
        std::fs::create_dir_all(d).unwrap();
    }

    make_volume(&src1, "vol_1", 20);
    make_volume(&src1, "vol_2", 30);
    make_volume(&src2, "vol_3", 40);
    make_volume(&src2, "tiny_vol", 50);
    make_volume(&src2, "vol_small", 5);

    let config_path = write_config(
        temp_dir.path(),
        &[src1.clone(), src2.clone()],
        &[dst1.clone(), dst2.clone()],
    );
    let config = RebalancerConfig::from_file(&config_path).unwrap();
    let mut rebalancer = build(&config, &[(dst1.clone(), 10_000), (dst2.clone(), 10_000)]);

    let outcome = rebalancer.run().await.unwrap();

    assert_eq!(outcome.reason, StopReason::SourcesExhausted);
    assert_eq!(outcome.moved, 3);
    assert_eq!(outcome.bytes_moved, 90);
    assert!(outcome.failures.is_empty());

    // Ineligible directories stay behind
    assert!(src2.join("tiny_vol").exists());
    assert!(src2.join("vol_small").exists());
    assert!(!src1.join("vol_1").exists());
    assert!(!src1.join("vol_2").exists());
    assert!(!src2.join("vol_3").exists());

    let moved: usize = [&dst1, &dst2]
        .iter()
        .map(|d| std::fs::read_dir(d).unwrap().count())
        .sum();
    assert_eq!(moved, 3);
}

#[tokio::test]
async fn test_stops_when_destinations_fill() {
    let temp_dir = TempDir::new().unwrap();
    let src = temp_dir.path().join("a1");
    let dst = temp_dir.path().join("b1");
    std::fs::create_dir_all(&dst).unwrap();

    make_volume(&src, "vol_1", 60);
    make_volume(&src, "vol_2", 60);
    make_volume(&src, "vol_3", 60);
    make_volume(&src, "vol_4", 60);

    let config_path = write_config(temp_dir.path(), &[src.clone()], &[dst.clone()]);
    let config = RebalancerConfig::from_file(&config_path).unwrap();
    // Free space goes 250, 190, 130, then 70 which no longer exceeds max_size
    let mut rebalancer = build(&config, &[(dst.clone(), 250)]);

    let outcome = rebalancer.run().await.unwrap();

    assert_eq!(outcome.reason, StopReason::DestinationsExhausted);
    assert_eq!(outcome.moved, 3);
    assert_eq!(outcome.rounds, 3);
    assert_eq!(std::fs::read_dir(&src).unwrap().count(), 1);
    assert!(FsProbe::new().subtree_size(&dst).unwrap() <= 250);
}

#[tokio::test]
async fn test_collision_goes_to_ledger_and_run_continues() {
    let temp_dir = TempDir::new().unwrap();
    let src1 = temp_dir.path().join("a1");
    let src2 = temp_dir.path().join("a2");
    let dst1 = temp_dir.path().join("b1");
    let dst2 = temp_dir.path().join("b2");
    std::fs::create_dir_all(&dst2).unwrap();

    make_volume(&src1, "vol_dup", 20);
    make_volume(&src2, "vol_ok", 20);
    // Pre-existing entry with the same name at the first destination
    std::fs::create_dir_all(dst1.join("vol_dup")).unwrap();

    let config_path = write_config(
        temp_dir.path(),
        &[src1.clone(), src2.clone()],
        &[dst1.clone(), dst2.clone()],
    );
    let config = RebalancerConfig::from_file(&config_path).unwrap();
    let mut rebalancer = build(&config, &[(dst1.clone(), 10_000), (dst2.clone(), 10_000)]);

    let outcome = rebalancer.run().await.unwrap();

    assert_eq!(outcome.reason, StopReason::SourcesExhausted);
    assert_eq!(outcome.moved, 1);
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].path, src1.join("vol_dup"));
    assert!(src1.join("vol_dup/inner/data.bin").exists());
    assert!(dst2.join("vol_ok/inner/data.bin").exists());
    assert_eq!(rebalancer.ledger().render_report().lines().count(), 2);
}
