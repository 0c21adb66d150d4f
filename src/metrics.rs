//! # Timing/Metrics (C7)
//!
//! Per-operation call counts and latency aggregates, reported once at the
//! end of a `backup()` or `purge()` run. Entirely non-functional — removing
//! this module changes no backup semantics, only what gets printed at the
//! end of a run.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

/// Accumulates per-operation timing samples for one run.
#[derive(Debug, Default)]
pub struct Metrics {
    samples: HashMap<&'static str, Vec<Duration>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f`, recording its wall-clock duration under `operation`.
    pub fn time<T>(&mut self, operation: &'static str, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let result = f();
        self.samples.entry(operation).or_default().push(start.elapsed());
        result
    }

    /// Records an already-elapsed duration under `operation`, for call sites
    /// that can't hand `self` to `time` because the timed work itself needs
    /// a `&mut Metrics` (it would otherwise alias this same borrow).
    pub fn record(&mut self, operation: &'static str, elapsed: Duration) {
        self.samples.entry(operation).or_default().push(elapsed);
    }

    /// Aggregates recorded samples into a sorted per-operation report.
    pub fn report(&self) -> Vec<OperationStats> {
        let mut stats: Vec<OperationStats> = self
            .samples
            .iter()
            .map(|(operation, durations)| {
                let count = durations.len();
                let total: Duration = durations.iter().sum();
                let mean = total / count as u32;

                let mut sorted = durations.clone();
                sorted.sort();
                let median = sorted[sorted.len() / 2];

                OperationStats {
                    operation,
                    count,
                    total,
                    mean,
                    median,
                }
            })
            .collect();

        stats.sort_by_key(|s| s.operation);
        stats
    }
}

/// Aggregated latency stats for a single named operation.
#[derive(Debug, Clone)]
pub struct OperationStats {
    pub operation: &'static str,
    pub count: usize,
    pub total: Duration,
    pub mean: Duration,
    pub median: Duration,
}

impl fmt::Display for OperationStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<24} count={:<6} total={:>10.3?} mean={:>10.3?} median={:>10.3?}",
            self.operation, self.count, self.total, self.mean, self.median
        )
    }
}

/// Operation names instrumented by the engine and purge driver.
pub mod ops {
    pub const METADATA_STREAM: &str = "metadata.stream";
    pub const OBJECT_EXISTS: &str = "object_store.exists";
    pub const OBJECT_DOWNLOAD: &str = "object_store.download";
    pub const OBJECT_ETAG: &str = "object_store.etag";
    pub const COMPUTE_SHA1: &str = "hash.compute_sha1";
    pub const BACKUP_FILE: &str = "engine.backup_file";
    pub const PURGE_SWEEP: &str = "purge.sweep";
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn report_aggregates_count_and_mean() {
        let mut metrics = Metrics::new();
        metrics.time("op", || sleep(Duration::from_millis(1)));
        metrics.time("op", || sleep(Duration::from_millis(1)));

        let report = metrics.report();
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].operation, "op");
        assert_eq!(report[0].count, 2);
    }

    #[test]
    fn report_is_sorted_by_operation_name() {
        let mut metrics = Metrics::new();
        metrics.time("zeta", || ());
        metrics.time("alpha", || ());

        let report = metrics.report();
        assert_eq!(report[0].operation, "alpha");
        assert_eq!(report[1].operation, "zeta");
    }
}
