//! Store Statistics
//!
//! [`StoreStatistics`] is an immutable snapshot taken by
//! [`FragmentStore::statistics`](crate::FragmentStore::statistics) for
//! observability polling. [`CacheMetrics`] flattens it into a `BTreeMap` so
//! reports always list their keys in the same order.

use crate::reclaimer::SweepReport;
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Flat, deterministically ordered metrics for reporting.
pub trait CacheMetrics {
    /// Metric name to value, sorted by name.
    fn metrics(&self) -> BTreeMap<String, f64>;

    /// Name of the caching strategy, for reports that compare several.
    fn strategy_name(&self) -> &'static str;
}

/// Point-in-time view of a fragment store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStatistics {
    pub(crate) cache_size: usize,
    pub(crate) observed_at: SystemTime,
    pub(crate) last_sweep: Option<SweepReport>,
    pub(crate) sweeps_run: u64,
    pub(crate) entries_created: u64,
    pub(crate) abandoned_replaced: u64,
    pub(crate) evictions: u64,
}

impl StoreStatistics {
    /// Number of entries at observation time.
    pub fn cache_size(&self) -> usize {
        self.cache_size
    }

    /// Wall-clock time the snapshot was taken.
    pub fn observed_at(&self) -> SystemTime {
        self.observed_at
    }

    /// Entries evicted by the most recent sweep; `None` before the first one.
    pub fn last_sweep_evicted(&self) -> Option<usize> {
        self.last_sweep.as_ref().map(|r| r.evicted)
    }

    /// Completion time of the most recent sweep; `None` before the first one.
    pub fn last_sweep_at(&self) -> Option<SystemTime> {
        self.last_sweep.as_ref().map(|r| r.finished_at)
    }

    /// Report of the most recent sweep.
    pub fn last_sweep(&self) -> Option<&SweepReport> {
        self.last_sweep.as_ref()
    }

    /// Sweeps completed since the store started.
    pub fn sweeps_run(&self) -> u64 {
        self.sweeps_run
    }

    /// Entries inserted by `get_or_create` misses.
    pub fn entries_created(&self) -> u64 {
        self.entries_created
    }

    /// Abandoned entries swapped for a fresh clone.
    pub fn abandoned_replaced(&self) -> u64 {
        self.abandoned_replaced
    }

    /// Entries removed by sweeps and explicit eviction.
    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    /// Converts the snapshot to a `BTreeMap` for reporting.
    ///
    /// Sweep keys are only present once a sweep has run, and timestamps are
    /// milliseconds since the Unix epoch.
    pub fn to_btreemap(&self) -> BTreeMap<String, f64> {
        let mut metrics = BTreeMap::new();

        metrics.insert("abandoned_replaced".to_string(), self.abandoned_replaced as f64);
        metrics.insert("cache_size".to_string(), self.cache_size as f64);
        metrics.insert("entries_created".to_string(), self.entries_created as f64);
        metrics.insert("evictions".to_string(), self.evictions as f64);
        metrics.insert("observed_at_ms".to_string(), epoch_millis(self.observed_at));
        metrics.insert("sweeps_run".to_string(), self.sweeps_run as f64);

        if let Some(report) = &self.last_sweep {
            metrics.insert(
                "last_sweep_duration_ms".to_string(),
                report.duration.as_secs_f64() * 1000.0,
            );
            metrics.insert("last_sweep_evicted".to_string(), report.evicted as f64);
            metrics.insert("last_sweep_scanned".to_string(), report.scanned as f64);
            metrics.insert("last_sweep_at_ms".to_string(), epoch_millis(report.finished_at));
        }

        metrics
    }
}

fn epoch_millis(at: SystemTime) -> f64 {
    at.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64() * 1000.0)
        .unwrap_or(0.0)
}
