//! Simulation runner for stampede scenarios
//!
//! Every selected strategy is driven by the same deterministic workload: a
//! pool of worker threads issues requests for Zipf-distributed fragment keys
//! and, on a miss, calls a slow backend that may fail or crash mid-production.
//!
//! ## Crashed producers
//!
//! For the fragment strategy a crash is simulated by a short-lived thread that
//! takes the update lock and exits without releasing it, which is exactly the
//! situation abandonment recovery exists for. The other strategies have no
//! lock to leak, so a crash there is a production that never caches its
//! result.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use fragment_cache::{
    fetch_or_produce, FetchError, FetchOptions, Fetched, FragmentStore, FragmentStoreConfig,
};
use parking_lot::Mutex;
use rand::Rng;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::{
    LatencyPercentiles, LatencyStats, SimulationConfig, SimulationResult, StoreSummary, Strategy,
    StrategyStats,
};
use crate::workload::{Outcome, Request, Workload, ZipfKeys};

// External caches for comparison
use lru::LruCache;
use moka::sync::Cache as MokaCache;

// Use ahash for faster hashing with Moka
use ahash::RandomState as AHashRandomState;

/// Samples kept per worker for percentile calculation
const MAX_SAMPLES: usize = 5000;

/// Failure reported by the simulated backend
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("backend failed to render {0}")]
    Failed(String),
    #[error("producer crashed while rendering {0}")]
    Crashed(String),
}

/// Slow backend that renders fragments
#[derive(Debug, Clone, Copy)]
struct Backend {
    produce_time: Duration,
}

impl Backend {
    fn produce(&self, key: &str, outcome: Outcome) -> Result<String, BackendError> {
        if !self.produce_time.is_zero() {
            thread::sleep(self.produce_time);
        }
        match outcome {
            Outcome::Succeed => Ok(format!("<div id=\"{key}\"></div>")),
            Outcome::Fail => Err(BackendError::Failed(key.to_string())),
            Outcome::Crash => Err(BackendError::Crashed(key.to_string())),
        }
    }
}

/// Tracks request latency for a single worker
#[derive(Debug)]
struct LatencyTracker {
    /// Total time spent (nanoseconds)
    total_ns: u64,
    /// Number of requests
    count: u64,
    /// Minimum latency (nanoseconds)
    min_ns: u64,
    /// Maximum latency (nanoseconds)
    max_ns: u64,
    /// Sample reservoir for percentile calculation
    samples: Vec<u64>,
}

impl LatencyTracker {
    fn new() -> Self {
        Self {
            total_ns: 0,
            count: 0,
            min_ns: u64::MAX,
            max_ns: 0,
            samples: Vec::with_capacity(MAX_SAMPLES),
        }
    }

    #[inline]
    fn record<R: Rng + ?Sized>(&mut self, latency_ns: u64, rng: &mut R) {
        self.total_ns = self.total_ns.saturating_add(latency_ns);
        self.count += 1;
        self.min_ns = self.min_ns.min(latency_ns);
        self.max_ns = self.max_ns.max(latency_ns);

        // Reservoir sampling for percentiles
        if self.samples.len() < MAX_SAMPLES {
            self.samples.push(latency_ns);
        } else {
            let slot = rng.gen_range(0..self.count);
            if let Ok(slot) = usize::try_from(slot) {
                if slot < MAX_SAMPLES {
                    self.samples[slot] = latency_ns;
                }
            }
        }
    }

    /// Combine the workers' trackers into one set of statistics
    fn merge(trackers: Vec<LatencyTracker>) -> LatencyStats {
        let mut stats = LatencyStats {
            min_ns: u64::MAX,
            ..Default::default()
        };
        let mut samples = Vec::new();
        for tracker in trackers {
            stats.total_ns = stats.total_ns.saturating_add(tracker.total_ns);
            stats.count += tracker.count;
            stats.min_ns = stats.min_ns.min(tracker.min_ns);
            stats.max_ns = stats.max_ns.max(tracker.max_ns);
            samples.extend(tracker.samples);
        }
        if stats.count == 0 {
            stats.min_ns = 0;
        }
        stats.percentiles = percentiles(&mut samples);
        stats
    }
}

fn percentiles(samples: &mut [u64]) -> LatencyPercentiles {
    if samples.is_empty() {
        return LatencyPercentiles::default();
    }

    samples.sort_unstable();
    let len = samples.len();
    let at = |percent: usize| samples[(len * percent / 100).min(len - 1)];

    LatencyPercentiles {
        p50_ns: at(50),
        p90_ns: at(90),
        p99_ns: at(99),
    }
}

fn elapsed_ns(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_nanos()).unwrap_or(u64::MAX)
}

/// Runner for stampede simulations
#[derive(Debug)]
pub struct SimulationRunner {
    config: SimulationConfig,
}

impl SimulationRunner {
    /// Create a new simulation runner
    pub fn new(config: SimulationConfig) -> Self {
        Self { config }
    }

    /// Run every configured strategy in turn against the same workload.
    pub fn run(&self) -> Result<SimulationResult, String> {
        self.validate()?;

        let started = Instant::now();
        let mut result = SimulationResult {
            stats: Default::default(),
            total_requests: self.config.total_requests(),
            duration: Duration::ZERO,
        };

        for &strategy in &self.config.strategies {
            println!("Running strategy: {strategy}");
            info!(%strategy, threads = self.config.threads, "strategy run started");
            let stats = self.run_strategy(strategy)?;
            info!(
                %strategy,
                productions = stats.productions,
                wall_time_ms = stats.wall_time.as_millis() as u64,
                "strategy run finished"
            );
            result.stats.insert(strategy, stats);
        }

        result.duration = started.elapsed();
        Ok(result)
    }

    fn validate(&self) -> Result<(), String> {
        let config = &self.config;
        if config.threads == 0 {
            return Err("at least one worker thread is required".to_string());
        }
        if config.requests_per_thread == 0 {
            return Err("at least one request per thread is required".to_string());
        }
        if config.keys == 0 {
            return Err("at least one key is required".to_string());
        }
        for (name, rate) in [
            ("failure rate", config.failure_rate),
            ("abandon rate", config.abandon_rate),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                return Err(format!("{name} must be between 0 and 1, got {rate}"));
            }
        }
        if config.failure_rate + config.abandon_rate > 1.0 {
            return Err("failure rate and abandon rate must not add up to more than 1".to_string());
        }
        if config.strategies.is_empty() {
            return Err("no strategies selected".to_string());
        }
        Ok(())
    }

    fn run_strategy(&self, strategy: Strategy) -> Result<StrategyStats, String> {
        match strategy {
            Strategy::Fragment => self.run_fragment(),
            Strategy::Naive => Ok(self.run_naive()),
            Strategy::Moka => Ok(self.run_moka()),
        }
    }

    fn backend(&self) -> Backend {
        Backend {
            produce_time: self.config.produce_time,
        }
    }

    fn run_fragment(&self) -> Result<StrategyStats, String> {
        let store = FragmentStore::init(
            FragmentStoreConfig::new()
                .with_initial_capacity(self.config.keys)
                .with_max_lock_hold(self.config.lock_hold)
                .with_sweep_interval(Some(self.config.sweep_interval)),
        )
        .map_err(|err| format!("failed to start fragment store: {err}"))?;

        let backend = self.backend();
        let ttl = self.config.ttl;
        let options = FetchOptions::new(ttl).with_wait(self.config.wait);

        let mut stats = self.drive(|request, stats| {
            let outcome = match request.outcome {
                Outcome::Crash => {
                    if crash_holding_lock(&store, &request.key, ttl) {
                        stats.abandoned += 1;
                        return;
                    }
                    // nothing to produce, so nothing to crash
                    Outcome::Succeed
                }
                other => other,
            };

            let result = fetch_or_produce(&store, &request.key, &options, || {
                stats.productions += 1;
                backend.produce(&request.key, outcome)
            });
            match result {
                Ok(Fetched::Cached(_)) => stats.cached += 1,
                Ok(_) => {}
                Err(FetchError::TimedOut(_)) => stats.timeouts += 1,
                Err(FetchError::Producer(err)) => {
                    debug!(error = %err, "production failed");
                    stats.failures += 1;
                }
                Err(FetchError::Strategy(err)) => warn!(error = %err, "unexpected strategy error"),
            }
        });

        let statistics = store.statistics();
        stats.store = Some(StoreSummary {
            final_size: statistics.cache_size(),
            entries_created: statistics.entries_created(),
            abandoned_replaced: statistics.abandoned_replaced(),
            evictions: statistics.evictions(),
            sweeps_run: statistics.sweeps_run(),
        });
        store.destroy();
        Ok(stats)
    }

    fn run_naive(&self) -> StrategyStats {
        let capacity = NonZeroUsize::new(self.config.keys).unwrap_or(NonZeroUsize::MIN);
        let cache: Mutex<LruCache<String, (Instant, Arc<str>)>> = Mutex::new(LruCache::new(capacity));
        let backend = self.backend();
        let ttl = self.config.ttl;

        self.drive(|request, stats| {
            let hit = cache
                .lock()
                .get(request.key.as_str())
                .filter(|(stored_at, _)| stored_at.elapsed() < ttl)
                .is_some();
            if hit {
                stats.cached += 1;
                return;
            }

            // every concurrent miss recomputes
            stats.productions += 1;
            match backend.produce(&request.key, request.outcome) {
                Ok(content) => {
                    cache
                        .lock()
                        .put(request.key.clone(), (Instant::now(), Arc::from(content)));
                }
                Err(BackendError::Failed(_)) => stats.failures += 1,
                Err(BackendError::Crashed(_)) => stats.abandoned += 1,
            }
        })
    }

    fn run_moka(&self) -> StrategyStats {
        let cache: MokaCache<String, Arc<str>, AHashRandomState> = MokaCache::builder()
            .max_capacity(self.config.keys as u64)
            .initial_capacity(self.config.keys)
            .time_to_live(self.config.ttl)
            .build_with_hasher(AHashRandomState::default());
        let backend = self.backend();

        self.drive(|request, stats| {
            let mut produced = false;
            let result = cache.try_get_with(request.key.clone(), || {
                produced = true;
                backend
                    .produce(&request.key, request.outcome)
                    .map(Arc::<str>::from)
            });
            if produced {
                stats.productions += 1;
            }
            match result {
                Ok(_) if !produced => stats.cached += 1,
                Ok(_) => {}
                Err(err) => match *err {
                    BackendError::Failed(_) => stats.failures += 1,
                    BackendError::Crashed(_) => stats.abandoned += 1,
                },
            }
        })
    }

    /// Run the workload on `threads` workers, feeding each request to
    /// `handle`, and fold the workers' counters together.
    fn drive<F>(&self, handle: F) -> StrategyStats
    where
        F: Fn(&Request, &mut StrategyStats) + Sync,
    {
        let keys = ZipfKeys::new(self.config.keys, self.config.skew);
        let requests = self.config.requests_per_thread;
        let (failure_rate, abandon_rate, seed) = (
            self.config.failure_rate,
            self.config.abandon_rate,
            self.config.seed,
        );
        let handle = &handle;

        let started = Instant::now();
        let workers: Vec<(StrategyStats, LatencyTracker)> = thread::scope(|scope| {
            let handles: Vec<_> = (0..self.config.threads)
                .map(|worker| {
                    let keys = keys.clone();
                    scope.spawn(move || {
                        let mut workload = Workload::new(keys, failure_rate, abandon_rate, seed, worker);
                        let mut stats = StrategyStats::new();
                        let mut tracker = LatencyTracker::new();
                        for _ in 0..requests {
                            let request = workload.next_request();
                            let start = Instant::now();
                            handle(&request, &mut stats);
                            stats.requests += 1;
                            tracker.record(elapsed_ns(start), workload.rng());
                        }
                        (stats, tracker)
                    })
                })
                .collect();

            handles
                .into_iter()
                .filter_map(|handle| match handle.join() {
                    Ok(worker) => Some(worker),
                    Err(_) => {
                        warn!("simulation worker panicked");
                        None
                    }
                })
                .collect()
        });

        let mut total = StrategyStats::new();
        let mut trackers = Vec::with_capacity(workers.len());
        for (stats, tracker) in workers {
            total.absorb(&stats);
            trackers.push(tracker);
        }
        total.wall_time = started.elapsed();
        total.latency = LatencyTracker::merge(trackers);
        total
    }
}

/// Take the update lock on `key` from a thread that exits without releasing
/// it. Returns whether the lock was taken.
fn crash_holding_lock(store: &FragmentStore, key: &str, ttl: Duration) -> bool {
    thread::scope(|scope| {
        scope
            .spawn(|| store.get_or_create(key, None, ttl).try_acquire_for_update(None))
            .join()
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn config(strategies: Vec<Strategy>) -> SimulationConfig {
        SimulationConfig {
            threads: 4,
            requests_per_thread: 200,
            keys: 5,
            skew: 1.0,
            ttl: Duration::from_secs(60),
            produce_time: Duration::from_millis(1),
            failure_rate: 0.0,
            abandon_rate: 0.0,
            wait: Duration::from_secs(5),
            lock_hold: Duration::from_secs(60),
            sweep_interval: Duration::from_millis(50),
            strategies,
            seed: 7,
        }
    }

    #[test]
    fn test_percentiles() {
        let mut samples: Vec<u64> = (1..=100).rev().collect();
        let p = percentiles(&mut samples);
        assert_eq!(p.p50_ns, 51);
        assert_eq!(p.p90_ns, 91);
        assert_eq!(p.p99_ns, 100);
        assert_eq!(percentiles(&mut []), LatencyPercentiles::default());
    }

    #[test]
    fn test_tracker_merge() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut a = LatencyTracker::new();
        let mut b = LatencyTracker::new();
        a.record(10, &mut rng);
        a.record(30, &mut rng);
        b.record(20, &mut rng);

        let stats = LatencyTracker::merge(vec![a, b, LatencyTracker::new()]);
        assert_eq!(stats.count, 3);
        assert_eq!(stats.total_ns, 60);
        assert_eq!(stats.min_ns, 10);
        assert_eq!(stats.max_ns, 30);
        assert_eq!(stats.avg_ns(), 20.0);
        assert_eq!(stats.percentiles.p50_ns, 20);

        let empty = LatencyTracker::merge(Vec::new());
        assert_eq!(empty.min_ns, 0);
    }

    #[test]
    fn test_reservoir_is_bounded() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut tracker = LatencyTracker::new();
        for i in 0..(MAX_SAMPLES as u64 * 3) {
            tracker.record(i, &mut rng);
        }
        assert_eq!(tracker.samples.len(), MAX_SAMPLES);
        assert_eq!(tracker.count, MAX_SAMPLES as u64 * 3);
    }

    #[test]
    fn test_rejects_invalid_config() {
        let mut bad = config(Strategy::all());
        bad.threads = 0;
        assert!(SimulationRunner::new(bad).run().is_err());

        let mut bad = config(Strategy::all());
        bad.failure_rate = 0.7;
        bad.abandon_rate = 0.7;
        assert!(SimulationRunner::new(bad).run().is_err());

        assert!(SimulationRunner::new(config(Vec::new())).run().is_err());
    }

    #[test]
    fn test_fragment_produces_each_key_once() {
        let result = SimulationRunner::new(config(vec![Strategy::Fragment]))
            .run()
            .unwrap();
        let stats = &result.stats[&Strategy::Fragment];

        assert_eq!(stats.requests, 800);
        assert!(stats.productions >= 1 && stats.productions <= 5);
        assert_eq!(stats.cached + stats.productions, stats.requests);
        assert_eq!(stats.timeouts, 0);
        assert_eq!(stats.latency.count, 800);

        let store = stats.store.unwrap();
        assert_eq!(store.final_size as u64, stats.productions);
        assert_eq!(store.entries_created, stats.productions);
    }

    #[test]
    fn test_moka_coalesces_productions() {
        let result = SimulationRunner::new(config(vec![Strategy::Moka])).run().unwrap();
        let stats = &result.stats[&Strategy::Moka];
        assert!(stats.productions >= 1);
        assert!(stats.productions < stats.requests / 10);
        assert_eq!(stats.cached + stats.productions, stats.requests);
        assert!(stats.store.is_none());
    }

    #[test]
    fn test_naive_serves_from_cache_after_miss() {
        let result = SimulationRunner::new(config(vec![Strategy::Naive])).run().unwrap();
        let stats = &result.stats[&Strategy::Naive];
        assert!(stats.productions >= 1);
        assert_eq!(stats.cached + stats.productions, stats.requests);
        assert!(stats.cached > 0);
    }

    #[test]
    fn test_fragment_crashed_producers_time_out_readers() {
        let mut config = config(vec![Strategy::Fragment]);
        config.threads = 2;
        config.requests_per_thread = 20;
        config.keys = 3;
        config.abandon_rate = 1.0;
        config.wait = Duration::from_millis(1);

        let result = SimulationRunner::new(config).run().unwrap();
        let stats = &result.stats[&Strategy::Fragment];
        assert!(stats.abandoned >= 1 && stats.abandoned <= 3);
        assert_eq!(stats.productions, 0);
        assert_eq!(stats.abandoned + stats.timeouts, stats.requests);
    }

    #[test]
    fn test_failures_are_counted() {
        let mut config = config(vec![Strategy::Naive]);
        config.failure_rate = 1.0;
        let result = SimulationRunner::new(config).run().unwrap();
        let stats = &result.stats[&Strategy::Naive];
        assert_eq!(stats.failures, stats.requests);
        assert_eq!(stats.cached, 0);
    }
}
