// Data models for stampede simulation

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Caching strategies that can be put under load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Strategy {
    /// `fragment_cache::FragmentStore` driven through `fetch_or_produce`
    Fragment,
    /// Mutex-guarded LRU with a TTL check; every concurrent miss recomputes
    Naive,
    /// Moka cache (external crate for comparison)
    Moka,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Fragment => "fragment",
            Strategy::Naive => "naive",
            Strategy::Moka => "moka",
        }
    }

    /// Parse a strategy name as given on the command line
    pub fn from_name(name: &str) -> Option<Strategy> {
        match name.trim().to_lowercase().as_str() {
            "fragment" | "frag" => Some(Strategy::Fragment),
            "naive" | "lru" => Some(Strategy::Naive),
            "moka" => Some(Strategy::Moka),
            _ => None,
        }
    }

    /// Get all available strategies
    pub fn all() -> Vec<Strategy> {
        vec![Strategy::Fragment, Strategy::Naive, Strategy::Moka]
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for a simulation run
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Number of worker threads issuing requests
    pub threads: usize,
    /// Requests issued by each worker
    pub requests_per_thread: usize,
    /// Number of distinct fragment keys
    pub keys: usize,
    /// Zipf exponent for key popularity (0 = uniform)
    pub skew: f64,
    /// Time-to-live of a produced fragment
    pub ttl: Duration,
    /// Simulated backend latency of one production
    pub produce_time: Duration,
    /// Probability that a production fails
    pub failure_rate: f64,
    /// Probability that a producer crashes while holding the update lock
    pub abandon_rate: f64,
    /// How long a reader waits for a first production
    pub wait: Duration,
    /// Abandonment ceiling for the fragment store
    pub lock_hold: Duration,
    /// Reclaimer interval for the fragment store
    pub sweep_interval: Duration,
    /// Strategies to run, in order
    pub strategies: Vec<Strategy>,
    /// Seed for the workload generator
    pub seed: u64,
}

impl SimulationConfig {
    /// Total number of requests issued per strategy
    pub fn total_requests(&self) -> usize {
        self.threads * self.requests_per_thread
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            threads: 8,
            requests_per_thread: 2_000,
            keys: 100,
            skew: 1.0,
            ttl: Duration::from_millis(200),
            produce_time: Duration::from_millis(5),
            failure_rate: 0.0,
            abandon_rate: 0.0,
            wait: Duration::from_secs(1),
            lock_hold: Duration::from_millis(500),
            sweep_interval: Duration::from_millis(250),
            strategies: Strategy::all(),
            seed: 42,
        }
    }
}

/// Results of a simulation run
#[derive(Debug)]
pub struct SimulationResult {
    /// Statistics for each strategy
    pub stats: BTreeMap<Strategy, StrategyStats>,
    /// Total number of requests issued per strategy
    pub total_requests: usize,
    /// Duration of the whole simulation
    pub duration: Duration,
}

/// Outcome counters for a single strategy
#[derive(Debug, Default, Clone)]
pub struct StrategyStats {
    /// Requests issued
    pub requests: u64,
    /// Backend productions started
    pub productions: u64,
    /// Requests answered without running a production
    pub cached: u64,
    /// Readers that gave up waiting for a first production
    pub timeouts: u64,
    /// Productions that returned an error
    pub failures: u64,
    /// Producers that crashed before caching a result
    pub abandoned: u64,
    /// Wall time of the strategy run
    pub wall_time: Duration,
    /// Latency of a whole request as seen by the caller
    pub latency: LatencyStats,
    /// Final store statistics (fragment strategy only)
    pub store: Option<StoreSummary>,
}

impl StrategyStats {
    /// Create new empty statistics
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold another worker's counters into this one
    pub fn absorb(&mut self, other: &StrategyStats) {
        self.requests += other.requests;
        self.productions += other.productions;
        self.cached += other.cached;
        self.timeouts += other.timeouts;
        self.failures += other.failures;
        self.abandoned += other.abandoned;
    }

    /// Share of requests served from cache as percentage
    pub fn cached_rate(&self) -> f64 {
        if self.requests > 0 {
            (self.cached as f64 / self.requests as f64) * 100.0
        } else {
            0.0
        }
    }

    /// Backend productions per thousand requests
    pub fn productions_per_mille(&self) -> f64 {
        if self.requests > 0 {
            self.productions as f64 * 1000.0 / self.requests as f64
        } else {
            0.0
        }
    }

    /// Requests completed per second of wall time
    pub fn throughput(&self) -> f64 {
        let secs = self.wall_time.as_secs_f64();
        if secs > 0.0 {
            self.requests as f64 / secs
        } else {
            0.0
        }
    }
}

/// Snapshot of the fragment store after a run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StoreSummary {
    pub final_size: usize,
    pub entries_created: u64,
    pub abandoned_replaced: u64,
    pub evictions: u64,
    pub sweeps_run: u64,
}

/// Latency statistics for whole requests
#[derive(Debug, Clone, Default)]
pub struct LatencyStats {
    /// Total time spent (nanoseconds)
    pub total_ns: u64,
    /// Number of requests
    pub count: u64,
    /// Minimum latency (nanoseconds)
    pub min_ns: u64,
    /// Maximum latency (nanoseconds)
    pub max_ns: u64,
    /// Latency percentiles
    pub percentiles: LatencyPercentiles,
}

impl LatencyStats {
    /// Calculate average latency in nanoseconds
    pub fn avg_ns(&self) -> f64 {
        if self.count > 0 {
            self.total_ns as f64 / self.count as f64
        } else {
            0.0
        }
    }
}

/// Latency percentiles
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LatencyPercentiles {
    pub p50_ns: u64,
    pub p90_ns: u64,
    pub p99_ns: u64,
}

/// CSV export row for simulation results
#[derive(Debug, Serialize)]
pub struct CsvResultRow {
    pub strategy: String,
    pub threads: usize,
    pub keys: usize,
    pub requests: u64,
    pub productions: u64,
    pub cached: u64,
    pub cached_rate: f64,
    pub timeouts: u64,
    pub failures: u64,
    pub abandoned: u64,
    pub wall_time_ms: u128,
    pub throughput: f64,
    pub avg_latency_ns: f64,
    pub min_latency_ns: u64,
    pub max_latency_ns: u64,
    pub p50_ns: u64,
    pub p90_ns: u64,
    pub p99_ns: u64,
    // Fragment store snapshot, empty for other strategies
    pub store_size: Option<usize>,
    pub entries_created: Option<u64>,
    pub abandoned_replaced: Option<u64>,
    pub evictions: Option<u64>,
    pub sweeps_run: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_names_round_trip() {
        for strategy in Strategy::all() {
            assert_eq!(Strategy::from_name(strategy.as_str()), Some(strategy));
        }
        assert_eq!(Strategy::from_name(" Moka "), Some(Strategy::Moka));
        assert_eq!(Strategy::from_name("redis"), None);
    }

    #[test]
    fn test_rates_on_empty_stats() {
        let stats = StrategyStats::new();
        assert_eq!(stats.cached_rate(), 0.0);
        assert_eq!(stats.productions_per_mille(), 0.0);
        assert_eq!(stats.throughput(), 0.0);
        assert_eq!(stats.latency.avg_ns(), 0.0);
    }

    #[test]
    fn test_absorb_sums_counters() {
        let mut total = StrategyStats {
            requests: 10,
            productions: 2,
            cached: 8,
            ..Default::default()
        };
        let worker = StrategyStats {
            requests: 10,
            productions: 1,
            cached: 7,
            timeouts: 1,
            failures: 1,
            abandoned: 0,
            ..Default::default()
        };
        total.absorb(&worker);
        assert_eq!(total.requests, 20);
        assert_eq!(total.productions, 3);
        assert_eq!(total.cached, 15);
        assert_eq!(total.cached_rate(), 75.0);
        assert_eq!(total.productions_per_mille(), 150.0);
    }
}
