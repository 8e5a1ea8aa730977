// Statistics reporting for stampede simulation

use crate::models::{CsvResultRow, SimulationConfig, SimulationResult, Strategy, StrategyStats};
use std::collections::BTreeMap;
use std::path::Path;

/// Reports the per-strategy results of a simulation run
#[derive(Debug)]
pub struct SimulationStats {
    /// Stats for each strategy
    stats: BTreeMap<Strategy, StrategyStats>,
    /// Requests issued per strategy
    total_requests: usize,
    /// Worker threads used
    threads: usize,
    /// Distinct keys in the workload
    keys: usize,
}

impl SimulationStats {
    /// Create SimulationStats from a SimulationResult
    pub fn from_result(result: &SimulationResult, config: &SimulationConfig) -> Self {
        Self {
            stats: result.stats.clone(),
            total_requests: result.total_requests,
            threads: config.threads,
            keys: config.keys,
        }
    }

    /// Stats for a single strategy, if it ran
    pub fn get(&self, strategy: Strategy) -> Option<&StrategyStats> {
        self.stats.get(&strategy)
    }

    /// Print a summary report of the simulation results
    pub fn print_summary(&self) {
        println!("\nStampede Simulation Summary");
        println!("===========================");
        println!("Requests per strategy: {}", self.total_requests);
        println!("Worker threads: {}", self.threads);
        println!("Distinct keys: {}", self.keys);

        println!("\nResults by Strategy:");
        println!(
            "{:<9} {:>9} {:>8} {:>8} {:>8} {:>8} {:>9} {:>10} {:>10} {:>10} {:>10} {:>10}",
            "Strategy",
            "Produced",
            "Cached%",
            "Timeout",
            "Failed",
            "Abandon",
            "Wall",
            "Req/sec",
            "Avg",
            "p50",
            "p90",
            "p99"
        );
        println!("{}", "-".repeat(124));

        for (strategy, stats) in &self.stats {
            println!(
                "{:<9} {:>9} {:>7.2}% {:>8} {:>8} {:>8} {:>8.3}s {:>10.0} {:>8.0}us {:>8}us {:>8}us {:>8}us",
                strategy.as_str(),
                stats.productions,
                stats.cached_rate(),
                stats.timeouts,
                stats.failures,
                stats.abandoned,
                stats.wall_time.as_secs_f64(),
                stats.throughput(),
                stats.latency.avg_ns() / 1000.0,
                stats.latency.percentiles.p50_ns / 1000,
                stats.latency.percentiles.p90_ns / 1000,
                stats.latency.percentiles.p99_ns / 1000,
            );
        }

        if let Some(store) = self.get(Strategy::Fragment).and_then(|stats| stats.store) {
            println!("\nFragment store at shutdown:");
            println!("  Entries cached:      {}", store.final_size);
            println!("  Entries created:     {}", store.entries_created);
            println!("  Abandoned replaced:  {}", store.abandoned_replaced);
            println!("  Evictions:           {}", store.evictions);
            println!("  Sweeps run:          {}", store.sweeps_run);
        }

        if let (Some(fragment), Some(naive)) =
            (self.get(Strategy::Fragment), self.get(Strategy::Naive))
        {
            if fragment.productions > 0 {
                println!(
                    "\nNaive cache ran {:.1}x as many productions as the fragment store.",
                    naive.productions as f64 / fragment.productions as f64
                );
            }
        }
    }

    /// Build one CSV row per strategy, in strategy order
    pub fn rows(&self) -> Vec<CsvResultRow> {
        self.stats
            .iter()
            .map(|(strategy, stats)| CsvResultRow {
                strategy: strategy.as_str().to_string(),
                threads: self.threads,
                keys: self.keys,
                requests: stats.requests,
                productions: stats.productions,
                cached: stats.cached,
                cached_rate: stats.cached_rate(),
                timeouts: stats.timeouts,
                failures: stats.failures,
                abandoned: stats.abandoned,
                wall_time_ms: stats.wall_time.as_millis(),
                throughput: stats.throughput(),
                avg_latency_ns: stats.latency.avg_ns(),
                min_latency_ns: stats.latency.min_ns,
                max_latency_ns: stats.latency.max_ns,
                p50_ns: stats.latency.percentiles.p50_ns,
                p90_ns: stats.latency.percentiles.p90_ns,
                p99_ns: stats.latency.percentiles.p99_ns,
                store_size: stats.store.map(|s| s.final_size),
                entries_created: stats.store.map(|s| s.entries_created),
                abandoned_replaced: stats.store.map(|s| s.abandoned_replaced),
                evictions: stats.store.map(|s| s.evictions),
                sweeps_run: stats.store.map(|s| s.sweeps_run),
            })
            .collect()
    }

    /// Export results to a CSV file
    pub fn export_csv(&self, path: &Path) -> Result<(), std::io::Error> {
        let mut writer = csv::Writer::from_path(path)?;
        for row in self.rows() {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    }
}
