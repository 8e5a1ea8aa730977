use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use stampede_simulator::models::{SimulationConfig, Strategy};
use stampede_simulator::runner::SimulationRunner;
use stampede_simulator::stats::SimulationStats;

/// Cache stampede simulator CLI
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

/// Subcommands for the CLI
#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay a burst of requests against each strategy
    Simulate {
        /// Number of worker threads issuing requests
        #[arg(long, default_value = "8")]
        threads: usize,

        /// Requests issued by each worker
        #[arg(long, default_value = "2000")]
        requests: usize,

        /// Number of distinct fragment keys
        #[arg(long, default_value = "100")]
        keys: usize,

        /// Zipf exponent for key popularity (0 = uniform)
        #[arg(long, default_value = "1.0")]
        skew: f64,

        /// Fragment time-to-live in milliseconds
        #[arg(long, default_value = "200")]
        ttl_ms: u64,

        /// Backend latency of one production in milliseconds
        #[arg(long, default_value = "5")]
        produce_ms: u64,

        /// Probability that a production fails
        #[arg(long, default_value = "0.0")]
        failure_rate: f64,

        /// Probability that a producer crashes while holding the update lock
        #[arg(long, default_value = "0.0")]
        abandon_rate: f64,

        /// How long a reader waits for a first production, in milliseconds
        #[arg(long, default_value = "1000")]
        wait_ms: u64,

        /// Abandonment ceiling for held update locks, in milliseconds
        #[arg(long, default_value = "500")]
        lock_hold_ms: u64,

        /// Reclaimer interval in milliseconds
        #[arg(long, default_value = "250")]
        sweep_ms: u64,

        /// Strategies to simulate (fragment, naive, moka)
        #[arg(short, long, value_name = "STRATEGIES", num_args = 1.., value_delimiter = ',')]
        strategies: Option<Vec<String>>,

        /// Export results to CSV file
        #[arg(long, value_name = "PATH")]
        output_csv: Option<PathBuf>,

        /// Seed for the workload generator
        #[arg(long, default_value = "42")]
        seed: u64,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let args = Args::parse();

    match args.command {
        Commands::Simulate {
            threads,
            requests,
            keys,
            skew,
            ttl_ms,
            produce_ms,
            failure_rate,
            abandon_rate,
            wait_ms,
            lock_hold_ms,
            sweep_ms,
            strategies,
            output_csv,
            seed,
        } => {
            let config = SimulationConfig {
                threads,
                requests_per_thread: requests,
                keys,
                skew,
                ttl: Duration::from_millis(ttl_ms),
                produce_time: Duration::from_millis(produce_ms),
                failure_rate,
                abandon_rate,
                wait: Duration::from_millis(wait_ms),
                lock_hold: Duration::from_millis(lock_hold_ms),
                sweep_interval: Duration::from_millis(sweep_ms),
                strategies: parse_strategies(strategies.as_deref()),
                seed,
            };
            run_simulation(config, output_csv)
        }
    }
}

/// Install a global tracing subscriber honouring `RUST_LOG` (default: warn)
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Resolve strategy names, falling back to all strategies
fn parse_strategies(names: Option<&[String]>) -> Vec<Strategy> {
    let Some(names) = names.filter(|names| !names.is_empty()) else {
        return Strategy::all();
    };

    let mut selected = Vec::new();
    for name in names {
        match Strategy::from_name(name) {
            Some(strategy) if !selected.contains(&strategy) => selected.push(strategy),
            Some(_) => {}
            None => println!("Warning: Unknown strategy '{name}', skipping"),
        }
    }
    if selected.is_empty() {
        println!("No valid strategies selected, using all available strategies");
        Strategy::all()
    } else {
        selected
    }
}

/// Run the simulation with the given configuration
fn run_simulation(
    config: SimulationConfig,
    output_csv: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("Stampede Simulation");
    println!("===================");
    println!(
        "Workers: {} x {} requests over {} keys (skew {})",
        config.threads, config.requests_per_thread, config.keys, config.skew
    );
    println!(
        "TTL: {:?}, production: {:?}, reader wait: {:?}",
        config.ttl, config.produce_time, config.wait
    );
    println!(
        "Failure rate: {:.2}, abandon rate: {:.2}, lock hold: {:?}, sweep: {:?}",
        config.failure_rate, config.abandon_rate, config.lock_hold, config.sweep_interval
    );
    println!(
        "Strategies: {:?}\n",
        config.strategies.iter().map(|s| s.as_str()).collect::<Vec<_>>()
    );

    let runner = SimulationRunner::new(config.clone());
    let result = runner.run()?;
    println!("\nSimulation completed in {:.2?}", result.duration);

    let stats = SimulationStats::from_result(&result, &config);
    stats.print_summary();

    if let Some(path) = output_csv {
        stats.export_csv(&path)?;
        println!("\nResults exported to {}", path.display());
    }

    Ok(())
}
