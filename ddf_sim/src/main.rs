//! DDF hide-and-seek simulator CLI
//!
//! Runs the hide-and-seek scenarios and checks every seeker against the
//! truth and against the centralized reference.

use clap::Parser;
use ddf_sim::scenarios::ScenarioId;
use ddf_sim::{ScenarioResult, ScenarioRunner, SimError};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Decentralized data fusion hide-and-seek simulator
#[derive(Parser, Debug)]
#[command(name = "ddf-sim")]
#[command(about = "Run hide-and-seek scenarios with channel-filter fusion", long_about = None)]
struct Args {
    /// Master seed for determinism (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Scenario to run (stationary, chain, pursuit, all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Number of fusion rounds (scenario default when omitted)
    #[arg(short = 'n', long)]
    steps: Option<u64>,

    /// Feed the seekers true measurements
    #[arg(long)]
    noiseless: bool,

    /// Run every seeker as its own task
    #[arg(long)]
    concurrent: bool,

    /// Exchange over the channels only every n-th step
    #[arg(short, long, default_value = "1")]
    interval: u64,

    /// Verbose output (RUST_LOG takes precedence)
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Export the estimate history of a single scenario to a JSON file
    #[arg(long)]
    export: Option<String>,
}

/// RUST_LOG directives when set and valid, otherwise DEBUG or INFO.
fn log_filter(verbose: bool, directives: Option<String>) -> EnvFilter {
    let default = if verbose { "debug" } else { "info" };
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(default))
}

fn main() {
    let args = Args::parse();

    let filter = log_filter(args.verbose, std::env::var(EnvFilter::DEFAULT_ENV).ok());
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }

    if !args.json {
        info!("DDF hide-and-seek simulator v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        vec![args.scenario.parse().unwrap_or_else(|e| {
            eprintln!("Error: {}", e);
            eprintln!("Available scenarios: stationary, chain, pursuit, all");
            std::process::exit(1);
        })]
    };

    if args.export.is_some() && scenarios.len() > 1 {
        eprintln!("Error: --export only supports a single scenario, not 'all'");
        std::process::exit(1);
    }

    let seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(42)
    } else {
        args.seed
    };

    let mut runner = ScenarioRunner::new(seed)
        .with_noiseless(args.noiseless)
        .with_concurrent(args.concurrent)
        .with_communication_interval(args.interval);
    if let Some(steps) = args.steps {
        runner = runner.with_steps(steps);
    }

    let mut results: Vec<ScenarioResult> = Vec::new();
    let mut aborted: Vec<(ScenarioId, SimError)> = Vec::new();

    for scenario in &scenarios {
        match runner.run(*scenario) {
            Ok(result) => {
                if !args.json {
                    if result.passed {
                        info!("✓ {} (seed={}) PASSED", scenario.name(), seed);
                    } else {
                        error!(
                            "✗ {} (seed={}) FAILED: {}",
                            scenario.name(),
                            seed,
                            result.failure_reason.as_deref().unwrap_or("unknown")
                        );
                    }
                }

                if let Some(path) = &args.export {
                    match result.export.write_to_file(path) {
                        Ok(()) => {
                            info!("Exported {} frames to {}", result.export.frames.len(), path)
                        }
                        Err(e) => error!("Failed to write export: {}", e),
                    }
                }
                results.push(result);
            }
            Err(e) => {
                match e.step() {
                    Some(step) => {
                        error!("✗ {} aborted at step {}: {}", scenario.name(), step, e)
                    }
                    None => error!("✗ {} aborted: {}", scenario.name(), e),
                }
                aborted.push((*scenario, e));
            }
        }
    }

    let failed = results.iter().filter(|r| !r.passed).count() + aborted.len();
    let total = results.len() + aborted.len();

    if args.json {
        let summary = serde_json::json!({
            "total": total,
            "passed": total - failed,
            "failed": failed,
            "results": results.iter().map(|r| {
                serde_json::json!({
                    "scenario": r.scenario.name(),
                    "seed": r.seed,
                    "passed": r.passed,
                    "steps": r.steps,
                    "metrics": r.metrics,
                    "failure_reason": r.failure_reason,
                })
            }).collect::<Vec<_>>(),
            "aborted": aborted.iter().map(|(scenario, e)| {
                serde_json::json!({
                    "scenario": scenario.name(),
                    "step": e.step(),
                    "error": e.to_string(),
                })
            }).collect::<Vec<_>>(),
        });
        match serde_json::to_string_pretty(&summary) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Failed to serialize summary: {}", e),
        }
    } else {
        info!("");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        if failed == 0 {
            info!("✅ All {} scenario runs passed!", total);
        } else {
            error!("❌ {}/{} scenario runs failed!", failed, total);
        }
    }

    if failed > 0 {
        std::process::exit(1);
    }
}
