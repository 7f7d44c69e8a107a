//! Vicinity simulator CLI
//!
//! Runs the demo scenarios against the proximity engine on a virtual clock.

use clap::Parser;
use std::path::Path;
use tracing::{error, info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use vicinity_core::EngineConfig;
use vicinity_sim::scenarios::ScenarioId;
use vicinity_sim::{ScenarioResult, ScenarioRunner, SimError};

/// Vicinity proximity engine simulator
#[derive(Parser, Debug)]
#[command(name = "vicinity-sim")]
#[command(about = "Run proximity engine scenarios on a virtual clock", long_about = None)]
struct Args {
    /// Master seed for determinism (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Scenario to run (truck_approach, nearest_truck, worker_geofence, feed_outage, all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Engine configuration file (JSON); missing fields take defaults
    #[arg(short, long)]
    config: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Export the frame trace of a single scenario to a JSON file
    #[arg(long)]
    export: Option<String>,
}

fn load_config(path: Option<&str>) -> Result<EngineConfig, SimError> {
    match path {
        None => Ok(EngineConfig::default()),
        Some(path) => {
            let raw = std::fs::read_to_string(Path::new(path))?;
            Ok(EngineConfig::from_json_str(&raw)?)
        }
    }
}

fn main() {
    let args = Args::parse();

    // RUST_LOG wins over --verbose when set
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {e}");
    }

    if !args.json {
        info!("Vicinity simulator v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    let config = load_config(args.config.as_deref()).unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        std::process::exit(2);
    });

    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        vec![args.scenario.parse().unwrap_or_else(|e| {
            eprintln!("Error: {}", e);
            let names: Vec<&str> = ScenarioId::all().iter().map(|s| s.name()).collect();
            eprintln!("Available scenarios: {}, all", names.join(", "));
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

    let runner = ScenarioRunner::new(seed).with_config(config);
    let results: Vec<ScenarioResult> = scenarios.iter().map(|s| runner.run(*s)).collect();

    if let Some(path) = &args.export {
        let export = results[0].to_export();
        match export.write_to_file(path) {
            Ok(()) => info!("Exported {} frames to {}", export.frames.len(), path),
            Err(e) => error!("Failed to write export: {}", e),
        }
    }

    let total = results.len();
    let failed = results.iter().filter(|r| !r.passed).count();

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
                    "ticks": r.ticks,
                    "time_secs": r.final_time_secs,
                    "alerts": r.alerts,
                    "arrivals": r.arrivals,
                    "failure_reason": r.failure_reason,
                })
            }).collect::<Vec<_>>(),
        });
        match serde_json::to_string_pretty(&summary) {
            Ok(text) => println!("{}", text),
            Err(e) => eprintln!("Failed to render summary: {e}"),
        }
    } else {
        for r in &results {
            if r.passed {
                info!(
                    "✓ {} (seed={}) PASSED in {:.0} s virtual, {} ticks",
                    r.scenario.name(),
                    r.seed,
                    r.final_time_secs,
                    r.ticks
                );
            } else {
                error!(
                    "✗ {} (seed={}) FAILED: {}",
                    r.scenario.name(),
                    r.seed,
                    r.failure_reason.as_deref().unwrap_or("unknown")
                );
            }
        }
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
