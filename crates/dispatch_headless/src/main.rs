use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use dispatch_headless::{run, RunMode, ScenarioConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "dispatch-headless", about = "Run an EMS dispatch training scenario without a UI")]
struct Cli {
    /// fast: step event to event; realtime: real timers at --speed.
    #[arg(long, value_enum, default_value = "fast")]
    mode: RunMode,
    /// Scenario TOML file; flags below override its fields.
    #[arg(long, env = "DISPATCH_SCENARIO")]
    config: Option<PathBuf>,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long)]
    vehicles: Option<usize>,
    #[arg(long)]
    calls_per_hour: Option<f64>,
    /// Length of the call window in simulated minutes.
    #[arg(long)]
    duration_min: Option<f64>,
    /// Clock speed for realtime runs.
    #[arg(long)]
    speed: Option<f64>,
    /// Write the run report as JSON to this path.
    #[arg(long)]
    report: Option<PathBuf>,
}

impl Cli {
    fn scenario(&self) -> anyhow::Result<ScenarioConfig> {
        let mut config = match &self.config {
            Some(path) => ScenarioConfig::load(path)
                .with_context(|| format!("loading scenario {}", path.display()))?,
            None => ScenarioConfig::default(),
        };
        if let Some(seed) = self.seed {
            config = config.with_seed(seed);
        }
        if let Some(vehicles) = self.vehicles {
            config = config.with_vehicles(vehicles);
        }
        if let Some(rate) = self.calls_per_hour {
            config = config.with_calls_per_hour(rate);
        }
        if let Some(minutes) = self.duration_min {
            config = config.with_duration_minutes(minutes);
        }
        if let Some(speed) = self.speed {
            config = config.with_speed(speed);
        }
        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let config = cli.scenario()?;
    info!(
        mode = ?cli.mode,
        seed = config.seed,
        vehicles = config.vehicles,
        calls_per_hour = config.calls_per_hour,
        duration_min = config.duration_ms / 60_000.0,
        "starting scenario"
    );

    let report = run(&config, cli.mode)?;
    report.log();
    if let Some(path) = &cli.report {
        report.write_json(path)?;
    }
    Ok(())
}
