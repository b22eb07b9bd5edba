use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

use netsim_abstract::{CongestionAlgorithm, Scenario, SimConfig, SimConfigOverride};
use netsim_simulator::scenario_runner::run_scenario;
use netsim_simulator::storage::storage_from_config;
use netsim_simulator::tui::{MemoryLogBuffer, TuiApp};
use netsim_simulator::{
    RunOptions, RunSummary, SimulationReport, SimulationStore, UserStorage, run_headless,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Toy network congestion simulator")]
struct Args {
    /// Simulation settings (TOML). Unset keys keep their defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Replay a scenario before handing over to the dashboard or timer.
    #[arg(long)]
    scenario: Option<PathBuf>,

    /// Persist the user list to this JSON file.
    #[arg(long)]
    storage: Option<PathBuf>,

    /// Congestion algorithm: reno, red or ai.
    #[arg(long)]
    algorithm: Option<CongestionAlgorithm>,

    #[arg(long)]
    seed: Option<u64>,

    /// Stop after this many ticks.
    #[arg(long)]
    ticks: Option<u64>,

    /// Run the ticks back to back instead of on the timer. Needs --ticks.
    #[arg(long, default_value_t = false, requires = "ticks")]
    fast: bool,

    /// Launch the terminal dashboard.
    #[arg(long, default_value_t = false, conflicts_with = "fast")]
    tui: bool,

    /// Write a JSON trace of the finished simulation.
    #[arg(long)]
    trace_out: Option<PathBuf>,
}

impl Args {
    fn overrides(&self) -> SimConfigOverride {
        SimConfigOverride {
            seed: self.seed,
            storage_path: self.storage.clone(),
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let log_buffer = init_logging(args.tui);
    info!("netsim starting…");

    let mut scenario = args.scenario.as_deref().map(load_scenario).transpose()?;
    let config = build_config(&args, scenario.as_ref())?;
    let storage = storage_from_config(&config);
    let mut store = SimulationStore::new(config, storage);

    match scenario.as_mut() {
        Some(scenario) => {
            scenario.algorithm = args.algorithm.or(scenario.algorithm);
            run_scenario(&mut store, scenario);
        }
        None => {
            if let Some(algorithm) = args.algorithm {
                store.set_algorithm(algorithm);
            }
        }
    }

    let report = if args.tui {
        let mut app = TuiApp::new(store, log_buffer);
        app.run()?;
        app.into_store().export_report()
    } else if args.fast {
        run_fast(&mut store, args.ticks.unwrap_or_default())
    } else if scenario.is_some() && args.ticks.is_none() {
        store.export_report()
    } else {
        run_headless(&mut store, RunOptions { ticks: args.ticks }).await;
        store.export_report()
    };

    log_summary(&report.summary());

    if let Some(trace_path) = &args.trace_out {
        write_trace(trace_path, &report)?;
    }

    Ok(())
}

fn init_logging(use_tui: bool) -> Option<MemoryLogBuffer> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if use_tui {
        let buffer = MemoryLogBuffer::new();
        let writer = buffer.clone();
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .init();
        Some(buffer)
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
        None
    }
}

/// Defaults, then the config file, then the scenario's overrides, then flags.
fn build_config(args: &Args, scenario: Option<&Scenario>) -> Result<SimConfig> {
    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => SimConfig::default(),
    };
    if let Some(scenario) = scenario {
        scenario.config.apply_to(&mut config);
    }
    args.overrides().apply_to(&mut config);
    config.validate().context("Invalid simulation settings")?;
    Ok(config)
}

fn run_fast<S: UserStorage>(store: &mut SimulationStore<S>, ticks: u64) -> SimulationReport {
    info!(ticks, "Running ticks back to back");
    store.start(Instant::now());
    for _ in 0..ticks {
        store.tick();
    }
    store.pause();
    store.export_report()
}

fn log_summary(summary: &RunSummary) {
    info!(
        "Ticks: {} | algorithm: {} | users: {} ({:.1} Mbps offered) | mean throughput: {:.1} Mbps | mean latency: {:.0} ms | peak loss: {:.1}%",
        summary.ticks,
        summary.algorithm,
        summary.users,
        summary.offered_mbps,
        summary.mean_throughput,
        summary.mean_latency,
        summary.peak_packet_loss
    );
}

fn load_config(path: &Path) -> Result<SimConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: SimConfig = toml::from_str(&content).context("Failed to parse config file")?;
    Ok(config)
}

fn load_scenario(path: &Path) -> Result<Scenario> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read scenario file {}", path.display()))?;
    let scenario: Scenario = toml::from_str(&content).context("Failed to parse scenario file")?;
    Ok(scenario)
}

fn write_trace(path: &Path, report: &SimulationReport) -> Result<()> {
    let data = serde_json::to_vec_pretty(report).context("Failed to serialize simulation trace")?;
    fs::write(path, &data)
        .with_context(|| format!("Failed to write trace file {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        Args::parse_from(std::iter::once("netsim").chain(extra.iter().copied()))
    }

    #[test]
    fn flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sim.toml");
        fs::write(&path, "capacity_mbps = 200.0\nseed = 1\n").unwrap();

        let args = args(&["--config", path.to_str().unwrap(), "--seed", "9"]);
        let config = build_config(&args, None).unwrap();

        assert_eq!(config.capacity_mbps, 200.0);
        assert_eq!(config.seed, Some(9));
        assert_eq!(config.tick_interval_ms, SimConfig::default().tick_interval_ms);
    }

    #[test]
    fn scenario_sits_between_file_and_flags() {
        let scenario: Scenario = toml::from_str(
            r#"
            name = "layering"
            [config]
            capacity_mbps = 80.0
            seed = 4
            "#,
        )
        .unwrap();

        let config = build_config(&args(&["--storage", "users.json"]), Some(&scenario)).unwrap();
        assert_eq!(config.capacity_mbps, 80.0);
        assert_eq!(config.seed, Some(4));
        assert_eq!(config.storage_path, Some(PathBuf::from("users.json")));
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sim.toml");
        fs::write(&path, "capacity_mbps = 0.0\n").unwrap();

        assert!(build_config(&args(&["--config", path.to_str().unwrap()]), None).is_err());
    }

    #[test]
    fn parses_algorithm_names() {
        assert_eq!(args(&["--algorithm", "red"]).algorithm, Some(CongestionAlgorithm::Red));
        assert!(Args::try_parse_from(["netsim", "--algorithm", "cubic"]).is_err());
        assert!(Args::try_parse_from(["netsim", "--fast"]).is_err());
    }

    #[test]
    fn fast_run_ticks_without_timer() {
        let mut store = SimulationStore::in_memory(SimConfig::deterministic());
        let report = run_fast(&mut store, 4);
        assert_eq!(report.ticks, 4);
        assert!(!report.running);
        assert_eq!(report.metrics.len(), 4);
    }
}
