//! trajgen CLI
//!
//! Runs the anomaly injection engine over a traffic simulator and writes a
//! labelled trajectory log.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use trajgen_core::{
    CsvSink, Driver, DriverError, InjectionConfig, JsonLinesSink, RunOutcome, RunSummary,
    TrajectorySink, ViolationType,
};
use trajgen_env::{CancelToken, SimError, TrafficSimulator};
use trajgen_sim::{
    traffic_seed, RunReport, ScenarioId, SyntheticTraffic, TraciClient, TraciConfig,
};

type BoxedSimulator = Box<dyn TrafficSimulator + Send>;
type BoxedSink = Box<dyn TrajectorySink + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// In-process seeded corridor model
    Synthetic,
    /// External SUMO over TraCI
    Sumo,
}

impl Backend {
    fn name(&self) -> &'static str {
        match self {
            Backend::Synthetic => "synthetic",
            Backend::Sumo => "sumo",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Csv,
    Jsonl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Behavior {
    Aggression,
    Contagion,
    WrongWay,
    SpeedSurge,
}

/// Labelled trajectory generation with injected driving violations
#[derive(Parser, Debug)]
#[command(name = "trajgen")]
#[command(about = "Generate labelled vehicle trajectory logs", long_about = None)]
struct Args {
    /// Traffic simulator backend
    #[arg(short, long, value_enum, default_value = "synthetic")]
    backend: Backend,

    /// Synthetic scenario (peak_corridor, arterial_jam, bike_swarm, single_lane)
    #[arg(short = 'S', long, default_value = "peak_corridor")]
    scenario: String,

    /// SUMO network file
    #[arg(long, default_value = "data/sumo_network/network.net.xml")]
    net: PathBuf,

    /// SUMO route file
    #[arg(long, default_value = "data/sumo_network/peak.rou.xml")]
    routes: PathBuf,

    /// SUMO binary
    #[arg(long, default_value = "sumo")]
    sumo_binary: PathBuf,

    /// TraCI port
    #[arg(long, default_value = "8813")]
    port: u16,

    /// Number of ticks (overrides the config file)
    #[arg(long)]
    steps: Option<u64>,

    /// Master seed (overrides the config file)
    #[arg(short, long)]
    seed: Option<u64>,

    /// Trajectory log path
    #[arg(short, long, default_value = "data/logs/vehicle_log.csv")]
    output: PathBuf,

    /// Trajectory log format
    #[arg(short, long, value_enum, default_value = "csv")]
    format: LogFormat,

    /// JSON injection config
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Behaviors to switch off (repeatable)
    #[arg(long, value_enum)]
    disable: Vec<Behavior>,

    /// Write the run report to this JSON file
    #[arg(long)]
    summary: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Print the run report as JSON on stdout
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose)?;

    let scenario: ScenarioId = args.scenario.parse().map_err(anyhow::Error::msg)?;
    let config = build_config(&args)?;

    if !args.json {
        info!("trajgen v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        info!("backend={} seed={} ticks={}", args.backend.name(), config.seed, config.total_ticks);
        if args.backend == Backend::Synthetic {
            info!("scenario={}: {}", scenario, scenario.description());
        }
    }

    // Simulator first: a failed start must not leave an empty log behind
    let sim = open_simulator(&args, &config, scenario)
        .map_err(DriverError::Startup)
        .context("could not start the traffic simulator")?;
    let sink = open_sink(&args.output, args.format)?;

    let cancel = CancelToken::new();
    let watcher = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current tick");
            watcher.cancel();
        }
    });

    let run_config = config.clone();
    let summary = tokio::task::spawn_blocking(move || run_blocking(run_config, sim, sink, cancel))
        .await
        .context("driver task failed")??;

    let mut report = RunReport::new(
        args.backend.name(),
        &args.output.display().to_string(),
        config,
        summary.clone(),
    );
    if args.backend == Backend::Synthetic {
        report = report.with_scenario(scenario.name());
    }

    if let Some(path) = &args.summary {
        report
            .write_to_file(path)
            .with_context(|| format!("could not write run report to {}", path))?;
        info!("Run report written to {}", path);
    }

    if args.json {
        println!("{}", report.to_json()?);
    } else {
        print_summary(&summary, &args.output);
    }

    Ok(())
}

fn init_logging(verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")
}

/// Config file (or defaults) with command-line overrides applied.
fn build_config(args: &Args) -> Result<InjectionConfig> {
    let mut config = match &args.config {
        Some(path) => InjectionConfig::from_json_file(path)
            .with_context(|| format!("could not load config {}", path.display()))?,
        None => InjectionConfig::default(),
    };

    if let Some(steps) = args.steps {
        config.total_ticks = steps;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    for behavior in &args.disable {
        match behavior {
            Behavior::Aggression => config.toggles.aggression = false,
            Behavior::Contagion => config.toggles.contagion = false,
            Behavior::WrongWay => config.toggles.wrong_way = false,
            Behavior::SpeedSurge => config.toggles.speed_surge = false,
        }
    }

    config.validate()?;
    Ok(config)
}

fn open_simulator(
    args: &Args,
    config: &InjectionConfig,
    scenario: ScenarioId,
) -> Result<BoxedSimulator, SimError> {
    match args.backend {
        Backend::Synthetic => {
            let sim = SyntheticTraffic::new(scenario.synthetic_config(), traffic_seed(config.seed))?;
            Ok(Box::new(sim))
        }
        Backend::Sumo => {
            let traci = TraciConfig {
                sumo_binary: args.sumo_binary.clone(),
                net_file: args.net.clone(),
                route_file: args.routes.clone(),
                port: args.port,
                // SUMO's own randomness follows the master seed too
                extra_args: vec!["--seed".to_string(), (config.seed % (i32::MAX as u64)).to_string()],
                ..TraciConfig::default()
            };
            Ok(Box::new(TraciClient::launch(&traci)?))
        }
    }
}

fn open_sink(path: &Path, format: LogFormat) -> Result<BoxedSink> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("could not create {}", parent.display()))?;
    }
    let file = File::create(path).with_context(|| format!("could not create {}", path.display()))?;
    let out = BufWriter::new(file);

    let sink: BoxedSink = match format {
        LogFormat::Csv => Box::new(CsvSink::new(out)),
        LogFormat::Jsonl => Box::new(JsonLinesSink::new(out)),
    };
    Ok(sink)
}

fn run_blocking(
    config: InjectionConfig,
    sim: BoxedSimulator,
    sink: BoxedSink,
    cancel: CancelToken,
) -> Result<RunSummary, DriverError> {
    let mut driver = Driver::new(config, sim, sink)?;
    let result = driver.run(&cancel);

    let (mut sim, _) = driver.into_parts();
    if let Err(e) = sim.close() {
        warn!("Closing the simulator failed: {}", e);
    }
    result
}

fn print_summary(summary: &RunSummary, output: &Path) {
    let metrics = &summary.metrics;

    info!("");
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    match summary.outcome {
        RunOutcome::Completed => info!(
            "✅ {} ticks, {} rows → {}",
            metrics.ticks_executed,
            metrics.rows_written,
            output.display()
        ),
        RunOutcome::Cancelled { at_tick } => warn!(
            "⚠ Cancelled at tick {}: {} rows kept in {}",
            at_tick,
            metrics.rows_written,
            output.display()
        ),
    }

    for label in ViolationType::ALL {
        if label.is_violation() {
            info!(
                "  {:<24} logged={:<6} fired={}",
                label.label(),
                metrics.label_count(label),
                metrics.fires.get(&label).copied().unwrap_or(0)
            );
        }
    }
    info!("  compounded rows          {}", metrics.compounded_rows);
    info!("  dropped mutations        {}", metrics.total_mutation_failures());
    info!("  mean violation rate      {:.5}", metrics.mean_violation_rate());
    info!(
        "  peak tracked / contagion {} / {}",
        metrics.peak_registry_size, metrics.peak_contagion_events
    );
}
