//! Ensemble simulator CLI
//!
//! Runs a multi-engine configuration of synthetic relaxation engines.

use clap::Parser;
use ensemble_core::{InMemoryProvisioner, MemorySink, Orchestrator, OutputSink, Provisioner};
use ensemble_sim::{JsonExporter, RelaxationFactory, RunLoop, SimConfig, SimError, WorkdirProvisioner};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Ensemble multi-engine simulator
#[derive(Parser, Debug)]
#[command(name = "ensemble-sim")]
#[command(about = "Run several simulation engines as one composite model", long_about = None)]
struct Args {
    /// JSON configuration file
    config: PathBuf,

    /// Master seed for engine noise
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Stop after this many composite updates
    #[arg(long)]
    max_ticks: Option<u64>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON summary on stdout for CI parsing
    #[arg(long)]
    json: bool,

    /// Export output records to this JSON file
    #[arg(long)]
    export: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let default = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }

    match run(&args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

/// Returns whether the composite reached its end time.
async fn run(args: &Args) -> Result<bool, SimError> {
    let config = SimConfig::load(&args.config)?;
    if !args.json {
        info!("Ensemble simulator v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    let provisioner: Box<dyn Provisioner> = match &config.workdir {
        Some(root) => Box::new(WorkdirProvisioner::new(root)),
        None => Box::new(InMemoryProvisioner),
    };
    let factory = Arc::new(RelaxationFactory::new(config.engines.clone(), args.seed));
    let mut orchestrator = Orchestrator::launch(config.orchestrator.clone(), provisioner.as_ref(), factory).await?;

    let export = args
        .export
        .clone()
        .or_else(|| config.output.as_ref().and_then(|o| o.path.clone()));
    let mut exporter = export
        .as_ref()
        .map(|path| JsonExporter::new(path, &config.orchestrator.name, args.seed));
    let mut memory = MemorySink::default();
    let sink: &mut dyn OutputSink = match exporter.as_mut() {
        Some(exporter) => exporter,
        None => &mut memory,
    };

    let summary = RunLoop::new()
        .with_max_ticks(args.max_ticks)
        .with_output(config.output.clone())
        .run(&mut orchestrator, sink)
        .await?;

    if args.json {
        match serde_json::to_string_pretty(&summary) {
            Ok(json) => println!("{}", json),
            Err(e) => error!("Failed to encode summary: {}", e),
        }
    } else {
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        if summary.finished {
            info!(
                "✓ {} reached t={:.1} in {} ticks ({} transitions, {} records)",
                summary.name, summary.final_time, summary.ticks, summary.transitions, summary.records
            );
        } else {
            error!(
                "✗ {} stopped at t={:.1} of {:.1}",
                summary.name, summary.final_time, summary.end_time
            );
        }
        if let Some(path) = &export {
            info!("Output written to {}", path.display());
        }
    }
    Ok(summary.finished)
}
