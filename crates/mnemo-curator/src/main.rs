//! Mnemo Curator daemon - periodic eviction sweeps over the memory store

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use mnemo_curator::config::Config;
use mnemo_curator::error::Result;
use mnemo_curator::CurationPipeline;

/// Mnemo Curator - keeps a long-term memory store deduplicated and within budget
#[derive(Parser)]
#[command(name = "mnemo-curator")]
#[command(about = "Runs scheduled eviction sweeps over the Mnemo memory store")]
#[command(version)]
pub struct Cli {
    /// Path to config file
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the sweep scheduler until interrupted (default command)
    #[command(name = "run")]
    Run,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Run) => serve(cli.config).await,
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,mnemo_curator=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn serve(config_path: Option<PathBuf>) -> Result<()> {
    tracing::info!("Starting Mnemo curator");

    let config = Config::load(config_path.as_deref())?;
    tracing::debug!("Config loaded: {:?}", config);

    let sweep_enabled = config.sweep.enabled;
    let pipeline = CurationPipeline::from_config(config).await?;
    tracing::info!("{:?}", pipeline);

    let scheduler = sweep_enabled.then(|| pipeline.scheduler().spawn());
    if scheduler.is_none() {
        tracing::info!("Sweeps disabled in config, waiting for shutdown");
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    pipeline.shutdown();

    if let Some(handle) = scheduler {
        match handle.await {
            Ok(sweeps) => tracing::info!(sweeps, "Sweep scheduler exited"),
            Err(e) => tracing::error!(error = %e, "Sweep scheduler task failed"),
        }
    }

    let stats = pipeline.stats().await?;
    tracing::info!(
        total_records = stats.total_records,
        tombstones = stats.tombstones,
        "Final store state"
    );
    Ok(())
}
