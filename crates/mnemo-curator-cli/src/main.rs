use std::path::PathBuf;

use clap::{Parser, Subcommand};
use mnemo_curator::CurationPipeline;
use mnemo_curator::config::Config;
use mnemo_curator_cli::commands::{
    FeedbackCommand, IngestCommand, StatsCommand, SweepCommand, TouchCommand,
};
use mnemo_curator_cli::error::CliResult;
use mnemo_curator_cli::output::OutputFormat;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mnemo-curator-cli")]
#[command(about = "Mnemo Curator CLI - feed candidates and manage the curated memory store")]
#[command(version)]
pub struct Cli {
    #[clap(long, short, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[clap(long, short = 'd', global = true, help = "Path to data directory")]
    pub data_dir: Option<PathBuf>,

    #[clap(long, short = 'c', global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    #[clap(long, global = true, help = "Skip loading the embedding model")]
    pub lexical: bool,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    #[clap(about = "Curate a candidate fact")]
    Ingest(IngestCommand),

    #[clap(about = "Run an eviction sweep now")]
    Sweep(SweepCommand),

    #[clap(about = "Show per-category statistics")]
    Stats(StatsCommand),

    #[clap(about = "Record usefulness feedback for a category")]
    Feedback(FeedbackCommand),

    #[clap(about = "Record a retrieval access of a memory")]
    Touch(TouchCommand),
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> CliResult<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Table
    };

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(data_dir) = &cli.data_dir {
        config.storage.data_dir = data_dir.clone();
    }
    if cli.lexical {
        config.embedding.enabled = false;
    }

    let pipeline = CurationPipeline::from_config(config).await?;

    match &cli.command {
        Command::Ingest(cmd) => cmd.execute(&pipeline, format).await,
        Command::Sweep(cmd) => cmd.execute(&pipeline, format).await,
        Command::Stats(cmd) => cmd.execute(&pipeline, format).await,
        Command::Feedback(cmd) => cmd.execute(&pipeline, format).await,
        Command::Touch(cmd) => cmd.execute(&pipeline, format).await,
    }
}
