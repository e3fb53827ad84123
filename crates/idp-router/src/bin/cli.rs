//! Operator CLI for the router pipeline
//!
//! Run with: cargo run -p idp-router --features cli --bin idp-router-cli -- --help

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use idp_router::{
    config::RouterConfig,
    pipeline::{extract_results, tracker::qualifying, Pipeline},
};

#[derive(Debug, Parser)]
#[command(name = "idp-router-cli", version, about = "Operate the document routing pipeline")]
struct Cli {
    /// Configuration file (falls back to IDP_ROUTER_CONFIG, then defaults)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print the results inside a local output archive
    Extract {
        archive: PathBuf,
        /// Show every candidate, not only the ones that would be routed
        #[arg(long)]
        all: bool,
    },
    /// Forward an object-created event file to the ingest queue
    Forward { event: PathBuf },
    /// Issue a presigned upload URL under landing/
    UploadUrl { object_name: String },
    /// Describe a classification job
    Describe { job_id: String },
    /// Emit routing messages for a finished job
    Complete { job_id: String },
    /// Wait for a job to finish, then emit its routing messages
    Wait { job_id: String },
    /// Run a single cycle of one stage
    RunOnce {
        #[arg(value_enum)]
        stage: Stage,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Stage {
    Dispatch,
    Track,
    Move,
}

fn load_config(path: Option<PathBuf>) -> Result<RouterConfig> {
    let config = match path {
        Some(path) => RouterConfig::load(Some(&path))?,
        None => RouterConfig::from_env()?,
    };
    Ok(config)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn extract(archive: &Path, all: bool, config: &RouterConfig) -> Result<()> {
    let bytes = std::fs::read(archive)
        .with_context(|| format!("Failed to read {}", archive.display()))?;
    let results = extract_results(&bytes, &config.tracker.result_suffix)?;
    if all {
        print_json(&results)
    } else {
        print_json(&qualifying(results))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("idp_router=warn")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config)?;

    // Archive inspection needs no backends
    let command = match cli.command {
        Commands::Extract { archive, all } => return extract(&archive, all, &config),
        command => command,
    };

    let pipeline = Pipeline::from_config(&config).await?;
    let cancel = CancellationToken::new();

    match command {
        Commands::Extract { archive, all } => extract(&archive, all, &config),
        Commands::Forward { event } => {
            let body = std::fs::read_to_string(&event)
                .with_context(|| format!("Failed to read {}", event.display()))?;
            print_json(&pipeline.forwarder.forward(&body).await?)
        }
        Commands::UploadUrl { object_name } => print_json(&pipeline.uploads.issue(&object_name).await?),
        Commands::Describe { job_id } => {
            print_json(&pipeline.backends.engine.describe_job(&job_id).await?)
        }
        Commands::Complete { job_id } => {
            let emitted = pipeline.tracker.on_completion(&job_id).await?;
            println!("{}: {} routing messages", job_id, emitted);
            Ok(())
        }
        Commands::Wait { job_id } => {
            let token = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    token.cancel();
                }
            });
            let emitted = pipeline.tracker.track_job(&job_id, &cancel).await?;
            println!("{}: {} routing messages", job_id, emitted);
            Ok(())
        }
        Commands::RunOnce { stage } => {
            let handled = match stage {
                Stage::Dispatch => pipeline.dispatcher.run_cycle(&cancel).await?,
                Stage::Track => pipeline.tracker.run_cycle(&cancel).await?,
                Stage::Move => pipeline.mover.run_cycle(&cancel).await?,
            };
            println!("{:?}: {} messages handled", stage, handled);
            Ok(())
        }
    }
}
