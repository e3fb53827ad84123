//! Router server binary: HTTP surface plus the stage workers
//!
//! Run with: cargo run -p idp-router --bin idp-router-server -- [config.toml]

use std::path::PathBuf;
use std::time::Duration;

use idp_router::{
    config::RouterConfig,
    processing::StageWorker,
    server::{state::AppState, RouterServer},
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "idp_router=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Explicit path wins over IDP_ROUTER_CONFIG
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = match config_path {
        Some(path) => RouterConfig::load(Some(&path))?,
        None => RouterConfig::from_env()?,
    };

    tracing::info!("Configuration loaded");
    tracing::info!("  - Backend: {:?}", config.backend);
    tracing::info!(
        "  - Queues: ingest={}, output={}, routing={}",
        config.queues.ingest,
        config.queues.output,
        config.queues.routing
    );
    tracing::info!(
        "  - Buckets: source={}, destination={}, output={}",
        config.buckets.source,
        config.buckets.destination,
        config.buckets.output
    );
    tracing::info!("  - Tracker mode: {:?}", config.tracker.mode);

    let state = AppState::new(config.clone()).await?;
    let shutdown = CancellationToken::new();

    let idle_backoff = Duration::from_secs(config.worker.idle_backoff_secs);
    let workers: Vec<_> = state
        .pipeline()
        .stages(&config.worker)
        .into_iter()
        .map(|stage| StageWorker::new(stage, idle_backoff).spawn(shutdown.child_token()))
        .collect();
    tracing::info!("Started {} stage workers", workers.len());

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Shutdown requested"),
            Err(e) => tracing::error!("Failed to listen for ctrl-c: {}", e),
        }
        signal_token.cancel();
    });

    let server = RouterServer::with_state(state);
    tracing::info!("API: http://{}", server.address());
    tracing::info!("Health: http://{}/health", server.address());
    server.start(shutdown.clone()).await?;

    // Server exits on its own only through shutdown; make sure workers see it too
    shutdown.cancel();
    for worker in workers {
        if let Err(e) = worker.await {
            tracing::error!("Stage worker panicked: {}", e);
        }
    }

    tracing::info!("Router stopped");
    Ok(())
}
