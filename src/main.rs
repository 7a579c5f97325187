//! # repofeed entry point
//!
//! Loads configuration, starts the update scheduler and serves the read-only
//! API until Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use repofeed::{
    config::ConfigLoader,
    github::{ActivitySource, GitHubClient},
    scheduler::UpdateScheduler,
    server::{AppState, run_server},
    store::Store,
    telemetry,
};

#[derive(Debug, Parser)]
#[command(name = "repofeed", version, about = "GitHub activity poller and feed")]
struct Cli {
    /// Directory holding the layered `.env` files
    #[arg(long)]
    env_dir: Option<PathBuf>,

    /// Validate configuration, print it with secrets redacted, and exit
    #[arg(long)]
    check_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let loader = match cli.env_dir {
        Some(dir) => ConfigLoader::with_base_dir(dir),
        None => ConfigLoader::new(),
    };
    let config = loader.load().context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;

    if cli.check_config {
        println!(
            "{}",
            config
                .redacted_json()
                .context("failed to render configuration")?
        );
        return Ok(());
    }

    telemetry::init_tracing(&config).context("failed to initialize telemetry")?;
    info!(
        profile = %config.profile,
        repos = config.repos.len(),
        authenticated = config.github_token.is_some(),
        "Configuration loaded"
    );

    let config = Arc::new(config);
    let client = GitHubClient::from_config(&config).context("failed to build GitHub client")?;
    let source: Arc<dyn ActivitySource> = Arc::new(client);
    let store = Arc::new(Store::new(config.poller.commit_stat_cache_capacity));

    let shutdown = CancellationToken::new();
    let scheduler = UpdateScheduler::new(Arc::clone(&config), source, Arc::clone(&store));
    let scheduler_task = tokio::spawn(scheduler.run(shutdown.child_token()));

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received");
                signal_token.cancel();
            }
            Err(err) => error!(error = %err, "Failed to listen for shutdown signal"),
        }
    });

    let state = AppState {
        config: Arc::clone(&config),
        store,
    };
    let served = run_server(state, shutdown.clone()).await;

    shutdown.cancel();
    if let Err(err) = scheduler_task.await {
        error!(error = %err, "Update scheduler task failed");
    }

    served.context("API server failed")?;
    info!("Shutdown complete");
    Ok(())
}
