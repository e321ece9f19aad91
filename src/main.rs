//! crunchy-users - database ownership and extensions for Crunchy PostgresClusters

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crunchy_users::config::{build_client, Config};
use crunchy_users::controller::{self, Reconciler};
use crunchy_users::postgres::{ConnectionProvider, PgConnector};
use crunchy_users::processor::PgProcessor;
use crunchy_users::secret::{KubeSecretClient, SecretResolver};
use crunchy_users::telemetry::init_logging;
use crunchy_users::watcher::{self, ClusterWatcher};

/// crunchy-users - converge database ownership and extensions declared on PostgresClusters
#[derive(Parser, Debug)]
#[command(name = "crunchy-users", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the crunchy postgres user reconciliation loop
    Run(Config),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(config) => run(config).await,
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    init_logging(config.level())?;

    let client = build_client(&config)
        .await
        .map_err(|e| anyhow::anyhow!("failed to create kubernetes client: {}", e))?;

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_on_signal(cancel.clone()));

    let resolver = Arc::new(SecretResolver::new(Arc::new(KubeSecretClient::new(
        client.clone(),
    ))));
    let connections = ConnectionProvider::new(Arc::new(PgConnector::new(config.pool_settings())));
    let reconciler = Arc::new(Reconciler::new(Arc::new(PgProcessor::new()), connections));

    let (tx, rx) = watcher::channel();
    let cluster_watcher = ClusterWatcher::new(resolver, tx);
    let watch = tokio::spawn(cluster_watcher.run(
        client,
        config.resync_interval(),
        cancel.clone(),
    ));

    info!(version = env!("CARGO_PKG_VERSION"), "crunchy-users started");

    controller::run(reconciler, rx, cancel.clone()).await;

    // The watcher may be parked on a full channel; the loop has stopped
    // reading, so it will not come back on its own.
    watch.abort();

    info!("crunchy-users stopped");
    Ok(())
}

/// Cancel `cancel` on SIGINT or SIGTERM
async fn shutdown_on_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    println!("Received interrupt, stopping...");
    cancel.cancel();
}
