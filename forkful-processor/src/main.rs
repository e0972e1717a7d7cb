use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use forkful_core::{Config, DirectoryWatcher, PostgresCouponStore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command line arguments for the coupon processor service
#[derive(Parser, Debug)]
#[command(name = "forkful-processor")]
#[command(about = "File-watching coupon ingestion service")]
struct Args {
    /// Data root holding the add/ and remove/ directories (overrides config)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Maximum codes per bulk write (overrides config)
    #[arg(long)]
    batch_size: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = Config::from_env().context("failed to load configuration")?;
    if let Some(data_dir) = args.data_dir {
        config.processor.data_directory = data_dir;
    }
    if let Some(batch_size) = args.batch_size {
        config.processor.batch_size = batch_size;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let store = PostgresCouponStore::connect(&config.database)
        .await
        .context("failed to initialize coupon store")?;

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        shutdown.cancel();
    });

    let watcher = DirectoryWatcher::new(Arc::new(store), config.processor.clone());
    watcher
        .run(cancel)
        .await
        .context("processor exited with error")?;

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install SIGINT handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
