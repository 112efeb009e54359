//! Sitehound daemon entry point
//!
//! Loads configuration, connects the catalog and browser pool (both fatal
//! on failure), installs signal handling, and hands control to the
//! dispatcher loop.

use anyhow::{Context, Result};
use clap::Parser;
use sitehound::blobstore::BlobSink;
use sitehound::browser::BrowserPool;
use sitehound::catalog::CatalogGateway;
use sitehound::config::{Config, LogFormat, LoggingConfig};
use sitehound::crawl::{Dispatcher, Indexer, Runtime};
use sitehound::rules::{RuleEngine, RuleRegistry};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sitehound")]
#[command(about = "Distributed web crawling and indexing engine")]
#[command(version)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "./config.yaml")]
    config: PathBuf,
}

fn init_tracing(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("sitehound={},warn", config.level)));
    match config.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(&cli.config).context("loading configuration")?;
    init_tracing(&config.logging);
    info!(os = %config.os, "sitehound starting");

    let catalog = CatalogGateway::connect(&config.database)
        .await
        .context("connecting to the source catalog")?;
    let browsers = BrowserPool::connect(
        &config.browser,
        Duration::from_secs(config.crawler.timeout),
    )
    .await
    .context("connecting to the browser endpoint")?;
    let blobs = Arc::new(BlobSink::from_config(&config.image_storage)?);

    let registry = Arc::new(RuleRegistry::new());
    let engine = Arc::new(RuleEngine::new(registry, blobs.clone()));
    let indexer = Indexer::new(catalog.clone());

    let runtime = Arc::new(Runtime {
        config: Arc::new(config),
        catalog,
        browsers: Arc::new(browsers),
        blobs,
        engine,
        indexer,
    });

    let (shutdown_tx, shutdown_rx) = broadcast::channel(4);
    tokio::spawn(async move {
        wait_for_termination().await;
        info!("termination signal received, shutting down");
        let _ = shutdown_tx.send(());
    });

    Dispatcher::new(runtime).run(shutdown_rx).await;
    info!("shut down cleanly");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_termination() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("installing SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_termination() {
    let _ = tokio::signal::ctrl_c().await;
}
