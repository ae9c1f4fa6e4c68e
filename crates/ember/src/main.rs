//! Ember Server
//!
//! Hosts one engine instance on the in-memory store until interrupted.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::Parser;
use tracing::{info, warn};

use ember::config::AppConfig;
use ember::{logging, seed};
use ember_runtime::{Engine, MemoryStore};

/// Ember text-game engine
#[derive(Parser, Debug)]
#[command(name = "ember")]
#[command(about = "Ember text-game engine", long_about = None)]
struct Args {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the engine instance id
    #[arg(long)]
    instance: Option<String>,

    /// TOML file of entities to seed before starting
    #[arg(long)]
    seed: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = AppConfig::load(args.config.as_deref()).context("loading configuration")?;
    if let Some(instance) = args.instance {
        config.engine.instance_id = instance;
    }

    logging::init(&config.log);
    info!("Starting Ember v{}", env!("CARGO_PKG_VERSION"));

    let store = MemoryStore::with_keyspace_prefix(config.engine.keyspace_prefix.clone());
    let engine = Engine::new(config.engine, Arc::new(store));
    engine.start().await.context("starting engine")?;

    if let Some(path) = &args.seed {
        let source = seed::load(path).await?;
        engine.seed(&source).await.context("seeding entities")?;
    }

    let resumed = engine.resume_sessions().await?;
    info!(
        instance = %engine.config().instance_id,
        sessions = resumed,
        "Engine ready"
    );

    shutdown_signal().await;

    info!("Shutting down engine...");
    if let Err(e) = engine.stop().await {
        warn!("Engine did not shut down cleanly: {}", e);
    }
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
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
                warn!("Failed to install terminate handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down...");
        },
    }
}
