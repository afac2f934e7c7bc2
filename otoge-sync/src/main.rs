//! otoge-sync - score synchronization service
//!
//! Merges a player's maimai scores from upstream providers into a local
//! score set and republishes it. Default bind: 127.0.0.1:7100.

use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::Parser;
use otoge_common::config::{resolve_config, write_toml_config, ConfigOverrides, TomlConfig};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use otoge_sync::providers::ProviderRegistry;
use otoge_sync::AppState;

/// Command-line arguments for otoge-sync
#[derive(Parser, Debug)]
#[command(name = "otoge-sync")]
#[command(about = "Score synchronization service for otoge")]
#[command(version)]
struct Args {
    /// Config file (default: <config dir>/otoge/otoge-sync.toml)
    #[arg(short, long, env = "OTOGE_SERVICE_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// SQLite database file
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Write the effective configuration to the config file and exit
    #[arg(long)]
    init_config: bool,

    /// Enable the developer with this token and exit
    #[arg(long, value_name = "TOKEN")]
    enable_developer: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let overrides = ConfigOverrides {
        config_path: args.config.clone(),
        bind_host: args.host.clone(),
        bind_port: args.port,
        database_path: args.database.clone(),
    };
    let config = resolve_config(&overrides).context("Failed to resolve configuration")?;

    init_tracing(&config)?;

    info!("Starting otoge-sync (score synchronization) service");
    info!(
        "Version: {} (git {}, built {}, {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(otoge_common::config::default_config_path);
    if args.init_config {
        write_toml_config(&config, &config_path)
            .with_context(|| format!("Failed to write {}", config_path.display()))?;
        info!("Configuration written to {}", config_path.display());
        return Ok(());
    }

    info!("Database: {}", config.database_path.display());
    let db_pool = otoge_sync::db::init_database_pool(&config.database_path).await?;
    info!("Database connection established");

    if let Some(token) = &args.enable_developer {
        let found = otoge_sync::db::developers::set_enabled(&db_pool, token, true).await?;
        if found {
            info!("Developer enabled");
        } else {
            warn!("No developer with that token");
        }
        return Ok(());
    }

    let store = otoge_sync::db::ScoreStore::new(db_pool.clone());
    let registry = ProviderRegistry::from_config(&config.providers, store)
        .context("Failed to build provider registry")?;

    let state = AppState::new(db_pool, registry, &config);
    if config.developer.enable_check {
        let count = state.refresh_developer_tokens().await?;
        info!("Developer token check enabled ({} enabled developers)", count);
    }
    let shutdown = state.shutdown.clone();

    let app = otoge_sync::build_router(state);

    let addr = format!("{}:{}", config.bind_host, config.bind_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// `RUST_LOG` wins; otherwise the configured level. Optional log file in addition to stderr.
fn init_tracing(config: &TomlConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "otoge_sync={level},otoge_common={level},tower_http=info",
            level = config.logging.level
        )
        .into()
    });

    let file_layer = match &config.logging.file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM and cancels in-flight runs
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }

    shutdown.cancel();
}
