//! tutti-dispatch - substitute musician dispatch service
//!
//! Serves response links and the dispatch/sweep triggers over HTTP.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter};
use tutti_common::config::{load_toml_config, prepare_root_folder};
use tutti_common::db::{init_database, ConflictPolicy};
use tutti_dispatch::config::{Overrides, Settings, DEFAULT_LOG_FILTER};
use tutti_dispatch::notify::{LogNotifier, Notifier, WebhookNotifier};
use tutti_dispatch::{build_router, AppState, EngineOptions};

/// Command-line arguments for tutti-dispatch
#[derive(Parser, Debug)]
#[command(name = "tutti-dispatch")]
#[command(about = "Substitute musician dispatch and response service")]
#[command(version)]
struct Args {
    /// Config file (TOML)
    #[arg(short, long, env = "TUTTI_CONFIG")]
    config: Option<PathBuf>,

    /// Data folder holding tutti.db
    #[arg(short, long, env = "TUTTI_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    /// Address to listen on
    #[arg(short, long, env = "TUTTI_BIND_ADDR")]
    bind_addr: Option<String>,

    /// Cross-need conflict policy (simple | smart)
    #[arg(long, env = "TUTTI_CONFLICT_POLICY")]
    conflict_policy: Option<ConflictPolicy>,

    /// Base URL for response links in notifications
    #[arg(long, env = "TUTTI_PUBLIC_BASE_URL")]
    public_base_url: Option<String>,

    /// Hours before a deadline that reminders go out
    #[arg(long, env = "TUTTI_REMINDER_LEAD_HOURS")]
    reminder_lead_hours: Option<i64>,

    /// Notification relay endpoint; notifications are only logged when unset
    #[arg(long, env = "TUTTI_NOTIFIER_WEBHOOK_URL")]
    notifier_webhook_url: Option<String>,

    /// Tracing filter used when RUST_LOG is not set
    #[arg(long, env = "TUTTI_LOG_LEVEL")]
    log_level: Option<String>,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            root_folder: self.root_folder.clone(),
            bind_addr: self.bind_addr.clone(),
            conflict_policy: self.conflict_policy,
            public_base_url: self.public_base_url.clone(),
            reminder_lead_hours: self.reminder_lead_hours,
            notifier_webhook_url: self.notifier_webhook_url.clone(),
            log_level: self.log_level.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG wins; otherwise the configured level is applied once known
    let rust_log = std::env::var("RUST_LOG").ok().filter(|v| !v.is_empty());
    let initial = rust_log.clone().unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());
    let (filter, filter_handle) = reload::Layer::new(EnvFilter::new(initial));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting tutti-dispatch v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let file = load_toml_config(args.config.as_deref()).context("Failed to load config file")?;
    let settings = Settings::resolve(args.overrides(), file).context("Invalid configuration")?;

    if rust_log.is_none() {
        if let Some(level) = &settings.log_level {
            match EnvFilter::try_new(level) {
                Ok(configured) => {
                    if let Err(e) = filter_handle.reload(configured) {
                        warn!("Could not apply log level '{}': {}", level, e);
                    }
                }
                Err(e) => warn!("Ignoring invalid log level '{}': {}", level, e),
            }
        }
    }

    let db_path = prepare_root_folder(&settings.root_folder)?;
    info!("Database path: {}", db_path.display());
    let pool = init_database(&db_path)
        .await
        .context("Failed to open database")?;

    let notifier: Arc<dyn Notifier> = match &settings.notifier_webhook_url {
        Some(url) => {
            info!("Notifications posted to {}", url);
            Arc::new(WebhookNotifier::new(url.as_str()).context("Failed to build notifier")?)
        }
        None => {
            info!("No notifier webhook configured; notifications are logged only");
            Arc::new(LogNotifier)
        }
    };

    info!(
        "Conflict policy: {}, reminder lead: {}h, response links: {}",
        settings.conflict_policy,
        settings.reminder_lead.num_hours(),
        settings.public_base_url
    );

    let state = AppState::new(pool, notifier, EngineOptions::from(&settings));
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(settings.bind_addr)
        .await
        .context("Failed to bind to address")?;
    info!("tutti-dispatch listening on http://{}", settings.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
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
}
