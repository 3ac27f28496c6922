use anyhow::Context;
use dotenvy::Error as DotenvError;
use portfolio_chat_server::api::{build_router, AppState};
use portfolio_chat_server::catalog::Catalog;
use portfolio_chat_server::config::ServerConfig;
use portfolio_chat_server::rate_limit::RateLimiter;
use portfolio_chat_server::responder::Responder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_files = load_env_files();
    configure_tracing();
    if !env_files.is_empty() {
        info!(files = ?env_files, msg = "environment files loaded");
    }

    let config = ServerConfig::from_env()?;

    let catalog = match &config.catalog_path {
        Some(path) => Catalog::load(path)
            .with_context(|| format!("Failed to load catalog from {path:?}"))?,
        None => Catalog::builtin().context("Built-in catalog is invalid")?,
    };
    let catalog_source = config
        .catalog_path
        .as_deref()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "builtin".to_string());
    info!(
        target: "chat",
        categories = catalog.len(),
        source = catalog_source.as_str(),
        msg = "catalog loaded"
    );

    let state = Arc::new(AppState::new(
        Responder::new(catalog),
        RateLimiter::new(config.max_requests, config.window),
    ));
    let router = build_router(state);

    let listener = TcpListener::bind(config.addr)
        .await
        .context("Failed to bind TCP listener")?;
    let bound = listener
        .local_addr()
        .context("Failed to read listener address")?;
    info!(
        listening = %bound,
        max_requests = config.max_requests,
        window_secs = config.window.as_secs(),
        commit = option_env!("GIT_COMMIT_HASH").unwrap_or("unknown"),
        msg = "server ready"
    );

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, msg = "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!(error = %err, msg = "failed to install SIGTERM handler");
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

    info!(msg = "shutdown signal received");
}

const DEFAULT_LOG_FILTER: &str = "info,chat=info,tower_http=info";
const ENV_FILES: [&str; 2] = [".env.local", ".env"];

// Events carry `target: "chat"`, so targets stay visible in the output.
fn configure_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_target(true)
        .with_env_filter(filter)
        .init();
}

/// Loads `.env.local` then `.env`; earlier files win. Returns the files read.
/// Runs before tracing exists, so load failures go to stderr.
fn load_env_files() -> Vec<&'static str> {
    ENV_FILES
        .into_iter()
        .filter(|file| match dotenvy::from_filename(file) {
            Ok(_) => true,
            Err(DotenvError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => false,
            Err(err) => {
                eprintln!("Warning: unable to load {file}: {err}");
                false
            }
        })
        .collect()
}
