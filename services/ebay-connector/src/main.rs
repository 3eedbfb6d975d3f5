//! eBay connector
//!
//! Single binary with two commands:
//! 1. `serve` (default): seller OAuth flow, account deletion webhook,
//!    marketplace reference data, `/health` and `/metrics`
//! 2. `refresh-tokens`: refresh every eligible credential once and exit
//!    non-zero if any of them failed

mod config;
mod deletion;
mod error;
mod marketplaces;
mod metrics;
mod oauth;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use ebay_auth::{CredentialStore, Environment, IdentityClient, OAuthClient, TokenCodec};
use ebay_tokens::{MemoryCache, TokenManager, refresh_all, spawn_refresh_task};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

/// How long in-flight requests may drain after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Serve,
    RefreshTokens,
}

#[derive(Debug, PartialEq, Eq)]
struct Cli {
    command: Command,
    config_path: Option<String>,
}

/// Parse `[serve|refresh-tokens] [--config <path>]`, program name excluded.
fn parse_args<I>(args: I) -> error::Result<Cli>
where
    I: IntoIterator<Item = String>,
{
    let mut command = None;
    let mut config_path = None;
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                config_path = Some(args.next().ok_or(error::Error::MissingValue("--config"))?);
            }
            "serve" if command.is_none() => command = Some(Command::Serve),
            "refresh-tokens" if command.is_none() => command = Some(Command::RefreshTokens),
            other => return Err(error::Error::UnknownCommand(other.to_string())),
        }
    }

    Ok(Cli {
        command: command.unwrap_or(Command::Serve),
        config_path,
    })
}

/// Shared state for the health and metrics handlers
#[derive(Clone)]
struct AppState {
    store: Arc<CredentialStore>,
    environment: Environment,
    started_at: Instant,
    prometheus: PrometheusHandle,
}

/// Long-lived pieces built once from configuration.
struct Components {
    http: reqwest::Client,
    oauth: OAuthClient,
    store: Arc<CredentialStore>,
    manager: Arc<TokenManager>,
}

async fn build_components(config: &Config) -> Result<Components> {
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .context("failed to build HTTP client")?;

    let codec = TokenCodec::from_base64_key(config.encryption_key()?.expose())
        .context("invalid refresh-token encryption key")?;
    let store = Arc::new(
        CredentialStore::open(config.storage.credentials_path.clone(), codec)
            .await
            .with_context(|| {
                format!(
                    "failed to open credential store at {}",
                    config.storage.credentials_path.display()
                )
            })?,
    );

    let oauth = OAuthClient::new(http.clone(), config.oauth_config());
    let manager = Arc::new(TokenManager::new(
        oauth.clone(),
        store.clone(),
        Arc::new(MemoryCache::new()),
        config.token_manager_config(),
    ));

    Ok(Components {
        http,
        oauth,
        store,
        manager,
    })
}

/// Build the axum router with all routes and shared state.
fn build_router(
    state: AppState,
    oauth_state: oauth::OAuthState,
    deletion: config::DeletionConfig,
    max_connections: usize,
) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .merge(oauth::router(oauth_state))
        .merge(deletion::router(deletion))
        .merge(marketplaces::router())
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let cli = parse_args(std::env::args().skip(1))?;

    let config_path = Config::resolve_path(cli.config_path.as_deref());
    info!(path = %config_path.display(), command = ?cli.command, "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        environment = %config.environment,
        credentials_path = %config.storage.credentials_path.display(),
        "configuration loaded"
    );

    match cli.command {
        Command::RefreshTokens => {
            if refresh_tokens(&config).await? {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::FAILURE)
            }
        }
        Command::Serve => serve(config).await.map(|()| ExitCode::SUCCESS),
    }
}

/// One batch refresh run. Returns false if any credential failed.
async fn refresh_tokens(config: &Config) -> Result<bool> {
    let components = build_components(config).await?;
    let summary = refresh_all(&components.manager, config.refresh_delay()).await;

    if summary.is_success() {
        info!(succeeded = summary.succeeded, "all eBay tokens refreshed");
    } else {
        for (credential_id, reason) in &summary.failures {
            error!(credential_id, reason, "eBay token refresh failed");
        }
    }
    Ok(summary.is_success())
}

async fn serve(config: Config) -> Result<()> {
    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus = metrics::install_recorder().context("failed to install Prometheus recorder")?;

    let components = build_components(&config).await?;
    let endpoints = config.endpoints();

    let refresh_task = (config.refresh.interval_secs > 0).then(|| {
        info!(
            interval_secs = config.refresh.interval_secs,
            "background token refresh enabled"
        );
        spawn_refresh_task(
            components.manager.clone(),
            Duration::from_secs(config.refresh.interval_secs),
            config.refresh_delay(),
        )
    });

    let oauth_state = oauth::OAuthState::new(
        components.oauth.clone(),
        IdentityClient::new(components.http.clone(), endpoints.identity),
        components.store.clone(),
        components.manager.clone(),
        config.routes.clone(),
    );
    let app_state = AppState {
        store: components.store.clone(),
        environment: config.environment,
        started_at: Instant::now(),
        prometheus,
    };
    let app = build_router(
        app_state,
        oauth_state,
        config.deletion_notification.clone(),
        config.server.max_connections,
    );

    let listen_addr = config.server.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    // The drain timeout starts at signal receipt, not at server start.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;

    if let Some(task) = refresh_task {
        task.abort();
    }
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => info!("all in-flight requests drained"),
        Ok(Ok(Err(e))) => error!(error = %e, "server error during shutdown"),
        Ok(Err(e)) => error!(error = %e, "server task panicked"),
        Err(_) => warn!(
            drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
            "drain timeout exceeded, forcing shutdown"
        ),
    }

    info!("shutdown complete");
    Ok(())
}

/// Health endpoint: service status, environment, credential count, uptime.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let body = serde_json::json!({
        "status": "healthy",
        "environment": state.environment,
        "credentials": state.store.len().await,
        "uptime_seconds": state.started_at.elapsed().as_secs(),
    });

    (
        axum::http::StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
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
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
