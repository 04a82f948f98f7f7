//! Relay server assembly and runtime.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{Extension, Router};
use tracing::info;

use crate::auth::Verifier;
use crate::config::{RelayConfig, RelaySettings};
use crate::relay::{AuthSessionStore, Hub, LOGIN_TTL};

/// Builds the relay router with every endpoint and shared-state layer.
pub fn router(
    hub: Arc<Hub>,
    verifier: Arc<Verifier>,
    auth_sessions: Arc<AuthSessionStore>,
    settings: RelaySettings,
    http: reqwest::Client,
) -> Router {
    Router::new()
        // WebSocket endpoints (auth handled in-protocol via Hello/Join)
        .merge(crate::websocket::websocket_router())
        // REST API (auth applied per-handler via RequireIdentity)
        .merge(crate::api::api_router())
        // Layers (applied to all routes)
        .layer(Extension(hub))
        .layer(Extension(verifier))
        .layer(Extension(auth_sessions))
        .layer(Extension(settings))
        .layer(Extension(http))
}

/// Runs the relay until a shutdown signal arrives, then tears down every
/// session and the pending-login sweeper.
pub async fn run(config: RelayConfig, verifier: Arc<Verifier>) -> Result<()> {
    let hub = Arc::new(Hub::new());
    let auth_sessions = Arc::new(AuthSessionStore::new(LOGIN_TTL));
    auth_sessions.spawn_sweeper();

    let app = router(
        hub.clone(),
        verifier,
        auth_sessions.clone(),
        config.settings(),
        reqwest::Client::new(),
    );

    let listener = tokio::net::TcpListener::bind(config.addr)
        .await
        .context("failed to bind listen address")?;

    info!(
        addr = %config.addr,
        base_url = %config.base_url,
        dev_mode = config.dev_mode,
        "relay server starting"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    info!("shutting down");
    hub.close_all();
    auth_sessions.stop();

    Ok(())
}

/// Resolves when SIGINT or SIGTERM arrives.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("received Ctrl+C, shutting down");
        }
        _ = terminate => {
            info!("received terminate signal, shutting down");
        }
    }
}
