//! Phosphor relay server entry point.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use phosphor_relay::auth::Verifier;
use phosphor_relay::config::RelayConfig;
use phosphor_relay::server;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file (if present)
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "phosphor_relay=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("starting phosphor relay v{}", env!("CARGO_PKG_VERSION"));

    let config = RelayConfig::from_env().context("failed to load configuration")?;

    let verifier = Arc::new(Verifier::new());
    for provider in &config.providers {
        if let Err(e) = verifier.add_provider(provider.clone()).await {
            warn!(provider = %provider.name, error = %e, "failed to register OIDC provider");
        }
    }
    if config.providers.is_empty() && !config.dev_mode {
        warn!("no OIDC providers configured and DEV_MODE is off; all connections will be rejected");
    }

    server::run(config, verifier).await
}
