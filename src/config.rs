//! Environment-derived relay configuration.
//!
//! The relay is configured entirely through environment variables (a `.env`
//! file is honored in development): `ADDR`, `BASE_URL`, `DEV_MODE`, and
//! per-provider OIDC credentials. A provider is configured only when its
//! client id is present.

use std::env;
use std::net::SocketAddr;

use crate::auth::ProviderConfig;

const MICROSOFT_ISSUER: &str = "https://login.microsoftonline.com/common/v2.0";
const GOOGLE_ISSUER: &str = "https://accounts.google.com";
const APPLE_ISSUER: &str = "https://appleid.apple.com";

/// Configuration failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid listen address {addr:?}: {source}")]
    InvalidAddr {
        addr: String,
        #[source]
        source: std::net::AddrParseError,
    },

    #[error("missing environment variable: {0}")]
    MissingEnvVar(String),
}

/// The subset of configuration handlers need at request time.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    /// Public base URL used in view URLs and OIDC redirect URIs.
    pub base_url: String,
    /// Enables the anonymous / `provider:sub` authentication fallbacks.
    pub dev_mode: bool,
}

/// Full relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub addr: SocketAddr,
    pub base_url: String,
    pub dev_mode: bool,
    pub providers: Vec<ProviderConfig>,
}

impl RelayConfig {
    /// Reads configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let addr_raw = env::var("ADDR").unwrap_or_else(|_| ":8080".to_string());
        let addr = parse_addr(&addr_raw)?;

        let base_url = env::var("BASE_URL")
            .unwrap_or_else(|_| "http://localhost:8080".to_string())
            .trim_end_matches('/')
            .to_string();

        let dev_mode = env::var("DEV_MODE").map(|v| !v.is_empty()).unwrap_or(false);

        let mut providers = Vec::new();
        if let Ok(client_id) = env::var("MICROSOFT_CLIENT_ID") {
            providers.push(ProviderConfig {
                name: "microsoft".into(),
                issuer: MICROSOFT_ISSUER.into(),
                client_id,
                client_secret: env::var("MICROSOFT_CLIENT_SECRET").unwrap_or_default(),
                ..ProviderConfig::default()
            });
        }
        if let Ok(client_id) = env::var("GOOGLE_CLIENT_ID") {
            providers.push(ProviderConfig {
                name: "google".into(),
                issuer: GOOGLE_ISSUER.into(),
                client_id,
                client_secret: env::var("GOOGLE_CLIENT_SECRET").unwrap_or_default(),
                ..ProviderConfig::default()
            });
        }
        if let Ok(client_id) = env::var("APPLE_CLIENT_ID") {
            providers.push(ProviderConfig {
                name: "apple".into(),
                issuer: APPLE_ISSUER.into(),
                client_id,
                client_secret: String::new(),
                team_id: require_env("APPLE_TEAM_ID")?,
                key_id: require_env("APPLE_KEY_ID")?,
                private_key_pem: Some(require_env("APPLE_PRIVATE_KEY")?),
            });
        }

        Ok(Self {
            addr,
            base_url,
            dev_mode,
            providers,
        })
    }

    pub fn settings(&self) -> RelaySettings {
        RelaySettings {
            base_url: self.base_url.clone(),
            dev_mode: self.dev_mode,
        }
    }
}

fn require_env(name: &str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::MissingEnvVar(name.to_string()))
}

/// Accepts both `host:port` and the bare `:port` shorthand.
fn parse_addr(raw: &str) -> Result<SocketAddr, ConfigError> {
    let candidate = if raw.starts_with(':') {
        format!("0.0.0.0{raw}")
    } else {
        raw.to_string()
    };
    candidate.parse().map_err(|source| ConfigError::InvalidAddr {
        addr: raw.to_string(),
        source,
    })
}
