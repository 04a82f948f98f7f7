//! Identity verification for relay connections.
//!
//! Connections authenticate with an OIDC ID token. The [`Verifier`] facade
//! holds one entry per configured identity provider and tries each in turn.
//! In development mode, an empty token maps to the anonymous dev identity
//! and a `provider:sub` token maps to that literal pair, so the relay can
//! run without any provider configured.

mod apple;
mod verifier;

pub use apple::generate_client_secret;
pub use verifier::{DiscoveryDocument, ProviderConfig, Verifier};

/// A verified user: `(provider, sub)` is the ownership key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub provider: String,
    pub sub: String,
    pub email: Option<String>,
}

/// Authentication failures.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("no authentication token provided")]
    NoToken,

    #[error("no OIDC providers configured")]
    NoProviders,

    #[error("token verification failed: {0}")]
    Verification(String),

    #[error("provider discovery failed for {name}: {source}")]
    Discovery {
        name: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid signing key: {0}")]
    InvalidKey(String),

    #[error("client secret signing failed: {0}")]
    Signing(String),
}

/// Resolves a presented token to an identity, applying the development-mode
/// fallbacks before real verification.
pub fn resolve_identity(
    verifier: &Verifier,
    dev_mode: bool,
    token: &str,
) -> Result<Identity, AuthError> {
    if token.is_empty() {
        if dev_mode {
            return Ok(Identity {
                provider: "dev".into(),
                sub: "anonymous".into(),
                email: None,
            });
        }
        return Err(AuthError::NoToken);
    }

    if dev_mode {
        if let Some((provider, sub)) = token.split_once(':') {
            return Ok(Identity {
                provider: provider.to_owned(),
                sub: sub.to_owned(),
                email: None,
            });
        }
    }

    verifier.verify_token(token)
}
