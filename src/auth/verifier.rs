//! Multi-issuer OIDC token verifier.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard};

use jsonwebtoken::jwk::{Jwk, JwkSet};
use jsonwebtoken::{decode, decode_header, DecodingKey, EncodingKey, Validation};
use serde::Deserialize;
use tracing::info;

use super::{apple, AuthError, Identity};

/// Static configuration for one identity provider.
#[derive(Debug, Clone, Default)]
pub struct ProviderConfig {
    pub name: String,
    pub issuer: String,
    pub client_id: String,
    /// Empty for public clients and for providers whose secret is minted
    /// per exchange.
    pub client_secret: String,
    pub team_id: String,
    pub key_id: String,
    /// PKCS#8 PEM-encoded P-256 private key for minted client secrets.
    pub private_key_pem: Option<String>,
}

/// The subset of the OIDC discovery document the relay uses.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryDocument {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub jwks_uri: String,
}

struct ProviderEntry {
    config: ProviderConfig,
    discovery: DiscoveryDocument,
    jwks: JwkSet,
    signing_key: Option<EncodingKey>,
}

#[derive(Debug, Deserialize)]
struct IdTokenClaims {
    sub: String,
    #[serde(default)]
    email: Option<String>,
}

/// Validates ID tokens from any registered provider.
pub struct Verifier {
    providers: RwLock<HashMap<String, ProviderEntry>>,
    http: reqwest::Client,
}

impl Verifier {
    pub fn new() -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
            http: reqwest::Client::new(),
        }
    }

    fn entries(&self) -> RwLockReadGuard<'_, HashMap<String, ProviderEntry>> {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a provider: resolves its discovery document, caches the
    /// signing keys, and parses the client-secret signing key if one is
    /// configured. Call during startup.
    pub async fn add_provider(&self, config: ProviderConfig) -> Result<(), AuthError> {
        let discovery_url = format!(
            "{}/.well-known/openid-configuration",
            config.issuer.trim_end_matches('/')
        );
        let discovery: DiscoveryDocument = self
            .fetch_json(&discovery_url)
            .await
            .map_err(|source| AuthError::Discovery {
                name: config.name.clone(),
                source,
            })?;
        let jwks: JwkSet =
            self.fetch_json(&discovery.jwks_uri)
                .await
                .map_err(|source| AuthError::Discovery {
                    name: config.name.clone(),
                    source,
                })?;

        let signing_key = match &config.private_key_pem {
            Some(pem) => Some(apple::signing_key_from_pem(pem)?),
            None => None,
        };

        info!(provider = %config.name, issuer = %discovery.issuer, "OIDC provider registered");

        let mut providers = self
            .providers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        providers.insert(
            config.name.clone(),
            ProviderEntry {
                config,
                discovery,
                jwks,
                signing_key,
            },
        );
        Ok(())
    }

    async fn fetch_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
    ) -> Result<T, reqwest::Error> {
        self.http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }

    /// Verifies an ID token against every registered provider, returning the
    /// identity from the first that accepts it.
    pub fn verify_token(&self, raw_token: &str) -> Result<Identity, AuthError> {
        let providers = self.entries();
        if providers.is_empty() {
            return Err(AuthError::NoProviders);
        }

        let header =
            decode_header(raw_token).map_err(|e| AuthError::Verification(e.to_string()))?;

        let mut last_error: Option<String> = None;
        for (name, entry) in providers.iter() {
            let candidates: Vec<&Jwk> = match &header.kid {
                Some(kid) => entry.jwks.find(kid).into_iter().collect(),
                None => entry.jwks.keys.iter().collect(),
            };

            for jwk in candidates {
                let key = match DecodingKey::from_jwk(jwk) {
                    Ok(key) => key,
                    Err(e) => {
                        last_error = Some(e.to_string());
                        continue;
                    }
                };
                let mut validation = Validation::new(header.alg);
                validation.set_audience(&[entry.config.client_id.as_str()]);
                validation.set_issuer(&[entry.discovery.issuer.as_str()]);

                match decode::<IdTokenClaims>(raw_token, &key, &validation) {
                    Ok(data) => {
                        return Ok(Identity {
                            provider: name.clone(),
                            sub: data.claims.sub,
                            email: data.claims.email,
                        })
                    }
                    Err(e) => last_error = Some(e.to_string()),
                }
            }
        }

        Err(AuthError::Verification(
            last_error.unwrap_or_else(|| "no matching signing key".into()),
        ))
    }

    /// Whether a provider with this name is registered.
    pub fn has_provider(&self, name: &str) -> bool {
        self.entries().contains_key(name)
    }

    /// Static configuration of a registered provider.
    pub fn provider(&self, name: &str) -> Option<ProviderConfig> {
        self.entries().get(name).map(|e| e.config.clone())
    }

    /// Authorization endpoint from the provider's discovery document.
    pub fn auth_endpoint(&self, name: &str) -> Option<String> {
        self.entries()
            .get(name)
            .map(|e| e.discovery.authorization_endpoint.clone())
    }

    /// Token endpoint from the provider's discovery document.
    pub fn token_endpoint(&self, name: &str) -> Option<String> {
        self.entries()
            .get(name)
            .map(|e| e.discovery.token_endpoint.clone())
    }

    /// The `client_secret` to use in a token exchange with this provider:
    /// a freshly minted signed assertion when the provider has a signing
    /// key, the configured static secret otherwise, or nothing.
    pub fn exchange_client_secret(&self, name: &str) -> Result<Option<String>, AuthError> {
        let entries = self.entries();
        let entry = match entries.get(name) {
            Some(entry) => entry,
            None => return Ok(None),
        };
        if let Some(key) = &entry.signing_key {
            let secret = apple::generate_client_secret(
                &entry.config.team_id,
                &entry.config.client_id,
                &entry.config.key_id,
                key,
            )?;
            return Ok(Some(secret));
        }
        if entry.config.client_secret.is_empty() {
            Ok(None)
        } else {
            Ok(Some(entry.config.client_secret.clone()))
        }
    }
}

impl Default for Verifier {
    fn default() -> Self {
        Self::new()
    }
}
