//! Bearer-token authentication for REST endpoints.
//!
//! Extracts the token from the `Authorization: Bearer <token>` header and
//! resolves it through the verifier, with the same development-mode
//! fallbacks the WebSocket handshakes use.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::{request::Parts, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::auth::{resolve_identity, Identity, Verifier};
use crate::config::RelaySettings;

/// JSON body for authentication failures.
#[derive(Debug, Serialize)]
struct AuthErrorBody {
    error: String,
}

/// Rejection returned when a request cannot be authenticated.
pub struct IdentityRejection {
    status: StatusCode,
    message: String,
}

impl IdentityRejection {
    fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for IdentityRejection {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(AuthErrorBody {
                error: self.message,
            }),
        )
            .into_response()
    }
}

/// Extractor that requires an authenticated caller identity.
pub struct RequireIdentity(pub Identity);

impl<S> FromRequestParts<S> for RequireIdentity
where
    S: Send + Sync,
{
    type Rejection = IdentityRejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let verifier = parts
            .extensions
            .get::<Arc<Verifier>>()
            .ok_or_else(|| IdentityRejection::internal("verifier not configured"))?
            .clone();
        let settings = parts
            .extensions
            .get::<RelaySettings>()
            .ok_or_else(|| IdentityRejection::internal("relay settings not configured"))?;

        let token = bearer_token(parts).unwrap_or_default();
        resolve_identity(&verifier, settings.dev_mode, &token)
            .map(RequireIdentity)
            .map_err(|_| IdentityRejection::unauthorized("unauthorized"))
    }
}

/// Pulls the token out of the `Authorization: Bearer` header, if present.
fn bearer_token(parts: &Parts) -> Option<String> {
    let header = parts.headers.get("authorization")?.to_str().ok()?;
    header
        .strip_prefix("Bearer ")
        .map(|token| token.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts_with_auth(value: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri("/api/sessions");
        if let Some(v) = value {
            builder = builder.header("authorization", v);
        }
        let (parts, ()) = builder.body(()).unwrap().into_parts();
        parts
    }

    #[test]
    fn bearer_token_is_extracted() {
        let parts = parts_with_auth(Some("Bearer abc123"));
        assert_eq!(bearer_token(&parts).as_deref(), Some("abc123"));
    }

    #[test]
    fn missing_header_yields_none() {
        let parts = parts_with_auth(None);
        assert!(bearer_token(&parts).is_none());
    }

    #[test]
    fn non_bearer_header_yields_none() {
        let parts = parts_with_auth(Some("Basic dXNlcjpwYXNz"));
        assert!(bearer_token(&parts).is_none());
    }

    #[test]
    fn rejection_serializes_as_json_error() {
        let rejection = IdentityRejection::unauthorized("unauthorized");
        let response = rejection.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
