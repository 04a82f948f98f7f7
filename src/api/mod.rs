//! REST API for the relay.
//!
//! Provides:
//! - session listing for the authenticated owner
//! - the browser-mediated OIDC login flow
//! - the health check

pub mod auth;
pub mod health;
pub mod sessions;

use axum::Router;

pub use auth::auth_routes;
pub use health::health_routes;
pub use sessions::sessions_routes;

/// Create the API router with all endpoints.
pub fn api_router() -> Router {
    Router::new()
        .merge(sessions_routes())
        .merge(auth_routes())
        .merge(health_routes())
}
