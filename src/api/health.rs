//! Health check endpoint (for load balancers).

use axum::routing::get;
use axum::Router;

async fn health_check() -> &'static str {
    "ok"
}

/// Create health routes.
pub fn health_routes() -> Router {
    Router::new().route("/health", get(health_check))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn health_check_says_ok() {
        assert_eq!(health_check().await, "ok");
    }
}
