//! Session listing REST endpoint.
//!
//! - `GET /api/sessions`: sessions owned by the authenticated caller

use std::sync::Arc;

use axum::extract::Extension;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde::Serialize;

use crate::middleware::auth::RequireIdentity;
use crate::protocol::SessionMode;
use crate::relay::Hub;

/// Public view of one session.
#[derive(Debug, Serialize)]
struct SessionInfo {
    id: String,
    mode: SessionMode,
    cols: u16,
    rows: u16,
    command: String,
    viewers: usize,
}

/// List the sessions owned by the authenticated user.
async fn list_sessions(
    RequireIdentity(identity): RequireIdentity,
    Extension(hub): Extension<Arc<Hub>>,
) -> Json<Vec<SessionInfo>> {
    let sessions = hub.list_for_owner(&identity.provider, &identity.sub);
    let infos = sessions
        .iter()
        .map(|session| {
            let (cols, rows) = session.dimensions();
            SessionInfo {
                id: session.id.clone(),
                mode: session.mode,
                cols,
                rows,
                command: session.command.clone(),
                viewers: session.viewer_count(),
            }
        })
        .collect();
    Json(infos)
}

/// Create session routes.
pub fn sessions_routes() -> Router {
    Router::new().route("/api/sessions", get(list_sessions))
}
