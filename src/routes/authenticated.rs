use crate::{AppState, handlers};
use axum::{Router, routing::get};

/// Authenticated Router Module
///
/// Routes that need a live session and nothing more. The `auth_middleware` route layer
/// applied in `create_router` rejects with 401 before any handler here runs.
pub fn authenticated_routes() -> Router<AppState> {
    Router::<AppState>::new()
        // GET /api/auth/me
        // The caller's identity, session id and current permissions.
        .route("/api/auth/me", get(handlers::get_me))
}
