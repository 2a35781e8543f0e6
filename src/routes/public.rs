use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Public Router Module
///
/// Endpoints reachable without a token.
///
/// Logout lives here rather than behind the auth layer: it must answer 200 even for a
/// missing, expired or already closed token.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET /health
        // Liveness probe for load balancers. Does not touch the store.
        .route("/health", get(|| async { "ok" }))
        // POST /api/auth/login
        // Credential Verifier, then Session Issuer. Returns {user, token, session_id}.
        .route("/api/auth/login", post(handlers::login))
        // POST /api/auth/logout
        // Session Terminator for the bearer token, if any.
        .route("/api/auth/logout", post(handlers::logout))
}
