use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, put},
};

/// Administration Router Module
///
/// User and role management. There is no router-wide layer: each handler's
/// `Authorized<C>` extractor authenticates (401) and then checks its permission (403)
/// before the handler body executes.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        // GET  /api/users  [users.view]
        // POST /api/users  [users.create]
        .route(
            "/api/users",
            get(handlers::list_users).post(handlers::create_user),
        )
        // GET    /api/users/{id}  [users.view]
        // PUT    /api/users/{id}  [users.edit]
        // DELETE /api/users/{id}  [users.delete] soft deactivation
        .route(
            "/api/users/{id}",
            get(handlers::get_user)
                .put(handlers::update_user)
                .delete(handlers::delete_user),
        )
        // GET /api/roles  [roles.view]
        .route("/api/roles", get(handlers::list_roles))
        // GET /api/roles/{id}/permissions  [roles.view]
        .route(
            "/api/roles/{id}/permissions",
            get(handlers::get_role_permissions),
        )
        // PUT    /api/roles/{id}/permissions/{name}  [roles.edit]
        // DELETE /api/roles/{id}/permissions/{name}  [roles.edit]
        .route(
            "/api/roles/{id}/permissions/{name}",
            put(handlers::grant_permission).delete(handlers::revoke_permission),
        )
}
