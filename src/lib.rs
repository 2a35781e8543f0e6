use axum::{
    Router,
    extract::{FromRef, Request},
    http::{HeaderName, HeaderValue},
    middleware::{self, Next},
    response::Response,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

pub mod activity;
pub mod auth;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod password;
pub mod repository;

// Routing segregation (Public, Authenticated, Administration).
pub mod routes;
use auth::AuthUser;
use routes::{admin, authenticated, public};

// --- Public Re-exports ---

pub use activity::{ActivityState, MockActivityLog, S3ActivityLog};
pub use config::AppConfig;
pub use repository::{InMemoryRepository, PostgresRepository, RepositoryState};

/// ApiDoc
///
/// OpenAPI document for every route, served at `/api-docs/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::login, handlers::logout, handlers::get_me,
        handlers::list_users, handlers::get_user, handlers::create_user,
        handlers::update_user, handlers::delete_user,
        handlers::list_roles, handlers::get_role_permissions,
        handlers::grant_permission, handlers::revoke_permission,
    ),
    components(
        schemas(
            models::LoginRequest, models::LoginResponse, models::LoginUser, models::MeResponse,
            models::MessageResponse, models::Role, models::UserProfile,
            models::CreateUserRequest, models::UpdateUserRequest, errors::ErrorBody,
        )
    ),
    tags(
        (name = "university-api", description = "University administration API: authentication, users and roles")
    )
)]
struct ApiDoc;

/// AppState
///
/// Single shared container for the injected services and the loaded configuration.
/// Cloned per request; every field is cheap to clone.
#[derive(Clone)]
pub struct AppState {
    /// Credential store: identities, roles, grants, sessions.
    pub repo: RepositoryState,
    /// Best-effort activity document store.
    pub activity: ActivityState,
    pub config: AppConfig,
}

// --- Axum FromRef Extractor Implementations ---

impl FromRef<AppState> for RepositoryState {
    fn from_ref(app_state: &AppState) -> RepositoryState {
        app_state.repo.clone()
    }
}

impl FromRef<AppState> for ActivityState {
    fn from_ref(app_state: &AppState) -> ActivityState {
        app_state.activity.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// auth_middleware
///
/// Route layer for `authenticated_routes`. Resolving `AuthUser` runs the Token
/// Authenticator; a rejection short-circuits with 401 before the handler is reached.
async fn auth_middleware(_auth_user: AuthUser, request: Request, next: Next) -> Response {
    next.run(request).await
}

/// cors_layer
///
/// Only the configured origin is allowed. An origin that is not a valid header value
/// allows nothing.
fn cors_layer(origin: &str) -> CorsLayer {
    let allow_origin = match origin.parse::<HeaderValue>() {
        Ok(value) => AllowOrigin::exact(value),
        Err(_) => {
            tracing::warn!(origin, "CORS_ORIGIN is not a valid header value; cross-origin requests disabled");
            AllowOrigin::list(Vec::<HeaderValue>::new())
        }
    };

    CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(allow_origin)
        .allow_headers(Any)
}

/// create_router
///
/// Assembles every route, the auth layer and the observability stack, and binds the state.
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.cors_origin);

    // Header name constant for Request Correlation.
    let x_request_id = HeaderName::from_static("x-request-id");

    let base_router = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // Public Routes: login, logout, health.
        .merge(public::public_routes())
        // Authenticated Routes: any live session.
        .merge(
            authenticated::authenticated_routes().route_layer(middleware::from_fn_with_state(
                state.clone(),
                auth_middleware,
            )),
        )
        // Administration Routes: each handler names its permission through `Authorized<C>`,
        // which authenticates first and then consults the Permission Authority.
        .merge(admin::admin_routes())
        .with_state(state);

    base_router
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        .layer(cors)
}

/// trace_span_logger
///
/// Span for `TraceLayer`: method, URI and the `x-request-id` set above, so every log line
/// of one request shares the same id.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
