use std::{net::SocketAddr, str::FromStr, sync::Arc};

use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use university_api::{
    AppState,
    activity::{ActivityLog, ActivityState, S3ActivityLog},
    config::{AppConfig, Env},
    create_router,
    repository::{PostgresRepository, RepositoryState},
};

/// main
///
/// Loads configuration, initializes logging, connects the credential store and the
/// activity log, then serves the router.
#[tokio::main]
async fn main() {
    // 1. Configuration (fail-fast)
    dotenv::dotenv().ok();
    let config = AppConfig::load();

    // 2. Logging: RUST_LOG wins, otherwise crate debug + HTTP info.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "university_api=debug,tower_http=info".into());

    match config.env {
        Env::Local => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        Env::Production => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
    }

    tracing::info!("Application starting in {:?} mode", config.env);

    if config.legacy.enabled {
        tracing::warn!(
            entries = config.legacy.credentials.len(),
            "legacy credential migration is ENABLED; disable it once every listed account has logged in"
        );
    }

    // 3. Credential store (Postgres). Every statement and every pool checkout is bounded
    // by DB_TIMEOUT_SECS so an unreachable store surfaces as 503 instead of hanging.
    let statement_timeout = config.db_timeout.as_millis().to_string();
    let connect_options = PgConnectOptions::from_str(&config.db_url)
        .expect("FATAL: DATABASE_URL is not a valid Postgres URL.")
        .options([("statement_timeout", statement_timeout.as_str())]);

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(config.db_timeout)
        .connect_with(connect_options)
        .await
        .expect("FATAL: Failed to connect to Postgres. Check DATABASE_URL.");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("FATAL: Failed to apply database migrations.");

    let repo = Arc::new(PostgresRepository::new(pool)) as RepositoryState;

    // 4. Activity log (S3/MinIO)
    let activity_log = S3ActivityLog::new(
        &config.s3_endpoint,
        &config.s3_region,
        &config.s3_key,
        &config.s3_secret,
        &config.activity_bucket,
    )
    .await;

    if config.env == Env::Local {
        activity_log.ensure_bucket_exists().await;
    }

    let activity = Arc::new(activity_log) as ActivityState;

    // 5. State, router, server
    let bind_addr = config.bind_addr.clone();
    let app_state = AppState {
        repo,
        activity,
        config,
    };

    let app = create_router(app_state);

    let listener = TcpListener::bind(&bind_addr)
        .await
        .expect("FATAL: Failed to bind BIND_ADDR.");

    tracing::info!("Listening on {bind_addr}");
    tracing::info!("API Documentation (Swagger UI) available at: http://{bind_addr}/swagger-ui");

    // ConnectInfo feeds the client address recorded on sessions and activity documents.
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("FATAL: HTTP server terminated unexpectedly.");
}
