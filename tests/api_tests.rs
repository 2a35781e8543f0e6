use chrono::{Duration, Utc};
use serde_json::{Value, json};
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use university_api::{
    AppConfig, AppState, InMemoryRepository, MockActivityLog,
    activity::ActivityState,
    auth::{RequestMeta, credentials::VerifiedIdentity, session},
    create_router,
    models::LoginResponse,
    password::{self, Argon2Params},
    repository::RepositoryState,
};

const ADMIN_ROLE: i32 = 1;
const STUDENT_ROLE: i32 = 3;

pub struct TestApp {
    pub address: String,
    pub repo: Arc<InMemoryRepository>,
    pub activity: Arc<MockActivityLog>,
    pub config: AppConfig,
}

async fn spawn_app_with(activity: MockActivityLog) -> TestApp {
    let repo = Arc::new(
        InMemoryRepository::new()
            .with_role(ADMIN_ROLE, "administrator")
            .with_role(STUDENT_ROLE, "student")
            .with_grant(ADMIN_ROLE, "users.view")
            .with_grant(ADMIN_ROLE, "users.create"),
    );

    let admin_hash = password::hash_password("admin123", Argon2Params::testing())
        .await
        .unwrap();
    let student_hash = password::hash_password("estudiante123", Argon2Params::testing())
        .await
        .unwrap();
    repo.seed_user("admin", &admin_hash, ADMIN_ROLE);
    repo.seed_user("mgonzalez", &student_hash, STUDENT_ROLE);

    let activity = Arc::new(activity);
    let config = AppConfig::default();
    let state = AppState {
        repo: repo.clone() as RepositoryState,
        activity: activity.clone() as ActivityState,
        config: config.clone(),
    };
    let router = create_router(state);

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    tokio::spawn(async move {
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    TestApp {
        address,
        repo,
        activity,
        config,
    }
}

async fn spawn_app() -> TestApp {
    spawn_app_with(MockActivityLog::new()).await
}

async fn login(app: &TestApp, username: &str, password: &str) -> reqwest::Response {
    reqwest::Client::new()
        .post(format!("{}/api/auth/login", app.address))
        .json(&json!({ "username": username, "password": password }))
        .send()
        .await
        .expect("login request failed")
}

async fn token_for(app: &TestApp, username: &str, password: &str) -> String {
    let response = login(app, username, password).await;
    assert_eq!(response.status(), 200);
    let body: LoginResponse = response.json().await.unwrap();
    body.token
}

#[tokio::test]
async fn test_health_check() {
    let app = spawn_app().await;
    let response = reqwest::Client::new()
        .get(format!("{}/health", app.address))
        .send()
        .await
        .expect("req fail");

    assert!(response.status().is_success());
    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(response.text().await.unwrap(), "ok");
}

#[tokio::test]
async fn test_login_session_lifecycle() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    // Login
    let response = login(&app, "admin", "admin123").await;
    assert_eq!(response.status(), 200);
    let body: LoginResponse = response.json().await.unwrap();
    assert_eq!(body.user.username, "admin");
    assert_eq!(body.user.role.name, "administrator");
    assert!(body.user.permissions.contains(&"users.view".to_string()));
    assert!(!body.token.is_empty());

    // Protected route with the token
    let response = client
        .get(format!("{}/api/users", app.address))
        .bearer_auth(&body.token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let users: Vec<Value> = response.json().await.unwrap();
    assert_eq!(users.len(), 2);
    assert!(users.iter().all(|u| u.get("password_hash").is_none()));

    // Same route without a token
    let response = client
        .get(format!("{}/api/users", app.address))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
    let error: Value = response.json().await.unwrap();
    assert_eq!(error["message"], "Authentication required");

    // Logout, then the token is dead
    let response = client
        .post(format!("{}/api/auth/logout", app.address))
        .bearer_auth(&body.token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let response = client
        .get(format!("{}/api/users", app.address))
        .bearer_auth(&body.token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    // Logging out twice is still fine
    let response = client
        .post(format!("{}/api/auth/logout", app.address))
        .bearer_auth(&body.token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn test_login_failures_share_one_response() {
    let app = spawn_app().await;

    let wrong_password = login(&app, "admin", "nope").await;
    assert_eq!(wrong_password.status(), 401);
    let wrong_password: Value = wrong_password.json().await.unwrap();

    let unknown_user = login(&app, "ghost", "admin123").await;
    assert_eq!(unknown_user.status(), 401);
    let unknown_user: Value = unknown_user.json().await.unwrap();

    assert_eq!(wrong_password, unknown_user);
    assert_eq!(wrong_password["message"], "Invalid credentials");
}

#[tokio::test]
async fn test_login_requires_both_fields() {
    let app = spawn_app().await;

    let response = login(&app, "admin", "").await;
    assert_eq!(response.status(), 400);

    let response = reqwest::Client::new()
        .post(format!("{}/api/auth/login", app.address))
        .json(&json!({ "username": "admin" }))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn test_missing_permission_yields_403() {
    let app = spawn_app().await;
    let token = token_for(&app, "mgonzalez", "estudiante123").await;

    let response = reqwest::Client::new()
        .get(format!("{}/api/users", app.address))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);
}

#[tokio::test]
async fn test_expired_token_yields_401() {
    let app = spawn_app().await;
    let identity = VerifiedIdentity {
        id: 1,
        username: "admin".to_string(),
        role_id: ADMIN_ROLE,
        role_name: "administrator".to_string(),
    };
    let issued = session::issue_session_at(
        app.repo.as_ref(),
        &app.config.jwt_secret,
        &identity,
        &RequestMeta::default(),
        Utc::now() - Duration::hours(25),
    )
    .await
    .unwrap();

    let response = reqwest::Client::new()
        .get(format!("{}/api/auth/me", app.address))
        .bearer_auth(&issued.token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn test_logout_without_token_is_ok() {
    let app = spawn_app().await;

    let response = reqwest::Client::new()
        .post(format!("{}/api/auth/logout", app.address))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let response = reqwest::Client::new()
        .post(format!("{}/api/auth/logout", app.address))
        .bearer_auth("garbage")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn test_session_records_client_metadata() {
    let app = spawn_app().await;

    let response = reqwest::Client::new()
        .post(format!("{}/api/auth/login", app.address))
        .header("user-agent", "registrar-desk/1.0")
        .json(&json!({ "username": "admin", "password": "admin123" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let sessions = app.repo.sessions_of(1);
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].user_agent.as_deref(), Some("registrar-desk/1.0"));
    assert_eq!(sessions[0].ip_address.as_deref(), Some("127.0.0.1"));
}

#[tokio::test]
async fn test_login_and_logout_are_recorded() {
    let app = spawn_app().await;
    let token = token_for(&app, "admin", "admin123").await;

    reqwest::Client::new()
        .post(format!("{}/api/auth/logout", app.address))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();

    let records = app.activity.records();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].action, "login");
    assert_eq!(records[0].user_id, Some(1));
    assert_eq!(records[0].path, "/api/auth/login");
    assert_eq!(records[1].action, "logout");
    assert_eq!(records[1].username.as_deref(), Some("admin"));
}

#[tokio::test]
async fn test_activity_log_failure_does_not_fail_login() {
    let app = spawn_app_with(MockActivityLog::new_failing()).await;

    let response = login(&app, "admin", "admin123").await;
    assert_eq!(response.status(), 200);
    assert!(app.activity.records().is_empty());
}

#[tokio::test]
async fn test_store_outage_yields_503() {
    let app = spawn_app().await;
    app.repo.set_unavailable(true);

    let response = login(&app, "admin", "admin123").await;
    assert_eq!(response.status(), 503);
    let error: Value = response.json().await.unwrap();
    assert_eq!(error["message"], "Service temporarily unavailable");
}

#[tokio::test]
async fn test_session_write_failure_returns_no_token() {
    let app = spawn_app().await;
    app.repo.set_fail_session_writes(true);

    let response = login(&app, "admin", "admin123").await;
    assert_eq!(response.status(), 500);
    let error: Value = response.json().await.unwrap();
    assert!(error.get("token").is_none());
    assert_eq!(error["message"], "Internal server error");
}
