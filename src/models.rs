use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use ts_rs::TS;
use utoipa::ToSchema;
use uuid::Uuid;

// --- Credential Store Records ---

/// Identity
///
/// An authenticable principal as the Credential Verifier sees it: the active user row
/// joined with its single role. Never serialized to clients (carries the hash).
#[derive(Debug, Clone, FromRow)]
pub struct Identity {
    pub id: i32,
    pub username: String,
    pub password_hash: String,
    pub role_id: i32,
    pub role_name: String,
    pub active: bool,
}

/// Role
///
/// Named bundle of permissions. Every identity has exactly one.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, PartialEq)]
#[ts(export)]
pub struct Role {
    pub id: i32,
    pub name: String,
}

/// SessionRecord
///
/// Server-side record of one successful login. `token_hash` is the SHA-256 hex digest
/// of the issued token. Once `active` is false it never flips back.
#[derive(Debug, Clone, FromRow)]
pub struct SessionRecord {
    pub id: Uuid,
    pub user_id: i32,
    pub token_hash: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub active: bool,
}

/// NewSession
///
/// Insert payload built by the Session Issuer.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub id: Uuid,
    pub user_id: i32,
    pub token_hash: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// SessionIdentity
///
/// Result of the session-liveness lookup: an active session joined with its still-active
/// identity and role.
#[derive(Debug, Clone, FromRow)]
pub struct SessionIdentity {
    pub session_id: Uuid,
    pub user_id: i32,
    pub username: String,
    pub role_id: i32,
    pub role_name: String,
}

// --- User Administration ---

/// UserProfile
///
/// Public view of a user row. The password hash never leaves the repository.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, PartialEq)]
#[ts(export)]
pub struct UserProfile {
    pub id: i32,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub username: String,
    pub role_id: i32,
    pub role_name: String,
    pub active: bool,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string | null")]
    pub last_login_at: Option<DateTime<Utc>>,
}

/// CreateUserRequest
///
/// Body of `POST /api/users`. The plaintext password is hashed before it reaches the store.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct CreateUserRequest {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub username: String,
    pub password: String,
    pub role_id: i32,
}

/// NewUser
///
/// Insert payload for a provisioned identity.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub username: String,
    pub password_hash: String,
    pub role_id: i32,
}

/// UpdateUserRequest
///
/// Body of `PUT /api/users/{id}`. Every field is optional; absent fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct UpdateUserRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_id: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
}

/// UserPatch
///
/// Typed partial update handed to the repository, which turns each present field into
/// one bound `SET` clause.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserPatch {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub username: Option<String>,
    pub password_hash: Option<String>,
    pub role_id: Option<i32>,
    pub active: Option<bool>,
}

impl UserPatch {
    pub fn is_empty(&self) -> bool {
        *self == UserPatch::default()
    }
}

// --- Authentication Wire Types ---

/// LoginRequest
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// LoginUser
///
/// Identity summary returned at login, including the role's permission names.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct LoginUser {
    pub id: i32,
    pub username: String,
    pub role: Role,
    pub permissions: Vec<String>,
}

/// LoginResponse
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct LoginResponse {
    pub user: LoginUser,
    pub token: String,
    pub session_id: Uuid,
}

/// MeResponse
///
/// The authenticated context of the caller, with the role's current grants.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct MeResponse {
    pub id: i32,
    pub username: String,
    pub role: Role,
    pub session_id: Uuid,
    pub permissions: Vec<String>,
}

/// MessageResponse
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
