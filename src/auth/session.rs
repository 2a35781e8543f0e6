//! Session Issuer and Session Terminator.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    auth::{
        RequestMeta,
        credentials::VerifiedIdentity,
        token::{self, Claims},
    },
    errors::{AppError, StoreError},
    models::NewSession,
    repository::Repository,
};

/// IssuedSession
///
/// What a successful login hands back: the bearer token and the id of the durable
/// session row it is bound to.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub token: String,
    pub session_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// issue_session
///
/// Mints a token for `identity` and persists a brand-new session row for it. Concurrent
/// logins of the same identity each get their own row.
pub async fn issue_session(
    repo: &dyn Repository,
    secret: &str,
    identity: &VerifiedIdentity,
    meta: &RequestMeta,
) -> Result<IssuedSession, AppError> {
    issue_session_at(repo, secret, identity, meta, Utc::now()).await
}

/// issue_session_at
///
/// `issue_session` with an explicit issuance instant.
///
/// The token is only returned once the insert has completed; a failed write fails the
/// whole login. A timed-out store surfaces as `Unavailable`, any other write failure as
/// `SessionPersistence`.
pub async fn issue_session_at(
    repo: &dyn Repository,
    secret: &str,
    identity: &VerifiedIdentity,
    meta: &RequestMeta,
    issued_at: DateTime<Utc>,
) -> Result<IssuedSession, AppError> {
    let session_id = Uuid::new_v4();
    let claims = Claims::new(identity, session_id, issued_at);
    let token = token::sign_token(&claims, secret)?;
    let expires_at = DateTime::<Utc>::from_timestamp(claims.exp, 0).ok_or_else(|| AppError::Internal {
        operation: "compute token expiry".to_string(),
    })?;

    let record = repo
        .create_session(NewSession {
            id: session_id,
            user_id: identity.id,
            token_hash: token::token_hash(&token),
            ip_address: meta.ip.clone(),
            user_agent: meta.user_agent.clone(),
            created_at: issued_at,
            expires_at,
        })
        .await
        .map_err(|e| match e {
            StoreError::Unavailable(detail) => AppError::Unavailable(detail),
            other => AppError::SessionPersistence(other.to_string()),
        })?;

    tracing::info!(user_id = identity.id, session_id = %record.id, "session issued");

    Ok(IssuedSession {
        token,
        session_id: record.id,
        expires_at,
    })
}

/// terminate_session
///
/// Closes the session bound to `token`. Idempotent: an unknown or already closed session
/// is not an error. Returns whether a row was actually closed.
pub async fn terminate_session(repo: &dyn Repository, token: &str) -> Result<bool, AppError> {
    let closed = repo.close_session(&token::token_hash(token)).await?;
    if closed {
        tracing::info!("session closed");
    } else {
        tracing::debug!("logout for unknown or already closed session");
    }
    Ok(closed)
}
