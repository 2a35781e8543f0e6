//! Token Authenticator: signature + expiry, then session liveness.

use crate::{
    auth::{AuthUser, token},
    errors::AppError,
    repository::Repository,
};

/// authenticate
///
/// Two phases, strictly in order:
/// 1. signature, structure and expiry of the token (no I/O);
/// 2. an active session row for the token's hash whose identity is still active.
///
/// Phase 2 is what lets logout revoke a token that is still cryptographically valid.
/// Role id and name come from the store, so a role change applies to the next request.
pub async fn authenticate(
    repo: &dyn Repository,
    secret: &str,
    token: Option<&str>,
) -> Result<AuthUser, AppError> {
    let token = token
        .filter(|t| !t.is_empty())
        .ok_or(AppError::MissingToken)?;

    let claims = token::decode_token(token, secret)?;

    let session = repo
        .find_active_session(&token::token_hash(token))
        .await?
        .ok_or(AppError::InvalidSession)?;

    // The row must be the one the token was minted for.
    if claims.jti != session.session_id || claims.identity_id() != Some(session.user_id) {
        return Err(AppError::InvalidSession);
    }

    Ok(AuthUser {
        id: session.user_id,
        username: session.username,
        role_id: session.role_id,
        role_name: session.role_name,
        session_id: session.session_id,
    })
}
