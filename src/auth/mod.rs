//! Authentication pipeline.
//!
//! Login: `credentials` → `session::issue_session`.
//! Every protected request: `authenticator` (via the `AuthUser` extractor) →
//! `permissions` (via the `Authorized` extractor).
//! Logout: `session::terminate_session`.

use std::{convert::Infallible, net::SocketAddr};

use axum::{
    extract::{ConnectInfo, FromRef, FromRequestParts},
    http::{HeaderMap, header, request::Parts},
};
use uuid::Uuid;

use crate::{config::AppConfig, errors::AppError, repository::RepositoryState};

pub mod authenticator;
pub mod credentials;
pub mod permissions;
pub mod session;
pub mod token;

/// AuthUser Extractor Result
///
/// The authenticated-identity context handed to downstream handlers.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthUser {
    pub id: i32,
    pub username: String,
    pub role_id: i32,
    pub role_name: String,
    pub session_id: Uuid,
}

/// AuthUser Extractor Implementation
///
/// Pulls the Repository and AppConfig out of the application state, reads the bearer
/// token and runs the Token Authenticator. Any failure rejects with `AppError`, which
/// renders as a generic 401.
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    RepositoryState: FromRef<S>,
    AppConfig: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let repo = RepositoryState::from_ref(state);
        let config = AppConfig::from_ref(state);

        authenticator::authenticate(
            repo.as_ref(),
            &config.jwt_secret,
            bearer_token(&parts.headers),
        )
        .await
    }
}

/// Returns the token of an `Authorization: Bearer <token>` header, if any.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// RequestMeta
///
/// Client metadata recorded on session rows and activity documents. Never rejects.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestMeta {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub method: String,
    pub path: String,
}

impl<S> FromRequestParts<S> for RequestMeta
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        // First hop of X-Forwarded-For wins over the socket peer (reverse proxy setups).
        let forwarded = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(|ip| ip.trim().to_string())
            .filter(|ip| !ip.is_empty());

        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string());

        let user_agent = parts
            .headers
            .get(header::USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        Ok(Self {
            ip: forwarded.or(peer),
            user_agent,
            method: parts.method.to_string(),
            path: parts.uri.path().to_string(),
        })
    }
}
