use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;
use utoipa::ToSchema;

/// StoreError
///
/// Failures surfaced by the data-access layer. Kept independent of HTTP so that the
/// repository implementations never decide response codes.
#[derive(ThisError, Debug)]
pub enum StoreError {
    /// Store unreachable, pool exhausted or statement timed out. Retryable.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Unique constraint violation.
    #[error("conflict on {constraint}")]
    Conflict { constraint: String },

    /// Foreign key violation (e.g. unknown role id).
    #[error("invalid reference: {0}")]
    InvalidReference(String),

    #[error("store error: {0}")]
    Other(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Unavailable(err.to_string())
            }
            sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
                Some("23505") => StoreError::Conflict {
                    constraint: db_err.constraint().unwrap_or("unknown").to_string(),
                },
                Some("23503") => StoreError::InvalidReference(db_err.message().to_string()),
                // query_canceled: raised when statement_timeout fires
                Some("57014") => StoreError::Unavailable(db_err.message().to_string()),
                _ => StoreError::Other(err.to_string()),
            },
            _ => StoreError::Other(err.to_string()),
        }
    }
}

/// AppError
///
/// The complete failure taxonomy of the API. Authentication and authorization variants
/// carry no detail into the response body; the precise cause is only logged.
#[derive(ThisError, Debug)]
pub enum AppError {
    /// Unknown login name and wrong password are deliberately the same variant.
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("missing bearer token")]
    MissingToken,

    #[error("invalid token: {reason}")]
    InvalidToken { reason: String },

    #[error("token expired")]
    ExpiredToken,

    #[error("no active session for token")]
    InvalidSession,

    #[error("missing permission {permission}")]
    Forbidden { permission: String },

    /// The token was minted but its session row could not be written.
    #[error("failed to persist session: {0}")]
    SessionPersistence(String),

    #[error("backing store unavailable: {0}")]
    Unavailable(String),

    #[error("{message}")]
    BadRequest { message: String },

    #[error("{resource} not found")]
    NotFound { resource: String },

    #[error("{message}")]
    Conflict { message: String },

    #[error("failed to {operation}")]
    Internal { operation: String },
}

/// ErrorBody
///
/// JSON shape of every error response.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub message: String,
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidCredentials
            | AppError::MissingToken
            | AppError::InvalidToken { .. }
            | AppError::ExpiredToken
            | AppError::InvalidSession => StatusCode::UNAUTHORIZED,
            AppError::Forbidden { .. } => StatusCode::FORBIDDEN,
            AppError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::Conflict { .. } => StatusCode::CONFLICT,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::SessionPersistence(_) | AppError::Internal { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message safe to return to the client.
    pub fn user_message(&self) -> String {
        match self {
            AppError::InvalidCredentials => "Invalid credentials".to_string(),
            AppError::MissingToken
            | AppError::InvalidToken { .. }
            | AppError::ExpiredToken
            | AppError::InvalidSession => "Authentication required".to_string(),
            AppError::Forbidden { .. } => {
                "You do not have permission to perform this action".to_string()
            }
            AppError::BadRequest { message } | AppError::Conflict { message } => message.clone(),
            AppError::NotFound { resource } => format!("{resource} not found"),
            AppError::Unavailable(_) => "Service temporarily unavailable".to_string(),
            AppError::SessionPersistence(_) | AppError::Internal { .. } => {
                "Internal server error".to_string()
            }
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(detail) => AppError::Unavailable(detail),
            StoreError::Conflict { constraint } => AppError::Conflict {
                message: if constraint.contains("username") {
                    "This username is already taken".to_string()
                } else if constraint.contains("email") {
                    "An account with this email address already exists".to_string()
                } else {
                    "Resource already exists".to_string()
                },
            },
            StoreError::InvalidReference(_) => AppError::BadRequest {
                message: "Invalid reference to related resource".to_string(),
            },
            StoreError::Other(detail) => AppError::Internal {
                operation: format!("query store: {detail}"),
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match &self {
            AppError::Internal { .. }
            | AppError::SessionPersistence(_)
            | AppError::Unavailable(_) => {
                tracing::error!("Internal service error: {}", self);
            }
            AppError::Conflict { .. } => {
                tracing::warn!("Store constraint error: {}", self);
            }
            AppError::InvalidCredentials
            | AppError::MissingToken
            | AppError::InvalidToken { .. }
            | AppError::ExpiredToken
            | AppError::InvalidSession
            | AppError::Forbidden { .. } => {
                tracing::info!("Authorization error: {}", self);
            }
            AppError::BadRequest { .. } | AppError::NotFound { .. } => {
                tracing::debug!("Client error: {}", self);
            }
        }

        let body = ErrorBody {
            message: self.user_message(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_failures_share_one_message() {
        let failures = [
            AppError::MissingToken,
            AppError::InvalidToken {
                reason: "InvalidSignature".to_string(),
            },
            AppError::ExpiredToken,
            AppError::InvalidSession,
        ];

        for failure in failures {
            assert_eq!(failure.status_code(), StatusCode::UNAUTHORIZED);
            assert_eq!(failure.user_message(), "Authentication required");
        }
    }

    #[test]
    fn test_internal_detail_is_not_exposed() {
        let err = AppError::SessionPersistence("relation \"sessions\" does not exist".to_string());
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.user_message(), "Internal server error");
    }

    #[test]
    fn test_store_unavailable_is_retryable_503() {
        let err = AppError::from(StoreError::Unavailable("pool timed out".to_string()));
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_unique_violation_maps_to_conflict() {
        let err = AppError::from(StoreError::Conflict {
            constraint: "users_username_key".to_string(),
        });
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.user_message(), "This username is already taken");
    }
}
