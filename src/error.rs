//! Error Types
//! Mission: Map every session failure to a stable status code and a minimal body

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Request-time failures of the session layer.
///
/// Every variant renders as `{"message": ...}`. Internal details are logged
/// where the error is produced and never reach the body.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token signature or payload is invalid")]
    TokenInvalid,
    #[error("token has expired")]
    TokenExpired,
    #[error("authentication required")]
    Unauthenticated,
    #[error("role not allowed for this route")]
    Unauthorized,
    #[error("invalid username or password")]
    InvalidCredentials,
    #[error("rate limit exceeded")]
    RateLimited,
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),
    #[error("internal error")]
    Internal,
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::TokenInvalid
            | AuthError::TokenExpired
            | AuthError::Unauthenticated
            | AuthError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AuthError::Unauthorized => StatusCode::FORBIDDEN,
            AuthError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AuthError::Configuration(_) | AuthError::Internal => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn public_message(&self) -> &'static str {
        match self {
            AuthError::TokenInvalid | AuthError::TokenExpired | AuthError::Unauthenticated => {
                "Unauthorized"
            }
            AuthError::InvalidCredentials => "Invalid username or password",
            AuthError::Unauthorized => "Permission denied",
            AuthError::RateLimited => "Rate limit exceeded",
            AuthError::Configuration(_) | AuthError::Internal => "Internal server error",
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "message": self.public_message() }))).into_response()
    }
}

/// Construction-time failures. Raised before the listener binds, never per request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("role gate requires at least one allowed role")]
    EmptyRoleSet,
    #[error("{0} secret must not be empty")]
    EmptySecret(&'static str),
    #[error("{name} secret must be at least {min} bytes")]
    WeakSecret { name: &'static str, min: usize },
    #[error("access and refresh tokens must be signed with different secrets")]
    SharedSecret,
    #[error("{0} must be greater than zero")]
    ZeroValue(&'static str),
    #[error("role gate mounted without a preceding auth gate")]
    MissingIdentity,
    #[error("rate limit window for {route} exceeds {max_secs}s")]
    WindowTooLong { route: String, max_secs: u64 },
    #[error("invalid CORS origin: {0}")]
    InvalidOrigin(String),
}
