//! Authentication errors.

use thiserror::Error;

/// Errors produced by token validation and the login flow.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing authorization header")]
    MissingAuthHeader,

    #[error("Invalid authorization header")]
    InvalidAuthHeader,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Token has expired")]
    TokenExpired,

    #[error("Invalid or expired code")]
    InvalidCode,

    #[error("Authentication error: {0}")]
    Internal(String),
}
