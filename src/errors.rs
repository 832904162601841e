//! Unified application error type.
//! Validation problems are caught before any store call; store failures
//! propagate unchanged. No automatic retry anywhere.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("a user with that email already exists")]
    DuplicateIdentity,

    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("document store unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl From<rusqlite::Error> for AppError {
    fn from(e: rusqlite::Error) -> Self {
        AppError::RemoteUnavailable(e.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::RemoteUnavailable(format!("document encoding: {e}"))
    }
}

pub type AppResult<T> = Result<T, AppError>;
