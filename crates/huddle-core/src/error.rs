use huddle_db::DbError;
use huddle_util::validation::ValidationError;
use thiserror::Error;

use crate::auth::AuthError;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Unauthenticated(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("database error: {0}")]
    Database(DbError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }
}

impl From<DbError> for CoreError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::NotFound => CoreError::NotFound("not found".to_string()),
            DbError::Conflict(msg) => CoreError::Conflict(msg),
            other => CoreError::Database(other),
        }
    }
}

impl From<ValidationError> for CoreError {
    fn from(e: ValidationError) -> Self {
        CoreError::Validation(e.to_string())
    }
}

impl From<AuthError> for CoreError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Unauthenticated => CoreError::Unauthenticated("Unauthorized request".into()),
            AuthError::InvalidToken => CoreError::Unauthenticated("Invalid access token".into()),
            AuthError::InvalidCredentials => CoreError::Unauthenticated("Invalid password".into()),
            AuthError::Internal(msg) => CoreError::Internal(msg),
        }
    }
}
