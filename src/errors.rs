use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("REMOTE_FAILURE: {0}")]
    Remote(String),
    #[error("NOT_FOUND: {0}")]
    NotFound(String),
    #[error("INVALID: {0}")]
    Invalid(String),
    #[error("INCONSISTENT: {0}")]
    Inconsistent(String),
    #[error("IO_FAILURE: {0}")]
    Io(String),
    #[error("INTERNAL: {0}")]
    Internal(String),
}

impl AppError {
    /// Remote failures are transient: the affected field stays pending and is
    /// retried by the next edit or explicit commit.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Remote(_))
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(value: serde_yaml::Error) -> Self {
        Self::Invalid(value.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;

pub fn to_client_error(error: impl std::fmt::Display) -> String {
    error.to_string()
}
