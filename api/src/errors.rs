use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("User not found")]
    UserNotFound,

    #[error("{0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Coarse classification used by the HTTP boundary and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Validation,
    Upstream,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Validation => "validation",
            ErrorKind::Upstream => "upstream",
        }
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::UserNotFound => ErrorKind::NotFound,
            Error::Validation(_) => ErrorKind::Validation,
            Error::Database(_) | Error::Migration(_) => ErrorKind::Upstream,
        }
    }

    /// Human-readable message returned to clients. Database errors surface the
    /// server's own message verbatim when there is one.
    pub fn detail(&self) -> String {
        match self {
            Error::Database(sqlx::Error::Database(db_err)) => db_err.message().to_string(),
            Error::Database(e) => e.to_string(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
