use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Table '{0}' already exists")]
    TableExists(String),

    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("Column '{0}' not found in table '{1}'")]
    ColumnNotFound(String, String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Lock error: {0}")]
    LockError(String),

    #[error("Connection pool exhausted: no connection available within {0:?}")]
    PoolExhausted(Duration),

    #[error("Lock timeout: could not lock row {key} in '{table}'")]
    LockTimeout { table: String, key: String },

    #[error("Connection is closed")]
    ConnectionClosed,

    #[error("Current transaction is aborted, statements ignored until ROLLBACK")]
    TransactionAborted,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Coarse classification used by callers to decide between retrying,
/// asking the user for fresh data, or reporting a system error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    PoolExhausted,
    LockTimeout,
    StatementFailure,
}

impl ErrorKind {
    /// Whether a retry with backoff may succeed without changing the request.
    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorKind::PoolExhausted | ErrorKind::LockTimeout)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::PoolExhausted => write!(f, "pool_exhausted"),
            ErrorKind::LockTimeout => write!(f, "lock_timeout"),
            ErrorKind::StatementFailure => write!(f, "statement_failure"),
        }
    }
}

impl DbError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DbError::PoolExhausted(_) => ErrorKind::PoolExhausted,
            DbError::LockTimeout { .. } => ErrorKind::LockTimeout,
            _ => ErrorKind::StatementFailure,
        }
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

impl<T> From<std::sync::PoisonError<T>> for DbError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert_eq!(
            DbError::PoolExhausted(Duration::from_millis(5)).kind(),
            ErrorKind::PoolExhausted
        );
        assert_eq!(
            DbError::LockTimeout {
                table: "reservations".into(),
                key: "43".into()
            }
            .kind(),
            ErrorKind::LockTimeout
        );
        assert_eq!(
            DbError::ConstraintViolation("dup".into()).kind(),
            ErrorKind::StatementFailure
        );
        assert_eq!(DbError::ConnectionClosed.kind(), ErrorKind::StatementFailure);
    }

    #[test]
    fn test_transient_kinds() {
        assert!(ErrorKind::PoolExhausted.is_transient());
        assert!(ErrorKind::LockTimeout.is_transient());
        assert!(!ErrorKind::StatementFailure.is_transient());
    }
}
