//! # Storage Errors
//!
//! ```text
//! sqlx::Error ──► DbError ──► TransmitError::Database (dte-transmit)
//!
//!   SQLITE_BUSY / SQLITE_LOCKED ─┐
//!   pool acquire timeout ────────┴─► retryable: the issuance transaction
//!                                    backs off and runs again
//!   UNIQUE(control_number | generation_code) ─► UniqueViolation
//!   undecodable payload / sequence row ───────► Corrupt
//! ```

use dte_core::CoreError;
use sqlx::error::{DatabaseError, ErrorKind};
use thiserror::Error;

/// Primary SQLite result codes for lock contention.
const SQLITE_BUSY: i64 = 5;
const SQLITE_LOCKED: i64 = 6;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// ## When This Occurs
    /// - A generation code stored twice
    /// - A control number stored twice (the sequence was bypassed)
    #[error("Duplicate {field}: '{value}' already exists")]
    UniqueViolation { field: String, value: String },

    /// The write lock was not granted within the busy timeout.
    ///
    /// ## When This Occurs
    /// - Many issuers allocating on the same sequence key at once
    /// - A contingency batch update holding the write lock
    #[error("Database busy: {0}")]
    Busy(String),

    /// Every pooled connection stayed checked out past the acquire timeout.
    #[error("Connection pool exhausted")]
    PoolExhausted,

    #[error("Database unavailable: {0}")]
    Unavailable(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Statement failed: {0}")]
    Statement(String),

    /// A stored row could not be mapped back to the domain.
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Result type for storage operations.
pub type DbResult<T> = Result<T, DbError>;

impl DbError {
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    pub fn duplicate(field: impl Into<String>, value: impl Into<String>) -> Self {
        DbError::UniqueViolation {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Lock contention: the same transaction may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DbError::Busy(_) | DbError::PoolExhausted)
    }

    fn from_database(err: &dyn DatabaseError) -> Self {
        let message = err.message();

        if is_lock_contention(err.code().as_deref(), message) {
            return DbError::Busy(message.to_string());
        }

        match err.kind() {
            // SQLite reports "UNIQUE constraint failed: documents.control_number"
            ErrorKind::UniqueViolation => DbError::duplicate(
                message
                    .rsplit(": ")
                    .next()
                    .unwrap_or("unknown")
                    .to_string(),
                "unknown",
            ),
            _ => DbError::Statement(message.to_string()),
        }
    }
}

/// SQLite extended codes carry the primary code in the low byte
/// (517 = SQLITE_BUSY_SNAPSHOT).
fn is_lock_contention(code: Option<&str>, message: &str) -> bool {
    match code.and_then(|c| c.parse::<i64>().ok()) {
        Some(code) => matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED),
        None => message.contains("database is locked"),
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::not_found("Row", "unknown"),
            sqlx::Error::Database(db_err) => DbError::from_database(db_err.as_ref()),
            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,
            sqlx::Error::PoolClosed => DbError::Unavailable("pool is closed".into()),
            sqlx::Error::Io(e) => DbError::Unavailable(e.to_string()),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::Corrupt(format!("column {index}: {source}"))
            }
            other => DbError::Statement(other.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::Migration(err.to_string())
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::Corrupt(err.to_string())
    }
}
