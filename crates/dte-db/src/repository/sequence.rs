//! # Control Number Sequences
//!
//! One counter per (branch, document type, year).
//!
//! ## Increment Protocol
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                   INSIDE ONE TRANSACTION                                │
//! │                                                                         │
//! │  1. INSERT (branch, type, year, 0) ON CONFLICT DO NOTHING              │
//! │     └── first statement is a write: the write lock is taken here,      │
//! │         concurrent allocators wait (busy_timeout)                      │
//! │                                                                         │
//! │  2. UPDATE .. SET last_number = last_number + 1 .. RETURNING           │
//! │     └── read-increment-write under the lock                            │
//! │                                                                         │
//! │  COMMIT  → number is consumed                                          │
//! │  ROLLBACK (error, drop, timeout) → counter unchanged                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use dte_core::DocumentType;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};

/// Repository for control number sequences.
#[derive(Debug, Clone)]
pub struct SequenceRepository {
    pool: SqlitePool,
}

impl SequenceRepository {
    /// Creates a new SequenceRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SequenceRepository { pool }
    }

    /// Increments and returns the counter for a key, on the caller's
    /// connection.
    ///
    /// Must run inside a transaction: the increment is only durable once
    /// the caller commits.
    ///
    /// ## Returns
    /// * `Ok(n)` - The new last number (1 for a fresh key)
    /// * `Err(DbError::Busy)` - The write lock was not obtained in time
    pub async fn next_in(
        conn: &mut SqliteConnection,
        branch_id: &str,
        document_type: DocumentType,
        year: i32,
    ) -> DbResult<u64> {
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO control_sequences (branch_id, document_type, year, last_number, updated_at)
            VALUES (?1, ?2, ?3, 0, ?4)
            ON CONFLICT (branch_id, document_type, year) DO NOTHING
            "#,
        )
        .bind(branch_id)
        .bind(document_type.code())
        .bind(year)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        let next: i64 = sqlx::query_scalar(
            r#"
            UPDATE control_sequences
            SET last_number = last_number + 1,
                updated_at = ?4
            WHERE branch_id = ?1 AND document_type = ?2 AND year = ?3
            RETURNING last_number
            "#,
        )
        .bind(branch_id)
        .bind(document_type.code())
        .bind(year)
        .bind(now)
        .fetch_one(&mut *conn)
        .await?;

        debug!(
            branch_id = %branch_id,
            document_type = %document_type,
            year,
            next,
            "Sequence incremented"
        );

        u64::try_from(next).map_err(|_| DbError::Corrupt(format!("negative sequence {next}")))
    }

    /// Returns the last issued number for a key, if the key exists.
    pub async fn current(
        &self,
        branch_id: &str,
        document_type: DocumentType,
        year: i32,
    ) -> DbResult<Option<u64>> {
        let last: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT last_number FROM control_sequences
            WHERE branch_id = ?1 AND document_type = ?2 AND year = ?3
            "#,
        )
        .bind(branch_id)
        .bind(document_type.code())
        .bind(year)
        .fetch_optional(&self.pool)
        .await?;

        last.map(|n| u64::try_from(n).map_err(|_| DbError::Corrupt(format!("negative sequence {n}"))))
            .transpose()
    }
}
