//! # Sequence Allocator
//!
//! Turns a sequence increment into a formatted [`ControlNumber`].
//!
//! ## Flow
//! ```text
//! allocate_next(branch, type)
//!      │
//!      ▼
//! year = clock.now().year()
//!      │
//!      ▼
//! ┌──────────────────────────────┐   Busy    ┌─────────────────────┐
//! │ BEGIN                        │──────────►│ backoff, try again  │
//! │ SequenceRepository::next_in  │           └─────────────────────┘
//! │ COMMIT                       │
//! └──────────────┬───────────────┘
//!                ▼
//! ControlNumber::format(type, establishment|"0000", pos|"0000", year?, n)
//! ```
//!
//! The issuance path uses [`SequenceAllocator::next_in_transaction`] instead,
//! so the number and the stored document commit (or roll back) together.

use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use chrono::Datelike;
use dte_core::control_number::DEFAULT_UNIT_CODE;
use dte_core::{Clock, ControlNumber, Document, DocumentType, Issuer};
use sqlx::SqliteConnection;
use tracing::{debug, warn};

use crate::error::DbResult;
use crate::pool::Database;
use crate::repository::sequence::SequenceRepository;

/// Retry schedule for busy allocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    /// Total time spent retrying before the busy error is returned.
    pub max_elapsed: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            initial_interval: Duration::from_millis(20),
            max_interval: Duration::from_millis(500),
            max_elapsed: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Creates the exponential backoff for one allocation.
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_interval,
            max_interval: self.max_interval,
            multiplier: 2.0,
            max_elapsed_time: Some(self.max_elapsed),
            ..Default::default()
        }
    }
}

/// Allocates control numbers.
#[derive(Clone)]
pub struct SequenceAllocator {
    db: Database,
    clock: Arc<dyn Clock>,
    include_year: bool,
    retry: RetryPolicy,
}

impl SequenceAllocator {
    pub fn new(db: Database, clock: Arc<dyn Clock>) -> Self {
        SequenceAllocator {
            db,
            clock,
            include_year: false,
            retry: RetryPolicy::default(),
        }
    }

    /// Embeds the four-digit year in the numeric tail.
    pub fn include_year(mut self, include: bool) -> Self {
        self.include_year = include;
        self
    }

    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Allocates the next control number for `branch` in the current year.
    ///
    /// Commits on its own transaction and retries busy failures with
    /// exponential backoff.
    ///
    /// ## Returns
    /// * `Ok(ControlNumber)` - Committed, never handed out again
    /// * `Err(DbError::Busy)` - Lock contention outlasted the retry policy
    pub async fn allocate_next(
        &self,
        branch: &Issuer,
        document_type: DocumentType,
    ) -> DbResult<ControlNumber> {
        let year = self.clock.now().year();
        let mut backoff = self.retry.backoff();

        loop {
            match self.allocate_once(branch, document_type, year).await {
                Ok(number) => return Ok(number),
                Err(e) if e.is_retryable() => match backoff.next_backoff() {
                    Some(wait) => {
                        debug!(?wait, branch_id = %branch.branch_id, "Sequence busy, retrying");
                        tokio::time::sleep(wait).await;
                    }
                    None => {
                        warn!(branch_id = %branch.branch_id, error = %e, "Sequence allocation gave up");
                        return Err(e);
                    }
                },
                Err(e) => return Err(e),
            }
        }
    }

    async fn allocate_once(
        &self,
        branch: &Issuer,
        document_type: DocumentType,
        year: i32,
    ) -> DbResult<ControlNumber> {
        let mut tx = self.db.begin().await?;
        let sequence = SequenceRepository::next_in(&mut tx, &branch.branch_id, document_type, year).await?;
        let number = self.format(branch, document_type, year, sequence)?;
        tx.commit().await?;
        Ok(number)
    }

    /// Allocates on the caller's transaction for `doc`'s issuer, type and
    /// emission year.
    ///
    /// Nothing is retried here: a busy error aborts the caller's transaction,
    /// which the caller retries as a whole.
    pub async fn next_in_transaction(
        &self,
        conn: &mut SqliteConnection,
        doc: &Document,
    ) -> DbResult<ControlNumber> {
        let branch = &doc.issuer;
        let sequence =
            SequenceRepository::next_in(conn, &branch.branch_id, doc.document_type(), doc.year())
                .await?;
        self.format(branch, doc.document_type(), doc.year(), sequence)
    }

    fn format(
        &self,
        branch: &Issuer,
        document_type: DocumentType,
        year: i32,
        sequence: u64,
    ) -> DbResult<ControlNumber> {
        let year = self.include_year.then_some(year);
        Ok(ControlNumber::format(
            document_type,
            unit_code(&branch.establishment_code),
            unit_code(&branch.pos_code),
            year,
            sequence,
        )?)
    }
}

impl std::fmt::Debug for SequenceAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequenceAllocator")
            .field("include_year", &self.include_year)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

/// Establishment / POS code, `0000` when absent or blank.
fn unit_code(code: &Option<String>) -> &str {
    match code.as_deref().map(str::trim) {
        Some(c) if !c.is_empty() => c,
        _ => DEFAULT_UNIT_CODE,
    }
}
