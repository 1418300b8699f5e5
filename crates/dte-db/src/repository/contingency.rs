//! # Contingency Queue Repository
//!
//! Documents that could not be transmitted, grouped under a contingency
//! record per branch.
//!
//! ## The Queue
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  ISSUANCE (breaker open or upstream failed)                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  enqueue_in ──► open record for the branch (created on demand)         │
//! │                 + link (record, document)                              │
//! │                                                                         │
//! │  CONTINGENCY PROCESSOR                                                 │
//! │       │                                                                 │
//! │       ├── branches_with_pending()                                      │
//! │       ├── pending_documents(branch, limit, max_attempts) oldest first  │
//! │       │        submit batch upstream                                   │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                complete_batch: SINGLE TRANSACTION               │   │
//! │  │  per document: processed + stamp | rejected + note | attempts+1 │   │
//! │  │  per record:   batch code, observations                         │   │
//! │  │  records with no pending document left → resolved               │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use dte_core::{ContingencyReason, DocumentStatus, TransmissionMode};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::repository::document::{DocumentRepository, StoredDocument};

/// Status of a contingency record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
pub enum ContingencyStatus {
    /// Documents are still waiting for transmission.
    Open,
    /// Every linked document was processed or rejected.
    Resolved,
}

/// A contingency episode of one branch.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct ContingencyRecord {
    pub id: String,
    pub branch_id: String,
    pub reason_code: i64,
    pub reason_text: Option<String>,
    pub status: ContingencyStatus,
    pub batch_code: Option<String>,
    pub observations: Option<String>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ContingencyRecord {
    pub fn reason(&self) -> Option<ContingencyReason> {
        u8::try_from(self.reason_code)
            .ok()
            .and_then(|code| ContingencyReason::try_from(code).ok())
    }
}

/// Result of one document in a submitted batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentOutcome {
    /// Accepted: stamp received.
    Processed { document_id: String, stamp: String },
    /// Refused by the authority.
    Rejected { document_id: String, observation: String },
    /// Not delivered; stays pending.
    Failed { document_id: String, error: String },
}

impl DocumentOutcome {
    pub fn document_id(&self) -> &str {
        match self {
            DocumentOutcome::Processed { document_id, .. }
            | DocumentOutcome::Rejected { document_id, .. }
            | DocumentOutcome::Failed { document_id, .. } => document_id,
        }
    }
}

/// Everything learned from one batch submission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Identifier the authority assigned to the batch.
    pub batch_code: Option<String>,
    pub results: Vec<DocumentOutcome>,
}

/// Counts applied by [`ContingencyRepository::complete_batch`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub processed: usize,
    pub rejected: usize,
    pub failed: usize,
    pub resolved_records: u64,
}

/// Repository for the contingency queue.
#[derive(Debug, Clone)]
pub struct ContingencyRepository {
    pool: SqlitePool,
}

impl ContingencyRepository {
    /// Creates a new ContingencyRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ContingencyRepository { pool }
    }

    /// Links a document to the branch's open record, creating the record if
    /// none is open.
    ///
    /// ## Returns
    /// The contingency record id.
    pub async fn enqueue_in(
        conn: &mut SqliteConnection,
        branch_id: &str,
        reason: ContingencyReason,
        reason_text: Option<&str>,
        document_id: &str,
    ) -> DbResult<String> {
        let open: Option<String> = sqlx::query_scalar(
            r#"
            SELECT id FROM contingency_records
            WHERE branch_id = ?1 AND status = ?2
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(branch_id)
        .bind(ContingencyStatus::Open)
        .fetch_optional(&mut *conn)
        .await?;

        let record_id = match open {
            Some(id) => id,
            None => {
                let id = Uuid::new_v4().to_string();
                sqlx::query(
                    r#"
                    INSERT INTO contingency_records (
                        id, branch_id, reason_code, reason_text, status, created_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                    "#,
                )
                .bind(&id)
                .bind(branch_id)
                .bind(i64::from(reason.code()))
                .bind(reason_text)
                .bind(ContingencyStatus::Open)
                .bind(Utc::now())
                .execute(&mut *conn)
                .await?;
                info!(record_id = %id, branch_id = %branch_id, reason = reason.code(), "Contingency opened");
                id
            }
        };

        sqlx::query(
            r#"
            INSERT INTO contingency_documents (contingency_id, document_id)
            VALUES (?1, ?2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(&record_id)
        .bind(document_id)
        .execute(&mut *conn)
        .await?;

        debug!(record_id = %record_id, document_id = %document_id, "Document queued");
        Ok(record_id)
    }

    /// Creates a contingency record without documents.
    pub async fn create_record(
        &self,
        branch_id: &str,
        reason: ContingencyReason,
        reason_text: Option<&str>,
    ) -> DbResult<ContingencyRecord> {
        let record = ContingencyRecord {
            id: Uuid::new_v4().to_string(),
            branch_id: branch_id.to_string(),
            reason_code: i64::from(reason.code()),
            reason_text: reason_text.map(String::from),
            status: ContingencyStatus::Open,
            batch_code: None,
            observations: None,
            created_at: Utc::now(),
            resolved_at: None,
        };

        sqlx::query(
            r#"
            INSERT INTO contingency_records (
                id, branch_id, reason_code, reason_text, status, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&record.id)
        .bind(&record.branch_id)
        .bind(record.reason_code)
        .bind(&record.reason_text)
        .bind(record.status)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        Ok(record)
    }

    pub async fn get_record(&self, id: &str) -> DbResult<ContingencyRecord> {
        sqlx::query_as::<_, ContingencyRecord>(
            r#"
            SELECT id, branch_id, reason_code, reason_text, status, batch_code,
                   observations, created_at, resolved_at
            FROM contingency_records
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::not_found("Contingency record", id))
    }

    /// Document ids linked to a record.
    pub async fn record_documents(&self, record_id: &str) -> DbResult<Vec<String>> {
        let ids = sqlx::query_scalar(
            "SELECT document_id FROM contingency_documents WHERE contingency_id = ?1 ORDER BY document_id",
        )
        .bind(record_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    /// Branches with at least one pending contingency document.
    pub async fn branches_with_pending(&self) -> DbResult<Vec<String>> {
        let branches = sqlx::query_scalar(
            r#"
            SELECT DISTINCT branch_id FROM documents
            WHERE status = ?1 AND transmission_mode = ?2
            ORDER BY branch_id
            "#,
        )
        .bind(DocumentStatus::Pending)
        .bind(TransmissionMode::Contingency)
        .fetch_all(&self.pool)
        .await?;
        Ok(branches)
    }

    /// Pending contingency documents of a branch, oldest first.
    ///
    /// Documents that already used `max_attempts` are left out.
    pub async fn pending_documents(
        &self,
        branch_id: &str,
        limit: u32,
        max_attempts: u32,
    ) -> DbResult<Vec<StoredDocument>> {
        let rows = sqlx::query_as::<_, StoredDocument>(
            r#"
            SELECT id, branch_id, generation_code, control_number, document_type, year,
                   transmission_mode, status, reception_stamp, payload, signed_payload,
                   attempts, last_error, created_at, updated_at
            FROM documents
            WHERE branch_id = ?1 AND status = ?2 AND transmission_mode = ?3
              AND attempts < ?4
            ORDER BY created_at ASC, control_number ASC
            LIMIT ?5
            "#,
        )
        .bind(branch_id)
        .bind(DocumentStatus::Pending)
        .bind(TransmissionMode::Contingency)
        .bind(i64::from(max_attempts))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Counts pending documents of a branch that reached `max_attempts`.
    pub async fn count_exhausted(&self, branch_id: &str, max_attempts: u32) -> DbResult<i64> {
        let count = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM documents
            WHERE branch_id = ?1 AND status = ?2 AND transmission_mode = ?3
              AND attempts >= ?4
            "#,
        )
        .bind(branch_id)
        .bind(DocumentStatus::Pending)
        .bind(TransmissionMode::Contingency)
        .bind(i64::from(max_attempts))
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Applies a batch outcome in one transaction.
    ///
    /// Either every document and record update lands or none does.
    pub async fn complete_batch(
        &self,
        branch_id: &str,
        outcome: &BatchOutcome,
    ) -> DbResult<BatchSummary> {
        let mut tx = self.pool.begin().await?;
        let mut summary = BatchSummary::default();
        let mut observations = Vec::new();

        for result in &outcome.results {
            match result {
                DocumentOutcome::Processed { document_id, stamp } => {
                    DocumentRepository::update_status_in(
                        &mut tx,
                        document_id,
                        DocumentStatus::Processed,
                        Some(stamp.as_str()),
                        None,
                    )
                    .await?;
                    summary.processed += 1;
                }
                DocumentOutcome::Rejected {
                    document_id,
                    observation,
                } => {
                    DocumentRepository::update_status_in(
                        &mut tx,
                        document_id,
                        DocumentStatus::Rejected,
                        None,
                        Some(observation.as_str()),
                    )
                    .await?;
                    observations.push(format!("{document_id}: {observation}"));
                    summary.rejected += 1;
                }
                DocumentOutcome::Failed { document_id, error } => {
                    DocumentRepository::record_attempt_in(&mut tx, document_id, error).await?;
                    summary.failed += 1;
                }
            }
        }

        let observations = (!observations.is_empty()).then(|| observations.join("; "));
        for result in &outcome.results {
            if matches!(result, DocumentOutcome::Failed { .. }) {
                continue;
            }
            sqlx::query(
                r#"
                UPDATE contingency_records SET
                    batch_code = COALESCE(?2, batch_code),
                    observations = COALESCE(?3, observations)
                WHERE id IN (
                    SELECT contingency_id FROM contingency_documents WHERE document_id = ?1
                )
                "#,
            )
            .bind(result.document_id())
            .bind(&outcome.batch_code)
            .bind(&observations)
            .execute(&mut *tx)
            .await?;
        }

        let resolved = sqlx::query(
            r#"
            UPDATE contingency_records SET
                status = ?2,
                resolved_at = ?3
            WHERE branch_id = ?1 AND status = ?4
              AND EXISTS (
                  SELECT 1 FROM contingency_documents cd
                  WHERE cd.contingency_id = contingency_records.id
              )
              AND NOT EXISTS (
                  SELECT 1 FROM contingency_documents cd
                  JOIN documents d ON d.id = cd.document_id
                  WHERE cd.contingency_id = contingency_records.id AND d.status = ?5
              )
            "#,
        )
        .bind(branch_id)
        .bind(ContingencyStatus::Resolved)
        .bind(Utc::now())
        .bind(ContingencyStatus::Open)
        .bind(DocumentStatus::Pending)
        .execute(&mut *tx)
        .await?;
        summary.resolved_records = resolved.rows_affected();

        tx.commit().await?;

        info!(
            branch_id = %branch_id,
            batch_code = ?outcome.batch_code,
            processed = summary.processed,
            rejected = summary.rejected,
            failed = summary.failed,
            resolved_records = summary.resolved_records,
            "Contingency batch applied"
        );

        Ok(summary)
    }
}
