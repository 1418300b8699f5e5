//! # Document Repository
//!
//! Issued documents, their JSON payload and transmission status.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  create_in (issuance transaction, with the control number)            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │   pending ──► update_status(processed, stamp)                          │
//! │       │                                                                 │
//! │       ├────► update_status(rejected)                                   │
//! │       │                                                                 │
//! │       └────► move_to_contingency_in ──► contingency queue              │
//! │                   (mode = contingency, payload rewritten)              │
//! │                                                                         │
//! │   pending + normal past the grace period = stranded_before(cutoff)     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use dte_core::{CoreError, Document, DocumentStatus, TransmissionMode};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};

/// A document row.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct StoredDocument {
    pub id: String,
    pub branch_id: String,
    pub generation_code: String,
    pub control_number: String,
    pub document_type: String,
    /// Emission year; with branch and type it scopes the control number.
    pub year: i32,
    pub transmission_mode: TransmissionMode,
    pub status: DocumentStatus,
    pub reception_stamp: Option<String>,
    /// Canonical JSON of the [`Document`].
    pub payload: String,
    pub signed_payload: Option<String>,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredDocument {
    /// Decodes the stored payload.
    pub fn document(&self) -> DbResult<Document> {
        Ok(Document::from_json(&self.payload)?)
    }
}

/// Insert parameters.
#[derive(Debug, Clone, Copy)]
pub struct NewDocument<'a> {
    pub document: &'a Document,
    pub status: DocumentStatus,
    pub reception_stamp: Option<&'a str>,
    pub signed_payload: Option<&'a str>,
}

impl<'a> NewDocument<'a> {
    /// A pending document without stamp.
    pub fn pending(document: &'a Document) -> Self {
        NewDocument {
            document,
            status: DocumentStatus::Pending,
            reception_stamp: None,
            signed_payload: None,
        }
    }

    pub fn signed_payload(mut self, signed: &'a str) -> Self {
        self.signed_payload = Some(signed);
        self
    }
}

const SELECT_COLUMNS: &str = r#"
    SELECT id, branch_id, generation_code, control_number, document_type, year,
           transmission_mode, status, reception_stamp, payload, signed_payload,
           attempts, last_error, created_at, updated_at
    FROM documents
"#;

/// Repository for issued documents.
#[derive(Debug, Clone)]
pub struct DocumentRepository {
    pool: SqlitePool,
}

impl DocumentRepository {
    /// Creates a new DocumentRepository.
    pub fn new(pool: SqlitePool) -> Self {
        DocumentRepository { pool }
    }

    /// Stores a document on the caller's connection.
    ///
    /// The document must already carry its control number.
    ///
    /// ## Returns
    /// * `Ok(StoredDocument)` - The inserted row
    /// * `Err(DbError::UniqueViolation)` - Generation code reused, or control
    ///   number reused within the same branch, type and year
    pub async fn create_in(
        conn: &mut SqliteConnection,
        new: &NewDocument<'_>,
    ) -> DbResult<StoredDocument> {
        let doc = new.document;
        let control_number = doc
            .control_number()
            .ok_or(CoreError::MissingField("control_number"))?;

        let now = Utc::now();
        let row = StoredDocument {
            id: Uuid::new_v4().to_string(),
            branch_id: doc.issuer.branch_id.clone(),
            generation_code: doc.generation_code().to_string().to_uppercase(),
            control_number: control_number.to_string(),
            document_type: doc.document_type().code().to_string(),
            year: doc.year(),
            transmission_mode: doc.identification.transmission_mode,
            status: new.status,
            reception_stamp: new.reception_stamp.map(String::from),
            payload: doc.to_json()?,
            signed_payload: new.signed_payload.map(String::from),
            attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO documents (
                id, branch_id, generation_code, control_number, document_type, year,
                transmission_mode, status, reception_stamp, payload, signed_payload,
                attempts, last_error, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            "#,
        )
        .bind(&row.id)
        .bind(&row.branch_id)
        .bind(&row.generation_code)
        .bind(&row.control_number)
        .bind(&row.document_type)
        .bind(row.year)
        .bind(row.transmission_mode)
        .bind(row.status)
        .bind(&row.reception_stamp)
        .bind(&row.payload)
        .bind(&row.signed_payload)
        .bind(row.attempts)
        .bind(&row.last_error)
        .bind(row.created_at)
        .bind(row.updated_at)
        .execute(&mut *conn)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::UniqueViolation { field, .. } if field.contains("control_number") => {
                DbError::duplicate("documents.control_number", row.control_number.clone())
            }
            DbError::UniqueViolation { field, .. } => {
                DbError::duplicate(field, row.generation_code.clone())
            }
            other => other,
        })?;

        debug!(
            id = %row.id,
            control_number = %row.control_number,
            status = %row.status,
            "Document stored"
        );

        Ok(row)
    }

    /// Stores a document on its own connection.
    pub async fn create_document(&self, new: &NewDocument<'_>) -> DbResult<StoredDocument> {
        let mut conn = self.pool.acquire().await?;
        Self::create_in(&mut conn, new).await
    }

    /// Sets the status and, when given, the reception stamp.
    pub async fn update_status(
        &self,
        id: &str,
        status: DocumentStatus,
        stamp: Option<&str>,
    ) -> DbResult<()> {
        let mut conn = self.pool.acquire().await?;
        Self::update_status_in(&mut conn, id, status, stamp, None).await
    }

    /// Sets status, stamp and error note on the caller's connection.
    pub async fn update_status_in(
        conn: &mut SqliteConnection,
        id: &str,
        status: DocumentStatus,
        stamp: Option<&str>,
        note: Option<&str>,
    ) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE documents SET
                status = ?2,
                reception_stamp = COALESCE(?3, reception_stamp),
                last_error = COALESCE(?4, last_error),
                updated_at = ?5
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(stamp)
        .bind(note)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Document", id));
        }
        debug!(id = %id, status = %status, "Document status updated");
        Ok(())
    }

    /// Counts a failed transmission attempt.
    pub async fn record_attempt_in(
        conn: &mut SqliteConnection,
        id: &str,
        error: &str,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE documents SET
                attempts = attempts + 1,
                last_error = ?2,
                updated_at = ?3
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Switches a pending document to contingency mode with its rewritten
    /// payload. The old signature no longer matches, so the signed payload
    /// is replaced too (cleared when `signed` is `None`).
    pub async fn move_to_contingency_in(
        conn: &mut SqliteConnection,
        id: &str,
        doc: &Document,
        signed: Option<&str>,
        error: &str,
    ) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE documents SET
                transmission_mode = ?2,
                payload = ?3,
                signed_payload = ?4,
                attempts = attempts + 1,
                last_error = ?5,
                updated_at = ?6
            WHERE id = ?1 AND status = ?7
            "#,
        )
        .bind(id)
        .bind(TransmissionMode::Contingency)
        .bind(doc.to_json()?)
        .bind(signed)
        .bind(error)
        .bind(Utc::now())
        .bind(DocumentStatus::Pending)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Pending document", id));
        }
        Ok(())
    }

    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<StoredDocument>> {
        let sql = format!("{SELECT_COLUMNS} WHERE id = ?1");
        let row = sqlx::query_as::<_, StoredDocument>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// Looks up a document by branch and generation code.
    pub async fn get_by_generation_code(
        &self,
        branch_id: &str,
        generation_code: Uuid,
    ) -> DbResult<Option<StoredDocument>> {
        let sql = format!("{SELECT_COLUMNS} WHERE branch_id = ?1 AND generation_code = ?2");
        let row = sqlx::query_as::<_, StoredDocument>(&sql)
            .bind(branch_id)
            .bind(generation_code.to_string().to_uppercase())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// Pending normal-mode documents last touched before `cutoff`, oldest
    /// first: issuances that committed but never settled or reached the
    /// contingency queue.
    pub async fn stranded_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> DbResult<Vec<StoredDocument>> {
        let sql = format!(
            "{SELECT_COLUMNS} WHERE status = ?1 AND transmission_mode = ?2 AND updated_at < ?3 \
             ORDER BY updated_at ASC LIMIT ?4"
        );
        let rows = sqlx::query_as::<_, StoredDocument>(&sql)
            .bind(DocumentStatus::Pending)
            .bind(TransmissionMode::Normal)
            .bind(cutoff)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// Counts documents of a branch in a given status.
    pub async fn count_by_status(&self, branch_id: &str, status: DocumentStatus) -> DbResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE branch_id = ?1 AND status = ?2")
                .bind(branch_id)
                .bind(status)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::TimeZone;
    use dte_core::*;
    use rust_decimal::Decimal;

    /// A minimal document for storage tests; not meant to pass validation.
    pub fn document(branch: &str, sequence: u64) -> Document {
        let number =
            ControlNumber::format(DocumentType::Invoice, "M001", "P001", None, sequence).unwrap();
        Document {
            identification: Identification {
                document_type: DocumentType::Invoice,
                transmission_mode: TransmissionMode::Normal,
                contingency_reason: None,
                contingency_detail: None,
                control_number: Some(number),
                generation_code: uuid::Uuid::new_v4(),
                emitted_at: chrono::Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap(),
                currency: CURRENCY_USD.into(),
            },
            issuer: Issuer {
                branch_id: branch.into(),
                ..Default::default()
            },
            receiver: Receiver::default(),
            items: Vec::new(),
            summary: Summary {
                total_taxed: Decimal::ZERO,
                total_exempt: Decimal::ZERO,
                total_non_subject: Decimal::ZERO,
                subtotal_sales: Decimal::ZERO,
                taxed_discount: Decimal::ZERO,
                exempt_discount: Decimal::ZERO,
                non_subject_discount: Decimal::ZERO,
                total_discount: Decimal::ZERO,
                subtotal: Decimal::ZERO,
                taxes: Vec::new(),
                operation_total: Decimal::ZERO,
                total_non_taxed: Decimal::ZERO,
                vat_perception: Decimal::ZERO,
                vat_retention: Decimal::ZERO,
                income_retention: Decimal::ZERO,
                amount_to_pay: Decimal::ZERO,
                payment_condition: PaymentCondition::Cash,
                payments: Vec::new(),
                amount_in_words: None,
            },
            related_documents: Vec::new(),
            third_party_sale: None,
            extension: None,
            appendixes: Vec::new(),
        }
    }
}
