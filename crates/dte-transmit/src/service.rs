//! # Issuance Service
//!
//! The `create` operation: from a raw request to a stored, numbered and
//! (when possible) accepted document.
//!
//! ## Create Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  DocumentInput ──► DocumentBuilder ──► validate_document               │
//! │                                            │ errors → Err(Validation)  │
//! │                                            ▼                            │
//! │  breaker(branch) Open? ──yes──► mark contingency (authority down)      │
//! │                                            │                            │
//! │  ┌─────────────────────────────────────────▼──────────────────────┐    │
//! │  │ ONE TRANSACTION (retried with backoff while the db is busy)    │    │
//! │  │   allocate control number → sign → insert document             │    │
//! │  │   contingency? → link to the branch's open contingency record  │    │
//! │  └─────────────────────────────────────────┬──────────────────────┘    │
//! │                                            │                            │
//! │          contingency ◄─────────────────────┤                            │
//! │   PendingTransmission                      ▼                            │
//! │                              breaker.try_acquire()?   ──no──► divert   │
//! │                                            │                            │
//! │                                   Transmitter::submit                  │
//! │                    ┌───────────────────────┼──────────────────────┐    │
//! │                    ▼                       ▼                      ▼    │
//! │              stamp: processed      rejected: rejected     unavailable: │
//! │              Accepted              Rejected               divert       │
//! │                                                                         │
//! │  divert = mark contingency + re-sign + move to queue (one transaction) │
//! │           → PendingTransmission                                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The sequence lock is only held inside the persist transaction, never
//! across the upstream call. Control numbers always come from the allocator;
//! a request that carries one is refused before anything is stored.

use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use dte_core::{
    validate_document, Clock, ContingencyReason, CoreError, ControlNumber, Document,
    DocumentBuilder, DocumentInput, DocumentStatus, DocumentType, Issuer,
};
use dte_db::{
    ContingencyRepository, Database, DbError, DocumentRepository, NewDocument, RetryPolicy,
    SequenceAllocator, StoredDocument,
};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::breaker::{BreakerRegistry, CircuitState};
use crate::config::DteConfig;
use crate::error::{TransmitError, TransmitResult};
use crate::transmitter::{DocumentSigner, ReceptionStamp, SignedDocument, Transmitter};

const BREAKER_OPEN_DETAIL: &str = "reception service unavailable (circuit open)";

// =============================================================================
// Issued Document
// =============================================================================

/// How the authority handled a freshly issued document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IssueOutcome {
    /// Accepted with a reception stamp.
    Accepted { stamp: ReceptionStamp },
    /// Stored in contingency; the background processor will send it.
    PendingTransmission { contingency_id: String },
    /// Refused by the authority. The document is stored as rejected.
    Rejected { observation: String },
}

#[derive(Debug, Clone)]
pub struct IssuedDocument {
    pub document_id: String,
    pub control_number: ControlNumber,
    pub generation_code: Uuid,
    pub document: Document,
    pub outcome: IssueOutcome,
}

impl IssuedDocument {
    pub fn is_accepted(&self) -> bool {
        matches!(self.outcome, IssueOutcome::Accepted { .. })
    }
}

/// What the persist transaction wrote.
struct Persisted {
    document: Document,
    control_number: ControlNumber,
    signed: SignedDocument,
    stored: StoredDocument,
    contingency_id: Option<String>,
}

impl Persisted {
    fn issued(self, outcome: IssueOutcome) -> IssuedDocument {
        IssuedDocument {
            document_id: self.stored.id,
            control_number: self.control_number,
            generation_code: self.document.generation_code(),
            document: self.document,
            outcome,
        }
    }
}

// =============================================================================
// Service
// =============================================================================

pub struct DteService {
    db: Database,
    allocator: SequenceAllocator,
    transmitter: Arc<dyn Transmitter>,
    signer: Arc<dyn DocumentSigner>,
    breakers: BreakerRegistry,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
}

impl DteService {
    pub fn new(
        db: Database,
        transmitter: Arc<dyn Transmitter>,
        signer: Arc<dyn DocumentSigner>,
        breakers: BreakerRegistry,
        clock: Arc<dyn Clock>,
    ) -> Self {
        DteService {
            allocator: SequenceAllocator::new(db.clone(), clock.clone()),
            db,
            transmitter,
            signer,
            breakers,
            clock,
            retry: RetryPolicy::default(),
        }
    }

    /// Builds the service with the breaker, allocation and retry settings
    /// of `config`.
    pub fn from_config(
        config: &DteConfig,
        db: Database,
        transmitter: Arc<dyn Transmitter>,
        signer: Arc<dyn DocumentSigner>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let breakers = BreakerRegistry::new(config.breaker, clock.clone());
        let retry = config.allocation.retry_policy();
        let mut service = DteService::new(db, transmitter, signer, breakers, clock);
        service.allocator = service
            .allocator
            .include_year(config.allocation.include_year)
            .retry_policy(retry);
        service.retry = retry;
        service
    }

    /// Breakers shared with the contingency processor.
    pub fn breakers(&self) -> &BreakerRegistry {
        &self.breakers
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    // =========================================================================
    // Create
    // =========================================================================

    /// Issues a document for `branch`.
    ///
    /// ## Returns
    /// * `Ok(IssuedDocument)` - Stored; see [`IssueOutcome`]
    /// * `Err(TransmitError::Validation)` - Nothing stored, no number used
    /// * `Err(TransmitError::Document)` - The request carried its own control
    ///   number; nothing stored
    /// * `Err(TransmitError::Database)` - Nothing stored
    pub async fn create(&self, input: &DocumentInput, branch: &Issuer) -> TransmitResult<IssuedDocument> {
        self.create_until(input, branch, None).await
    }

    /// Like [`create`](Self::create), bounded by `deadline`.
    ///
    /// Running out of time before the commit leaves no state behind and
    /// returns `DeadlineExceeded`. Running out while waiting on the authority
    /// sends the stored document to contingency.
    pub async fn create_with_deadline(
        &self,
        input: &DocumentInput,
        branch: &Issuer,
        deadline: Duration,
    ) -> TransmitResult<IssuedDocument> {
        self.create_until(input, branch, Some((Instant::now() + deadline, deadline)))
            .await
    }

    async fn create_until(
        &self,
        input: &DocumentInput,
        branch: &Issuer,
        deadline: Option<(Instant, Duration)>,
    ) -> TransmitResult<IssuedDocument> {
        let mut doc = self.validate(input, branch)?;
        if let Some(number) = doc.control_number() {
            return Err(CoreError::ControlNumberAlreadyAssigned {
                existing: number.to_string(),
            }
            .into());
        }

        let breaker = self.breakers.get(&branch.branch_id).await;
        if !doc.is_contingency() && breaker.state().await == CircuitState::Open {
            debug!(branch_id = %branch.branch_id, "Breaker open, issuing in contingency");
            doc.mark_contingency(
                ContingencyReason::AuthorityUnavailable,
                Some(BREAKER_OPEN_DETAIL.to_string()),
            );
        }

        let mut persisted = match deadline {
            Some((at, budget)) => tokio::time::timeout_at(at, self.persist(doc))
                .await
                .map_err(|_| TransmitError::DeadlineExceeded(budget))??,
            None => self.persist(doc).await?,
        };

        if let Some(contingency_id) = persisted.contingency_id.take() {
            info!(
                control_number = %persisted.control_number,
                contingency_id = %contingency_id,
                "Document issued in contingency"
            );
            return Ok(persisted.issued(IssueOutcome::PendingTransmission { contingency_id }));
        }

        let Some(permit) = breaker.try_acquire().await else {
            return self.divert(persisted, BREAKER_OPEN_DETAIL.to_string()).await;
        };

        let submitted = match deadline {
            Some((at, budget)) => {
                tokio::time::timeout_at(at, self.transmitter.submit(&persisted.signed))
                    .await
                    .unwrap_or(Err(TransmitError::Timeout(budget)))
            }
            None => self.transmitter.submit(&persisted.signed).await,
        };

        match submitted {
            Ok(stamp) => {
                permit.success().await;
                self.db
                    .documents()
                    .update_status(&persisted.stored.id, DocumentStatus::Processed, Some(stamp.as_str()))
                    .await?;
                info!(control_number = %persisted.control_number, %stamp, "Document accepted");
                Ok(persisted.issued(IssueOutcome::Accepted { stamp }))
            }
            Err(TransmitError::Rejected { observation }) => {
                permit.success().await;
                let mut conn = self.db.pool().acquire().await.map_err(DbError::from)?;
                DocumentRepository::update_status_in(
                    &mut conn,
                    &persisted.stored.id,
                    DocumentStatus::Rejected,
                    None,
                    Some(observation.as_str()),
                )
                .await?;
                warn!(control_number = %persisted.control_number, %observation, "Document rejected");
                Ok(persisted.issued(IssueOutcome::Rejected { observation }))
            }
            Err(e) => {
                permit.failure().await;
                self.divert(persisted, e.to_string()).await
            }
        }
    }

    /// Builds and validates a document without storing anything.
    pub fn validate(&self, input: &DocumentInput, branch: &Issuer) -> TransmitResult<Document> {
        let doc = DocumentBuilder::new(input)
            .issuer(branch.clone())
            .generation_code(Uuid::new_v4())
            .emitted_at(self.clock.now())
            .build()?;
        validate_document(&doc)?;
        Ok(doc)
    }

    /// Allocates a control number outside of document creation.
    pub async fn allocate_next(
        &self,
        branch: &Issuer,
        document_type: DocumentType,
    ) -> TransmitResult<ControlNumber> {
        Ok(self.allocator.allocate_next(branch, document_type).await?)
    }

    pub async fn get_by_generation_code(
        &self,
        branch_id: &str,
        generation_code: Uuid,
    ) -> TransmitResult<Option<StoredDocument>> {
        Ok(self
            .db
            .documents()
            .get_by_generation_code(branch_id, generation_code)
            .await?)
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Runs the persist transaction, retrying while the database is busy.
    async fn persist(&self, doc: Document) -> TransmitResult<Persisted> {
        let mut backoff = self.retry.backoff();

        loop {
            match self.persist_once(doc.clone()).await {
                Ok(persisted) => return Ok(persisted),
                Err(TransmitError::Database(e)) if e.is_retryable() => match backoff.next_backoff() {
                    Some(wait) => {
                        debug!(?wait, error = %e, "Issuance busy, retrying");
                        tokio::time::sleep(wait).await;
                    }
                    None => {
                        warn!(error = %e, "Issuance gave up on busy database");
                        return Err(e.into());
                    }
                },
                Err(e) => return Err(e),
            }
        }
    }

    /// Number, sign and store in one transaction. Dropping the future or any
    /// error rolls everything back, including the sequence increment.
    async fn persist_once(&self, mut doc: Document) -> TransmitResult<Persisted> {
        let mut tx = self.db.begin().await?;

        let control_number = self.allocator.next_in_transaction(&mut tx, &doc).await?;
        doc.assign_control_number(control_number.clone())?;

        let signed = self.signer.sign(&doc)?;
        let stored = DocumentRepository::create_in(
            &mut tx,
            &NewDocument::pending(&doc).signed_payload(&signed.payload),
        )
        .await?;

        let contingency_id = if doc.is_contingency() {
            let reason = doc
                .identification
                .contingency_reason
                .unwrap_or(ContingencyReason::Other);
            Some(
                ContingencyRepository::enqueue_in(
                    &mut tx,
                    &doc.issuer.branch_id,
                    reason,
                    doc.identification.contingency_detail.as_deref(),
                    &stored.id,
                )
                .await?,
            )
        } else {
            None
        };

        tx.commit().await.map_err(DbError::from)?;

        Ok(Persisted {
            document: doc,
            control_number,
            signed,
            stored,
            contingency_id,
        })
    }

    /// Moves a stored document to the contingency queue.
    async fn divert(&self, mut persisted: Persisted, error: String) -> TransmitResult<IssuedDocument> {
        persisted
            .document
            .mark_contingency(ContingencyReason::AuthorityUnavailable, Some(error.clone()));
        persisted.signed = self.signer.sign(&persisted.document)?;

        let mut tx = self.db.begin().await?;
        DocumentRepository::move_to_contingency_in(
            &mut tx,
            &persisted.stored.id,
            &persisted.document,
            Some(persisted.signed.payload.as_str()),
            &error,
        )
        .await?;
        let contingency_id = ContingencyRepository::enqueue_in(
            &mut tx,
            &persisted.document.issuer.branch_id,
            ContingencyReason::AuthorityUnavailable,
            Some(error.as_str()),
            &persisted.stored.id,
        )
        .await?;
        tx.commit().await.map_err(DbError::from)?;

        warn!(
            control_number = %persisted.control_number,
            contingency_id = %contingency_id,
            error = %error,
            "Document moved to contingency"
        );
        Ok(persisted.issued(IssueOutcome::PendingTransmission { contingency_id }))
    }
}
