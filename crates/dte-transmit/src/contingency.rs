//! # Contingency Processor
//!
//! Background task that drains the contingency queue once the authority is
//! reachable again.
//!
//! ## Sweep Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Contingency Processor Flow                           │
//! │                                                                         │
//! │  every poll_interval (or on trigger):                                  │
//! │                                                                         │
//! │    0. Recover: pending normal-mode documents untouched for             │
//! │               stranded_after (issuance interrupted after commit)       │
//! │               → contingency mode, re-signed, queued                    │
//! │                                                                         │
//! │  for branch in branches_with_pending():                                │
//! │                                                                         │
//! │    1. Select: pending contingency documents, oldest first,             │
//! │               attempts < max_attempts, LIMIT batch_size                │
//! │               (documents over max_attempts are logged and skipped)     │
//! │               and sign the ones without a stored signature             │
//! │                                                                         │
//! │    2. Gate:   breaker(branch).try_acquire()                            │
//! │               └── refused → only sign failures are recorded            │
//! │                                                                         │
//! │    3. Send:   Transmitter::submit_batch(signed documents)              │
//! │                                                                         │
//! │    4. Apply (ONE transaction):                                         │
//! │         accepted  → processed + reception stamp                        │
//! │         rejected  → rejected + observation                             │
//! │         missing / transport failure → pending, attempts + 1            │
//! │         contingency record ← batch code, observations, resolved        │
//! │                                                                         │
//! │    5. Breaker: permit.success() / permit.failure() for the batch       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dte_core::{ContingencyReason, DocumentType};
use dte_db::{
    BatchOutcome, BatchSummary, ContingencyRepository, Database, DbError, DocumentOutcome,
    DocumentRepository, StoredDocument,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::breaker::BreakerRegistry;
use crate::config::ContingencySettings;
use crate::error::{TransmitError, TransmitResult};
use crate::transmitter::{DocumentSigner, ReceiptOutcome, SignedDocument, Transmitter};

const STRANDED_DETAIL: &str = "issuance interrupted before transmission";

/// Totals of one sweep over every branch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Interrupted issuances moved into the queue.
    pub recovered: usize,
    pub batches: usize,
    pub processed: usize,
    pub rejected: usize,
    pub failed: usize,
    pub resolved_records: u64,
    /// Branches with queued documents that sent nothing: breaker refused,
    /// or every document is past `max_attempts`.
    pub skipped_branches: usize,
}

impl SweepReport {
    fn add(&mut self, summary: &BatchSummary) {
        self.batches += 1;
        self.processed += summary.processed;
        self.rejected += summary.rejected;
        self.failed += summary.failed;
        self.resolved_records += summary.resolved_records;
    }
}

// =============================================================================
// Contingency Processor
// =============================================================================

pub struct ContingencyProcessor {
    db: Database,
    transmitter: Arc<dyn Transmitter>,
    signer: Arc<dyn DocumentSigner>,
    breakers: BreakerRegistry,
    settings: ContingencySettings,

    /// Requests an immediate sweep.
    trigger_rx: mpsc::Receiver<()>,

    shutdown_rx: mpsc::Receiver<()>,
}

/// Handle for controlling the contingency processor.
#[derive(Clone)]
pub struct ContingencyHandle {
    trigger_tx: mpsc::Sender<()>,
    shutdown_tx: mpsc::Sender<()>,
}

impl ContingencyHandle {
    /// Asks for a sweep now instead of at the next tick.
    ///
    /// A trigger that arrives while one is already queued is dropped.
    pub fn trigger(&self) {
        if self.trigger_tx.try_send(()).is_err() {
            debug!("Contingency sweep already requested");
        }
    }

    /// Triggers graceful shutdown.
    pub async fn shutdown(&self) -> TransmitResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| TransmitError::ChannelError("Shutdown channel closed".into()))
    }
}

impl ContingencyProcessor {
    /// Creates a new processor and returns its handle.
    pub fn new(
        db: Database,
        transmitter: Arc<dyn Transmitter>,
        signer: Arc<dyn DocumentSigner>,
        breakers: BreakerRegistry,
        settings: ContingencySettings,
    ) -> (Self, ContingencyHandle) {
        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let processor = ContingencyProcessor {
            db,
            transmitter,
            signer,
            breakers,
            settings,
            trigger_rx,
            shutdown_rx,
        };

        (processor, ContingencyHandle { trigger_tx, shutdown_tx })
    }

    /// Runs the processor loop.
    ///
    /// This should be spawned as a background task.
    pub async fn run(mut self) {
        info!(
            interval_secs = self.settings.poll_interval_secs,
            batch_size = self.settings.batch_size,
            "Contingency processor starting"
        );

        let mut interval = tokio::time::interval(self.settings.poll_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => self.sweep_logged().await,

                Some(()) = self.trigger_rx.recv() => self.sweep_logged().await,

                _ = self.shutdown_rx.recv() => {
                    info!("Contingency processor shutting down");
                    break;
                }
            }
        }

        info!("Contingency processor stopped");
    }

    async fn sweep_logged(&self) {
        match self.sweep().await {
            Ok(report) if report.batches > 0 || report.recovered > 0 => {
                info!(?report, "Contingency sweep finished")
            }
            Ok(_) => debug!("Contingency queue empty"),
            Err(e) => error!(error = %e, "Contingency sweep failed"),
        }
    }

    /// Recovers interrupted issuances, then processes one batch per branch
    /// with queued documents.
    pub async fn sweep(&self) -> TransmitResult<SweepReport> {
        let mut report = SweepReport {
            recovered: self.recover_stranded().await?,
            ..SweepReport::default()
        };

        for branch_id in self.db.contingency().branches_with_pending().await? {
            match self.process_branch(&branch_id).await {
                Ok(Some(summary)) => report.add(&summary),
                Ok(None) => report.skipped_branches += 1,
                Err(e) => error!(branch_id = %branch_id, error = %e, "Contingency batch failed"),
            }
        }

        Ok(report)
    }

    /// Sends one batch for `branch_id`.
    ///
    /// ## Returns
    /// * `Ok(Some(summary))` - A batch went out and its outcome is stored
    /// * `Ok(None)` - Nothing sendable, or the breaker refused
    pub async fn process_branch(&self, branch_id: &str) -> TransmitResult<Option<BatchSummary>> {
        let queue = self.db.contingency();

        let exhausted = queue
            .count_exhausted(branch_id, self.settings.max_attempts)
            .await?;
        if exhausted > 0 {
            warn!(
                branch_id = %branch_id,
                count = exhausted,
                max_attempts = self.settings.max_attempts,
                "Skipping documents that exceeded max attempts"
            );
        }

        let limit = u32::try_from(self.settings.batch_size).unwrap_or(u32::MAX);
        let pending = queue
            .pending_documents(branch_id, limit, self.settings.max_attempts)
            .await?;
        if pending.is_empty() {
            return Ok(None);
        }

        let mut results = Vec::with_capacity(pending.len());
        let mut batch = Vec::with_capacity(pending.len());
        for stored in &pending {
            match self.signed(stored) {
                Ok(signed) => batch.push((stored.id.as_str(), signed)),
                Err(e) => results.push(DocumentOutcome::Failed {
                    document_id: stored.id.clone(),
                    error: e.to_string(),
                }),
            }
        }

        let mut batch_code = None;
        if !batch.is_empty() {
            let breaker = self.breakers.get(branch_id).await;
            let Some(permit) = breaker.try_acquire().await else {
                debug!(branch_id = %branch_id, queued = pending.len(), "Breaker open, batch deferred");
                if !results.is_empty() {
                    queue
                        .complete_batch(branch_id, &BatchOutcome { batch_code: None, results })
                        .await?;
                }
                return Ok(None);
            };

            let signed: Vec<SignedDocument> = batch.iter().map(|(_, s)| s.clone()).collect();
            info!(branch_id = %branch_id, count = signed.len(), "Submitting contingency batch");

            match self.transmitter.submit_batch(&signed).await {
                Ok(receipt) => {
                    permit.success().await;
                    for (document_id, signed) in &batch {
                        results.push(match receipt.outcome_for(signed.generation_code) {
                            Some(ReceiptOutcome::Accepted(stamp)) => DocumentOutcome::Processed {
                                document_id: document_id.to_string(),
                                stamp: stamp.to_string(),
                            },
                            Some(ReceiptOutcome::Rejected { observation }) => {
                                DocumentOutcome::Rejected {
                                    document_id: document_id.to_string(),
                                    observation: observation.clone(),
                                }
                            }
                            None => DocumentOutcome::Failed {
                                document_id: document_id.to_string(),
                                error: "missing from batch receipt".into(),
                            },
                        });
                    }
                    batch_code = receipt.batch_code;
                }
                Err(e) => {
                    if e.is_upstream_unavailable() {
                        permit.failure().await;
                    } else {
                        permit.success().await;
                    }
                    warn!(branch_id = %branch_id, error = %e, "Contingency batch not accepted");
                    let error = e.to_string();
                    results.extend(batch.iter().map(|(document_id, _)| DocumentOutcome::Failed {
                        document_id: document_id.to_string(),
                        error: error.clone(),
                    }));
                }
            }
        }

        let summary = queue
            .complete_batch(branch_id, &BatchOutcome { batch_code, results })
            .await?;
        Ok(Some(summary))
    }

    /// Moves pending normal-mode documents older than `stranded_after` into
    /// the contingency queue.
    ///
    /// These are issuances that committed but never learned their outcome:
    /// the caller was cancelled, the process died before submitting, or
    /// the follow-up status write failed.
    pub async fn recover_stranded(&self) -> TransmitResult<usize> {
        let cutoff = chrono::Duration::from_std(self.settings.stranded_after())
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let limit = u32::try_from(self.settings.batch_size).unwrap_or(u32::MAX);

        let mut recovered = 0;
        for stored in self.db.documents().stranded_before(cutoff, limit).await? {
            match self.requeue(&stored).await {
                Ok(contingency_id) => {
                    warn!(
                        control_number = %stored.control_number,
                        contingency_id = %contingency_id,
                        "Interrupted issuance moved to contingency"
                    );
                    recovered += 1;
                }
                // Settled by its issuer since it was selected.
                Err(TransmitError::Database(DbError::NotFound { .. })) => {
                    debug!(document_id = %stored.id, "Stranded document already settled");
                }
                Err(e) => {
                    error!(document_id = %stored.id, error = %e, "Stranded document not recovered")
                }
            }
        }
        Ok(recovered)
    }

    async fn requeue(&self, stored: &StoredDocument) -> TransmitResult<String> {
        let mut doc = stored.document()?;
        doc.mark_contingency(ContingencyReason::AuthorityUnavailable, Some(STRANDED_DETAIL.into()));

        // Unsigned documents are signed again when their batch goes out.
        let signed = match self.signer.sign(&doc) {
            Ok(signed) => Some(signed.payload),
            Err(e) => {
                warn!(document_id = %stored.id, error = %e, "Re-signing stranded document failed");
                None
            }
        };

        let mut tx = self.db.begin().await?;
        DocumentRepository::move_to_contingency_in(
            &mut tx,
            &stored.id,
            &doc,
            signed.as_deref(),
            STRANDED_DETAIL,
        )
        .await?;
        let contingency_id = ContingencyRepository::enqueue_in(
            &mut tx,
            &stored.branch_id,
            ContingencyReason::AuthorityUnavailable,
            Some(STRANDED_DETAIL),
            &stored.id,
        )
        .await?;
        tx.commit().await.map_err(DbError::from)?;
        Ok(contingency_id)
    }

    /// Reuses the stored signature, or signs the stored document again.
    fn signed(&self, stored: &StoredDocument) -> TransmitResult<SignedDocument> {
        match &stored.signed_payload {
            Some(payload) => Ok(SignedDocument {
                generation_code: Uuid::parse_str(&stored.generation_code).map_err(|e| {
                    TransmitError::Signing(format!("bad generation code {}: {e}", stored.generation_code))
                })?,
                control_number: stored.control_number.clone(),
                document_type: DocumentType::from_code(&stored.document_type).ok_or_else(|| {
                    TransmitError::Signing(format!("bad document type {}", stored.document_type))
                })?,
                payload: payload.clone(),
            }),
            None => self.signer.sign(&stored.document()?),
        }
    }
}
