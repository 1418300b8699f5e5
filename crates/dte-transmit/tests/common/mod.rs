//! Shared helpers for the dte-transmit integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use dte_core::{
    Document, DocumentInput, ItemInput, Issuer, ManualClock, Payment, SummaryInput, Tax,
};
use dte_db::{Database, DbConfig};
use dte_transmit::{
    BatchItemReceipt, BatchReceipt, BreakerRegistry, BreakerSettings, DocumentSigner, DteService,
    ReceiptOutcome, ReceptionStamp, SignedDocument, TransmitError, TransmitResult, Transmitter,
    UnsignedJsonSigner,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

// =============================================================================
// Stub Transmitter
// =============================================================================

/// How the stub answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StubMode {
    Accept,
    Reject(String),
    Unavailable,
    /// Sleeps before accepting.
    Slow(Duration),
}

/// Scripted reception service.
pub struct StubTransmitter {
    mode: Mutex<StubMode>,
    rejected: Mutex<HashSet<Uuid>>,
    omitted: Mutex<HashSet<Uuid>>,
    submit_count: AtomicU64,
    batch_count: AtomicU64,
    batch_sizes: Mutex<Vec<usize>>,
}

impl StubTransmitter {
    pub fn new(mode: StubMode) -> Self {
        Self {
            mode: Mutex::new(mode),
            rejected: Mutex::new(HashSet::new()),
            omitted: Mutex::new(HashSet::new()),
            submit_count: AtomicU64::new(0),
            batch_count: AtomicU64::new(0),
            batch_sizes: Mutex::new(Vec::new()),
        }
    }

    pub fn set_mode(&self, mode: StubMode) {
        *self.mode.lock().unwrap() = mode;
    }

    /// Rejects this document inside batches.
    pub fn reject_in_batch(&self, generation_code: Uuid) {
        self.rejected.lock().unwrap().insert(generation_code);
    }

    /// Leaves this document out of batch receipts.
    pub fn omit_from_batch(&self, generation_code: Uuid) {
        self.omitted.lock().unwrap().insert(generation_code);
    }

    pub fn submit_count(&self) -> u64 {
        self.submit_count.load(Ordering::SeqCst)
    }

    pub fn batch_count(&self) -> u64 {
        self.batch_count.load(Ordering::SeqCst)
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().unwrap().clone()
    }

    fn mode(&self) -> StubMode {
        self.mode.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transmitter for StubTransmitter {
    async fn submit(&self, doc: &SignedDocument) -> TransmitResult<ReceptionStamp> {
        self.submit_count.fetch_add(1, Ordering::SeqCst);

        match self.mode() {
            StubMode::Accept => Ok(stamp_for(doc)),
            StubMode::Reject(observation) => Err(TransmitError::Rejected { observation }),
            StubMode::Unavailable => Err(TransmitError::Connection("connection refused".into())),
            StubMode::Slow(delay) => {
                tokio::time::sleep(delay).await;
                Ok(stamp_for(doc))
            }
        }
    }

    async fn submit_batch(&self, docs: &[SignedDocument]) -> TransmitResult<BatchReceipt> {
        self.batch_count.fetch_add(1, Ordering::SeqCst);
        self.batch_sizes.lock().unwrap().push(docs.len());

        if self.mode() == StubMode::Unavailable {
            return Err(TransmitError::Connection("connection refused".into()));
        }

        let rejected = self.rejected.lock().unwrap().clone();
        let omitted = self.omitted.lock().unwrap().clone();
        let results = docs
            .iter()
            .filter(|doc| !omitted.contains(&doc.generation_code))
            .map(|doc| BatchItemReceipt {
                generation_code: doc.generation_code,
                outcome: if rejected.contains(&doc.generation_code) {
                    ReceiptOutcome::Rejected {
                        observation: "receiver NIT not registered".into(),
                    }
                } else {
                    ReceiptOutcome::Accepted(stamp_for(doc))
                },
            })
            .collect();

        Ok(BatchReceipt {
            batch_code: Some(format!("LOTE-{}", self.batch_count())),
            results,
        })
    }
}

pub fn stamp_for(doc: &SignedDocument) -> ReceptionStamp {
    ReceptionStamp::new(format!("SELLO-{}", doc.control_number))
}

// =============================================================================
// Scripted Signer
// =============================================================================

/// Signs like [`UnsignedJsonSigner`] except on the listed calls (1-based).
pub struct ScriptedSigner {
    failing_calls: HashSet<u64>,
    fail_all: bool,
    calls: AtomicU64,
}

impl ScriptedSigner {
    pub fn failing_on(calls: &[u64]) -> Self {
        Self {
            failing_calls: calls.iter().copied().collect(),
            fail_all: false,
            calls: AtomicU64::new(0),
        }
    }

    pub fn always_failing() -> Self {
        Self {
            failing_calls: HashSet::new(),
            fail_all: true,
            calls: AtomicU64::new(0),
        }
    }
}

impl DocumentSigner for ScriptedSigner {
    fn sign(&self, doc: &Document) -> TransmitResult<SignedDocument> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_all || self.failing_calls.contains(&call) {
            return Err(TransmitError::Signing(format!("signing device busy (call {call})")));
        }
        UnsignedJsonSigner.sign(doc)
    }
}

// =============================================================================
// Fixtures
// =============================================================================

pub fn branch() -> Issuer {
    Issuer {
        nit: "06142803901121".into(),
        nrc: "2345678".into(),
        name: "Comercial La Ceiba, S.A. de C.V.".into(),
        branch_id: "branch-1".into(),
        establishment_code: Some("M001".into()),
        pos_code: Some("P001".into()),
        ..Default::default()
    }
}

fn taxed(number: u16, quantity: Decimal, unit_price: Decimal) -> ItemInput {
    ItemInput {
        number,
        item_type: 1,
        unit_of_measure: 59,
        description: format!("Item {number}"),
        quantity,
        unit_price,
        taxed_sale: quantity * unit_price,
        taxes: vec!["20".into()],
        ..Default::default()
    }
}

/// Invoice with taxed 100 + 200, exempt 30, VAT 39.00, amount to pay 369.00.
pub fn invoice_input() -> DocumentInput {
    let exempt = ItemInput {
        number: 3,
        item_type: 1,
        unit_of_measure: 59,
        description: "Item 3".into(),
        quantity: dec!(1),
        unit_price: dec!(30),
        exempt_sale: dec!(30),
        ..Default::default()
    };

    DocumentInput {
        document_type: "01".into(),
        receiver: dte_core::Receiver {
            nit: Some("06140101001012".into()),
            nrc: Some("1234567".into()),
            name: Some("Distribuidora El Roble".into()),
            ..Default::default()
        },
        items: vec![taxed(1, dec!(2), dec!(50)), taxed(2, dec!(1), dec!(200)), exempt],
        summary: SummaryInput {
            total_taxed: dec!(300.00),
            total_exempt: dec!(30.00),
            subtotal_sales: dec!(330.00),
            subtotal: dec!(330.00),
            taxes: vec![Tax {
                code: "20".into(),
                description: "IVA 13%".into(),
                value: dec!(39.00),
            }],
            operation_total: dec!(369.00),
            amount_to_pay: dec!(369.00),
            payments: vec![Payment {
                code: "01".into(),
                amount: dec!(369.00),
                reference: None,
            }],
            ..Default::default()
        },
        ..Default::default()
    }
}

// =============================================================================
// Harness
// =============================================================================

pub struct Harness {
    pub db: Database,
    pub transmitter: Arc<StubTransmitter>,
    pub clock: Arc<ManualClock>,
    pub service: DteService,
}

pub fn breaker_settings() -> BreakerSettings {
    BreakerSettings {
        failure_threshold: 3,
        reset_timeout_secs: 60,
    }
}

/// Service over an in-memory database, clock at 2024-03-15 10:30 UTC.
pub async fn harness(mode: StubMode) -> Harness {
    harness_with_signer(mode, Arc::new(UnsignedJsonSigner)).await
}

pub async fn harness_with_signer(mode: StubMode, signer: Arc<dyn DocumentSigner>) -> Harness {
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    let transmitter = Arc::new(StubTransmitter::new(mode));
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 3, 15, 10, 30, 0).unwrap(),
    ));
    let breakers = BreakerRegistry::new(breaker_settings(), clock.clone());
    let service = DteService::new(
        db.clone(),
        transmitter.clone(),
        signer,
        breakers,
        clock.clone(),
    );

    Harness {
        db,
        transmitter,
        clock,
        service,
    }
}

/// Invoice declared in contingency by the issuer (internet outage).
pub fn contingency_input() -> DocumentInput {
    let mut input = invoice_input();
    input.transmission_mode = dte_core::TransmissionMode::Contingency;
    input.contingency_reason = Some(dte_core::ContingencyReason::InternetOutage.code());
    input
}
