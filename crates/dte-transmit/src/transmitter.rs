//! # Upstream Transmitter
//!
//! Seams to the tax authority and to the signing service, plus the HTTP
//! implementation of the reception client.
//!
//! ```text
//! Document ──► DocumentSigner::sign ──► SignedDocument
//!                                            │
//!                       ┌────────────────────┴────────────────────┐
//!                       ▼                                         ▼
//!          Transmitter::submit                      Transmitter::submit_batch
//!          POST {document_url}                      POST {batch_url}
//!                       │                                         │
//!                       ▼                                         ▼
//!               ReceptionStamp                              BatchReceipt
//!        (or Rejected / Connection / Timeout)     (per-document stamp or rejection)
//! ```

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use dte_core::{Document, DocumentType};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::config::UpstreamSettings;
use crate::error::{TransmitError, TransmitResult};

// =============================================================================
// Signed Document / Receipts
// =============================================================================

/// A document in the form the authority accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedDocument {
    pub generation_code: Uuid,
    pub control_number: String,
    pub document_type: DocumentType,
    /// Signed payload, opaque to this crate.
    pub payload: String,
}

/// Acknowledgment token issued by the authority for an accepted document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReceptionStamp(String);

impl ReceptionStamp {
    pub fn new(stamp: impl Into<String>) -> Self {
        ReceptionStamp(stamp.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReceptionStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the authority said about one document of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiptOutcome {
    Accepted(ReceptionStamp),
    Rejected { observation: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchItemReceipt {
    pub generation_code: Uuid,
    pub outcome: ReceiptOutcome,
}

/// Answer to a batch submission.
///
/// Documents of the batch that are missing from `results` were not
/// processed and stay queued.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReceipt {
    pub batch_code: Option<String>,
    pub results: Vec<BatchItemReceipt>,
}

impl BatchReceipt {
    pub fn outcome_for(&self, generation_code: Uuid) -> Option<&ReceiptOutcome> {
        self.results
            .iter()
            .find(|r| r.generation_code == generation_code)
            .map(|r| &r.outcome)
    }
}

// =============================================================================
// Seams
// =============================================================================

/// Produces the signed payload of a document.
///
/// Credential handling lives behind this trait. Signing is synchronous so it
/// can run inside the issuance transaction.
pub trait DocumentSigner: Send + Sync {
    fn sign(&self, doc: &Document) -> TransmitResult<SignedDocument>;
}

/// Client of the authority's reception service.
#[async_trait]
pub trait Transmitter: Send + Sync {
    /// Submits one document.
    ///
    /// ## Returns
    /// * `Ok(ReceptionStamp)` - Accepted
    /// * `Err(TransmitError::Rejected)` - Refused, do not resend
    /// * `Err(Connection | Timeout | InvalidResponse)` - Authority unavailable
    async fn submit(&self, doc: &SignedDocument) -> TransmitResult<ReceptionStamp>;

    /// Submits a contingency batch.
    async fn submit_batch(&self, docs: &[SignedDocument]) -> TransmitResult<BatchReceipt>;
}

/// Signer that passes the canonical JSON through unsigned.
///
/// For reception environments that do not check signatures, and for tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsignedJsonSigner;

impl DocumentSigner for UnsignedJsonSigner {
    fn sign(&self, doc: &Document) -> TransmitResult<SignedDocument> {
        let control_number = doc
            .control_number()
            .ok_or_else(|| TransmitError::Signing("document has no control number".into()))?;

        Ok(SignedDocument {
            generation_code: doc.generation_code(),
            control_number: control_number.to_string(),
            document_type: doc.document_type(),
            payload: doc.to_json()?,
        })
    }
}

// =============================================================================
// Wire Format
// =============================================================================

#[derive(Debug, Serialize)]
struct SubmitRequest<'a> {
    generation_code: String,
    control_number: &'a str,
    document_type: &'a str,
    document: &'a str,
}

impl<'a> SubmitRequest<'a> {
    fn from_signed(doc: &'a SignedDocument) -> Self {
        SubmitRequest {
            generation_code: doc.generation_code.to_string().to_uppercase(),
            control_number: &doc.control_number,
            document_type: doc.document_type.code(),
            document: &doc.payload,
        }
    }
}

#[derive(Debug, Serialize)]
struct BatchRequest<'a> {
    batch_id: String,
    documents: Vec<SubmitRequest<'a>>,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    status: String,
    #[serde(default)]
    reception_stamp: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    observations: Vec<String>,
}

impl SubmitResponse {
    fn into_outcome(self) -> TransmitResult<ReceiptOutcome> {
        match self.status.to_uppercase().as_str() {
            "PROCESSED" => match self.reception_stamp {
                Some(stamp) if !stamp.trim().is_empty() => {
                    Ok(ReceiptOutcome::Accepted(ReceptionStamp::new(stamp)))
                }
                _ => Err(TransmitError::InvalidResponse(
                    "processed without reception stamp".into(),
                )),
            },
            "REJECTED" => {
                let observation = self
                    .description
                    .into_iter()
                    .chain(self.observations)
                    .collect::<Vec<_>>()
                    .join("; ");
                Ok(ReceiptOutcome::Rejected { observation })
            }
            other => Err(TransmitError::InvalidResponse(format!("unknown status '{other}'"))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct BatchResponse {
    #[serde(default)]
    batch_code: Option<String>,
    #[serde(default)]
    results: Vec<BatchResultEntry>,
}

#[derive(Debug, Deserialize)]
struct BatchResultEntry {
    generation_code: String,
    #[serde(flatten)]
    response: SubmitResponse,
}

impl BatchResponse {
    fn into_receipt(self) -> TransmitResult<BatchReceipt> {
        let mut results = Vec::with_capacity(self.results.len());
        for entry in self.results {
            let generation_code = Uuid::parse_str(&entry.generation_code).map_err(|e| {
                TransmitError::InvalidResponse(format!(
                    "bad generation code '{}': {e}",
                    entry.generation_code
                ))
            })?;
            results.push(BatchItemReceipt {
                generation_code,
                outcome: entry.response.into_outcome()?,
            });
        }
        Ok(BatchReceipt {
            batch_code: self.batch_code,
            results,
        })
    }
}

// =============================================================================
// HTTP Transmitter
// =============================================================================

/// Reception client over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTransmitter {
    client: Client,
    document_url: Url,
    batch_url: Url,
    token: Option<String>,
    timeout: Duration,
}

impl HttpTransmitter {
    pub fn new(settings: &UpstreamSettings) -> TransmitResult<Self> {
        let timeout = settings.timeout();
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransmitError::InvalidConfig(format!("HTTP client: {e}")))?;

        Ok(HttpTransmitter {
            client,
            document_url: settings.document_url()?,
            batch_url: settings.batch_url()?,
            token: settings.token.clone(),
            timeout,
        })
    }

    async fn post<B: Serialize + ?Sized, R: serde::de::DeserializeOwned>(
        &self,
        url: &Url,
        body: &B,
    ) -> TransmitResult<R> {
        let mut request = self.client.post(url.clone()).json(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| self.map_error(e))?;
        let status = response.status();

        if status.is_server_error()
            || status == StatusCode::TOO_MANY_REQUESTS
            || status == StatusCode::REQUEST_TIMEOUT
        {
            return Err(TransmitError::Connection(format!("{url} returned {status}")));
        }

        let body = response.text().await.map_err(|e| self.map_error(e))?;
        serde_json::from_str(&body).map_err(|e| {
            TransmitError::InvalidResponse(format!("{status} from {url}: {e}"))
        })
    }

    fn map_error(&self, err: reqwest::Error) -> TransmitError {
        if err.is_timeout() {
            TransmitError::Timeout(self.timeout)
        } else if err.is_decode() {
            TransmitError::InvalidResponse(err.to_string())
        } else {
            TransmitError::Connection(err.to_string())
        }
    }
}

#[async_trait]
impl Transmitter for HttpTransmitter {
    async fn submit(&self, doc: &SignedDocument) -> TransmitResult<ReceptionStamp> {
        debug!(control_number = %doc.control_number, "Submitting document");

        let response: SubmitResponse = self
            .post(&self.document_url, &SubmitRequest::from_signed(doc))
            .await?;

        match response.into_outcome()? {
            ReceiptOutcome::Accepted(stamp) => {
                info!(control_number = %doc.control_number, %stamp, "Document accepted");
                Ok(stamp)
            }
            ReceiptOutcome::Rejected { observation } => {
                warn!(control_number = %doc.control_number, %observation, "Document rejected");
                Err(TransmitError::Rejected { observation })
            }
        }
    }

    async fn submit_batch(&self, docs: &[SignedDocument]) -> TransmitResult<BatchReceipt> {
        let request = BatchRequest {
            batch_id: Uuid::new_v4().to_string().to_uppercase(),
            documents: docs.iter().map(SubmitRequest::from_signed).collect(),
        };
        debug!(batch_id = %request.batch_id, count = docs.len(), "Submitting batch");

        let response: BatchResponse = self.post(&self.batch_url, &request).await?;
        response.into_receipt()
    }
}
