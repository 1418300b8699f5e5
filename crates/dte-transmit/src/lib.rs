//! # dte-transmit: Issuance and Delivery to the Tax Authority
//!
//! Wires the pure core and the storage layer into the `create` operation,
//! and keeps documents flowing when the authority is down.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        DTE Issuance Pipeline                            │
//! │                                                                         │
//! │  caller ──► DteService::create                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │               ★ dte-transmit (THIS CRATE) ★                     │   │
//! │  │                                                                 │   │
//! │  │   ┌────────────┐   ┌──────────────┐   ┌──────────────────────┐ │   │
//! │  │   │ DteService │──►│ Transmitter  │──►│ HttpTransmitter      │─┼───┼──► authority
//! │  │   │  (create)  │   │ DocumentSign │   │ (reqwest)            │ │   │
//! │  │   └─────┬──────┘   └──────▲───────┘   └──────────────────────┘ │   │
//! │  │         │                 │                                     │   │
//! │  │   ┌─────▼──────────┐  ┌───┴──────────────────┐                  │   │
//! │  │   │ BreakerRegistry│◄─│ ContingencyProcessor │ (background)     │   │
//! │  │   │ one per branch │  │ batches the queue    │                  │   │
//! │  │   └────────────────┘  └──────────────────────┘                  │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │            dte-core (rules)    │    dte-db (sequences, queue)           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! let config = DteConfig::load(None)?;
//! let db = Database::new(config.database.db_config()?).await?;
//! let transmitter = Arc::new(HttpTransmitter::new(&config.upstream)?);
//! let service = DteService::from_config(
//!     &config,
//!     db.clone(),
//!     transmitter.clone(),
//!     Arc::new(UnsignedJsonSigner),
//!     Arc::new(SystemClock),
//! );
//!
//! let issued = service.create(&input, &config.issuer).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod breaker;
pub mod config;
pub mod contingency;
pub mod error;
pub mod service;
pub mod transmitter;

// =============================================================================
// Re-exports
// =============================================================================

pub use breaker::{BreakerRegistry, CallPermit, CircuitBreaker, CircuitState};
pub use config::{
    AllocationSettings, BreakerSettings, ContingencySettings, DatabaseSettings, DteConfig,
    UpstreamSettings, MAX_BATCH_SIZE,
};
pub use contingency::{ContingencyHandle, ContingencyProcessor, SweepReport};
pub use error::{TransmitError, TransmitResult};
pub use service::{DteService, IssueOutcome, IssuedDocument};
pub use transmitter::{
    BatchItemReceipt, BatchReceipt, DocumentSigner, HttpTransmitter, ReceiptOutcome,
    ReceptionStamp, SignedDocument, Transmitter, UnsignedJsonSigner,
};
