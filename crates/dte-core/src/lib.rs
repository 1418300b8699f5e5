//! # dte-core: Pure Business Logic for Electronic Tax Documents
//!
//! Document model, assembly and validation. No I/O lives here.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        DTE Issuance Pipeline                            │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │              dte-transmit (service, breaker, contingency)        │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ dte-core (THIS CRATE) ★                         │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │ assembler │  │  control  │  │ validation│  │   │
//! │  │   │ Document  │  │ Document  │  │  number   │  │   rules   │  │   │
//! │  │   │  Item     │  │  Builder  │  │  codec    │  │ validator │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • INJECTED CLOCK           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 dte-db (sequences, documents, queue)            │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Document, items, summary and catalogs
//! - [`decimal`] - Tolerant comparison (0.01) and cent rounding
//! - [`tax`] - Tax catalog and formulas
//! - [`control_number`] - `DTE-TT-EEEEPPPP-NNNNNNNNNNNNNNN` codec
//! - [`assembler`] - Raw input to canonical document
//! - [`validation`] - Rule set per document type
//! - [`clock`] - Time source
//! - [`error`] - Error codes and domain errors
//!
//! ## Example Usage
//!
//! ```rust
//! use dte_core::decimal::equal_with_tolerance;
//! use rust_decimal_macros::dec;
//!
//! // Totals are compared with a one-cent tolerance
//! assert!(equal_with_tolerance(dec!(369.00), dec!(369.01)));
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod assembler;
pub mod clock;
pub mod control_number;
pub mod decimal;
pub mod error;
pub mod tax;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use assembler::{
    DocumentBuilder, DocumentInput, ItemInput, RelatedDocumentInput, SummaryInput,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use control_number::ControlNumber;
pub use error::{
    CodeRenderer, CoreError, CoreResult, ErrorCode, MessageRenderer, ValidationError,
    ValidationErrors,
};
pub use types::*;
pub use validation::{validate_document, DocumentValidator, Rule};
