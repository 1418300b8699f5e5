//! # Error Types
//!
//! Domain-specific error types for dte-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  dte-core errors (this file)                                           │
//! │  ├── ErrorCode         - Stable machine-readable rule failure codes    │
//! │  ├── ValidationError   - One rule failure: code + positional params    │
//! │  ├── ValidationErrors  - Every failure of one validation pass          │
//! │  └── CoreError         - Assembly / control number / invariant errors  │
//! │                                                                         │
//! │  dte-db errors (separate crate)                                        │
//! │  └── DbError           - Database operation failures                   │
//! │                                                                         │
//! │  dte-transmit errors (separate crate)                                  │
//! │  └── TransmitError     - Upstream, allocation and deadline failures    │
//! │                                                                         │
//! │  Flow: ValidationError → ValidationErrors → CoreError → TransmitError  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Rendering
//! The engine never produces human text for rule failures. A
//! [`MessageRenderer`] supplied by the caller turns `(code, params)` into a
//! localized message.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Error Codes
// =============================================================================

/// Stable identifiers for every rule failure.
///
/// The serialized form (and [`ErrorCode::as_str`]) is the variant name, which
/// is what message catalogs are keyed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    // Identification
    InvalidCurrency,
    ControlNumberTypeMismatch,
    MissingContingencyReason,
    UnexpectedContingencyReason,

    // Item limits
    EmptyItems,
    ExceededItemsLimit,
    InvalidItemNumber,
    InvalidItemQuantity,
    InvalidUnitPrice,
    InvalidDiscountPercentage,

    // Sale category exclusivity
    TaxedAndExemptSaleItem,
    TaxedAndNonSubjectSaleItem,
    TaxedAndNonTaxedSaleItem,
    ExemptAndNonSubjectSaleItem,
    ExemptAndNonTaxedSaleItem,
    NonSubjectAndNonTaxedSaleItem,

    // Item amounts
    InvalidItemDiscountCalculation,
    InvalidItemAmountCalculation,

    // Tax presence / tax-line items
    MissingTaxesItem,
    UnexpectedTaxesItem,
    InvalidTaxItemUnitOfMeasure,
    InvalidTaxItemTaxes,

    // Category totals
    InvalidTotalTaxedCalculation,
    InvalidTotalExemptCalculation,
    InvalidTotalNonSubjectCalculation,
    InvalidTotalNonTaxedCalculation,

    // Subtotals
    InvalidSubTotalSalesCalculation,
    ExceededTaxedDiscount,
    ExceededExemptDiscount,
    ExceededNonSubjectDiscount,
    InvalidTotalDiscountCalculation,
    InvalidSubTotalCalculation,

    // Taxes
    MissingVatTax,
    MissingSummaryTax,
    UnexpectedSummaryTax,
    DuplicateSummaryTax,
    InvalidTaxCalculation,

    // Totals
    InvalidOperationTotalCalculation,
    InvalidVatPerceptionCalculation,
    UnexpectedVatPerception,
    InvalidTotalToPayCalculation,
    InvalidPaymentsTotal,

    // Receiver
    MissingReceiverIdentification,
    IncompleteReceiverIdentification,
    MissingReceiverNit,
    MissingReceiverNrc,
    MissingReceiverName,

    // Related documents
    ExceededRelatedDocsLimit,
    InvalidRelatedDocType,
    DuplicateRelatedDoc,
    InvalidRelatedDocDate,
    MissingRelatedDocs,
    UnresolvedRelatedDocItem,
    MissingRelatedDocItem,

    // Withholding
    InvalidVatRetentionItem,
    InvalidVatRetentionCalculation,

    // Granularity
    InvalidMonetaryPrecision,
    NegativeAmount,
    AmountOverflow,
}

impl ErrorCode {
    /// Returns the stable string form of the code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidCurrency => "InvalidCurrency",
            ErrorCode::ControlNumberTypeMismatch => "ControlNumberTypeMismatch",
            ErrorCode::MissingContingencyReason => "MissingContingencyReason",
            ErrorCode::UnexpectedContingencyReason => "UnexpectedContingencyReason",
            ErrorCode::EmptyItems => "EmptyItems",
            ErrorCode::ExceededItemsLimit => "ExceededItemsLimit",
            ErrorCode::InvalidItemNumber => "InvalidItemNumber",
            ErrorCode::InvalidItemQuantity => "InvalidItemQuantity",
            ErrorCode::InvalidUnitPrice => "InvalidUnitPrice",
            ErrorCode::InvalidDiscountPercentage => "InvalidDiscountPercentage",
            ErrorCode::TaxedAndExemptSaleItem => "TaxedAndExemptSaleItem",
            ErrorCode::TaxedAndNonSubjectSaleItem => "TaxedAndNonSubjectSaleItem",
            ErrorCode::TaxedAndNonTaxedSaleItem => "TaxedAndNonTaxedSaleItem",
            ErrorCode::ExemptAndNonSubjectSaleItem => "ExemptAndNonSubjectSaleItem",
            ErrorCode::ExemptAndNonTaxedSaleItem => "ExemptAndNonTaxedSaleItem",
            ErrorCode::NonSubjectAndNonTaxedSaleItem => "NonSubjectAndNonTaxedSaleItem",
            ErrorCode::InvalidItemDiscountCalculation => "InvalidItemDiscountCalculation",
            ErrorCode::InvalidItemAmountCalculation => "InvalidItemAmountCalculation",
            ErrorCode::MissingTaxesItem => "MissingTaxesItem",
            ErrorCode::UnexpectedTaxesItem => "UnexpectedTaxesItem",
            ErrorCode::InvalidTaxItemUnitOfMeasure => "InvalidTaxItemUnitOfMeasure",
            ErrorCode::InvalidTaxItemTaxes => "InvalidTaxItemTaxes",
            ErrorCode::InvalidTotalTaxedCalculation => "InvalidTotalTaxedCalculation",
            ErrorCode::InvalidTotalExemptCalculation => "InvalidTotalExemptCalculation",
            ErrorCode::InvalidTotalNonSubjectCalculation => "InvalidTotalNonSubjectCalculation",
            ErrorCode::InvalidTotalNonTaxedCalculation => "InvalidTotalNonTaxedCalculation",
            ErrorCode::InvalidSubTotalSalesCalculation => "InvalidSubTotalSalesCalculation",
            ErrorCode::ExceededTaxedDiscount => "ExceededTaxedDiscount",
            ErrorCode::ExceededExemptDiscount => "ExceededExemptDiscount",
            ErrorCode::ExceededNonSubjectDiscount => "ExceededNonSubjectDiscount",
            ErrorCode::InvalidTotalDiscountCalculation => "InvalidTotalDiscountCalculation",
            ErrorCode::InvalidSubTotalCalculation => "InvalidSubTotalCalculation",
            ErrorCode::MissingVatTax => "MissingVatTax",
            ErrorCode::MissingSummaryTax => "MissingSummaryTax",
            ErrorCode::UnexpectedSummaryTax => "UnexpectedSummaryTax",
            ErrorCode::DuplicateSummaryTax => "DuplicateSummaryTax",
            ErrorCode::InvalidTaxCalculation => "InvalidTaxCalculation",
            ErrorCode::InvalidOperationTotalCalculation => "InvalidOperationTotalCalculation",
            ErrorCode::InvalidVatPerceptionCalculation => "InvalidVatPerceptionCalculation",
            ErrorCode::UnexpectedVatPerception => "UnexpectedVatPerception",
            ErrorCode::InvalidTotalToPayCalculation => "InvalidTotalToPayCalculation",
            ErrorCode::InvalidPaymentsTotal => "InvalidPaymentsTotal",
            ErrorCode::MissingReceiverIdentification => "MissingReceiverIdentification",
            ErrorCode::IncompleteReceiverIdentification => "IncompleteReceiverIdentification",
            ErrorCode::MissingReceiverNit => "MissingReceiverNit",
            ErrorCode::MissingReceiverNrc => "MissingReceiverNrc",
            ErrorCode::MissingReceiverName => "MissingReceiverName",
            ErrorCode::ExceededRelatedDocsLimit => "ExceededRelatedDocsLimit",
            ErrorCode::InvalidRelatedDocType => "InvalidRelatedDocType",
            ErrorCode::DuplicateRelatedDoc => "DuplicateRelatedDoc",
            ErrorCode::InvalidRelatedDocDate => "InvalidRelatedDocDate",
            ErrorCode::MissingRelatedDocs => "MissingRelatedDocs",
            ErrorCode::UnresolvedRelatedDocItem => "UnresolvedRelatedDocItem",
            ErrorCode::MissingRelatedDocItem => "MissingRelatedDocItem",
            ErrorCode::InvalidVatRetentionItem => "InvalidVatRetentionItem",
            ErrorCode::InvalidVatRetentionCalculation => "InvalidVatRetentionCalculation",
            ErrorCode::InvalidMonetaryPrecision => "InvalidMonetaryPrecision",
            ErrorCode::NegativeAmount => "NegativeAmount",
            ErrorCode::AmountOverflow => "AmountOverflow",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// A single rule failure.
///
/// `params` are positional and rule-specific (item numbers, expected and
/// declared amounts, field names). Their order is part of the code's contract
/// with the message catalog.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code}{}", render_params(.params))]
pub struct ValidationError {
    pub code: ErrorCode,
    pub params: Vec<String>,
}

fn render_params(params: &[String]) -> String {
    if params.is_empty() {
        String::new()
    } else {
        format!("({})", params.join(", "))
    }
}

impl ValidationError {
    /// Creates an error without parameters.
    pub fn new(code: ErrorCode) -> Self {
        ValidationError {
            code,
            params: Vec::new(),
        }
    }

    /// Appends a positional parameter.
    pub fn param(mut self, value: impl ToString) -> Self {
        self.params.push(value.to_string());
        self
    }
}

/// Every failure collected by one validation pass.
///
/// ## Invariant
/// Never empty when returned as an `Err`.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("document failed validation with {} error(s): {}", .0.len(), summarize(.0))]
pub struct ValidationErrors(Vec<ValidationError>);

fn summarize(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationErrors {
    pub fn new(errors: Vec<ValidationError>) -> Self {
        ValidationErrors(errors)
    }

    pub fn errors(&self) -> &[ValidationError] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns true if any collected error carries `code`.
    pub fn contains(&self, code: ErrorCode) -> bool {
        self.0.iter().any(|e| e.code == code)
    }

    /// Returns the first error carrying `code`.
    pub fn find(&self, code: ErrorCode) -> Option<&ValidationError> {
        self.0.iter().find(|e| e.code == code)
    }

    pub fn codes(&self) -> Vec<ErrorCode> {
        self.0.iter().map(|e| e.code).collect()
    }

    /// Renders every error through the caller's message catalog.
    pub fn render(&self, renderer: &dyn MessageRenderer) -> Vec<String> {
        self.0
            .iter()
            .map(|e| renderer.render(e.code, &e.params))
            .collect()
    }
}

impl IntoIterator for ValidationErrors {
    type Item = ValidationError;
    type IntoIter = std::vec::IntoIter<ValidationError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

// =============================================================================
// Message Rendering
// =============================================================================

/// Turns a rule failure into human-readable text.
///
/// Implemented outside this crate by the localization layer.
pub trait MessageRenderer: Send + Sync {
    fn render(&self, code: ErrorCode, params: &[String]) -> String;
}

/// Renders `Code(param, param)`. Used in logs and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct CodeRenderer;

impl MessageRenderer for CodeRenderer {
    fn render(&self, code: ErrorCode, params: &[String]) -> String {
        format!("{}{}", code, render_params(params))
    }
}

// =============================================================================
// Core Error
// =============================================================================

/// Core business logic errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Unknown two-digit document type code.
    #[error("Unknown document type code: {0}")]
    UnknownDocumentType(String),

    /// A numeric catalog code that has no matching variant.
    ///
    /// ## When This Occurs
    /// - Item type outside 1..=4
    /// - Contingency reason outside 1..=5
    /// - Generation method outside 1..=2
    #[error("Unknown {field} code: {value}")]
    UnknownCode { field: &'static str, value: String },

    /// A control number that does not match the wire format.
    #[error("Invalid control number '{value}': {reason}")]
    InvalidControlNumber { value: String, reason: String },

    /// A control number is already assigned and cannot be replaced.
    ///
    /// ## When This Occurs
    /// - Re-assigning after a retry allocated a second number
    /// - Caller supplied a number and the allocator produced another
    #[error("Control number already assigned: {existing}")]
    ControlNumberAlreadyAssigned { existing: String },

    /// Builder was asked to build without a required value.
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// Document failed validation.
    #[error(transparent)]
    Validation(#[from] ValidationErrors),

    /// Document could not be (de)serialized.
    #[error("Serialization failed: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Serialization(err.to_string())
    }
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
