//! # Domain Types
//!
//! The canonical electronic tax document and its catalogs.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Document                                        │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │ Identification  │   │     Issuer      │   │    Receiver     │       │
//! │  │  type, mode     │   │  nit, nrc       │   │  id / nit / nrc │       │
//! │  │  control number │   │  branch, codes  │   │  name           │       │
//! │  │  generation code│   └─────────────────┘   └─────────────────┘       │
//! │  └─────────────────┘                                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │   Item (1..n)   │   │    Summary      │   │ RelatedDocument │       │
//! │  │  4 sale amounts │──►│  totals, taxes  │   │  (0..50)        │       │
//! │  │  tax codes      │   │  amount to pay  │   └─────────────────┘       │
//! │  └─────────────────┘   └─────────────────┘                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All amounts are [`Decimal`]. Catalog enums serialize to the authority's
//! wire codes.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::control_number::ControlNumber;
use crate::error::{CoreError, CoreResult};

/// The only currency the authority accepts.
pub const CURRENCY_USD: &str = "USD";

/// Unit of measure code reserved for tax-line items.
pub const TAX_ITEM_UNIT_OF_MEASURE: u16 = 99;

// =============================================================================
// Document Type
// =============================================================================

/// Document types and their two-digit wire codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentType {
    #[serde(rename = "01")]
    Invoice,
    #[serde(rename = "03")]
    TaxCreditVoucher,
    #[serde(rename = "05")]
    CreditNote,
    #[serde(rename = "06")]
    DebitNote,
    #[serde(rename = "07")]
    WithholdingReceipt,
}

impl DocumentType {
    pub const ALL: [DocumentType; 5] = [
        DocumentType::Invoice,
        DocumentType::TaxCreditVoucher,
        DocumentType::CreditNote,
        DocumentType::DebitNote,
        DocumentType::WithholdingReceipt,
    ];

    /// Two-digit wire code.
    pub fn code(&self) -> &'static str {
        match self {
            DocumentType::Invoice => "01",
            DocumentType::TaxCreditVoucher => "03",
            DocumentType::CreditNote => "05",
            DocumentType::DebitNote => "06",
            DocumentType::WithholdingReceipt => "07",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        DocumentType::ALL.into_iter().find(|t| t.code() == code)
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for DocumentType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DocumentType::from_code(s).ok_or_else(|| CoreError::UnknownDocumentType(s.to_string()))
    }
}

// =============================================================================
// Numeric Catalogs
// =============================================================================

/// Declares a catalog enum backed by a small numeric wire code.
///
/// Serializes as the number, rejects unknown codes on deserialization.
macro_rules! numeric_catalog {
    (
        $(#[$meta:meta])*
        $name:ident, $field:literal {
            $($(#[$vmeta:meta])* $variant:ident = $code:literal,)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(try_from = "u8", into = "u8")]
        pub enum $name {
            $($(#[$vmeta])* $variant,)+
        }

        impl $name {
            pub fn code(&self) -> u8 {
                match self {
                    $($name::$variant => $code,)+
                }
            }
        }

        impl TryFrom<u8> for $name {
            type Error = CoreError;

            fn try_from(code: u8) -> Result<Self, Self::Error> {
                match code {
                    $($code => Ok($name::$variant),)+
                    other => Err(CoreError::UnknownCode {
                        field: $field,
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl From<$name> for u8 {
            fn from(value: $name) -> u8 {
                value.code()
            }
        }
    };
}

numeric_catalog! {
    /// Why a document was issued in contingency mode.
    ContingencyReason, "contingency reason" {
        /// The authority's reception service is unavailable.
        AuthorityUnavailable = 1,
        /// The issuer's own systems failed.
        IssuerSystemFailure = 2,
        /// The issuer lost internet connectivity.
        InternetOutage = 3,
        /// Power outage at the issuer.
        PowerOutage = 4,
        /// Any other reason (free-text detail required).
        Other = 5,
    }
}

numeric_catalog! {
    /// Item classifier.
    ItemType, "item type" {
        Product = 1,
        Service = 2,
        Both = 3,
        /// Line representing a tax amount (unit of measure 99).
        Tax = 4,
    }
}

numeric_catalog! {
    /// How a related document was generated.
    GenerationMethod, "generation method" {
        Physical = 1,
        Electronic = 2,
    }
}

numeric_catalog! {
    /// Payment condition declared in the summary.
    PaymentCondition, "payment condition" {
        Cash = 1,
        Credit = 2,
        Other = 3,
    }
}

// =============================================================================
// Transmission Mode / Status
// =============================================================================

/// Whether a document was transmitted immediately or queued.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransmissionMode {
    #[default]
    Normal,
    Contingency,
}

impl TransmissionMode {
    /// Wire code: 1 = normal, 2 = contingency.
    pub fn code(&self) -> u8 {
        match self {
            TransmissionMode::Normal => 1,
            TransmissionMode::Contingency => 2,
        }
    }
}

/// Lifecycle status of a stored document.
///
/// ## Status Transitions
/// ```text
/// Pending ──► Processed  (reception stamp received)
///    │
///    └──────► Rejected   (authority refused the document)
/// ```
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    #[default]
    Pending,
    Processed,
    Rejected,
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentStatus::Pending => write!(f, "pending"),
            DocumentStatus::Processed => write!(f, "processed"),
            DocumentStatus::Rejected => write!(f, "rejected"),
        }
    }
}

// =============================================================================
// Sale Category
// =============================================================================

/// The four mutually exclusive sale categories of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SaleCategory {
    Taxed,
    Exempt,
    NonSubject,
    NonTaxed,
}

// =============================================================================
// Document Parts
// =============================================================================

/// Document header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identification {
    pub document_type: DocumentType,
    pub transmission_mode: TransmissionMode,
    pub contingency_reason: Option<ContingencyReason>,
    pub contingency_detail: Option<String>,
    pub control_number: Option<ControlNumber>,
    /// Unique, non-sequential identifier (uppercase UUID on the wire).
    pub generation_code: Uuid,
    pub emitted_at: DateTime<Utc>,
    pub currency: String,
}

/// Issuing taxpayer.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Issuer {
    pub nit: String,
    pub nrc: String,
    pub name: String,
    /// Branch that owns the control number sequences.
    pub branch_id: String,
    pub establishment_code: Option<String>,
    pub pos_code: Option<String>,
    pub activity_code: Option<String>,
    pub email: Option<String>,
}

/// Receiving party. Every field is optional; which ones are required depends
/// on the document type.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Receiver {
    pub id_type: Option<String>,
    pub id_number: Option<String>,
    pub nit: Option<String>,
    pub nrc: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
}

impl Receiver {
    /// True when both identification type and number are present.
    pub fn has_identification(&self) -> bool {
        is_present(&self.id_type) && is_present(&self.id_number)
    }
}

/// True when the option holds non-blank text.
pub fn is_present(value: &Option<String>) -> bool {
    value.as_deref().map(|s| !s.trim().is_empty()).unwrap_or(false)
}

/// One line of the document body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub number: u16,
    pub item_type: ItemType,
    /// Document number of a [`RelatedDocument`] this line refers to.
    pub related_document: Option<String>,
    pub code: Option<String>,
    pub unit_of_measure: u16,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub discount_percentage: Decimal,
    pub discount_amount: Decimal,
    pub taxed_sale: Decimal,
    pub exempt_sale: Decimal,
    pub non_subject_sale: Decimal,
    pub non_taxed: Decimal,
    pub taxes: Vec<String>,
    /// Withholding receipts only.
    pub vat_retention: Decimal,
}

impl Item {
    /// The four sale amounts, in a fixed order.
    pub fn sale_amounts(&self) -> [(SaleCategory, Decimal); 4] {
        [
            (SaleCategory::Taxed, self.taxed_sale),
            (SaleCategory::Exempt, self.exempt_sale),
            (SaleCategory::NonSubject, self.non_subject_sale),
            (SaleCategory::NonTaxed, self.non_taxed),
        ]
    }

    /// quantity × unit price, before the item discount. `None` on overflow.
    pub fn gross_amount(&self) -> Option<Decimal> {
        self.quantity.checked_mul(self.unit_price)
    }

    pub fn carries_tax(&self, code: &str) -> bool {
        self.taxes.iter().any(|t| t == code)
    }
}

/// A tax line of the summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tax {
    pub code: String,
    pub description: String,
    pub value: Decimal,
}

/// A payment entry of the summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub code: String,
    pub amount: Decimal,
    pub reference: Option<String>,
}

/// Document totals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub total_taxed: Decimal,
    pub total_exempt: Decimal,
    pub total_non_subject: Decimal,
    pub subtotal_sales: Decimal,
    pub taxed_discount: Decimal,
    pub exempt_discount: Decimal,
    pub non_subject_discount: Decimal,
    pub total_discount: Decimal,
    pub subtotal: Decimal,
    pub taxes: Vec<Tax>,
    pub operation_total: Decimal,
    pub total_non_taxed: Decimal,
    pub vat_perception: Decimal,
    pub vat_retention: Decimal,
    pub income_retention: Decimal,
    pub amount_to_pay: Decimal,
    pub payment_condition: PaymentCondition,
    pub payments: Vec<Payment>,
    /// Amount in words, produced by an external formatter.
    pub amount_in_words: Option<String>,
}

/// Reference to a previously issued document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedDocument {
    /// Two-digit type code. Wider than [`DocumentType`]: export invoices
    /// ("11"), remission notes ("04") and others may be referenced.
    pub document_type: String,
    pub generation_method: GenerationMethod,
    pub document_number: String,
    pub emitted_on: NaiveDate,
}

/// Sale made on behalf of a third party.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThirdPartySale {
    pub nit: String,
    pub name: String,
}

/// Delivery / reception block.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Extension {
    pub delivered_by_name: Option<String>,
    pub delivered_by_document: Option<String>,
    pub received_by_name: Option<String>,
    pub received_by_document: Option<String>,
    pub observations: Option<String>,
}

/// Free-form issuer annotation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appendix {
    pub field: String,
    pub label: String,
    pub value: String,
}

// =============================================================================
// Document
// =============================================================================

/// The canonical electronic tax document.
///
/// ## Invariant
/// Once `identification.control_number` is assigned it never changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub identification: Identification,
    pub issuer: Issuer,
    pub receiver: Receiver,
    pub items: Vec<Item>,
    pub summary: Summary,
    pub related_documents: Vec<RelatedDocument>,
    pub third_party_sale: Option<ThirdPartySale>,
    pub extension: Option<Extension>,
    pub appendixes: Vec<Appendix>,
}

impl Document {
    pub fn document_type(&self) -> DocumentType {
        self.identification.document_type
    }

    pub fn generation_code(&self) -> Uuid {
        self.identification.generation_code
    }

    pub fn control_number(&self) -> Option<&ControlNumber> {
        self.identification.control_number.as_ref()
    }

    /// Calendar year of emission, which scopes the control number sequence.
    pub fn year(&self) -> i32 {
        self.identification.emitted_at.year()
    }

    pub fn is_contingency(&self) -> bool {
        self.identification.transmission_mode == TransmissionMode::Contingency
    }

    /// Assigns the control number.
    ///
    /// Assigning the same number twice is a no-op; replacing a different one
    /// is an error.
    pub fn assign_control_number(&mut self, number: ControlNumber) -> CoreResult<()> {
        match &self.identification.control_number {
            Some(existing) if *existing == number => Ok(()),
            Some(existing) => Err(CoreError::ControlNumberAlreadyAssigned {
                existing: existing.to_string(),
            }),
            None => {
                self.identification.control_number = Some(number);
                Ok(())
            }
        }
    }

    /// Switches the document to contingency transmission.
    pub fn mark_contingency(&mut self, reason: ContingencyReason, detail: Option<String>) {
        self.identification.transmission_mode = TransmissionMode::Contingency;
        self.identification.contingency_reason = Some(reason);
        self.identification.contingency_detail = detail;
    }

    /// Serializes to the canonical JSON payload.
    pub fn to_json(&self) -> CoreResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> CoreResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_type_codes() {
        for t in DocumentType::ALL {
            assert_eq!(DocumentType::from_code(t.code()), Some(t));
        }
        assert_eq!(DocumentType::from_code("02"), None);
        assert!("11".parse::<DocumentType>().is_err());
        assert_eq!(serde_json::to_string(&DocumentType::CreditNote).unwrap(), "\"05\"");
    }

    #[test]
    fn test_numeric_catalogs() {
        assert_eq!(ItemType::try_from(4).unwrap(), ItemType::Tax);
        assert!(ItemType::try_from(9).is_err());
        assert_eq!(ContingencyReason::Other.code(), 5);
        assert!(ContingencyReason::try_from(0).is_err());
        let parsed: GenerationMethod = serde_json::from_str("2").unwrap();
        assert_eq!(parsed, GenerationMethod::Electronic);
        assert!(serde_json::from_str::<GenerationMethod>("3").is_err());
    }

    #[test]
    fn test_receiver_identification() {
        let mut r = Receiver::default();
        assert!(!r.has_identification());
        r.id_type = Some("13".into());
        assert!(!r.has_identification());
        r.id_number = Some("  ".into());
        assert!(!r.has_identification());
        r.id_number = Some("012345678".into());
        assert!(r.has_identification());
    }
}
