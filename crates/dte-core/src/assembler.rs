//! # Document Assembly
//!
//! Turns a loosely-typed [`DocumentInput`] (what a client submits) into the
//! canonical [`Document`].
//!
//! ## Assembly Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  DocumentInput (JSON)        DocumentBuilder             Document      │
//! │  ────────────────────        ───────────────             ────────      │
//! │  document_type: "03"   ──►   parse catalogs      ──►    typed enums    │
//! │  items[].item_type: 1        default collections        Vec (maybe [])│
//! │  summary.taxes: absent       default amounts = 0        Decimal::ZERO  │
//! │                              + issuer (config)                          │
//! │                              + generation code (caller)                │
//! │                              + emitted_at (caller's clock)             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The builder is pure: the input is only read, and the two non-deterministic
//! values (generation code, emission time) come from the caller.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::control_number::ControlNumber;
use crate::error::{CoreError, CoreResult};
use crate::types::*;

// =============================================================================
// Input Types
// =============================================================================

/// Client-facing document request.
///
/// Absent collections default to empty and absent amounts to zero.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentInput {
    /// Two-digit document type code.
    pub document_type: String,
    #[serde(default)]
    pub transmission_mode: TransmissionMode,
    #[serde(default)]
    pub contingency_reason: Option<u8>,
    #[serde(default)]
    pub contingency_detail: Option<String>,
    /// Pre-assigned control number (re-submissions only).
    #[serde(default)]
    pub control_number: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub receiver: Receiver,
    #[serde(default)]
    pub items: Vec<ItemInput>,
    #[serde(default)]
    pub summary: SummaryInput,
    #[serde(default)]
    pub related_documents: Vec<RelatedDocumentInput>,
    #[serde(default)]
    pub third_party_sale: Option<ThirdPartySale>,
    #[serde(default)]
    pub extension: Option<Extension>,
    #[serde(default)]
    pub appendixes: Vec<Appendix>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemInput {
    pub number: u16,
    #[serde(default = "default_item_type")]
    pub item_type: u8,
    #[serde(default)]
    pub related_document: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default = "default_unit_of_measure")]
    pub unit_of_measure: u16,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub quantity: Decimal,
    #[serde(default)]
    pub unit_price: Decimal,
    #[serde(default)]
    pub discount_percentage: Decimal,
    #[serde(default)]
    pub discount_amount: Decimal,
    #[serde(default)]
    pub taxed_sale: Decimal,
    #[serde(default)]
    pub exempt_sale: Decimal,
    #[serde(default)]
    pub non_subject_sale: Decimal,
    #[serde(default)]
    pub non_taxed: Decimal,
    #[serde(default)]
    pub taxes: Vec<String>,
    #[serde(default)]
    pub vat_retention: Decimal,
}

fn default_item_type() -> u8 {
    1
}

fn default_unit_of_measure() -> u16 {
    59
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SummaryInput {
    #[serde(default)]
    pub total_taxed: Decimal,
    #[serde(default)]
    pub total_exempt: Decimal,
    #[serde(default)]
    pub total_non_subject: Decimal,
    #[serde(default)]
    pub subtotal_sales: Decimal,
    #[serde(default)]
    pub taxed_discount: Decimal,
    #[serde(default)]
    pub exempt_discount: Decimal,
    #[serde(default)]
    pub non_subject_discount: Decimal,
    #[serde(default)]
    pub total_discount: Decimal,
    #[serde(default)]
    pub subtotal: Decimal,
    #[serde(default)]
    pub taxes: Vec<Tax>,
    #[serde(default)]
    pub operation_total: Decimal,
    #[serde(default)]
    pub total_non_taxed: Decimal,
    #[serde(default)]
    pub vat_perception: Decimal,
    #[serde(default)]
    pub vat_retention: Decimal,
    #[serde(default)]
    pub income_retention: Decimal,
    #[serde(default)]
    pub amount_to_pay: Decimal,
    #[serde(default)]
    pub payment_condition: Option<u8>,
    #[serde(default)]
    pub payments: Vec<Payment>,
    #[serde(default)]
    pub amount_in_words: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelatedDocumentInput {
    pub document_type: String,
    pub generation_method: u8,
    pub document_number: String,
    pub emitted_on: NaiveDate,
}

// =============================================================================
// Builder
// =============================================================================

/// Builds a [`Document`] from a [`DocumentInput`].
///
/// ## Example
/// ```rust,ignore
/// let doc = DocumentBuilder::new(&input)
///     .issuer(config.issuer())
///     .generation_code(Uuid::new_v4())
///     .emitted_at(clock.now())
///     .build()?;
/// ```
pub struct DocumentBuilder<'a> {
    input: &'a DocumentInput,
    issuer: Option<Issuer>,
    generation_code: Option<Uuid>,
    emitted_at: Option<DateTime<Utc>>,
}

impl<'a> DocumentBuilder<'a> {
    pub fn new(input: &'a DocumentInput) -> Self {
        DocumentBuilder {
            input,
            issuer: None,
            generation_code: None,
            emitted_at: None,
        }
    }

    pub fn issuer(mut self, issuer: Issuer) -> Self {
        self.issuer = Some(issuer);
        self
    }

    pub fn generation_code(mut self, code: Uuid) -> Self {
        self.generation_code = Some(code);
        self
    }

    pub fn emitted_at(mut self, at: DateTime<Utc>) -> Self {
        self.emitted_at = Some(at);
        self
    }

    /// Assembles the document.
    ///
    /// ## Errors
    /// - `UnknownDocumentType` / `UnknownCode` for catalog codes with no variant
    /// - `InvalidControlNumber` for a malformed pre-assigned number
    /// - `MissingField` if issuer, generation code or emission time is unset
    ///
    /// Business rules are not checked here; see [`crate::validation`].
    pub fn build(self) -> CoreResult<Document> {
        let input = self.input;
        let issuer = self.issuer.ok_or(CoreError::MissingField("issuer"))?;
        let generation_code = self
            .generation_code
            .ok_or(CoreError::MissingField("generation_code"))?;
        let emitted_at = self.emitted_at.ok_or(CoreError::MissingField("emitted_at"))?;

        let document_type: DocumentType = input.document_type.parse()?;

        let contingency_reason = input
            .contingency_reason
            .map(ContingencyReason::try_from)
            .transpose()?;

        let control_number = input
            .control_number
            .as_deref()
            .map(ControlNumber::parse)
            .transpose()?;

        let identification = Identification {
            document_type,
            transmission_mode: input.transmission_mode,
            contingency_reason,
            contingency_detail: input.contingency_detail.clone(),
            control_number,
            generation_code,
            emitted_at,
            currency: input
                .currency
                .clone()
                .unwrap_or_else(|| CURRENCY_USD.to_string()),
        };

        let items = input
            .items
            .iter()
            .map(build_item)
            .collect::<CoreResult<Vec<_>>>()?;

        let related_documents = input
            .related_documents
            .iter()
            .map(build_related)
            .collect::<CoreResult<Vec<_>>>()?;

        Ok(Document {
            identification,
            issuer,
            receiver: input.receiver.clone(),
            items,
            summary: build_summary(&input.summary)?,
            related_documents,
            third_party_sale: input.third_party_sale.clone(),
            extension: input.extension.clone(),
            appendixes: input.appendixes.clone(),
        })
    }
}

fn build_item(input: &ItemInput) -> CoreResult<Item> {
    Ok(Item {
        number: input.number,
        item_type: ItemType::try_from(input.item_type)?,
        related_document: input.related_document.clone(),
        code: input.code.clone(),
        unit_of_measure: input.unit_of_measure,
        description: input.description.clone(),
        quantity: input.quantity,
        unit_price: input.unit_price,
        discount_percentage: input.discount_percentage,
        discount_amount: input.discount_amount,
        taxed_sale: input.taxed_sale,
        exempt_sale: input.exempt_sale,
        non_subject_sale: input.non_subject_sale,
        non_taxed: input.non_taxed,
        taxes: input.taxes.clone(),
        vat_retention: input.vat_retention,
    })
}

fn build_summary(input: &SummaryInput) -> CoreResult<Summary> {
    let payment_condition = match input.payment_condition {
        Some(code) => PaymentCondition::try_from(code)?,
        None => PaymentCondition::Cash,
    };

    Ok(Summary {
        total_taxed: input.total_taxed,
        total_exempt: input.total_exempt,
        total_non_subject: input.total_non_subject,
        subtotal_sales: input.subtotal_sales,
        taxed_discount: input.taxed_discount,
        exempt_discount: input.exempt_discount,
        non_subject_discount: input.non_subject_discount,
        total_discount: input.total_discount,
        subtotal: input.subtotal,
        taxes: input.taxes.clone(),
        operation_total: input.operation_total,
        total_non_taxed: input.total_non_taxed,
        vat_perception: input.vat_perception,
        vat_retention: input.vat_retention,
        income_retention: input.income_retention,
        amount_to_pay: input.amount_to_pay,
        payment_condition,
        payments: input.payments.clone(),
        amount_in_words: input.amount_in_words.clone(),
    })
}

fn build_related(input: &RelatedDocumentInput) -> CoreResult<RelatedDocument> {
    Ok(RelatedDocument {
        document_type: input.document_type.clone(),
        generation_method: GenerationMethod::try_from(input.generation_method)?,
        document_number: input.document_number.clone(),
        emitted_on: input.emitted_on,
    })
}
