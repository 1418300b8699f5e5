//! Receiver requirements per document type.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::{amount, RuleResult};
use crate::error::{ErrorCode, ValidationError};
use crate::types::{is_present, Document, DocumentType};

/// Invoices at or above this amount must identify the receiver.
pub const INVOICE_IDENTIFICATION_THRESHOLD: Decimal = dec!(1095.00);

pub(super) fn check(doc: &Document) -> RuleResult {
    let r = &doc.receiver;

    if is_present(&r.id_type) != is_present(&r.id_number) {
        return Err(ValidationError::new(ErrorCode::IncompleteReceiverIdentification));
    }

    let nrc_required = match doc.document_type() {
        DocumentType::Invoice => {
            let total = doc.summary.amount_to_pay;
            if total >= INVOICE_IDENTIFICATION_THRESHOLD && !r.has_identification() {
                return Err(ValidationError::new(ErrorCode::MissingReceiverIdentification)
                    .param(amount(total)));
            }
            return Ok(());
        }
        DocumentType::TaxCreditVoucher | DocumentType::CreditNote | DocumentType::DebitNote => true,
        DocumentType::WithholdingReceipt => false,
    };

    if !is_present(&r.nit) {
        return Err(ValidationError::new(ErrorCode::MissingReceiverNit));
    }
    if nrc_required && !is_present(&r.nrc) {
        return Err(ValidationError::new(ErrorCode::MissingReceiverNrc));
    }
    if !is_present(&r.name) {
        return Err(ValidationError::new(ErrorCode::MissingReceiverName));
    }
    Ok(())
}
