//! # Related Documents Rule
//!
//! ```text
//! Type          Allowed related types       List required   Item refs required
//! ──────────    ───────────────────────     ─────────────   ──────────────────
//! 01 / 03       04, 09                      no              no
//! 05 / 06       03, 07                      yes             yes
//! 07            01, 03, 14                  no              yes
//! ```
//!
//! When the list is non-empty every item reference must name one of its
//! document numbers.

use std::collections::HashSet;

use super::{RuleResult, MAX_RELATED_DOCUMENTS};
use crate::error::{ErrorCode, ValidationError};
use crate::types::{Document, DocumentType};

fn allowed_types(document_type: DocumentType) -> &'static [&'static str] {
    match document_type {
        DocumentType::Invoice | DocumentType::TaxCreditVoucher => &["04", "09"],
        DocumentType::CreditNote | DocumentType::DebitNote => &["03", "07"],
        DocumentType::WithholdingReceipt => &["01", "03", "14"],
    }
}

fn requires_list(document_type: DocumentType) -> bool {
    matches!(document_type, DocumentType::CreditNote | DocumentType::DebitNote)
}

fn requires_item_references(document_type: DocumentType) -> bool {
    matches!(
        document_type,
        DocumentType::CreditNote | DocumentType::DebitNote | DocumentType::WithholdingReceipt
    )
}

pub(super) fn check(doc: &Document) -> RuleResult {
    let related = &doc.related_documents;
    let document_type = doc.document_type();

    if related.len() > MAX_RELATED_DOCUMENTS {
        return Err(ValidationError::new(ErrorCode::ExceededRelatedDocsLimit)
            .param(related.len())
            .param(MAX_RELATED_DOCUMENTS));
    }
    if related.is_empty() && requires_list(document_type) {
        return Err(ValidationError::new(ErrorCode::MissingRelatedDocs));
    }

    let allowed = allowed_types(document_type);
    let emitted_on = doc.identification.emitted_at.date_naive();
    let mut numbers = HashSet::with_capacity(related.len());

    for entry in related {
        if !allowed.contains(&entry.document_type.as_str()) {
            return Err(ValidationError::new(ErrorCode::InvalidRelatedDocType)
                .param(&entry.document_type)
                .param(document_type.code()));
        }
        if !numbers.insert(entry.document_number.as_str()) {
            return Err(
                ValidationError::new(ErrorCode::DuplicateRelatedDoc).param(&entry.document_number)
            );
        }
        if entry.emitted_on > emitted_on {
            return Err(ValidationError::new(ErrorCode::InvalidRelatedDocDate)
                .param(&entry.document_number)
                .param(entry.emitted_on));
        }
    }

    for item in &doc.items {
        match &item.related_document {
            Some(reference) if !related.is_empty() && !numbers.contains(reference.as_str()) => {
                return Err(ValidationError::new(ErrorCode::UnresolvedRelatedDocItem)
                    .param(item.number)
                    .param(reference));
            }
            None if requires_item_references(document_type) => {
                return Err(ValidationError::new(ErrorCode::MissingRelatedDocItem).param(item.number));
            }
            _ => {}
        }
    }

    Ok(())
}
