//! Header checks: currency, control number type, contingency reason.

use super::RuleResult;
use crate::error::{ErrorCode, ValidationError};
use crate::types::{ContingencyReason, Document, TransmissionMode, CURRENCY_USD};

pub(super) fn check(doc: &Document) -> RuleResult {
    let id = &doc.identification;

    if id.currency != CURRENCY_USD {
        return Err(ValidationError::new(ErrorCode::InvalidCurrency).param(&id.currency));
    }

    if let Some(number) = &id.control_number {
        if number.document_type() != Some(id.document_type) {
            return Err(ValidationError::new(ErrorCode::ControlNumberTypeMismatch)
                .param(number)
                .param(id.document_type.code()));
        }
    }

    match (id.transmission_mode, id.contingency_reason) {
        (TransmissionMode::Contingency, None) => {
            Err(ValidationError::new(ErrorCode::MissingContingencyReason))
        }
        (TransmissionMode::Contingency, Some(ContingencyReason::Other))
            if id
                .contingency_detail
                .as_deref()
                .map(|d| d.trim().is_empty())
                .unwrap_or(true) =>
        {
            Err(ValidationError::new(ErrorCode::MissingContingencyReason)
                .param(ContingencyReason::Other.code()))
        }
        (TransmissionMode::Normal, Some(reason)) => {
            Err(ValidationError::new(ErrorCode::UnexpectedContingencyReason).param(reason.code()))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_number::ControlNumber;
    use crate::types::DocumentType;
    use crate::validation::fixtures::document;

    #[test]
    fn test_currency() {
        let mut doc = document(DocumentType::Invoice);
        assert!(check(&doc).is_ok());
        doc.identification.currency = "usd".into();
        assert_eq!(check(&doc).unwrap_err().code, ErrorCode::InvalidCurrency);
    }

    #[test]
    fn test_control_number_type_must_match() {
        let mut doc = document(DocumentType::Invoice);
        doc.identification.control_number =
            Some(ControlNumber::parse("DTE-03-00000000-000000000000001").unwrap());
        assert_eq!(check(&doc).unwrap_err().code, ErrorCode::ControlNumberTypeMismatch);

        doc.identification.control_number =
            Some(ControlNumber::parse("DTE-01-00000000-000000000000001").unwrap());
        assert!(check(&doc).is_ok());
    }

    #[test]
    fn test_contingency_reason() {
        let mut doc = document(DocumentType::Invoice);
        doc.identification.transmission_mode = TransmissionMode::Contingency;
        assert_eq!(check(&doc).unwrap_err().code, ErrorCode::MissingContingencyReason);

        doc.identification.contingency_reason = Some(ContingencyReason::Other);
        assert_eq!(check(&doc).unwrap_err().code, ErrorCode::MissingContingencyReason);

        doc.identification.contingency_detail = Some("Generator failure".into());
        assert!(check(&doc).is_ok());

        doc.identification.transmission_mode = TransmissionMode::Normal;
        assert_eq!(check(&doc).unwrap_err().code, ErrorCode::UnexpectedContingencyReason);
    }
}
