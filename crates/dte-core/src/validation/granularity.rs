//! Monetary granularity: every monetary field is a non-negative multiple of
//! one cent. Unit prices and quantities are excluded.

use rust_decimal::Decimal;

use super::RuleResult;
use crate::decimal::is_multiple_of_cent;
use crate::error::{ErrorCode, ValidationError};
use crate::types::Document;

fn check_field(field: &str, value: Decimal) -> RuleResult {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(ValidationError::new(ErrorCode::NegativeAmount).param(field));
    }
    if !is_multiple_of_cent(value) {
        return Err(ValidationError::new(ErrorCode::InvalidMonetaryPrecision)
            .param(field)
            .param(value));
    }
    Ok(())
}

pub(super) fn check(doc: &Document) -> RuleResult {
    for item in &doc.items {
        let n = item.number;
        check_field(&format!("items[{n}].discount_amount"), item.discount_amount)?;
        check_field(&format!("items[{n}].taxed_sale"), item.taxed_sale)?;
        check_field(&format!("items[{n}].exempt_sale"), item.exempt_sale)?;
        check_field(&format!("items[{n}].non_subject_sale"), item.non_subject_sale)?;
        check_field(&format!("items[{n}].non_taxed"), item.non_taxed)?;
        check_field(&format!("items[{n}].vat_retention"), item.vat_retention)?;
    }

    let s = &doc.summary;
    let summary_fields = [
        ("summary.total_taxed", s.total_taxed),
        ("summary.total_exempt", s.total_exempt),
        ("summary.total_non_subject", s.total_non_subject),
        ("summary.subtotal_sales", s.subtotal_sales),
        ("summary.taxed_discount", s.taxed_discount),
        ("summary.exempt_discount", s.exempt_discount),
        ("summary.non_subject_discount", s.non_subject_discount),
        ("summary.total_discount", s.total_discount),
        ("summary.subtotal", s.subtotal),
        ("summary.operation_total", s.operation_total),
        ("summary.total_non_taxed", s.total_non_taxed),
        ("summary.vat_perception", s.vat_perception),
        ("summary.vat_retention", s.vat_retention),
        ("summary.income_retention", s.income_retention),
        ("summary.amount_to_pay", s.amount_to_pay),
    ];
    for (field, value) in summary_fields {
        check_field(field, value)?;
    }

    for tax in &s.taxes {
        check_field(&format!("summary.taxes[{}]", tax.code), tax.value)?;
    }
    for (i, payment) in s.payments.iter().enumerate() {
        check_field(&format!("summary.payments[{i}]"), payment.amount)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DocumentType;
    use crate::validation::fixtures::document;
    use rust_decimal_macros::dec;

    #[test]
    fn test_sub_cent_amount_rejected() {
        let mut doc = document(DocumentType::Invoice);
        assert!(check(&doc).is_ok());

        doc.summary.amount_to_pay = dec!(369.005);
        let err = check(&doc).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidMonetaryPrecision);
        assert_eq!(err.params, vec!["summary.amount_to_pay", "369.005"]);
    }

    #[test]
    fn test_trailing_zeros_accepted() {
        let mut doc = document(DocumentType::Invoice);
        doc.summary.amount_to_pay = dec!(369.0000);
        assert!(check(&doc).is_ok());
    }

    #[test]
    fn test_negative_rejected() {
        let mut doc = document(DocumentType::Invoice);
        doc.items[2].exempt_sale = dec!(-30.00);
        let err = check(&doc).unwrap_err();
        assert_eq!(err.code, ErrorCode::NegativeAmount);
        assert_eq!(err.params, vec!["items[3].exempt_sale"]);
    }

    #[test]
    fn test_unit_price_may_carry_more_decimals() {
        let mut doc = document(DocumentType::Invoice);
        doc.items[0].unit_price = dec!(49.99999);
        doc.items[0].quantity = dec!(2.125);
        assert!(check(&doc).is_ok());
    }
}
