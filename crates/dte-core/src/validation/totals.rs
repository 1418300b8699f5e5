//! # Summary Arithmetic
//!
//! Cross-checks between the item lines and the summary block.
//!
//! ## Calculation Chain
//! ```text
//! Σ items ──► total taxed / exempt / non-subject / non-taxed
//!                 │
//!                 ▼
//! subtotal sales = taxed + exempt + non-subject
//!                 │  − taxed, exempt, non-subject discounts
//!                 ▼
//! subtotal ──► + Σ taxes ──► operation total
//!                                 │ + non-taxed + perception
//!                                 │ − VAT retention − income retention
//!                                 ▼
//!                           amount to pay ──► Σ payments
//! ```

use rust_decimal::Decimal;

use super::{amount, overflow, RuleResult};
use crate::decimal::{checked_sum, equal_with_tolerance};
use crate::error::{ErrorCode, ValidationError};
use crate::tax::{VAT_PERCEPTION_RATE, VAT_RETENTION_RATE};
use crate::types::{Document, DocumentType};

/// Checks `declared ≈ expected`, reporting `(expected, declared)`.
fn expect(code: ErrorCode, expected: Decimal, declared: Decimal) -> RuleResult {
    if equal_with_tolerance(declared, expected) {
        Ok(())
    } else {
        Err(ValidationError::new(code)
            .param(amount(expected))
            .param(amount(declared)))
    }
}

/// Σ of `values`, or an overflow error naming `field`.
fn total<I>(field: &str, values: I) -> Result<Decimal, ValidationError>
where
    I: IntoIterator<Item = Decimal>,
{
    checked_sum(values).ok_or_else(|| overflow(field))
}

pub(super) fn check_category_totals(doc: &Document) -> RuleResult {
    let items = &doc.items;
    let s = &doc.summary;

    expect(
        ErrorCode::InvalidTotalTaxedCalculation,
        total("total_taxed", items.iter().map(|i| i.taxed_sale))?,
        s.total_taxed,
    )?;
    expect(
        ErrorCode::InvalidTotalExemptCalculation,
        total("total_exempt", items.iter().map(|i| i.exempt_sale))?,
        s.total_exempt,
    )?;
    expect(
        ErrorCode::InvalidTotalNonSubjectCalculation,
        total("total_non_subject", items.iter().map(|i| i.non_subject_sale))?,
        s.total_non_subject,
    )?;
    expect(
        ErrorCode::InvalidTotalNonTaxedCalculation,
        total("total_non_taxed", items.iter().map(|i| i.non_taxed))?,
        s.total_non_taxed,
    )
}

pub(super) fn check_sub_total_sales(doc: &Document) -> RuleResult {
    let s = &doc.summary;
    expect(
        ErrorCode::InvalidSubTotalSalesCalculation,
        total(
            "subtotal_sales",
            [s.total_taxed, s.total_exempt, s.total_non_subject],
        )?,
        s.subtotal_sales,
    )
}

/// Discounts and the subtotal, taken against the declared subtotal sales
/// whether or not that figure matches the category totals.
pub(super) fn check_sub_totals(doc: &Document) -> RuleResult {
    let s = &doc.summary;

    for (code, discount) in [
        (ErrorCode::ExceededTaxedDiscount, s.taxed_discount),
        (ErrorCode::ExceededExemptDiscount, s.exempt_discount),
        (ErrorCode::ExceededNonSubjectDiscount, s.non_subject_discount),
    ] {
        if discount > s.subtotal_sales {
            return Err(ValidationError::new(code)
                .param(amount(discount))
                .param(amount(s.subtotal_sales)));
        }
    }

    let category_discounts = total(
        "total_discount",
        [s.taxed_discount, s.exempt_discount, s.non_subject_discount],
    )?;

    expect(
        ErrorCode::InvalidSubTotalCalculation,
        s.subtotal_sales
            .checked_sub(category_discounts)
            .ok_or_else(|| overflow("subtotal"))?,
        s.subtotal,
    )?;

    let item_discounts = total("total_discount", doc.items.iter().map(|i| i.discount_amount))?;
    expect(
        ErrorCode::InvalidTotalDiscountCalculation,
        category_discounts
            .checked_add(item_discounts)
            .ok_or_else(|| overflow("total_discount"))?,
        s.total_discount,
    )
}

pub(super) fn check_operation_total(doc: &Document) -> RuleResult {
    let s = &doc.summary;
    let taxes = total("operation_total", s.taxes.iter().map(|t| t.value))?;
    expect(
        ErrorCode::InvalidOperationTotalCalculation,
        s.subtotal
            .checked_add(taxes)
            .ok_or_else(|| overflow("operation_total"))?,
        s.operation_total,
    )
}

pub(super) fn check_amount_to_pay(doc: &Document) -> RuleResult {
    let s = &doc.summary;

    if !s.vat_perception.is_zero() {
        if doc.document_type() == DocumentType::Invoice {
            return Err(ValidationError::new(ErrorCode::UnexpectedVatPerception)
                .param(amount(s.vat_perception)));
        }
        let expected = s
            .total_taxed
            .checked_sub(s.taxed_discount)
            .and_then(|base| base.checked_mul(VAT_PERCEPTION_RATE))
            .ok_or_else(|| overflow("vat_perception"))?;
        expect(ErrorCode::InvalidVatPerceptionCalculation, expected, s.vat_perception)?;
    }

    let expected = total(
        "amount_to_pay",
        [s.operation_total, s.total_non_taxed, s.vat_perception],
    )?
    .checked_sub(s.vat_retention)
    .and_then(|v| v.checked_sub(s.income_retention))
    .ok_or_else(|| overflow("amount_to_pay"))?;

    expect(ErrorCode::InvalidTotalToPayCalculation, expected, s.amount_to_pay)
}

pub(super) fn check_payments(doc: &Document) -> RuleResult {
    let s = &doc.summary;
    if s.payments.is_empty() {
        return Ok(());
    }
    expect(
        ErrorCode::InvalidPaymentsTotal,
        s.amount_to_pay,
        total("payments", s.payments.iter().map(|p| p.amount))?,
    )
}

pub(super) fn check_withholding(doc: &Document) -> RuleResult {
    for item in &doc.items {
        let expected = item
            .taxed_sale
            .checked_mul(VAT_RETENTION_RATE)
            .ok_or_else(|| overflow(item.number))?;
        if !equal_with_tolerance(item.vat_retention, expected) {
            return Err(ValidationError::new(ErrorCode::InvalidVatRetentionItem)
                .param(item.number)
                .param(amount(expected))
                .param(amount(item.vat_retention)));
        }
    }

    let s = &doc.summary;
    expect(
        ErrorCode::InvalidTotalTaxedCalculation,
        total("total_taxed", doc.items.iter().map(|i| i.taxed_sale))?,
        s.total_taxed,
    )?;
    expect(
        ErrorCode::InvalidVatRetentionCalculation,
        total("vat_retention", doc.items.iter().map(|i| i.vat_retention))?,
        s.vat_retention,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::fixtures::{document, withholding_receipt};
    use rust_decimal_macros::dec;

    #[test]
    fn test_category_totals() {
        let mut doc = document(DocumentType::TaxCreditVoucher);
        assert!(check_category_totals(&doc).is_ok());

        doc.summary.total_taxed = dec!(300.01);
        assert!(check_category_totals(&doc).is_ok());

        doc.summary.total_taxed = dec!(300.02);
        let err = check_category_totals(&doc).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidTotalTaxedCalculation);
        assert_eq!(err.params, vec!["300.00", "300.02"]);

        let mut doc = document(DocumentType::TaxCreditVoucher);
        doc.summary.total_exempt = dec!(0);
        assert_eq!(
            check_category_totals(&doc).unwrap_err().code,
            ErrorCode::InvalidTotalExemptCalculation
        );
    }

    #[test]
    fn test_discount_exceeding_subtotal_sales() {
        let mut doc = document(DocumentType::TaxCreditVoucher);
        doc.summary.exempt_discount = dec!(331);
        assert_eq!(
            check_sub_totals(&doc).unwrap_err().code,
            ErrorCode::ExceededExemptDiscount
        );
    }

    #[test]
    fn test_total_discount_includes_item_discounts() {
        let mut doc = document(DocumentType::TaxCreditVoucher);
        doc.items[0].discount_amount = dec!(5);
        doc.summary.taxed_discount = dec!(10);
        doc.summary.subtotal = dec!(320);
        doc.summary.total_discount = dec!(10);
        let err = check_sub_totals(&doc).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidTotalDiscountCalculation);
        assert_eq!(err.params[0], "15.00");

        doc.summary.total_discount = dec!(15);
        assert!(check_sub_totals(&doc).is_ok());
    }

    #[test]
    fn test_subtotal_checked_against_declared_subtotal_sales() {
        let mut doc = document(DocumentType::TaxCreditVoucher);
        doc.summary.subtotal_sales = dec!(340);
        assert_eq!(
            check_sub_total_sales(&doc).unwrap_err().code,
            ErrorCode::InvalidSubTotalSalesCalculation
        );
        let err = check_sub_totals(&doc).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidSubTotalCalculation);
        assert_eq!(err.params, vec!["340.00", "330.00"]);
    }

    #[test]
    fn test_summary_overflow_is_reported() {
        let mut doc = document(DocumentType::TaxCreditVoucher);
        doc.summary.total_taxed = Decimal::MAX;
        doc.summary.total_exempt = Decimal::MAX;
        let err = check_sub_total_sales(&doc).unwrap_err();
        assert_eq!(err.code, ErrorCode::AmountOverflow);
        assert_eq!(err.params, vec!["subtotal_sales"]);

        let mut doc = document(DocumentType::TaxCreditVoucher);
        doc.summary.vat_perception = dec!(1);
        doc.summary.total_taxed = Decimal::MAX;
        doc.summary.taxed_discount = Decimal::MIN;
        assert_eq!(check_amount_to_pay(&doc).unwrap_err().code, ErrorCode::AmountOverflow);

        let mut doc = document(DocumentType::Invoice);
        doc.summary.payments[0].amount = Decimal::MAX;
        doc.summary.payments.push(doc.summary.payments[0].clone());
        assert_eq!(check_payments(&doc).unwrap_err().code, ErrorCode::AmountOverflow);
    }

    #[test]
    fn test_operation_total() {
        let mut doc = document(DocumentType::TaxCreditVoucher);
        doc.summary.operation_total = dec!(330);
        assert_eq!(
            check_operation_total(&doc).unwrap_err().code,
            ErrorCode::InvalidOperationTotalCalculation
        );
    }

    #[test]
    fn test_perception() {
        let mut doc = document(DocumentType::TaxCreditVoucher);
        doc.summary.vat_perception = dec!(3.00);
        doc.summary.amount_to_pay = dec!(372.00);
        assert!(check_amount_to_pay(&doc).is_ok());

        doc.summary.vat_perception = dec!(4.00);
        doc.summary.amount_to_pay = dec!(373.00);
        assert_eq!(
            check_amount_to_pay(&doc).unwrap_err().code,
            ErrorCode::InvalidVatPerceptionCalculation
        );

        let mut doc = document(DocumentType::Invoice);
        doc.summary.vat_perception = dec!(3.00);
        assert_eq!(
            check_amount_to_pay(&doc).unwrap_err().code,
            ErrorCode::UnexpectedVatPerception
        );
    }

    #[test]
    fn test_amount_to_pay_with_retentions() {
        let mut doc = document(DocumentType::TaxCreditVoucher);
        doc.summary.vat_retention = dec!(3.00);
        doc.summary.income_retention = dec!(10.00);
        doc.summary.amount_to_pay = dec!(356.00);
        assert!(check_amount_to_pay(&doc).is_ok());

        doc.summary.amount_to_pay = dec!(369.00);
        let err = check_amount_to_pay(&doc).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidTotalToPayCalculation);
        assert_eq!(err.params, vec!["356.00", "369.00"]);
    }

    #[test]
    fn test_payments() {
        let mut doc = document(DocumentType::Invoice);
        doc.summary.payments[0].amount = dec!(300);
        assert_eq!(check_payments(&doc).unwrap_err().code, ErrorCode::InvalidPaymentsTotal);

        doc.summary.payments.clear();
        assert!(check_payments(&doc).is_ok());
    }

    #[test]
    fn test_withholding() {
        let mut doc = withholding_receipt();
        assert!(check_withholding(&doc).is_ok());

        doc.items[0].vat_retention = dec!(13.00);
        let err = check_withholding(&doc).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidVatRetentionItem);
        assert_eq!(err.params, vec!["1", "10.00", "13.00"]);

        let mut doc = withholding_receipt();
        doc.summary.vat_retention = dec!(10.00);
        assert_eq!(
            check_withholding(&doc).unwrap_err().code,
            ErrorCode::InvalidVatRetentionCalculation
        );
    }
}
