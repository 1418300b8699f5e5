//! # Item Rules
//!
//! Per-line checks. Each function stops at the first offending item.
//!
//! ```text
//! check_limits        1..=2000 items, numbered 1, 2, 3 ... in order
//! check_exclusivity   at most one non-zero sale category per item
//! check_amounts       discount = gross × pct / 100, amount = gross − discount
//! check_tax_presence  taxed amount ⇔ tax codes
//! check_tax_lines     tax-line items: unit 99, exactly ["20"]
//! ```

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::{amount, overflow, RuleResult, MAX_ITEMS};
use crate::decimal::{checked_sum, equal_with_tolerance};
use crate::error::{ErrorCode, ValidationError};
use crate::tax::VAT_CODE;
use crate::types::{Document, DocumentType, ItemType, SaleCategory, TAX_ITEM_UNIT_OF_MEASURE};

const HUNDRED: Decimal = dec!(100);

/// Withholding receipt lines carry withheld amounts, not priced sales.
fn is_priced(doc: &Document) -> bool {
    doc.document_type() != DocumentType::WithholdingReceipt
}

pub(super) fn check_limits(doc: &Document) -> RuleResult {
    if doc.items.is_empty() {
        return Err(ValidationError::new(ErrorCode::EmptyItems));
    }
    if doc.items.len() > MAX_ITEMS {
        return Err(ValidationError::new(ErrorCode::ExceededItemsLimit)
            .param(doc.items.len())
            .param(MAX_ITEMS));
    }

    for (position, item) in doc.items.iter().enumerate() {
        let expected = position + 1;
        if usize::from(item.number) != expected {
            return Err(ValidationError::new(ErrorCode::InvalidItemNumber)
                .param(expected)
                .param(item.number));
        }

        if !is_priced(doc) {
            continue;
        }
        if item.quantity <= Decimal::ZERO {
            return Err(ValidationError::new(ErrorCode::InvalidItemQuantity).param(item.number));
        }
        if item.unit_price < Decimal::ZERO {
            return Err(ValidationError::new(ErrorCode::InvalidUnitPrice).param(item.number));
        }
        if item.discount_percentage < Decimal::ZERO || item.discount_percentage > HUNDRED {
            return Err(
                ValidationError::new(ErrorCode::InvalidDiscountPercentage).param(item.number)
            );
        }
    }

    Ok(())
}

fn exclusivity_code(a: SaleCategory, b: SaleCategory) -> ErrorCode {
    use SaleCategory::*;
    match (a, b) {
        (Taxed, Exempt) | (Exempt, Taxed) => ErrorCode::TaxedAndExemptSaleItem,
        (Taxed, NonSubject) | (NonSubject, Taxed) => ErrorCode::TaxedAndNonSubjectSaleItem,
        (Taxed, NonTaxed) | (NonTaxed, Taxed) => ErrorCode::TaxedAndNonTaxedSaleItem,
        (Exempt, NonSubject) | (NonSubject, Exempt) => ErrorCode::ExemptAndNonSubjectSaleItem,
        (Exempt, NonTaxed) | (NonTaxed, Exempt) => ErrorCode::ExemptAndNonTaxedSaleItem,
        _ => ErrorCode::NonSubjectAndNonTaxedSaleItem,
    }
}

pub(super) fn check_exclusivity(doc: &Document) -> RuleResult {
    for item in &doc.items {
        let non_zero: Vec<SaleCategory> = item
            .sale_amounts()
            .into_iter()
            .filter(|(_, value)| !value.is_zero())
            .map(|(category, _)| category)
            .collect();

        if let [first, second, ..] = non_zero.as_slice() {
            return Err(
                ValidationError::new(exclusivity_code(*first, *second)).param(item.number)
            );
        }
    }
    Ok(())
}

pub(super) fn check_amounts(doc: &Document) -> RuleResult {
    for item in &doc.items {
        let gross = item.gross_amount().ok_or_else(|| overflow(item.number))?;

        let expected_discount = gross
            .checked_mul(item.discount_percentage)
            .and_then(|v| v.checked_div(HUNDRED))
            .ok_or_else(|| overflow(item.number))?;
        if !equal_with_tolerance(item.discount_amount, expected_discount) {
            return Err(ValidationError::new(ErrorCode::InvalidItemDiscountCalculation)
                .param(item.number)
                .param(amount(expected_discount))
                .param(amount(item.discount_amount)));
        }

        let declared = checked_sum(item.sale_amounts().into_iter().map(|(_, v)| v))
            .ok_or_else(|| overflow(item.number))?;
        let expected = gross
            .checked_sub(item.discount_amount)
            .ok_or_else(|| overflow(item.number))?;
        if !equal_with_tolerance(declared, expected) {
            return Err(ValidationError::new(ErrorCode::InvalidItemAmountCalculation)
                .param(item.number)
                .param(amount(expected))
                .param(amount(declared)));
        }
    }
    Ok(())
}

pub(super) fn check_tax_presence(doc: &Document) -> RuleResult {
    for item in doc.items.iter().filter(|i| i.item_type != ItemType::Tax) {
        let taxed = !item.taxed_sale.is_zero();
        if taxed && item.taxes.is_empty() {
            return Err(ValidationError::new(ErrorCode::MissingTaxesItem).param(item.number));
        }
        if !taxed && !item.taxes.is_empty() {
            return Err(ValidationError::new(ErrorCode::UnexpectedTaxesItem).param(item.number));
        }
    }
    Ok(())
}

pub(super) fn check_tax_lines(doc: &Document) -> RuleResult {
    for item in doc.items.iter().filter(|i| i.item_type == ItemType::Tax) {
        if item.unit_of_measure != TAX_ITEM_UNIT_OF_MEASURE {
            return Err(ValidationError::new(ErrorCode::InvalidTaxItemUnitOfMeasure)
                .param(item.number)
                .param(item.unit_of_measure));
        }
        if item.taxes.len() != 1 || item.taxes[0] != VAT_CODE {
            return Err(ValidationError::new(ErrorCode::InvalidTaxItemTaxes)
                .param(item.number)
                .param(item.taxes.join(",")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::fixtures::{document, withholding_receipt};

    fn invoice() -> Document {
        document(DocumentType::Invoice)
    }

    #[test]
    fn test_empty_and_numbering() {
        let mut doc = invoice();
        doc.items[1].number = 5;
        let err = check_limits(&doc).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidItemNumber);
        assert_eq!(err.params, vec!["2".to_string(), "5".to_string()]);

        doc.items.clear();
        assert_eq!(check_limits(&doc).unwrap_err().code, ErrorCode::EmptyItems);
    }

    #[test]
    fn test_items_limit() {
        let mut doc = invoice();
        let template = doc.items[0].clone();
        doc.items = (1..=2001u16)
            .map(|n| {
                let mut i = template.clone();
                i.number = n;
                i
            })
            .collect();
        assert_eq!(check_limits(&doc).unwrap_err().code, ErrorCode::ExceededItemsLimit);

        doc.items.truncate(2000);
        assert!(check_limits(&doc).is_ok());
    }

    #[test]
    fn test_quantity_price_discount() {
        let mut doc = invoice();
        doc.items[0].quantity = dec!(0);
        assert_eq!(check_limits(&doc).unwrap_err().code, ErrorCode::InvalidItemQuantity);

        let mut doc = invoice();
        doc.items[0].discount_percentage = dec!(100.5);
        assert_eq!(check_limits(&doc).unwrap_err().code, ErrorCode::InvalidDiscountPercentage);
    }

    #[test]
    fn test_withholding_items_skip_pricing() {
        let doc = withholding_receipt();
        assert!(check_limits(&doc).is_ok());
    }

    #[test]
    fn test_each_pair_has_its_own_code() {
        let mut doc = invoice();
        doc.items[0].exempt_sale = dec!(5);
        assert_eq!(check_exclusivity(&doc).unwrap_err().code, ErrorCode::TaxedAndExemptSaleItem);

        let mut doc = invoice();
        doc.items[2].non_taxed = dec!(5);
        assert_eq!(
            check_exclusivity(&doc).unwrap_err().code,
            ErrorCode::ExemptAndNonTaxedSaleItem
        );

        let mut doc = invoice();
        doc.items[2].exempt_sale = dec!(0);
        doc.items[2].non_subject_sale = dec!(1);
        doc.items[2].non_taxed = dec!(1);
        assert_eq!(
            check_exclusivity(&doc).unwrap_err().code,
            ErrorCode::NonSubjectAndNonTaxedSaleItem
        );
    }

    #[test]
    fn test_item_amounts_with_discount() {
        let mut doc = invoice();
        doc.items[0].discount_percentage = dec!(10);
        doc.items[0].discount_amount = dec!(10.00);
        doc.items[0].taxed_sale = dec!(90.00);
        assert!(check_amounts(&doc).is_ok());

        doc.items[0].taxed_sale = dec!(100.00);
        let err = check_amounts(&doc).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidItemAmountCalculation);
        assert_eq!(err.params, vec!["1", "90.00", "100.00"]);

        doc.items[0].discount_amount = dec!(0);
        assert_eq!(
            check_amounts(&doc).unwrap_err().code,
            ErrorCode::InvalidItemDiscountCalculation
        );
    }

    #[test]
    fn test_item_amount_overflow_is_reported() {
        let mut doc = invoice();
        doc.items[0].quantity = Decimal::MAX;
        doc.items[0].unit_price = dec!(2);
        let err = check_amounts(&doc).unwrap_err();
        assert_eq!(err.code, ErrorCode::AmountOverflow);
        assert_eq!(err.params, vec!["1"]);

        let mut doc = invoice();
        doc.items[0].taxed_sale = Decimal::MAX;
        doc.items[0].exempt_sale = Decimal::MAX;
        assert_eq!(check_amounts(&doc).unwrap_err().code, ErrorCode::AmountOverflow);
    }

    #[test]
    fn test_tax_presence() {
        let mut doc = invoice();
        doc.items[0].taxes.clear();
        assert_eq!(check_tax_presence(&doc).unwrap_err().code, ErrorCode::MissingTaxesItem);

        let mut doc = invoice();
        doc.items[2].taxes = vec!["20".into()];
        assert_eq!(check_tax_presence(&doc).unwrap_err().code, ErrorCode::UnexpectedTaxesItem);
    }

    #[test]
    fn test_tax_line_items() {
        let mut doc = invoice();
        doc.items[0].item_type = ItemType::Tax;
        assert_eq!(
            check_tax_lines(&doc).unwrap_err().code,
            ErrorCode::InvalidTaxItemUnitOfMeasure
        );

        doc.items[0].unit_of_measure = TAX_ITEM_UNIT_OF_MEASURE;
        assert!(check_tax_lines(&doc).is_ok());

        doc.items[0].taxes = vec!["20".into(), "59".into()];
        assert_eq!(check_tax_lines(&doc).unwrap_err().code, ErrorCode::InvalidTaxItemTaxes);

        doc.items[0].taxes = vec!["59".into()];
        assert_eq!(check_tax_lines(&doc).unwrap_err().code, ErrorCode::InvalidTaxItemTaxes);
    }
}
