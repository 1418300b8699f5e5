//! # Tax Computation Rule
//!
//! Reconciles the tax codes on items with the summary tax lines and
//! recomputes each known tax.
//!
//! ```text
//! items[*].taxes ──► set of codes ──┐
//!                                   ├──► same set, no duplicates
//! summary.taxes  ──► set of codes ──┘
//!                                   │
//!                                   ▼
//!        per code: expected = catalog formula(base, discount, quantity)
//!                  declared ≈ expected
//! ```

use std::collections::BTreeSet;

use rust_decimal::Decimal;

use super::{amount, overflow, RuleResult};
use crate::decimal::{checked_sum, equal_with_tolerance, round_money};
use crate::error::{ErrorCode, ValidationError};
use crate::tax::{self, VAT_CODE};
use crate::types::{Document, Item};

pub(super) fn check(doc: &Document) -> RuleResult {
    let s = &doc.summary;

    let mut declared = BTreeSet::new();
    for line in &s.taxes {
        if !declared.insert(line.code.as_str()) {
            return Err(ValidationError::new(ErrorCode::DuplicateSummaryTax).param(&line.code));
        }
    }

    if s.total_taxed > Decimal::ZERO && !declared.contains(VAT_CODE) {
        return Err(ValidationError::new(ErrorCode::MissingVatTax));
    }

    let carried: BTreeSet<&str> = doc
        .items
        .iter()
        .flat_map(|i| i.taxes.iter().map(String::as_str))
        .collect();

    if let Some(code) = carried.difference(&declared).next() {
        return Err(ValidationError::new(ErrorCode::MissingSummaryTax).param(code));
    }
    if let Some(code) = declared.difference(&carried).next() {
        return Err(ValidationError::new(ErrorCode::UnexpectedSummaryTax).param(code));
    }

    for line in &s.taxes {
        let Some(definition) = tax::lookup(&line.code) else {
            continue;
        };
        if definition.is_unvalidated() {
            continue;
        }

        let carrying: Vec<&Item> = doc.items.iter().filter(|i| i.carries_tax(&line.code)).collect();
        let expected = checked_sum(carrying.iter().map(|i| i.taxed_sale))
            .zip(checked_sum(carrying.iter().map(|i| i.quantity)))
            .and_then(|(base, quantity)| {
                let discount = tax::prorated_discount(s.taxed_discount, base, s.total_taxed)?;
                definition.expected_value(base, discount, quantity)
            })
            .map(round_money)
            .ok_or_else(|| overflow(&line.code))?;

        if !equal_with_tolerance(line.value, expected) {
            return Err(ValidationError::new(ErrorCode::InvalidTaxCalculation)
                .param(&line.code)
                .param(amount(expected))
                .param(amount(line.value)));
        }
    }

    Ok(())
}
