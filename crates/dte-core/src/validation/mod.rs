//! # Validation Module
//!
//! Business-rule validation for electronic tax documents.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      DocumentValidator                                  │
//! │                                                                         │
//! │  Document ──► rules_for(type) ──► [Rule; n] (fixed, ordered)           │
//! │                                      │                                  │
//! │                 ┌────────────────────┼────────────────────┐             │
//! │                 ▼                    ▼                    ▼             │
//! │           Rule::ItemLimits    Rule::SubTotals    Rule::Receiver  ...   │
//! │           Ok / first error    Ok / first error   Ok / first error      │
//! │                 │                    │                    │             │
//! │                 └────────────────────┼────────────────────┘             │
//! │                                      ▼                                  │
//! │                  Ok(())  or  Err(ValidationErrors[all failures])        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A rule stops at its own first violation. The validator never stops at
//! the first failing rule: every rule runs and every failure is collected.
//! Rules are independent of each other and of evaluation order.
//!
//! ## Usage
//! ```rust,ignore
//! use dte_core::validation::validate_document;
//!
//! if let Err(errors) = validate_document(&doc) {
//!     for message in errors.render(&renderer) {
//!         println!("{message}");
//!     }
//! }
//! ```

mod granularity;
mod identification;
mod items;
mod receiver;
mod related;
mod taxes;
mod totals;

use rust_decimal::Decimal;

use crate::decimal::round_money;
use crate::error::{ErrorCode, ValidationError, ValidationErrors};
use crate::types::{Document, DocumentType};

/// Result of a single rule check.
pub type RuleResult = Result<(), ValidationError>;

/// Maximum number of items on a document.
pub const MAX_ITEMS: usize = 2000;

/// Maximum number of related documents.
pub const MAX_RELATED_DOCUMENTS: usize = 50;

// =============================================================================
// Rules
// =============================================================================

/// Every validation rule, one variant per concern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rule {
    Identification,
    ItemLimits,
    SaleCategoryExclusivity,
    ItemAmounts,
    TaxPresence,
    TaxLineItems,
    CategoryTotals,
    SubTotalSales,
    SubTotals,
    TaxComputation,
    OperationTotal,
    AmountToPay,
    Payments,
    Receiver,
    RelatedDocuments,
    WithholdingTotals,
    MonetaryGranularity,
}

impl Rule {
    pub fn name(&self) -> &'static str {
        match self {
            Rule::Identification => "identification",
            Rule::ItemLimits => "item_limits",
            Rule::SaleCategoryExclusivity => "sale_category_exclusivity",
            Rule::ItemAmounts => "item_amounts",
            Rule::TaxPresence => "tax_presence",
            Rule::TaxLineItems => "tax_line_items",
            Rule::CategoryTotals => "category_totals",
            Rule::SubTotalSales => "sub_total_sales",
            Rule::SubTotals => "sub_totals",
            Rule::TaxComputation => "tax_computation",
            Rule::OperationTotal => "operation_total",
            Rule::AmountToPay => "amount_to_pay",
            Rule::Payments => "payments",
            Rule::Receiver => "receiver",
            Rule::RelatedDocuments => "related_documents",
            Rule::WithholdingTotals => "withholding_totals",
            Rule::MonetaryGranularity => "monetary_granularity",
        }
    }

    /// Runs this rule against `doc`.
    pub fn check(&self, doc: &Document) -> RuleResult {
        match self {
            Rule::Identification => identification::check(doc),
            Rule::ItemLimits => items::check_limits(doc),
            Rule::SaleCategoryExclusivity => items::check_exclusivity(doc),
            Rule::ItemAmounts => items::check_amounts(doc),
            Rule::TaxPresence => items::check_tax_presence(doc),
            Rule::TaxLineItems => items::check_tax_lines(doc),
            Rule::CategoryTotals => totals::check_category_totals(doc),
            Rule::SubTotalSales => totals::check_sub_total_sales(doc),
            Rule::SubTotals => totals::check_sub_totals(doc),
            Rule::TaxComputation => taxes::check(doc),
            Rule::OperationTotal => totals::check_operation_total(doc),
            Rule::AmountToPay => totals::check_amount_to_pay(doc),
            Rule::Payments => totals::check_payments(doc),
            Rule::Receiver => receiver::check(doc),
            Rule::RelatedDocuments => related::check(doc),
            Rule::WithholdingTotals => totals::check_withholding(doc),
            Rule::MonetaryGranularity => granularity::check(doc),
        }
    }
}

const SALES_RULES: &[Rule] = &[
    Rule::Identification,
    Rule::ItemLimits,
    Rule::SaleCategoryExclusivity,
    Rule::ItemAmounts,
    Rule::TaxPresence,
    Rule::TaxLineItems,
    Rule::CategoryTotals,
    Rule::SubTotalSales,
    Rule::SubTotals,
    Rule::TaxComputation,
    Rule::OperationTotal,
    Rule::AmountToPay,
    Rule::Payments,
    Rule::Receiver,
    Rule::RelatedDocuments,
    Rule::MonetaryGranularity,
];

const WITHHOLDING_RULES: &[Rule] = &[
    Rule::Identification,
    Rule::ItemLimits,
    Rule::WithholdingTotals,
    Rule::Receiver,
    Rule::RelatedDocuments,
    Rule::MonetaryGranularity,
];

/// The fixed rule set for a document type.
pub fn rules_for(document_type: DocumentType) -> &'static [Rule] {
    match document_type {
        DocumentType::Invoice
        | DocumentType::TaxCreditVoucher
        | DocumentType::CreditNote
        | DocumentType::DebitNote => SALES_RULES,
        DocumentType::WithholdingReceipt => WITHHOLDING_RULES,
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Runs the rule set of one document type and aggregates failures.
#[derive(Debug, Clone, Copy)]
pub struct DocumentValidator {
    rules: &'static [Rule],
}

impl DocumentValidator {
    pub fn for_type(document_type: DocumentType) -> Self {
        DocumentValidator {
            rules: rules_for(document_type),
        }
    }

    pub fn rules(&self) -> &'static [Rule] {
        self.rules
    }

    /// Validates `doc` against every rule.
    ///
    /// ## Returns
    /// * `Ok(())` - No rule failed
    /// * `Err(ValidationErrors)` - One entry per failing rule, in rule order
    pub fn validate(&self, doc: &Document) -> Result<(), ValidationErrors> {
        let errors: Vec<ValidationError> = self
            .rules
            .iter()
            .filter_map(|rule| rule.check(doc).err())
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationErrors::new(errors))
        }
    }
}

/// Validates `doc` with the rule set of its own type.
pub fn validate_document(doc: &Document) -> Result<(), ValidationErrors> {
    DocumentValidator::for_type(doc.document_type()).validate(doc)
}

/// Formats an amount for error parameters (rounded to cents, two decimals).
pub(crate) fn amount(value: Decimal) -> String {
    format!("{:.2}", round_money(value))
}

/// A derived amount left the decimal range; `field` names what was computed.
pub(crate) fn overflow(field: impl ToString) -> ValidationError {
    ValidationError::new(ErrorCode::AmountOverflow).param(field)
}

// =============================================================================
// Test Fixtures
// =============================================================================

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::{NaiveDate, TimeZone, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    use crate::types::*;

    pub fn issuer() -> Issuer {
        Issuer {
            nit: "06142803901121".into(),
            nrc: "2345678".into(),
            name: "Comercial La Ceiba, S.A. de C.V.".into(),
            branch_id: "branch-1".into(),
            establishment_code: Some("M001".into()),
            pos_code: Some("P001".into()),
            ..Default::default()
        }
    }

    pub fn item(number: u16, quantity: Decimal, unit_price: Decimal) -> Item {
        Item {
            number,
            item_type: ItemType::Product,
            related_document: None,
            code: None,
            unit_of_measure: 59,
            description: format!("Item {number}"),
            quantity,
            unit_price,
            discount_percentage: Decimal::ZERO,
            discount_amount: Decimal::ZERO,
            taxed_sale: Decimal::ZERO,
            exempt_sale: Decimal::ZERO,
            non_subject_sale: Decimal::ZERO,
            non_taxed: Decimal::ZERO,
            taxes: Vec::new(),
            vat_retention: Decimal::ZERO,
        }
    }

    pub fn taxed(number: u16, quantity: Decimal, unit_price: Decimal) -> Item {
        let mut i = item(number, quantity, unit_price);
        i.taxed_sale = quantity * unit_price;
        i.taxes = vec!["20".into()];
        i
    }

    pub fn exempt(number: u16, quantity: Decimal, unit_price: Decimal) -> Item {
        let mut i = item(number, quantity, unit_price);
        i.exempt_sale = quantity * unit_price;
        i
    }

    /// A consistent document:
    /// taxed 100 + 200, exempt 30, VAT 39.00, amount to pay 369.00.
    pub fn document(document_type: DocumentType) -> Document {
        Document {
            identification: Identification {
                document_type,
                transmission_mode: TransmissionMode::Normal,
                contingency_reason: None,
                contingency_detail: None,
                control_number: None,
                generation_code: Uuid::nil(),
                emitted_at: Utc.with_ymd_and_hms(2024, 3, 15, 10, 30, 0).unwrap(),
                currency: CURRENCY_USD.into(),
            },
            issuer: issuer(),
            receiver: Receiver {
                nit: Some("06140101001012".into()),
                nrc: Some("1234567".into()),
                name: Some("Distribuidora El Roble".into()),
                ..Default::default()
            },
            items: vec![
                taxed(1, dec!(2), dec!(50)),
                taxed(2, dec!(1), dec!(200)),
                exempt(3, dec!(1), dec!(30)),
            ],
            summary: Summary {
                total_taxed: dec!(300.00),
                total_exempt: dec!(30.00),
                total_non_subject: dec!(0),
                subtotal_sales: dec!(330.00),
                taxed_discount: dec!(0),
                exempt_discount: dec!(0),
                non_subject_discount: dec!(0),
                total_discount: dec!(0),
                subtotal: dec!(330.00),
                taxes: vec![Tax {
                    code: "20".into(),
                    description: "IVA 13%".into(),
                    value: dec!(39.00),
                }],
                operation_total: dec!(369.00),
                total_non_taxed: dec!(0),
                vat_perception: dec!(0),
                vat_retention: dec!(0),
                income_retention: dec!(0),
                amount_to_pay: dec!(369.00),
                payment_condition: PaymentCondition::Cash,
                payments: vec![Payment {
                    code: "01".into(),
                    amount: dec!(369.00),
                    reference: None,
                }],
                amount_in_words: None,
            },
            related_documents: Vec::new(),
            third_party_sale: None,
            extension: None,
            appendixes: Vec::new(),
        }
    }

    pub fn related(number: &str, doc_type: &str) -> RelatedDocument {
        RelatedDocument {
            document_type: doc_type.into(),
            generation_method: GenerationMethod::Electronic,
            document_number: number.into(),
            emitted_on: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
        }
    }

    /// A credit note referencing one tax credit voucher on every item.
    pub fn credit_note() -> Document {
        let mut doc = document(DocumentType::CreditNote);
        doc.related_documents = vec![related("DTE-03-M001P001-000000000000010", "03")];
        for item in &mut doc.items {
            item.related_document = Some("DTE-03-M001P001-000000000000010".into());
        }
        doc
    }

    /// A withholding receipt: two withheld documents, 1% retention.
    pub fn withholding_receipt() -> Document {
        let mut doc = document(DocumentType::WithholdingReceipt);
        doc.related_documents = vec![
            related("DOC-A", "03"),
            related("DOC-B", "01"),
        ];

        let mut first = item(1, dec!(1), dec!(0));
        first.related_document = Some("DOC-A".into());
        first.taxed_sale = dec!(1000.00);
        first.vat_retention = dec!(10.00);

        let mut second = item(2, dec!(1), dec!(0));
        second.related_document = Some("DOC-B".into());
        second.taxed_sale = dec!(250.50);
        second.vat_retention = dec!(2.51);

        doc.items = vec![first, second];
        doc.summary = Summary {
            total_taxed: dec!(1250.50),
            total_exempt: dec!(0),
            total_non_subject: dec!(0),
            subtotal_sales: dec!(0),
            taxed_discount: dec!(0),
            exempt_discount: dec!(0),
            non_subject_discount: dec!(0),
            total_discount: dec!(0),
            subtotal: dec!(0),
            taxes: Vec::new(),
            operation_total: dec!(0),
            total_non_taxed: dec!(0),
            vat_perception: dec!(0),
            vat_retention: dec!(12.51),
            income_retention: dec!(0),
            amount_to_pay: dec!(0),
            payment_condition: PaymentCondition::Cash,
            payments: Vec::new(),
            amount_in_words: None,
        };
        doc
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::control_number::ControlNumber;
    use crate::error::ErrorCode;
    use rust_decimal_macros::dec;

    #[test]
    fn test_fixtures_are_valid() {
        for t in [
            DocumentType::Invoice,
            DocumentType::TaxCreditVoucher,
            DocumentType::DebitNote,
        ] {
            let doc = if t == DocumentType::DebitNote {
                let mut d = credit_note();
                d.identification.document_type = t;
                d
            } else {
                document(t)
            };
            assert_eq!(validate_document(&doc), Ok(()), "{t:?}");
        }
        assert_eq!(validate_document(&credit_note()), Ok(()));
        assert_eq!(validate_document(&withholding_receipt()), Ok(()));
    }

    #[test]
    fn test_all_failures_collected() {
        let mut doc = document(DocumentType::TaxCreditVoucher);
        doc.identification.currency = "EUR".into();
        doc.items[0].taxes.clear();
        doc.receiver.nrc = None;

        let errors = validate_document(&doc).unwrap_err();
        assert!(errors.contains(ErrorCode::InvalidCurrency));
        assert!(errors.contains(ErrorCode::MissingTaxesItem));
        assert!(errors.contains(ErrorCode::MissingReceiverNrc));
        assert!(errors.len() >= 3);
    }

    #[test]
    fn test_missing_taxes_item_scenario() {
        let mut doc = document(DocumentType::TaxCreditVoucher);
        doc.items[0].taxes.clear();

        let errors = validate_document(&doc).unwrap_err();
        let err = errors.find(ErrorCode::MissingTaxesItem).unwrap();
        assert_eq!(err.params, vec!["1".to_string()]);
    }

    #[test]
    fn test_sub_total_scenario_reports_expected() {
        let mut doc = document(DocumentType::TaxCreditVoucher);
        doc.items.truncate(2);
        doc.summary.total_exempt = dec!(0);
        doc.summary.subtotal_sales = dec!(300);
        doc.summary.taxed_discount = dec!(50);
        doc.summary.total_discount = dec!(50);
        doc.summary.subtotal = dec!(240);

        let errors = validate_document(&doc).unwrap_err();
        let err = errors.find(ErrorCode::InvalidSubTotalCalculation).unwrap();
        assert_eq!(err.params[0], "250.00");
        assert_eq!(err.params[1], "240.00");
    }

    #[test]
    fn test_sub_total_reported_alongside_sub_total_sales() {
        let mut doc = document(DocumentType::TaxCreditVoucher);
        doc.summary.subtotal_sales = dec!(340);

        let errors = validate_document(&doc).unwrap_err();
        let sales = errors.find(ErrorCode::InvalidSubTotalSalesCalculation).unwrap();
        assert_eq!(sales.params, vec!["330.00", "340.00"]);
        let subtotal = errors.find(ErrorCode::InvalidSubTotalCalculation).unwrap();
        assert_eq!(subtotal.params, vec!["340.00", "330.00"]);
    }

    #[test]
    fn test_out_of_range_quantity_is_a_validation_error() {
        let mut doc = document(DocumentType::TaxCreditVoucher);
        doc.items[0].quantity = Decimal::MAX;
        doc.items[0].unit_price = dec!(2);

        let errors = validate_document(&doc).unwrap_err();
        let err = errors.find(ErrorCode::AmountOverflow).unwrap();
        assert_eq!(err.params, vec!["1"]);
    }

    #[test]
    fn test_control_number_assignment_keeps_document_valid() {
        let mut doc = document(DocumentType::TaxCreditVoucher);
        assert!(validate_document(&doc).is_ok());

        let number =
            ControlNumber::format(DocumentType::TaxCreditVoucher, "M001", "P001", None, 1).unwrap();
        doc.assign_control_number(number).unwrap();
        assert!(validate_document(&doc).is_ok());
    }

    #[test]
    fn test_rule_sets() {
        assert!(rules_for(DocumentType::Invoice).contains(&Rule::TaxComputation));
        assert!(!rules_for(DocumentType::WithholdingReceipt).contains(&Rule::TaxComputation));
        assert!(rules_for(DocumentType::WithholdingReceipt).contains(&Rule::WithholdingTotals));
        assert!(rules_for(DocumentType::CreditNote).contains(&Rule::SubTotalSales));
        for t in DocumentType::ALL {
            assert!(rules_for(t).contains(&Rule::MonetaryGranularity));
        }
    }

    #[test]
    fn test_amount_param_format() {
        assert_eq!(amount(dec!(250)), "250.00");
        assert_eq!(amount(dec!(2.345)), "2.35");
    }
}
