//! # Tax Catalog
//!
//! Tax codes the validation engine knows how to recompute.
//!
//! ## Formulas
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Percentage taxes                                                      │
//! │    value = (taxed base − applicable discount) × rate                   │
//! │    base  = Σ taxed sale of items carrying the code                     │
//! │    discount = taxed discount × base / total taxed                      │
//! │                                                                         │
//! │  Per-unit taxes                                                        │
//! │    value = fee × Σ quantity of items carrying the code                 │
//! │                                                                         │
//! │  Unvalidated ("other special rates")                                   │
//! │    accepted as declared                                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Value-added tax, the only tax a tax-line item may carry.
pub const VAT_CODE: &str = "20";

/// VAT rate.
pub const VAT_RATE: Decimal = dec!(0.13);

/// VAT perception rate applied to the taxed base.
pub const VAT_PERCEPTION_RATE: Decimal = dec!(0.01);

/// VAT retention rate on withholding receipts.
pub const VAT_RETENTION_RATE: Decimal = dec!(0.01);

/// How a tax value is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaxKind {
    /// Rate applied to the taxed base net of discount.
    Percentage(Decimal),
    /// Fixed fee per unit (or gallon) of quantity.
    PerUnit(Decimal),
    /// Declared value is accepted without recomputation.
    Unvalidated,
}

/// A catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaxDefinition {
    pub code: &'static str,
    pub description: &'static str,
    pub kind: TaxKind,
}

/// Known tax codes.
pub static CATALOG: &[TaxDefinition] = &[
    TaxDefinition {
        code: VAT_CODE,
        description: "Impuesto al Valor Agregado 13%",
        kind: TaxKind::Percentage(VAT_RATE),
    },
    TaxDefinition {
        code: "C3",
        description: "Impuesto al Valor Agregado (exportaciones) 0%",
        kind: TaxKind::Percentage(Decimal::ZERO),
    },
    TaxDefinition {
        code: "59",
        description: "Turismo: por alojamiento (5%)",
        kind: TaxKind::Percentage(dec!(0.05)),
    },
    TaxDefinition {
        code: "71",
        description: "Turismo: salida del país por vía aérea $7.00",
        kind: TaxKind::PerUnit(dec!(7.00)),
    },
    TaxDefinition {
        code: "D1",
        description: "FOVIAL ($0.20 Ctvs. por galón)",
        kind: TaxKind::PerUnit(dec!(0.20)),
    },
    TaxDefinition {
        code: "C8",
        description: "COTRANS ($0.10 Ctvs. por galón)",
        kind: TaxKind::PerUnit(dec!(0.10)),
    },
    TaxDefinition {
        code: "D4",
        description: "Otros impuestos casos especiales",
        kind: TaxKind::Unvalidated,
    },
    TaxDefinition {
        code: "D5",
        description: "Otras tasas casos especiales",
        kind: TaxKind::Unvalidated,
    },
];

/// Looks up a tax code.
pub fn lookup(code: &str) -> Option<&'static TaxDefinition> {
    CATALOG.iter().find(|t| t.code == code)
}

impl TaxDefinition {
    /// Returns true if this code is accepted without recomputation.
    pub fn is_unvalidated(&self) -> bool {
        matches!(self.kind, TaxKind::Unvalidated)
    }

    /// Expected value for this tax, before rounding.
    ///
    /// ## Arguments
    /// * `base` - Σ taxed sale of the items carrying the code
    /// * `discount` - Share of the taxed discount applicable to `base`
    /// * `quantity` - Σ quantity of the items carrying the code
    ///
    /// ## Returns
    /// `None` for unvalidated codes and when the computation overflows.
    pub fn expected_value(&self, base: Decimal, discount: Decimal, quantity: Decimal) -> Option<Decimal> {
        match self.kind {
            TaxKind::Percentage(rate) => base.checked_sub(discount)?.checked_mul(rate),
            TaxKind::PerUnit(fee) => fee.checked_mul(quantity),
            TaxKind::Unvalidated => None,
        }
    }
}

/// Share of the document-level taxed discount that applies to `base`.
///
/// When every taxed item carries the code this is the whole discount.
/// `None` on overflow.
pub fn prorated_discount(
    taxed_discount: Decimal,
    base: Decimal,
    total_taxed: Decimal,
) -> Option<Decimal> {
    if total_taxed.is_zero() || base >= total_taxed {
        Some(taxed_discount)
    } else {
        taxed_discount.checked_mul(base)?.checked_div(total_taxed)
    }
}
