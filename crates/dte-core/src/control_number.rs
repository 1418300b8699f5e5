//! # Control Numbers
//!
//! The human-readable sequential identifier printed on every document.
//!
//! ## Wire Format (31 characters)
//! ```text
//! DTE-03-C0010001-000000000012345
//! ─┬─ ┬─ ─┬──┬─── ───────┬───────
//!  │  │   │  │           └── 15 digits: zero-padded sequence, or
//!  │  │   │  │               4-digit year + 11-digit sequence
//!  │  │   │  └── 4-char point-of-sale code
//!  │  │   └── 4-char establishment code
//!  │  └── 2-digit document type
//!  └── literal prefix
//! ```
//!
//! Establishment and POS codes default to `0000`. That default is applied
//! by the sequence allocator, not here: [`ControlNumber::format`] expects the
//! final four-character codes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::types::DocumentType;

/// Literal prefix of every control number.
pub const PREFIX: &str = "DTE";

/// Exact length of a control number.
pub const LENGTH: usize = 31;

/// Code used when an issuer has no establishment or POS code.
pub const DEFAULT_UNIT_CODE: &str = "0000";

/// Width of the numeric tail.
const TAIL_WIDTH: usize = 15;

/// Largest sequence that fits when the year is embedded (11 digits).
pub const MAX_SEQUENCE_WITH_YEAR: u64 = 99_999_999_999;

/// Largest sequence that fits without the year (15 digits).
pub const MAX_SEQUENCE: u64 = 999_999_999_999_999;

/// A validated control number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ControlNumber(String);

impl ControlNumber {
    /// Formats a control number from its parts.
    ///
    /// ## Arguments
    /// * `document_type` - Type the number is issued for
    /// * `establishment` - Four-character establishment code
    /// * `pos` - Four-character point-of-sale code
    /// * `year` - `Some(year)` embeds the year before an 11-digit sequence
    /// * `sequence` - Allocated sequence number (>= 1)
    ///
    /// ## Example
    /// ```rust
    /// use dte_core::control_number::ControlNumber;
    /// use dte_core::types::DocumentType;
    ///
    /// let n = ControlNumber::format(DocumentType::TaxCreditVoucher, "C001", "0001", None, 12345).unwrap();
    /// assert_eq!(n.as_str(), "DTE-03-C0010001-000000000012345");
    /// ```
    pub fn format(
        document_type: DocumentType,
        establishment: &str,
        pos: &str,
        year: Option<i32>,
        sequence: u64,
    ) -> CoreResult<Self> {
        check_unit_code(establishment, "establishment")?;
        check_unit_code(pos, "point of sale")?;

        if sequence == 0 {
            return Err(invalid(sequence.to_string(), "sequence starts at 1"));
        }

        let tail = match year {
            Some(year) => {
                if !(0..=9999).contains(&year) {
                    return Err(invalid(year.to_string(), "year must have four digits"));
                }
                if sequence > MAX_SEQUENCE_WITH_YEAR {
                    return Err(invalid(sequence.to_string(), "sequence exceeds 11 digits"));
                }
                format!("{:04}{:011}", year, sequence)
            }
            None => {
                if sequence > MAX_SEQUENCE {
                    return Err(invalid(sequence.to_string(), "sequence exceeds 15 digits"));
                }
                format!("{:015}", sequence)
            }
        };

        Ok(ControlNumber(format!(
            "{}-{}-{}{}-{}",
            PREFIX,
            document_type.code(),
            establishment,
            pos,
            tail
        )))
    }

    /// Parses and validates an existing control number.
    ///
    /// Anything that does not match the exact 31-character shape is rejected.
    pub fn parse(value: &str) -> CoreResult<Self> {
        if value.len() != LENGTH || !value.is_ascii() {
            return Err(invalid(value, "must be 31 ASCII characters"));
        }
        if &value[0..4] != "DTE-" || &value[6..7] != "-" || &value[15..16] != "-" {
            return Err(invalid(value, "must match DTE-TT-EEEEPPPP-NNNNNNNNNNNNNNN"));
        }
        if DocumentType::from_code(&value[4..6]).is_none() {
            return Err(invalid(value, "unknown document type"));
        }
        if !value[7..15].chars().all(is_unit_char) {
            return Err(invalid(value, "establishment and POS must be uppercase alphanumeric"));
        }
        let tail = &value[16..];
        if tail.len() != TAIL_WIDTH || !tail.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid(value, "sequence must be 15 digits"));
        }
        Ok(ControlNumber(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Document type embedded in the number.
    pub fn document_type(&self) -> Option<DocumentType> {
        DocumentType::from_code(&self.0[4..6])
    }

    pub fn establishment(&self) -> &str {
        &self.0[7..11]
    }

    pub fn point_of_sale(&self) -> &str {
        &self.0[11..15]
    }

    /// The 15-digit numeric tail.
    pub fn tail(&self) -> &str {
        &self.0[16..]
    }
}

fn is_unit_char(c: char) -> bool {
    c.is_ascii_digit() || c.is_ascii_uppercase()
}

fn check_unit_code(code: &str, what: &str) -> CoreResult<()> {
    if code.len() != 4 || !code.chars().all(is_unit_char) {
        return Err(invalid(
            code,
            &format!("{} code must be 4 uppercase alphanumeric characters", what),
        ));
    }
    Ok(())
}

fn invalid(value: impl Into<String>, reason: &str) -> CoreError {
    CoreError::InvalidControlNumber {
        value: value.into(),
        reason: reason.to_string(),
    }
}

impl fmt::Display for ControlNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ControlNumber {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ControlNumber::parse(s)
    }
}

impl TryFrom<String> for ControlNumber {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ControlNumber::parse(&value)
    }
}

impl From<ControlNumber> for String {
    fn from(value: ControlNumber) -> Self {
        value.0
    }
}
