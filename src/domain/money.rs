//! Money type
//!
//! Signed fixed-point monetary value stored as integer minor units.
//! Arithmetic is always checked; nothing in this module touches floating point.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of fractional digits every Money value carries.
pub const SCALE: u32 = 2;

/// Money is a signed quantity of minor units (cents).
///
/// # Invariants
/// - Exactly [`SCALE`] fractional digits, never rounded
/// - Arithmetic fails with [`MoneyError::Overflow`] instead of wrapping
///
/// # Example
/// ```
/// use pocket_ledger::domain::Money;
///
/// let a: Money = "100.00".parse().unwrap();
/// let b: Money = "30.00".parse().unwrap();
/// assert_eq!(a.checked_sub(b).unwrap().to_string(), "70.00");
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Money(i64);

/// Errors that can occur when building or combining Money values
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MoneyError {
    #[error("Invalid amount format: {0}")]
    ParseError(String),

    #[error("Amount has too many decimal places (max {SCALE}, got {0})")]
    TooManyDecimals(u32),

    #[error("Amount is outside the representable range")]
    Overflow,
}

impl Money {
    pub const ZERO: Money = Money(0);

    /// Build from a raw number of minor units.
    pub const fn from_minor(minor: i64) -> Self {
        Self(minor)
    }

    /// Build from whole currency units.
    pub fn from_major(major: i64) -> Result<Self, MoneyError> {
        major
            .checked_mul(10_i64.pow(SCALE))
            .map(Self)
            .ok_or(MoneyError::Overflow)
    }

    /// Raw minor units.
    pub const fn minor_units(self) -> i64 {
        self.0
    }

    pub fn checked_add(self, other: Money) -> Result<Money, MoneyError> {
        self.0.checked_add(other.0).map(Self).ok_or(MoneyError::Overflow)
    }

    pub fn checked_sub(self, other: Money) -> Result<Money, MoneyError> {
        self.0.checked_sub(other.0).map(Self).ok_or(MoneyError::Overflow)
    }

    pub fn checked_neg(self) -> Result<Money, MoneyError> {
        self.0.checked_neg().map(Self).ok_or(MoneyError::Overflow)
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// Parse a decimal string such as `"-12.50"`.
    ///
    /// Inputs written with more than [`SCALE`] fractional digits are rejected,
    /// even when the extra digits are zeros.
    pub fn parse(input: &str) -> Result<Self, MoneyError> {
        let trimmed = input.trim();
        let well_formed = !trimmed.is_empty()
            && trimmed
                .trim_start_matches(|c: char| c == '+' || c == '-')
                .chars()
                .all(|c| c.is_ascii_digit() || c == '.');
        if !well_formed {
            return Err(MoneyError::ParseError(input.to_string()));
        }

        let decimal =
            Decimal::from_str(trimmed).map_err(|e| MoneyError::ParseError(e.to_string()))?;
        Self::from_decimal(decimal)
    }

    /// Convert a decimal with at most [`SCALE`] fractional digits.
    pub fn from_decimal(value: Decimal) -> Result<Self, MoneyError> {
        if value.scale() > SCALE {
            return Err(MoneyError::TooManyDecimals(value.scale()));
        }

        let mut scaled = value;
        scaled.rescale(SCALE);
        i64::try_from(scaled.mantissa())
            .map(Self)
            .map_err(|_| MoneyError::Overflow)
    }

    /// Exact decimal representation (used for storage).
    pub fn to_decimal(self) -> Decimal {
        Decimal::new(self.0, SCALE)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_decimal())
    }
}

impl FromStr for Money {
    type Err = MoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Money::parse(s)
    }
}

impl TryFrom<String> for Money {
    type Error = MoneyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Money::parse(&value)
    }
}

impl From<Money> for String {
    fn from(money: Money) -> Self {
        money.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_and_format() {
        let money = Money::parse("123.45").unwrap();
        assert_eq!(money.minor_units(), 12345);
        assert_eq!(money.to_string(), "123.45");

        let whole = Money::parse("70").unwrap();
        assert_eq!(whole.to_string(), "70.00");

        let negative = Money::parse("-0.5").unwrap();
        assert_eq!(negative.minor_units(), -50);
        assert_eq!(negative.to_string(), "-0.50");
    }

    #[test]
    fn test_parse_rejects_extra_precision() {
        assert_eq!(
            Money::parse("1.234"),
            Err(MoneyError::TooManyDecimals(3))
        );
        assert_eq!(
            Money::parse("1.500"),
            Err(MoneyError::TooManyDecimals(3))
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for input in ["", "  ", "abc", "1,00", "1e5", "--1", "NaN"] {
            assert!(
                matches!(Money::parse(input), Err(MoneyError::ParseError(_))),
                "expected parse error for {input:?}"
            );
        }
    }

    #[test]
    fn test_parse_out_of_range() {
        assert_eq!(
            Money::parse("92233720368547758.08"),
            Err(MoneyError::Overflow)
        );
        assert_eq!(
            Money::parse("92233720368547758.07").unwrap(),
            Money::from_minor(i64::MAX)
        );
    }

    #[test]
    fn test_checked_arithmetic() {
        let a = Money::from_major(100).unwrap();
        let b = Money::parse("30.25").unwrap();

        assert_eq!(a.checked_add(b).unwrap().to_string(), "130.25");
        assert_eq!(a.checked_sub(b).unwrap().to_string(), "69.75");
        assert_eq!(b.checked_neg().unwrap().to_string(), "-30.25");
    }

    #[test]
    fn test_overflow_is_an_error() {
        let max = Money::from_minor(i64::MAX);
        assert_eq!(max.checked_add(Money::from_minor(1)), Err(MoneyError::Overflow));
        assert_eq!(
            Money::from_minor(i64::MIN).checked_neg(),
            Err(MoneyError::Overflow)
        );
        assert_eq!(Money::from_major(i64::MAX), Err(MoneyError::Overflow));
    }

    #[test]
    fn test_predicates_and_ordering() {
        assert!(Money::ZERO.is_zero());
        assert!(Money::from_minor(-1).is_negative());
        assert!(Money::from_minor(1).is_positive());
        assert!(Money::parse("0.01").unwrap() > Money::ZERO);
        assert!(Money::parse("-10.00").unwrap() < Money::parse("-9.99").unwrap());
    }

    #[test]
    fn test_decimal_conversion() {
        let money = Money::from_decimal(dec!(42.1)).unwrap();
        assert_eq!(money.minor_units(), 4210);
        assert_eq!(money.to_decimal(), dec!(42.10));
        assert_eq!(
            Money::from_decimal(dec!(0.001)),
            Err(MoneyError::TooManyDecimals(3))
        );
    }

    #[test]
    fn test_serde_as_string() {
        let money = Money::parse("12.30").unwrap();
        let json = serde_json::to_string(&money).unwrap();
        assert_eq!(json, "\"12.30\"");

        let back: Money = serde_json::from_str(&json).unwrap();
        assert_eq!(back, money);
        assert!(serde_json::from_str::<Money>("\"1.234\"").is_err());
    }
}
