//! Common types and money helpers shared across models.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Direction of a financial entry. Categories and transactions both carry one,
/// and a transaction's category must carry the same kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum EntryKind {
    Income,
    Expense,
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Income => write!(f, "income"),
            Self::Expense => write!(f, "expense"),
        }
    }
}

impl std::str::FromStr for EntryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "income" => Ok(Self::Income),
            "expense" => Ok(Self::Expense),
            _ => Err(format!("Unknown entry kind: {}", s)),
        }
    }
}

/// Convert a currency amount to integer minor units (cents).
/// Returns None if the amount carries sub-cent precision or overflows i64.
pub fn to_minor_units(amount: Decimal) -> Option<i64> {
    let scaled = amount.checked_mul(Decimal::ONE_HUNDRED)?;
    if scaled.fract() != Decimal::ZERO {
        return None;
    }
    scaled.to_i64()
}

/// Convert integer minor units back to a two-decimal-place amount.
pub fn from_minor_units(minor: i64) -> Decimal {
    Decimal::new(minor, 2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn entry_kind_round_trips() {
        assert_eq!(EntryKind::from_str("income").unwrap(), EntryKind::Income);
        assert_eq!(EntryKind::from_str("EXPENSE").unwrap(), EntryKind::Expense);
        assert!(EntryKind::from_str("transfer").is_err());
        assert_eq!(EntryKind::Income.to_string(), "income");
    }

    #[test]
    fn minor_unit_conversion_is_exact() {
        let a = to_minor_units(Decimal::from_str("150000.50").unwrap()).unwrap();
        let b = to_minor_units(Decimal::from_str("50000.25").unwrap()).unwrap();
        let c = to_minor_units(Decimal::from_str("30000.00").unwrap()).unwrap();
        assert_eq!(a, 15_000_050);
        assert_eq!(
            from_minor_units(a + b - c),
            Decimal::from_str("170000.75").unwrap()
        );
    }

    #[test]
    fn sub_cent_precision_is_rejected() {
        assert!(to_minor_units(Decimal::from_str("10.005").unwrap()).is_none());
        assert_eq!(to_minor_units(Decimal::from_str("10.50").unwrap()), Some(1050));
        assert_eq!(to_minor_units(Decimal::from_str("7").unwrap()), Some(700));
    }
}
