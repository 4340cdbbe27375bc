//! Fixed-point helpers for ledger amounts.
//!
//! Ledger values carry two decimal places; on-chain values are integers in the token's base unit.

use bigdecimal::BigDecimal;

pub const LEDGER_SCALE: i64 = 2;

pub fn zero() -> BigDecimal {
    BigDecimal::from(0)
}

/// Truncates to ledger precision. Anything below a cent stays with the platform.
pub fn to_ledger(amount: &BigDecimal) -> BigDecimal {
    amount.with_scale(LEDGER_SCALE)
}

/// `amount * percent / 100`, exact for the two-decimal inputs the ledger stores.
pub fn percent_of(amount: &BigDecimal, percent: u32) -> BigDecimal {
    amount * BigDecimal::from(percent) / BigDecimal::from(100)
}

/// Human-readable amount with exactly two decimals, e.g. `50.00`.
pub fn display(amount: &BigDecimal) -> String {
    to_ledger(amount).to_string()
}

/// Converts a token amount into integer base units (`decimals` places).
/// Returns `None` for negative values or amounts with more precision than the token supports.
pub fn to_base_units(amount: &BigDecimal, decimals: u32) -> Option<u128> {
    let scaled = amount * BigDecimal::from(10u64.pow(decimals));
    let truncated = scaled.with_scale(0);
    if truncated != scaled {
        return None;
    }
    truncated.to_string().parse::<u128>().ok()
}

/// Converts integer base units into a token amount.
pub fn from_base_units(units: u128, decimals: u32) -> Option<BigDecimal> {
    let whole: u64 = u64::try_from(units).ok()?;
    Some(BigDecimal::from(whole) / BigDecimal::from(10u64.pow(decimals)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    #[test]
    fn test_display_pads_to_cents() {
        assert_eq!(display(&dec("50")), "50.00");
        assert_eq!(display(&dec("101.5")), "101.50");
    }

    #[test]
    fn test_percent_of() {
        assert_eq!(percent_of(&dec("20"), 98), dec("19.6"));
        assert_eq!(percent_of(&dec("101"), 99), dec("99.99"));
    }

    #[test]
    fn test_base_units() {
        assert_eq!(to_base_units(&dec("101.5"), 6), Some(101_500_000));
        assert_eq!(to_base_units(&dec("0.0000001"), 6), None);
        assert_eq!(to_base_units(&dec("-1"), 6), None);
        assert_eq!(from_base_units(1_250_000, 6), Some(dec("1.25")));
    }
}
