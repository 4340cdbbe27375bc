use bigdecimal::BigDecimal;
use serde::Deserialize;
use std::fmt;

use crate::domain::money::LEDGER_SCALE;

pub const TITLE_MAX_LEN: usize = 255;
pub const DESCRIPTION_MAX_LEN: usize = 2000;
pub const ADDRESS_MAX_LEN: usize = 64;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StrictPayload<T> {
    #[serde(flatten)]
    pub data: T,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub type ValidationResult = Result<(), ValidationError>;

pub fn sanitize_string(value: &str) -> String {
    value
        .chars()
        .filter(|ch| !ch.is_control())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn validate_required(field: &'static str, value: &str) -> ValidationResult {
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, "must not be empty"));
    }

    Ok(())
}

pub fn validate_max_len(field: &'static str, value: &str, max_len: usize) -> ValidationResult {
    if value.len() > max_len {
        return Err(ValidationError::new(
            field,
            format!("must be at most {} characters", max_len),
        ));
    }

    Ok(())
}

pub fn validate_positive_amount(amount: &BigDecimal) -> ValidationResult {
    if amount <= &BigDecimal::from(0) {
        return Err(ValidationError::new("amount", "must be greater than zero"));
    }

    Ok(())
}

/// Ledger amounts carry at most two decimal places.
pub fn validate_ledger_amount(amount: &BigDecimal) -> ValidationResult {
    validate_positive_amount(amount)?;

    if amount.with_scale(LEDGER_SCALE) != *amount {
        return Err(ValidationError::new(
            "amount",
            format!("must have at most {} decimal places", LEDGER_SCALE),
        ));
    }

    Ok(())
}

/// Shape check only; network-specific checksum validation happens in the chain adapter.
pub fn validate_destination_address(address: &str) -> ValidationResult {
    validate_required("destination_address", address)?;
    validate_max_len("destination_address", address, ADDRESS_MAX_LEN)?;

    if address.chars().any(|ch| !ch.is_ascii_alphanumeric()) {
        return Err(ValidationError::new(
            "destination_address",
            "must contain only letters and digits",
        ));
    }

    Ok(())
}

pub fn validate_milestone_text(title: &str, description: &str) -> ValidationResult {
    validate_required("title", title)?;
    validate_max_len("title", title, TITLE_MAX_LEN)?;
    validate_max_len("description", description, DESCRIPTION_MAX_LEN)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    #[test]
    fn validates_required_field() {
        assert!(validate_required("field", "value").is_ok());
        assert!(validate_required("field", "   ").is_err());
    }

    #[test]
    fn validates_max_len() {
        assert!(validate_max_len("field", "abc", 3).is_ok());
        assert!(validate_max_len("field", "abcd", 3).is_err());
    }

    #[test]
    fn sanitizes_string() {
        assert_eq!(sanitize_string("  hello\tworld  "), "hello world");
        assert_eq!(sanitize_string(" \n "), "");
        assert_eq!(sanitize_string("ab\u{0000}cd\u{0007}"), "abcd");
    }

    #[test]
    fn validates_ledger_amounts() {
        assert!(validate_ledger_amount(&dec("100")).is_ok());
        assert!(validate_ledger_amount(&dec("100.25")).is_ok());
        assert!(validate_ledger_amount(&dec("0")).is_err());
        assert!(validate_ledger_amount(&dec("-5")).is_err());

        let err = validate_ledger_amount(&dec("1.005")).unwrap_err();
        assert_eq!(err.field, "amount");
    }

    #[test]
    fn validates_destination_shape() {
        assert!(validate_destination_address("TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t").is_ok());
        assert!(validate_destination_address("0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf").is_ok());
        assert!(validate_destination_address("").is_err());
        assert!(validate_destination_address("T R7N").is_err());
        assert!(validate_destination_address(&"a".repeat(65)).is_err());
    }

    #[test]
    fn validates_milestone_text() {
        assert!(validate_milestone_text("Logo", "").is_ok());
        assert!(validate_milestone_text(" ", "").is_err());
        assert!(validate_milestone_text(&"t".repeat(256), "").is_err());
    }

    #[test]
    fn rejects_unknown_fields_in_strict_payload() {
        #[derive(Debug, Deserialize)]
        struct Example {
            #[allow(dead_code)]
            amount: String,
        }

        let err = serde_json::from_str::<StrictPayload<Example>>(r#"{"amount":"1","extra":1}"#);
        assert!(err.is_err());
    }
}
