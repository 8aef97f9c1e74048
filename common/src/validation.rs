//! Default request validation collaborators.
//!
//! Amount precision is checked against the caller's original text, parsed as
//! a decimal, so `0.30000000000000004`-style float artifacts never reach the
//! check.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::{today, Currency, ValidationError};

/// Earliest date any supported provider has rates for.
pub const EARLIEST_HISTORICAL_DATE: (i32, u32, u32) = (1999, 1, 4);

/// Validate a currency code: exactly three ASCII letters, any case.
pub fn validate_currency_code(code: &str) -> Result<Currency, ValidationError> {
    let trimmed = code.trim();
    if trimmed.len() != 3 || !trimmed.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(ValidationError::InvalidCurrencyCode(code.to_string()));
    }
    Ok(Currency::new(trimmed))
}

/// Validate a non-empty list of target currency codes.
pub fn validate_currency_list<S: AsRef<str>>(codes: &[S]) -> Result<Vec<Currency>, ValidationError> {
    if codes.is_empty() {
        return Err(ValidationError::NoTargetCurrencies);
    }
    codes
        .iter()
        .map(|code| validate_currency_code(code.as_ref()))
        .collect()
}

/// Validate a `YYYY-MM-DD` date that is neither in the future nor before
/// the earliest date providers serve.
pub fn validate_date(value: &str) -> Result<NaiveDate, ValidationError> {
    let date = NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|e| {
        ValidationError::InvalidDate {
            value: value.to_string(),
            reason: e.to_string(),
        }
    })?;

    if date > today() {
        return Err(ValidationError::InvalidDate {
            value: value.to_string(),
            reason: "date is in the future".to_string(),
        });
    }

    let (y, m, d) = EARLIEST_HISTORICAL_DATE;
    if NaiveDate::from_ymd_opt(y, m, d).is_some_and(|earliest| date < earliest) {
        return Err(ValidationError::InvalidDate {
            value: value.to_string(),
            reason: "date predates available history".to_string(),
        });
    }

    Ok(date)
}

/// Validate an amount given as text for `currency`.
pub fn validate_amount(value: &str, currency: &Currency) -> Result<Decimal, ValidationError> {
    let amount = Decimal::from_str(value.trim())
        .map_err(|_| ValidationError::InvalidAmount(value.to_string()))?;

    if amount <= Decimal::ZERO {
        return Err(ValidationError::NonPositiveAmount);
    }

    // Trailing zeros as in "10.50" do not count against the currency.
    let allowed = currency.decimal_places();
    let actual = amount.normalize().scale();
    if actual > allowed {
        return Err(ValidationError::TooManyDecimalPlaces {
            currency: currency.code().to_string(),
            actual,
            allowed,
        });
    }

    Ok(amount)
}
