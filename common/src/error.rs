//! Validation error types shared by SplitFx crates.

use thiserror::Error;

/// Rejections produced by the request validation collaborators.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Currency code is not three ASCII letters.
    #[error("Invalid currency code: {0:?}")]
    InvalidCurrencyCode(String),

    /// No target currencies supplied.
    #[error("At least one target currency is required")]
    NoTargetCurrencies,

    /// Date is not `YYYY-MM-DD` or is outside the supported range.
    #[error("Invalid date {value:?}: {reason}")]
    InvalidDate { value: String, reason: String },

    /// Amount text is not a decimal number.
    #[error("Invalid amount: {0:?}")]
    InvalidAmount(String),

    /// Amount must be strictly positive.
    #[error("Amount must be greater than zero")]
    NonPositiveAmount,

    /// Amount carries more fractional digits than the currency allows.
    #[error("Amount has {actual} decimal places, {currency} allows at most {allowed}")]
    TooManyDecimalPlaces {
        currency: String,
        actual: u32,
        allowed: u32,
    },
}

impl ValidationError {
    /// Get error code for API responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            ValidationError::InvalidCurrencyCode(_) => "INVALID_CURRENCY_CODE",
            ValidationError::NoTargetCurrencies => "NO_TARGET_CURRENCIES",
            ValidationError::InvalidDate { .. } => "INVALID_DATE",
            ValidationError::InvalidAmount(_) => "INVALID_AMOUNT",
            ValidationError::NonPositiveAmount => "NON_POSITIVE_AMOUNT",
            ValidationError::TooManyDecimalPlaces { .. } => "TOO_MANY_DECIMAL_PLACES",
        }
    }
}
