//! Monetary types for SplitFx.

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A monetary amount with currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    /// The amount value (high precision decimal).
    pub value: Decimal,
    /// ISO 4217 currency code.
    pub currency: Currency,
}

impl Money {
    /// Create a new Money instance.
    pub fn new(value: Decimal, currency: Currency) -> Self {
        Self { value, currency }
    }

    /// Round to the currency's standard decimal places.
    pub fn round(&self) -> Self {
        Self {
            value: self
                .value
                .round_dp_with_strategy(self.currency.decimal_places(), RoundingStrategy::MidpointAwayFromZero),
            currency: self.currency.clone(),
        }
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.currency)
    }
}

/// ISO 4217 currency code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Currency(String);

impl Currency {
    /// Create a new currency from code.
    ///
    /// The code is upper-cased but not validated; use
    /// [`crate::validate_currency_code`] for untrusted input.
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into().trim().to_uppercase())
    }

    /// Get the currency code.
    pub fn code(&self) -> &str {
        &self.0
    }

    /// Get the standard decimal places for this currency.
    pub fn decimal_places(&self) -> u32 {
        match self.0.as_str() {
            "JPY" | "KRW" | "VND" | "CLP" | "ISK" | "UGX" => 0,
            "BHD" | "KWD" | "OMR" | "JOD" | "TND" => 3,
            _ => 2,
        }
    }

    /// Common currencies
    pub fn usd() -> Self {
        Self::new("USD")
    }

    pub fn eur() -> Self {
        Self::new("EUR")
    }

    pub fn gbp() -> Self {
        Self::new("GBP")
    }

    pub fn jpy() -> Self {
        Self::new("JPY")
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Currency {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Multiply `amount` by a floating point `rate` and round to `precision`
/// decimal places, half away from zero.
///
/// Returns `None` when the rate is not finite.
pub fn calculate_conversion(amount: Decimal, rate: f64, precision: u32) -> Option<Decimal> {
    let rate = Decimal::from_f64(rate)?;
    Some((amount * rate).round_dp_with_strategy(precision, RoundingStrategy::MidpointAwayFromZero))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_currency_normalized() {
        assert_eq!(Currency::new(" usd "), Currency::usd());
        assert_eq!(Currency::from("gbp").code(), "GBP");
    }

    #[test]
    fn test_currency_decimal_places() {
        assert_eq!(Currency::usd().decimal_places(), 2);
        assert_eq!(Currency::eur().decimal_places(), 2);
        assert_eq!(Currency::jpy().decimal_places(), 0);
        assert_eq!(Currency::new("KWD").decimal_places(), 3);
    }

    #[test]
    fn test_calculate_conversion_rounds_half_away_from_zero() {
        let amount = Decimal::from_str("10.05").unwrap();
        let converted = calculate_conversion(amount, 0.5, 2).unwrap();
        // 5.025 -> 5.03
        assert_eq!(converted, Decimal::from_str("5.03").unwrap());
    }

    #[test]
    fn test_calculate_conversion_zero_precision() {
        let amount = Decimal::from(100);
        let converted = calculate_conversion(amount, 151.237, 0).unwrap();
        assert_eq!(converted, Decimal::from(15124));
    }

    #[test]
    fn test_calculate_conversion_rejects_nan() {
        assert!(calculate_conversion(Decimal::ONE, f64::NAN, 2).is_none());
    }

    #[test]
    fn test_money_round() {
        let money = Money::new(Decimal::from_str("1234.5").unwrap(), Currency::jpy());
        assert_eq!(money.round().value, Decimal::from(1235));
    }
}
