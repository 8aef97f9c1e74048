//! Currency conversion types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use splitfx_common::{Money, ProviderId, RateSource};

/// A completed currency conversion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversion {
    /// Unique conversion ID.
    pub id: Uuid,
    /// Input amount.
    pub input: Money,
    /// Output amount, rounded to the target currency's precision.
    pub output: Money,
    /// Target units per one input unit.
    pub rate: f64,
    /// Where the rate came from.
    pub rate_source: RateSource,
    /// Provider that quoted the rate, if any.
    pub provider: Option<ProviderId>,
    /// When the conversion was executed.
    pub executed_at: DateTime<Utc>,
}

impl Conversion {
    /// Create a new conversion record.
    pub fn new(
        input: Money,
        output: Money,
        rate: f64,
        rate_source: RateSource,
        provider: Option<ProviderId>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            input,
            output,
            rate,
            rate_source,
            provider,
            executed_at: Utc::now(),
        }
    }

    /// Identity conversion between equal currencies.
    pub fn direct(input: Money) -> Self {
        let output = input.round();
        Self::new(input, output, 1.0, RateSource::Direct, None)
    }

    /// Output divided by input, after rounding.
    pub fn effective_rate(&self) -> Decimal {
        if self.input.value.is_zero() {
            return Decimal::ZERO;
        }
        self.output.value / self.input.value
    }
}

/// Options for [`crate::ForexService::convert`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionOptions {
    /// Serve the rate from cache when possible.
    pub use_cache: bool,
    /// Provider to try first.
    pub provider: Option<ProviderId>,
}

impl Default for ConversionOptions {
    fn default() -> Self {
        Self {
            use_cache: true,
            provider: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use splitfx_common::Currency;

    #[test]
    fn test_conversion_effective_rate() {
        let input = Money::new(dec!(1000), Currency::usd());
        let output = Money::new(dec!(920), Currency::eur());

        let conversion = Conversion::new(input, output, 0.92, RateSource::Api, Some(ProviderId::fixer()));

        assert_eq!(conversion.effective_rate(), dec!(0.92));
        assert_eq!(conversion.rate_source, RateSource::Api);
    }

    #[test]
    fn test_direct_conversion() {
        let conversion = Conversion::direct(Money::new(dec!(12.345), Currency::usd()));

        assert_eq!(conversion.rate, 1.0);
        assert_eq!(conversion.rate_source, RateSource::Direct);
        assert_eq!(conversion.output.value, dec!(12.35));
        assert!(conversion.provider.is_none());
    }

    #[test]
    fn test_serializes_camel_case() {
        let conversion = Conversion::direct(Money::new(dec!(5), Currency::eur()));
        let json = serde_json::to_value(&conversion).unwrap();
        assert_eq!(json["rateSource"], "direct");
        assert!(json["executedAt"].is_string());
    }
}
