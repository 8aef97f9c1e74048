//! Exchange rate sets returned by providers and the cache.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::{Currency, ProviderId};

/// Where an exchange rate set came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateSource {
    /// Served from the durable or in-process cache.
    Cache,
    /// Fetched live from an upstream provider.
    Api,
    /// Trivial identity rate (base equals target), no lookup made.
    Direct,
}

impl fmt::Display for RateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RateSource::Cache => "cache",
            RateSource::Api => "api",
            RateSource::Direct => "direct",
        };
        f.write_str(label)
    }
}

/// Rates for a base currency against a set of targets.
///
/// A rate value is the number of target units per one unit of base.
/// Values are immutable once built; [`ExchangeRateSet::with_source`] and
/// [`ExchangeRateSet::with_provider`] return new sets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeRateSet {
    base_currency: Currency,
    rates: BTreeMap<Currency, f64>,
    timestamp: DateTime<Utc>,
    source: RateSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    provider: Option<ProviderId>,
}

impl ExchangeRateSet {
    pub fn new(
        base_currency: Currency,
        rates: BTreeMap<Currency, f64>,
        timestamp: DateTime<Utc>,
        source: RateSource,
        provider: Option<ProviderId>,
    ) -> Self {
        Self {
            base_currency,
            rates,
            timestamp,
            source,
            provider,
        }
    }

    pub fn base_currency(&self) -> &Currency {
        &self.base_currency
    }

    pub fn rates(&self) -> &BTreeMap<Currency, f64> {
        &self.rates
    }

    /// Rate for a single target, if present.
    pub fn rate(&self, target: &Currency) -> Option<f64> {
        if *target == self.base_currency {
            return Some(self.rates.get(target).copied().unwrap_or(1.0));
        }
        self.rates.get(target).copied()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn source(&self) -> RateSource {
        self.source
    }

    pub fn provider(&self) -> Option<&ProviderId> {
        self.provider.as_ref()
    }

    /// Copy of this set tagged with a different source.
    pub fn with_source(&self, source: RateSource) -> Self {
        Self {
            source,
            ..self.clone()
        }
    }

    /// Copy of this set attributed to `provider`.
    pub fn with_provider(&self, provider: ProviderId) -> Self {
        Self {
            provider: Some(provider),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ExchangeRateSet {
        let mut rates = BTreeMap::new();
        rates.insert(Currency::eur(), 0.85);
        rates.insert(Currency::gbp(), 0.73);
        ExchangeRateSet::new(
            Currency::usd(),
            rates,
            Utc::now(),
            RateSource::Api,
            Some(ProviderId::exchangerate_api()),
        )
    }

    #[test]
    fn test_serializes_camel_case() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["baseCurrency"], "USD");
        assert_eq!(json["source"], "api");
        assert_eq!(json["provider"], "exchangerate-api");
        assert_eq!(json["rates"]["EUR"], 0.85);
    }

    #[test]
    fn test_with_source_leaves_original() {
        let original = sample();
        let cached = original.with_source(RateSource::Cache);
        assert_eq!(original.source(), RateSource::Api);
        assert_eq!(cached.source(), RateSource::Cache);
        assert_eq!(cached.rates(), original.rates());
    }

    #[test]
    fn test_rate_for_base_defaults_to_one() {
        let set = sample();
        assert_eq!(set.rate(&Currency::usd()), Some(1.0));
        assert_eq!(set.rate(&Currency::jpy()), None);
    }
}
