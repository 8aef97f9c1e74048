//! Rate provider trait and upstream adapters.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::time::Instant;

use splitfx_common::{Currency, ExchangeRateSet, ProviderId, RateSource};

use crate::error::{FxError, FxResult};

pub mod client;
pub mod exchangerate_api;
pub mod fixer;
pub mod http;
pub mod open_exchange_rates;
pub mod rebase;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use client::ProviderClient;
pub use exchangerate_api::ExchangeRateApiProvider;
pub use fixer::FixerProvider;
pub use http::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, TransportError};
pub use open_exchange_rates::OpenExchangeRatesProvider;

#[cfg(any(test, feature = "test-utils"))]
pub use mock::MockRateProvider;

/// Request/error counters for one provider since process start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStats {
    pub provider: ProviderId,
    pub request_count: u64,
    pub error_count: u64,
    pub last_error: Option<String>,
}

impl ProviderStats {
    /// Errors per request since start, 0 when nothing has been sent.
    pub fn error_rate(&self) -> f64 {
        if self.request_count == 0 {
            return 0.0;
        }
        self.error_count as f64 / self.request_count as f64
    }
}

/// Outcome of a live provider probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderHealthReport {
    pub provider: ProviderId,
    pub healthy: bool,
    pub latency_ms: u64,
    pub error_rate: f64,
    pub error: Option<String>,
}

/// Trait for upstream FX rate sources.
#[async_trait]
pub trait RateProvider: Send + Sync {
    /// Stable provider id.
    fn id(&self) -> &ProviderId;

    /// Latest rates for `base` against `targets`.
    async fn get_rates(&self, base: &Currency, targets: &[Currency]) -> FxResult<ExchangeRateSet>;

    /// Rates for `base` against `targets` as of `date`.
    async fn get_historical_rates(
        &self,
        base: &Currency,
        targets: &[Currency],
        date: NaiveDate,
    ) -> FxResult<ExchangeRateSet>;

    /// Currency codes the upstream can quote.
    async fn supported_currencies(&self) -> FxResult<Vec<Currency>>;

    /// Counters since process start.
    fn stats(&self) -> ProviderStats;

    /// Minimal live call (USD against EUR) reporting latency and error rate.
    async fn health_check(&self) -> ProviderHealthReport {
        let started = Instant::now();
        let outcome = self.get_rates(&Currency::usd(), &[Currency::eur()]).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        ProviderHealthReport {
            provider: self.id().clone(),
            healthy: outcome.is_ok(),
            latency_ms,
            error_rate: self.stats().error_rate(),
            error: outcome.err().map(|e| e.to_string()),
        }
    }
}

/// Reject empty or malformed credentials before any call is made.
pub(crate) fn validate_credential(provider: &ProviderId, credential: Option<&str>) -> FxResult<String> {
    let credential = credential.map(str::trim).unwrap_or_default();
    if credential.is_empty() {
        return Err(FxError::Configuration(format!(
            "missing credential for provider {provider}"
        )));
    }
    let well_formed = credential
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !well_formed {
        return Err(FxError::Configuration(format!(
            "malformed credential for provider {provider}"
        )));
    }
    Ok(credential.to_string())
}

/// Upstream code map to typed currencies.
pub(crate) fn to_currency_map(raw: BTreeMap<String, f64>) -> BTreeMap<Currency, f64> {
    raw.into_iter()
        .filter(|(_, rate)| rate.is_finite())
        .map(|(code, rate)| (Currency::new(code), rate))
        .collect()
}

/// Join symbols for a `symbols=` query parameter.
pub(crate) fn symbols_param(symbols: &[Currency]) -> String {
    symbols
        .iter()
        .map(Currency::code)
        .collect::<Vec<_>>()
        .join(",")
}

/// Build a live rate set, failing when none of the targets were quoted.
pub(crate) fn live_rate_set(
    provider: &ProviderId,
    base: &Currency,
    rates: BTreeMap<Currency, f64>,
    timestamp: DateTime<Utc>,
) -> FxResult<ExchangeRateSet> {
    if rates.is_empty() {
        return Err(FxError::provider_call(
            provider,
            "response contained none of the requested currencies",
        ));
    }
    Ok(ExchangeRateSet::new(
        base.clone(),
        rates,
        timestamp,
        RateSource::Api,
        Some(provider.clone()),
    ))
}

/// Midnight UTC of `date`, used as the timestamp of historical sets.
pub(crate) fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc())
        .unwrap_or_else(Utc::now)
}

pub(crate) fn from_unix(secs: Option<i64>) -> DateTime<Utc> {
    secs.and_then(|s| DateTime::from_timestamp(s, 0))
        .unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_credential() {
        let id = ProviderId::fixer();
        assert_eq!(validate_credential(&id, Some(" abc_123-x ")).unwrap(), "abc_123-x");
        assert!(validate_credential(&id, None).is_err());
        assert!(validate_credential(&id, Some("   ")).is_err());
        assert!(validate_credential(&id, Some("abc/../def")).is_err());
    }

    #[test]
    fn test_live_rate_set_requires_rates() {
        let id = ProviderId::fixer();
        let err = live_rate_set(&id, &Currency::usd(), BTreeMap::new(), Utc::now()).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ProviderCallFailed);
    }

    #[test]
    fn test_start_of_day() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        assert_eq!(start_of_day(date).to_rfc3339(), "2024-03-15T00:00:00+00:00");
    }

    #[tokio::test]
    async fn test_default_health_check_reports_failure() {
        let provider = MockRateProvider::new(ProviderId::fixer());
        provider.fail_with("upstream down");

        let report = provider.health_check().await;
        assert!(!report.healthy);
        assert_eq!(report.error_rate, 1.0);
        assert!(report.error.unwrap().contains("upstream down"));
    }
}
