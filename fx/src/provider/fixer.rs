//! Fixer adapter. The free tier quotes against EUR only, so other bases
//! are derived by re-basing.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::instrument;

use splitfx_common::{Currency, ExchangeRateSet, ProviderId};

use super::http::{HttpRequest, HttpTransport};
use super::rebase::{rebase, symbols_for};
use super::{
    from_unix, live_rate_set, start_of_day, symbols_param, to_currency_map, validate_credential,
    ProviderClient, ProviderStats, RateProvider,
};
use crate::config::ProviderSettings;
use crate::error::{FxError, FxResult};
use crate::limiter::RateLimiter;

#[derive(Debug, Deserialize)]
struct UpstreamError {
    code: Option<i64>,
    #[serde(rename = "type")]
    kind: Option<String>,
    info: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    success: bool,
    error: Option<UpstreamError>,
    timestamp: Option<i64>,
    base: Option<String>,
    rates: Option<BTreeMap<String, f64>>,
    symbols: Option<BTreeMap<String, String>>,
}

impl ApiResponse {
    fn into_success(self, provider: &ProviderId) -> FxResult<Self> {
        if self.success {
            return Ok(self);
        }
        let detail = match &self.error {
            Some(e) => format!(
                "{} ({})",
                e.info.as_deref().or(e.kind.as_deref()).unwrap_or("unknown error"),
                e.code.unwrap_or_default()
            ),
            None => "unknown error".to_string(),
        };
        Err(FxError::provider_call(provider, format!("upstream error: {detail}")))
    }
}

/// Client for `data.fixer.io`.
pub struct FixerProvider {
    client: ProviderClient,
    base_url: String,
    access_key: String,
}

impl FixerProvider {
    /// Base currency of free-tier quotes.
    pub fn native_base() -> Currency {
        Currency::eur()
    }

    pub fn new(settings: &ProviderSettings, transport: Arc<dyn HttpTransport>) -> FxResult<Self> {
        let id = ProviderId::fixer();
        let access_key = validate_credential(&id, settings.credential.as_deref())?;
        let limiter = RateLimiter::new(settings.rate_limit_capacity, settings.rate_limit_per_second)?;

        Ok(Self {
            client: ProviderClient::new(id, limiter, transport, settings.timeout),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            access_key,
        })
    }

    async fn fetch(&self, path: &str, symbols: Option<&[Currency]>) -> FxResult<ApiResponse> {
        let mut request = HttpRequest::get(format!("{}/{}", self.base_url, path))
            .with_query("access_key", &self.access_key);
        if let Some(symbols) = symbols {
            request = request.with_query("symbols", symbols_param(symbols));
        }

        let response: ApiResponse = self.client.get_json(request).await?;
        response
            .into_success(self.client.id())
            .map_err(|e| self.client.record_failure(e))
    }

    async fn fetch_rates(
        &self,
        path: &str,
        base: &Currency,
        targets: &[Currency],
        date: Option<NaiveDate>,
    ) -> FxResult<ExchangeRateSet> {
        let symbols = symbols_for(base, targets);
        let response = self.fetch(path, Some(&symbols)).await?;

        let native = response
            .base
            .as_deref()
            .map(Currency::new)
            .unwrap_or_else(Self::native_base);
        let quoted = to_currency_map(response.rates.unwrap_or_default());

        let rates = rebase(&native, base, &quoted, targets).ok_or_else(|| {
            self.client.record_failure(FxError::provider_call(
                self.client.id(),
                format!("no {} quote to re-base from {}", base, native),
            ))
        })?;

        let timestamp = match date {
            Some(date) => start_of_day(date),
            None => from_unix(response.timestamp),
        };
        live_rate_set(self.client.id(), base, rates, timestamp)
            .map_err(|e| self.client.record_failure(e))
    }
}

#[async_trait]
impl RateProvider for FixerProvider {
    fn id(&self) -> &ProviderId {
        self.client.id()
    }

    #[instrument(skip(self, targets), fields(provider = %self.id(), base = %base))]
    async fn get_rates(&self, base: &Currency, targets: &[Currency]) -> FxResult<ExchangeRateSet> {
        self.fetch_rates("latest", base, targets, None).await
    }

    #[instrument(skip(self, targets), fields(provider = %self.id(), base = %base, date = %date))]
    async fn get_historical_rates(
        &self,
        base: &Currency,
        targets: &[Currency],
        date: NaiveDate,
    ) -> FxResult<ExchangeRateSet> {
        let path = date.format("%Y-%m-%d").to_string();
        self.fetch_rates(&path, base, targets, Some(date)).await
    }

    async fn supported_currencies(&self) -> FxResult<Vec<Currency>> {
        let response = self.fetch("symbols", None).await?;
        Ok(response
            .symbols
            .unwrap_or_default()
            .into_keys()
            .map(Currency::new)
            .collect())
    }

    fn stats(&self) -> ProviderStats {
        self.client.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::http::{HttpResponse, TransportError};
    use parking_lot::Mutex;

    struct Canned {
        body: &'static str,
        requests: Mutex<Vec<HttpRequest>>,
    }

    #[async_trait]
    impl HttpTransport for Canned {
        async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
            self.requests.lock().push(request);
            Ok(HttpResponse::ok_json(self.body))
        }
    }

    fn provider(body: &'static str) -> (FixerProvider, Arc<Canned>) {
        let transport = Arc::new(Canned {
            body,
            requests: Mutex::new(Vec::new()),
        });
        let settings = crate::config::ForexConfig::default().fixer.with_credential("fixerkey");
        (FixerProvider::new(&settings, transport.clone()).unwrap(), transport)
    }

    const LATEST: &str = r#"{
        "success": true,
        "timestamp": 1704067201,
        "base": "EUR",
        "date": "2024-01-01",
        "rates": {"USD": 1.25, "GBP": 0.85}
    }"#;

    #[tokio::test]
    async fn test_rebases_to_requested_base() {
        let (provider, transport) = provider(LATEST);

        let set = provider
            .get_rates(&Currency::usd(), &[Currency::gbp(), Currency::usd()])
            .await
            .unwrap();

        assert_eq!(set.base_currency(), &Currency::usd());
        assert_eq!(set.rate(&Currency::usd()), Some(1.0));
        assert!((set.rate(&Currency::gbp()).unwrap() - 0.68).abs() < 1e-12);

        let requests = transport.requests.lock();
        assert_eq!(requests[0].url, "https://data.fixer.io/api/latest");
        assert_eq!(requests[0].query_param("symbols"), Some("GBP,USD"));
        assert_eq!(requests[0].query_param("access_key"), Some("fixerkey"));
    }

    #[tokio::test]
    async fn test_native_base_is_not_rebased() {
        let (provider, _) = provider(LATEST);
        let set = provider.get_rates(&Currency::eur(), &[Currency::gbp()]).await.unwrap();
        assert_eq!(set.rate(&Currency::gbp()), Some(0.85));
    }

    #[tokio::test]
    async fn test_historical_uses_date_path() {
        let (provider, transport) = provider(LATEST);
        let date = NaiveDate::from_ymd_opt(2023, 12, 31).unwrap();

        provider
            .get_historical_rates(&Currency::eur(), &[Currency::usd()], date)
            .await
            .unwrap();

        assert!(transport.requests.lock()[0].url.ends_with("/2023-12-31"));
    }

    #[tokio::test]
    async fn test_missing_base_quote_fails() {
        let (provider, _) = provider(LATEST);
        let result = provider.get_rates(&Currency::jpy(), &[Currency::gbp()]).await;

        assert!(result.unwrap_err().to_string().contains("re-base"));
        assert_eq!(provider.stats().error_count, 1);
    }

    #[tokio::test]
    async fn test_upstream_error_payload() {
        let (provider, _) = provider(
            r#"{"success":false,"error":{"code":101,"type":"invalid_access_key","info":"You have not supplied a valid API Access Key."}}"#,
        );
        let err = provider.get_rates(&Currency::eur(), &[Currency::usd()]).await.unwrap_err();

        assert!(err.to_string().contains("valid API Access Key"));
        assert!(!err.to_string().contains("fixerkey"));
    }

    #[tokio::test]
    async fn test_symbols() {
        let (provider, _) = provider(r#"{"success":true,"symbols":{"EUR":"Euro","USD":"United States Dollar"}}"#);
        let codes = provider.supported_currencies().await.unwrap();
        assert_eq!(codes, vec![Currency::eur(), Currency::usd()]);
    }
}
