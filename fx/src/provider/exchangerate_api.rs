//! ExchangeRate-API (v6) adapter. Quotes any base natively.

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, instrument};

use splitfx_common::{Currency, ExchangeRateSet, ProviderId};

use super::http::{HttpRequest, HttpTransport};
use super::{
    from_unix, live_rate_set, start_of_day, to_currency_map, validate_credential, ProviderClient,
    ProviderStats, RateProvider,
};
use crate::config::ProviderSettings;
use crate::error::{FxError, FxResult};
use crate::limiter::RateLimiter;

#[derive(Debug, Deserialize)]
struct ApiResponse {
    result: String,
    #[serde(rename = "error-type")]
    error_type: Option<String>,
    time_last_update_unix: Option<i64>,
    conversion_rates: Option<BTreeMap<String, f64>>,
    supported_codes: Option<Vec<(String, String)>>,
}

impl ApiResponse {
    fn into_success(self, provider: &ProviderId) -> FxResult<Self> {
        if self.result == "success" {
            Ok(self)
        } else {
            Err(FxError::provider_call(
                provider,
                format!(
                    "upstream error: {}",
                    self.error_type.as_deref().unwrap_or("unknown-error")
                ),
            ))
        }
    }
}

/// Client for `v6.exchangerate-api.com`.
pub struct ExchangeRateApiProvider {
    client: ProviderClient,
    base_url: String,
    api_key: String,
}

impl ExchangeRateApiProvider {
    pub fn new(settings: &ProviderSettings, transport: Arc<dyn HttpTransport>) -> FxResult<Self> {
        let id = ProviderId::exchangerate_api();
        let api_key = validate_credential(&id, settings.credential.as_deref())?;
        let limiter = RateLimiter::new(settings.rate_limit_capacity, settings.rate_limit_per_second)?;

        Ok(Self {
            client: ProviderClient::new(id, limiter, transport, settings.timeout),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    async fn fetch(&self, path: &str) -> FxResult<ApiResponse> {
        let url = format!("{}/{}/{}", self.base_url, self.api_key, path);
        let response: ApiResponse = self.client.get_json(HttpRequest::get(url)).await?;
        response
            .into_success(self.client.id())
            .map_err(|e| self.client.record_failure(e))
    }

    fn to_rate_set(
        &self,
        response: ApiResponse,
        base: &Currency,
        targets: &[Currency],
        fallback_date: Option<NaiveDate>,
    ) -> FxResult<ExchangeRateSet> {
        let quoted = to_currency_map(response.conversion_rates.unwrap_or_default());
        let rates: BTreeMap<Currency, f64> = targets
            .iter()
            .filter_map(|t| {
                if t == base {
                    Some((t.clone(), 1.0))
                } else {
                    quoted.get(t).map(|rate| (t.clone(), *rate))
                }
            })
            .collect();

        let timestamp = match fallback_date {
            Some(date) => start_of_day(date),
            None => from_unix(response.time_last_update_unix),
        };

        live_rate_set(self.client.id(), base, rates, timestamp)
            .map_err(|e| self.client.record_failure(e))
    }
}

#[async_trait]
impl RateProvider for ExchangeRateApiProvider {
    fn id(&self) -> &ProviderId {
        self.client.id()
    }

    #[instrument(skip(self, targets), fields(provider = %self.id(), base = %base))]
    async fn get_rates(&self, base: &Currency, targets: &[Currency]) -> FxResult<ExchangeRateSet> {
        let response = self.fetch(&format!("latest/{}", base.code())).await?;
        debug!(targets = targets.len(), "Received latest rates");
        self.to_rate_set(response, base, targets, None)
    }

    #[instrument(skip(self, targets), fields(provider = %self.id(), base = %base, date = %date))]
    async fn get_historical_rates(
        &self,
        base: &Currency,
        targets: &[Currency],
        date: NaiveDate,
    ) -> FxResult<ExchangeRateSet> {
        let path = format!(
            "history/{}/{}/{}/{}",
            base.code(),
            date.year(),
            date.month(),
            date.day()
        );
        let response = self.fetch(&path).await?;
        self.to_rate_set(response, base, targets, Some(date))
    }

    async fn supported_currencies(&self) -> FxResult<Vec<Currency>> {
        let response = self.fetch("codes").await?;
        Ok(response
            .supported_codes
            .unwrap_or_default()
            .into_iter()
            .map(|(code, _name)| Currency::new(code))
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
    use splitfx_common::RateSource;

    /// Replays one canned body and remembers the URLs it was asked for.
    struct Canned {
        status: u16,
        body: &'static str,
        urls: Mutex<Vec<String>>,
    }

    impl Canned {
        fn new(status: u16, body: &'static str) -> Arc<Self> {
            Arc::new(Self {
                status,
                body,
                urls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl HttpTransport for Canned {
        async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
            self.urls.lock().push(request.url.clone());
            Ok(HttpResponse {
                status: self.status,
                body: self.body.to_string(),
            })
        }
    }

    fn settings() -> ProviderSettings {
        crate::config::ForexConfig::default()
            .exchangerate_api
            .with_credential("test-key")
    }

    const LATEST: &str = r#"{
        "result": "success",
        "base_code": "USD",
        "time_last_update_unix": 1704067201,
        "conversion_rates": {"USD": 1, "EUR": 0.85, "GBP": 0.73, "JPY": 141.2}
    }"#;

    #[test]
    fn test_missing_credential_fails_fast() {
        let settings = crate::config::ForexConfig::default().exchangerate_api;
        let result = ExchangeRateApiProvider::new(&settings, Canned::new(200, LATEST));
        assert!(matches!(result, Err(FxError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_latest_rates() {
        let transport = Canned::new(200, LATEST);
        let provider = ExchangeRateApiProvider::new(&settings(), transport.clone()).unwrap();

        let set = provider
            .get_rates(&Currency::usd(), &[Currency::eur(), Currency::gbp()])
            .await
            .unwrap();

        assert_eq!(set.rates().len(), 2);
        assert_eq!(set.rate(&Currency::eur()), Some(0.85));
        assert_eq!(set.source(), RateSource::Api);
        assert_eq!(set.provider(), Some(&ProviderId::exchangerate_api()));
        assert_eq!(set.timestamp().timestamp(), 1704067201);
        assert_eq!(
            transport.urls.lock()[0],
            "https://v6.exchangerate-api.com/v6/test-key/latest/USD"
        );
    }

    #[tokio::test]
    async fn test_historical_path_and_timestamp() {
        let transport = Canned::new(200, LATEST);
        let provider = ExchangeRateApiProvider::new(&settings(), transport.clone()).unwrap();
        let date = NaiveDate::from_ymd_opt(2023, 6, 1).unwrap();

        let set = provider
            .get_historical_rates(&Currency::usd(), &[Currency::jpy()], date)
            .await
            .unwrap();

        assert_eq!(set.rate(&Currency::jpy()), Some(141.2));
        assert_eq!(set.timestamp().date_naive(), date);
        assert!(transport.urls.lock()[0].ends_with("/history/USD/2023/6/1"));
    }

    #[tokio::test]
    async fn test_business_error_counts_as_failure() {
        let transport = Canned::new(200, r#"{"result":"error","error-type":"quota-reached"}"#);
        let provider = ExchangeRateApiProvider::new(&settings(), transport).unwrap();

        let err = provider
            .get_rates(&Currency::usd(), &[Currency::eur()])
            .await
            .unwrap_err();

        assert!(err.to_string().contains("quota-reached"));
        let stats = provider.stats();
        assert_eq!(stats.request_count, 1);
        assert_eq!(stats.error_count, 1);
    }

    #[tokio::test]
    async fn test_no_requested_targets_is_failure() {
        let provider = ExchangeRateApiProvider::new(&settings(), Canned::new(200, LATEST)).unwrap();
        let result = provider.get_rates(&Currency::usd(), &[Currency::new("XAU")]).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_supported_codes() {
        let body = r#"{"result":"success","supported_codes":[["AED","UAE Dirham"],["USD","US Dollar"]]}"#;
        let provider = ExchangeRateApiProvider::new(&settings(), Canned::new(200, body)).unwrap();

        let codes = provider.supported_currencies().await.unwrap();
        assert_eq!(codes, vec![Currency::new("AED"), Currency::usd()]);
    }
}
