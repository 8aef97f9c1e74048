//! Open Exchange Rates adapter. Quotes against USD, other bases are
//! derived by re-basing.

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

/// Error fields the API may put in any body, even with a 2xx status.
#[derive(Debug, Deserialize)]
struct UpstreamStatus {
    #[serde(default)]
    error: bool,
    message: Option<String>,
    description: Option<String>,
}

impl UpstreamStatus {
    fn into_error(self, id: &ProviderId) -> Option<FxError> {
        if !self.error {
            return None;
        }
        let message = self
            .description
            .or(self.message)
            .unwrap_or_else(|| "unknown error".to_string());
        Some(FxError::provider_call(id, format!("upstream error: {message}")))
    }
}

#[derive(Debug, Deserialize)]
struct RatesResponse {
    #[serde(flatten)]
    status: UpstreamStatus,
    timestamp: Option<i64>,
    base: Option<String>,
    rates: Option<BTreeMap<String, f64>>,
}

/// `currencies.json` is a bare code-to-name map unless it failed.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CurrenciesResponse {
    Names(BTreeMap<String, String>),
    Failed(UpstreamStatus),
}

/// Client for `openexchangerates.org`.
pub struct OpenExchangeRatesProvider {
    client: ProviderClient,
    base_url: String,
    app_id: String,
}

impl OpenExchangeRatesProvider {
    pub fn native_base() -> Currency {
        Currency::usd()
    }

    pub fn new(settings: &ProviderSettings, transport: Arc<dyn HttpTransport>) -> FxResult<Self> {
        let id = ProviderId::open_exchange_rates();
        let app_id = validate_credential(&id, settings.credential.as_deref())?;
        let limiter = RateLimiter::new(settings.rate_limit_capacity, settings.rate_limit_per_second)?;

        Ok(Self {
            client: ProviderClient::new(id, limiter, transport, settings.timeout),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            app_id,
        })
    }

    fn request(&self, path: &str) -> HttpRequest {
        HttpRequest::get(format!("{}/{}", self.base_url, path)).with_query("app_id", &self.app_id)
    }

    async fn fetch_rates(
        &self,
        path: &str,
        base: &Currency,
        targets: &[Currency],
        date: Option<NaiveDate>,
    ) -> FxResult<ExchangeRateSet> {
        let symbols = symbols_for(base, targets);
        let request = self.request(path).with_query("symbols", symbols_param(&symbols));
        let response: RatesResponse = self.client.get_json(request).await?;

        if let Some(err) = response.status.into_error(self.client.id()) {
            return Err(self.client.record_failure(err));
        }

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
impl RateProvider for OpenExchangeRatesProvider {
    fn id(&self) -> &ProviderId {
        self.client.id()
    }

    #[instrument(skip(self, targets), fields(provider = %self.id(), base = %base))]
    async fn get_rates(&self, base: &Currency, targets: &[Currency]) -> FxResult<ExchangeRateSet> {
        self.fetch_rates("latest.json", base, targets, None).await
    }

    #[instrument(skip(self, targets), fields(provider = %self.id(), base = %base, date = %date))]
    async fn get_historical_rates(
        &self,
        base: &Currency,
        targets: &[Currency],
        date: NaiveDate,
    ) -> FxResult<ExchangeRateSet> {
        let path = format!("historical/{}.json", date.format("%Y-%m-%d"));
        self.fetch_rates(&path, base, targets, Some(date)).await
    }

    async fn supported_currencies(&self) -> FxResult<Vec<Currency>> {
        let response: CurrenciesResponse = self.client.get_json(self.request("currencies.json")).await?;
        match response {
            CurrenciesResponse::Names(names) => Ok(names.keys().map(Currency::new).collect()),
            CurrenciesResponse::Failed(status) => {
                let err = status.into_error(self.client.id()).unwrap_or_else(|| {
                    FxError::provider_call(self.client.id(), "unexpected currencies body")
                });
                Err(self.client.record_failure(err))
            }
        }
    }

    fn stats(&self) -> ProviderStats {
        self.client.stats()
    }
}
