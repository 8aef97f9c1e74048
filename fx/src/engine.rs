//! Forex service: validation, cache lookup, provider failover and write-back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use splitfx_common::{
    calculate_conversion, is_within, validate_amount, validate_currency_code,
    validate_currency_list, validate_date, Currency, ExchangeRateSet, Money, ProviderId,
    RateSource,
};

use crate::cache::{
    CacheHealth, CacheStore, DurableTier, InvalidateCounts, InvalidateMode, RedisTier, SetOptions,
};
use crate::config::ForexConfig;
use crate::conversion::{Conversion, ConversionOptions};
use crate::error::{FxError, FxResult};
use crate::failover::{OrchestratorContext, RateQuery};
use crate::health::HealthTracker;
use crate::provider::{
    ExchangeRateApiProvider, FixerProvider, HttpTransport, OpenExchangeRatesProvider,
    ProviderHealthReport, ProviderStats, RateProvider, ReqwestTransport,
};
use crate::warmer::{CacheWarmer, WarmupPlan, WarmupSummary};

/// Options for [`ForexService::get_exchange_rates`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateOptions {
    /// Serve from cache when possible.
    pub use_cache: bool,
    /// Provider to try first, and whose cache scope to check first.
    pub provider: Option<ProviderId>,
    /// Cached entries older than this are ignored.
    pub max_age: Option<chrono::Duration>,
}

impl Default for RateOptions {
    fn default() -> Self {
        Self {
            use_cache: true,
            provider: None,
            max_age: None,
        }
    }
}

/// Options for [`ForexService::get_historical_rates`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoricalOptions {
    pub provider: Option<ProviderId>,
}

/// Options for [`ForexService::warm_cache`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WarmupOptions {
    /// Base currency codes. Empty uses the configured bases.
    pub base_currencies: Vec<String>,
    /// `YYYY-MM-DD` dates to warm in addition to current rates.
    pub historical_dates: Vec<String>,
    pub provider: Option<ProviderId>,
}

/// Health and counters of one registered provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStatus {
    pub provider: ProviderId,
    pub healthy: bool,
    pub last_success_at: Option<DateTime<Utc>>,
    pub stats: ProviderStats,
}

/// Service health snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceHealth {
    pub providers: Vec<ProviderStatus>,
    pub cache: CacheHealth,
}

/// The forex service.
pub struct ForexService {
    orchestrator: OrchestratorContext,
    cache: CacheStore,
    config: ForexConfig,
}

impl ForexService {
    /// Assemble a service from already-built parts.
    pub fn new(orchestrator: OrchestratorContext, cache: CacheStore, config: ForexConfig) -> Self {
        Self {
            orchestrator,
            cache,
            config,
        }
    }

    /// Build providers and cache tiers from configuration.
    ///
    /// Providers without a credential are left unregistered. An unreachable
    /// Redis leaves the service running on the local tier only.
    pub async fn from_config(config: ForexConfig) -> FxResult<Self> {
        config.validate().map_err(FxError::Configuration)?;

        let transport: Arc<dyn HttpTransport> = Arc::new(ReqwestTransport::new());
        let health = Arc::new(HealthTracker::new(config.health_window));
        let mut orchestrator = OrchestratorContext::new(config.provider_priority.clone(), health);

        for id in &config.provider_priority {
            let Some(settings) = config.provider(id) else {
                continue;
            };
            if settings.credential.is_none() {
                warn!(provider = %id, "No credential configured, provider disabled");
                continue;
            }

            let provider: Arc<dyn RateProvider> = match id.as_str() {
                ProviderId::EXCHANGERATE_API => {
                    Arc::new(ExchangeRateApiProvider::new(settings, transport.clone())?)
                }
                ProviderId::FIXER => Arc::new(FixerProvider::new(settings, transport.clone())?),
                ProviderId::OPEN_EXCHANGE_RATES => {
                    Arc::new(OpenExchangeRatesProvider::new(settings, transport.clone())?)
                }
                _ => continue,
            };
            info!(provider = %id, "Registered rate provider");
            orchestrator.register(provider);
        }

        if orchestrator.providers().is_empty() {
            warn!("No rate providers configured, only cached rates can be served");
        }

        let durable: Option<Arc<dyn DurableTier>> = match &config.cache.redis_url {
            Some(url) => match RedisTier::connect(url, config.cache.operation_timeout).await {
                Ok(tier) => Some(Arc::new(tier)),
                Err(e) => {
                    warn!(error = %e, "Redis unavailable, running with local cache only");
                    None
                }
            },
            None => {
                info!("No Redis URL configured, running with local cache only");
                None
            }
        };
        let cache = CacheStore::new(durable, &config.cache);

        Ok(Self::new(orchestrator, cache, config))
    }

    pub fn config(&self) -> &ForexConfig {
        &self.config
    }

    pub fn orchestrator(&self) -> &OrchestratorContext {
        &self.orchestrator
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Latest rates for `base` against `targets`.
    #[instrument(skip(self, targets, options), fields(base = %base))]
    pub async fn get_exchange_rates<S: AsRef<str>>(
        &self,
        base: &str,
        targets: &[S],
        options: RateOptions,
    ) -> FxResult<ExchangeRateSet> {
        let query = RateQuery::Current {
            base: validate_currency_code(base)?,
            targets: validate_currency_list(targets)?,
        };
        let preferred = options.provider.as_ref();

        if options.use_cache {
            if let Some(hit) = self.lookup(&query, preferred, options.max_age).await {
                return Ok(hit);
            }
        }

        let set = self.orchestrator.fetch_rates(&query, preferred).await?;
        self.write_back(&query, &set, self.config.cache.current_ttl).await;
        Ok(set)
    }

    /// Rates for `base` against `targets` as of `date` (`YYYY-MM-DD`).
    #[instrument(skip(self, targets, options), fields(base = %base, date = %date))]
    pub async fn get_historical_rates<S: AsRef<str>>(
        &self,
        base: &str,
        targets: &[S],
        date: &str,
        options: HistoricalOptions,
    ) -> FxResult<ExchangeRateSet> {
        let query = RateQuery::Historical {
            base: validate_currency_code(base)?,
            targets: validate_currency_list(targets)?,
            date: validate_date(date)?,
        };
        let preferred = options.provider.as_ref();

        if let Some(hit) = self.lookup(&query, preferred, None).await {
            return Ok(hit);
        }

        let set = self.orchestrator.fetch_rates(&query, preferred).await?;
        self.write_back(&query, &set, self.config.cache.historical_ttl).await;
        Ok(set)
    }

    /// Pre-populate the cache for every base against `currencies`.
    ///
    /// Empty `currencies` uses the configured warm-up matrix. Fetch failures
    /// are reported in the summary; only invalid input is an error.
    #[instrument(skip_all, fields(provider = ?options.provider))]
    pub async fn warm_cache<S: AsRef<str>>(
        &self,
        currencies: &[S],
        options: WarmupOptions,
    ) -> FxResult<WarmupSummary> {
        let currencies = if currencies.is_empty() {
            revalidate(&self.config.warmup.currencies)?
        } else {
            validate_currency_list(currencies)?
        };
        let bases = if options.base_currencies.is_empty() {
            revalidate(&self.config.warmup.base_currencies)?
        } else {
            validate_currency_list(&options.base_currencies)?
        };
        let dates = options
            .historical_dates
            .iter()
            .map(|d| validate_date(d))
            .collect::<Result<Vec<_>, _>>()?;

        let plan = WarmupPlan::matrix(&currencies, &bases)
            .with_historical_dates(dates)
            .with_provider(options.provider.clone());
        let warmer = CacheWarmer::new(&self.cache, self.config.cache.warmup_ttl, self.set_options());
        let preferred = options.provider.as_ref();

        let summary = warmer
            .run(&plan, move |query: RateQuery| async move {
                self.orchestrator.fetch_rates(&query, preferred).await
            })
            .await;
        Ok(summary)
    }

    /// Provider health and counters plus cache tier status.
    pub async fn get_health_status(&self) -> ServiceHealth {
        let health = self.orchestrator.health();
        let records = health.snapshot();

        let providers = self
            .orchestrator
            .providers()
            .iter()
            .map(|provider| {
                let id = provider.id();
                ProviderStatus {
                    provider: id.clone(),
                    healthy: health.is_healthy(id),
                    last_success_at: records
                        .iter()
                        .find(|r| &r.provider == id)
                        .and_then(|r| r.last_success_at),
                    stats: provider.stats(),
                }
            })
            .collect();

        ServiceHealth {
            providers,
            cache: self.cache.health_status().await,
        }
    }

    /// Convert `amount` of `from` into `to`.
    #[instrument(skip(self, options), fields(amount = %amount, from = %from, to = %to))]
    pub async fn convert(
        &self,
        amount: &str,
        from: &str,
        to: &str,
        options: ConversionOptions,
    ) -> FxResult<Conversion> {
        let from = validate_currency_code(from)?;
        let to = validate_currency_code(to)?;
        let input = Money::new(validate_amount(amount, &from)?, from.clone());

        if from == to {
            return Ok(Conversion::direct(input));
        }

        let rate_options = RateOptions {
            use_cache: options.use_cache,
            provider: options.provider,
            max_age: None,
        };
        let set = self
            .get_exchange_rates(from.code(), &[to.code()], rate_options)
            .await?;
        let quoted_by = || set.provider().cloned().unwrap_or_else(ProviderId::default_scope);

        let rate = set
            .rate(&to)
            .ok_or_else(|| FxError::provider_call(&quoted_by(), format!("no {to} rate for {from}")))?;
        let value = calculate_conversion(input.value, rate, to.decimal_places())
            .ok_or_else(|| FxError::provider_call(&quoted_by(), format!("unusable {from}/{to} rate {rate}")))?;

        let conversion = Conversion::new(
            input,
            Money::new(value, to),
            rate,
            set.source(),
            set.provider().cloned(),
        );

        info!(
            conversion_id = %conversion.id,
            effective_rate = %conversion.effective_rate(),
            source = %conversion.rate_source,
            "Conversion completed"
        );
        Ok(conversion)
    }

    /// Currencies quoted by the first provider that answers.
    pub async fn supported_currencies(&self, provider: Option<&ProviderId>) -> FxResult<Vec<Currency>> {
        let success = self.orchestrator.supported_currencies(provider).await?;
        Ok(success.data)
    }

    /// Live probe of every registered provider, in priority order.
    pub async fn check_providers(&self) -> Vec<ProviderHealthReport> {
        let mut reports = Vec::new();
        for provider in self.orchestrator.providers() {
            let report = provider.health_check().await;
            if report.healthy {
                self.orchestrator.health().mark_success(provider.id());
            } else {
                warn!(
                    provider = %report.provider,
                    error = report.error.as_deref().unwrap_or_default(),
                    "Provider health check failed"
                );
                self.orchestrator.health().mark_failure(provider.id());
            }
            reports.push(report);
        }
        reports
    }

    /// Remove cached entries by exact key or `*` glob.
    pub async fn invalidate_cache(&self, key_or_pattern: &str, mode: InvalidateMode) -> InvalidateCounts {
        self.cache.invalidate(key_or_pattern, mode).await
    }

    /// Release the durable cache connection.
    pub async fn shutdown(&self) {
        self.cache.shutdown().await;
        info!("Forex service shut down");
    }

    fn set_options(&self) -> SetOptions {
        SetOptions {
            compress: self.config.cache.compression,
        }
    }

    /// Provider-scoped key first (when a provider is preferred), then the shared scope.
    async fn lookup(
        &self,
        query: &RateQuery,
        preferred: Option<&ProviderId>,
        max_age: Option<chrono::Duration>,
    ) -> Option<ExchangeRateSet> {
        let mut keys = Vec::with_capacity(2);
        if let Some(provider) = preferred {
            keys.push(query.cache_key(provider));
        }
        keys.push(query.cache_key(&ProviderId::default_scope()));

        for key in keys {
            let Some(entry) = self.cache.get(&key).await else {
                continue;
            };
            if let Some(max_age) = max_age {
                let written = entry.cached_at.unwrap_or_else(|| entry.payload.timestamp());
                if !is_within(written, max_age) {
                    debug!(key = %key, "Cached rates older than max age");
                    continue;
                }
            }
            return Some(entry.payload.with_source(RateSource::Cache));
        }
        None
    }

    /// Cache fetched rates under the shared and the serving provider's keys.
    /// Failures are logged and never fail the request.
    async fn write_back(&self, query: &RateQuery, set: &ExchangeRateSet, ttl: Duration) {
        let mut keys = vec![query.cache_key(&ProviderId::default_scope())];
        if let Some(provider) = set.provider() {
            keys.push(query.cache_key(provider));
        }

        for key in keys {
            let outcome = self.cache.set(&key, set, ttl, self.set_options()).await;
            if !outcome.succeeded() {
                warn!(key = %key, "Failed to cache fetched rates");
            }
        }
    }
}

/// Configured currencies pass the same checks as caller input.
fn revalidate(currencies: &[Currency]) -> FxResult<Vec<Currency>> {
    let codes: Vec<&str> = currencies.iter().map(Currency::code).collect();
    Ok(validate_currency_list(&codes)?)
}
