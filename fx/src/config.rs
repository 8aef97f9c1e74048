//! Forex service configuration.

use std::fmt;
use std::time::Duration;
use tracing::warn;

use splitfx_common::constants;
use splitfx_common::{validate_currency_code, Currency, DurationExt, ProviderId};

use crate::limiter::MIN_REFILL_PER_SECOND;

/// Connection and throttling settings for one upstream provider.
#[derive(Clone)]
pub struct ProviderSettings {
    /// API key or app id. `None` leaves the provider unregistered.
    pub credential: Option<String>,
    /// Base URL of the upstream API, without trailing slash.
    pub base_url: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Token bucket capacity.
    pub rate_limit_capacity: u32,
    /// Token bucket refill rate.
    pub rate_limit_per_second: f64,
}

impl ProviderSettings {
    fn with_base_url(base_url: &str, rate_limit_capacity: u32, rate_limit_per_second: f64) -> Self {
        Self {
            credential: None,
            base_url: base_url.to_string(),
            timeout: constants::provider_request_timeout().as_std(),
            rate_limit_capacity,
            rate_limit_per_second,
        }
    }

    pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
        self.credential = Some(credential.into());
        self
    }
}

impl fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("credential", &self.credential.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("rate_limit_capacity", &self.rate_limit_capacity)
            .field("rate_limit_per_second", &self.rate_limit_per_second)
            .finish()
    }
}

/// Two-tier cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Redis URL. `None` runs the cache in local-only mode.
    pub redis_url: Option<String>,
    /// TTL for current rates.
    pub current_ttl: Duration,
    /// TTL for historical rates.
    pub historical_ttl: Duration,
    /// TTL for entries written by warm-up.
    pub warmup_ttl: Duration,
    /// Compress large durable entries.
    pub compression: bool,
    /// Serialized size above which compression applies, in bytes.
    pub compression_threshold: usize,
    /// Maximum entries held by the in-process tier.
    pub local_max_entries: usize,
    /// Timeout for each durable tier operation.
    pub operation_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            current_ttl: constants::current_rates_ttl().as_std(),
            historical_ttl: constants::historical_rates_ttl().as_std(),
            warmup_ttl: constants::warmup_ttl().as_std(),
            compression: true,
            compression_threshold: 1024,
            local_max_entries: 10_000,
            operation_timeout: constants::cache_operation_timeout().as_std(),
        }
    }
}

/// Currency matrix pre-populated by warm-up.
#[derive(Debug, Clone)]
pub struct WarmupConfig {
    pub currencies: Vec<Currency>,
    pub base_currencies: Vec<Currency>,
}

impl Default for WarmupConfig {
    fn default() -> Self {
        Self {
            currencies: ["USD", "EUR", "GBP", "JPY", "CAD", "AUD", "CHF", "INR"]
                .into_iter()
                .map(Currency::new)
                .collect(),
            base_currencies: vec![Currency::usd(), Currency::eur(), Currency::gbp()],
        }
    }
}

/// Main forex service configuration.
#[derive(Debug, Clone)]
pub struct ForexConfig {
    /// Provider visit order before health biasing.
    pub provider_priority: Vec<ProviderId>,
    pub exchangerate_api: ProviderSettings,
    pub fixer: ProviderSettings,
    pub open_exchange_rates: ProviderSettings,
    pub cache: CacheConfig,
    /// How long a provider stays healthy after its last success.
    pub health_window: Duration,
    pub warmup: WarmupConfig,
}

impl Default for ForexConfig {
    fn default() -> Self {
        Self {
            provider_priority: vec![
                ProviderId::exchangerate_api(),
                ProviderId::fixer(),
                ProviderId::open_exchange_rates(),
            ],
            exchangerate_api: ProviderSettings::with_base_url(
                "https://v6.exchangerate-api.com/v6",
                10,
                1.0,
            ),
            fixer: ProviderSettings::with_base_url("https://data.fixer.io/api", 5, 0.5),
            open_exchange_rates: ProviderSettings::with_base_url(
                "https://openexchangerates.org/api",
                5,
                0.5,
            ),
            cache: CacheConfig::default(),
            health_window: constants::provider_health_window().as_std(),
            warmup: WarmupConfig::default(),
        }
    }
}

impl ForexConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(priority) = var("FOREX_PROVIDER_PRIORITY") {
            config.provider_priority = ProviderId::parse_list(&priority);
        }

        load_provider(&var, "EXCHANGERATE_API", "EXCHANGERATE_API_KEY", &mut config.exchangerate_api);
        load_provider(&var, "FIXER", "FIXER_API_KEY", &mut config.fixer);
        load_provider(
            &var,
            "OPENEXCHANGERATES",
            "OPENEXCHANGERATES_APP_ID",
            &mut config.open_exchange_rates,
        );

        if let Some(url) = var("REDIS_URL") {
            config.cache.redis_url = Some(url);
        }
        if let Some(secs) = parse_var::<u64>(&var, "FOREX_CACHE_TTL_SECONDS") {
            config.cache.current_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64>(&var, "FOREX_HISTORICAL_CACHE_TTL_SECONDS") {
            config.cache.historical_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64>(&var, "FOREX_WARMUP_TTL_SECONDS") {
            config.cache.warmup_ttl = Duration::from_secs(secs);
        }
        if let Some(enabled) = parse_var::<bool>(&var, "FOREX_CACHE_COMPRESSION") {
            config.cache.compression = enabled;
        }
        if let Some(bytes) = parse_var::<usize>(&var, "FOREX_COMPRESSION_THRESHOLD") {
            config.cache.compression_threshold = bytes;
        }
        if let Some(secs) = parse_var::<u64>(&var, "FOREX_HEALTH_WINDOW_SECONDS") {
            config.health_window = Duration::from_secs(secs);
        }
        if let Some(list) = var("FOREX_WARMUP_CURRENCIES") {
            config.warmup.currencies = parse_currencies(&list);
        }
        if let Some(list) = var("FOREX_WARMUP_BASES") {
            config.warmup.base_currencies = parse_currencies(&list);
        }

        config
    }

    /// Settings for a known provider id.
    pub fn provider(&self, id: &ProviderId) -> Option<&ProviderSettings> {
        match id.as_str() {
            ProviderId::EXCHANGERATE_API => Some(&self.exchangerate_api),
            ProviderId::FIXER => Some(&self.fixer),
            ProviderId::OPEN_EXCHANGE_RATES => Some(&self.open_exchange_rates),
            _ => None,
        }
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.provider_priority.is_empty() {
            return Err("Provider priority cannot be empty".to_string());
        }

        for id in &self.provider_priority {
            let settings = self
                .provider(id)
                .ok_or_else(|| format!("Unknown provider in priority list: {id}"))?;

            if settings.base_url.is_empty() {
                return Err(format!("Base URL for {id} cannot be empty"));
            }
            if settings.timeout.is_zero() {
                return Err(format!("Timeout for {id} must be positive"));
            }
            if settings.rate_limit_capacity == 0 {
                return Err(format!("Rate limit capacity for {id} must be positive"));
            }
            if !(settings.rate_limit_per_second >= MIN_REFILL_PER_SECOND) {
                return Err(format!(
                    "Rate limit refill for {id} must be at least {MIN_REFILL_PER_SECOND} per second"
                ));
            }
        }

        if self.cache.current_ttl.is_zero()
            || self.cache.historical_ttl.is_zero()
            || self.cache.warmup_ttl.is_zero()
        {
            return Err("Cache TTLs must be positive".to_string());
        }

        if self.cache.compression_threshold == 0 {
            return Err("Compression threshold must be positive".to_string());
        }

        if self.health_window.is_zero() {
            return Err("Health window must be positive".to_string());
        }

        for currency in self.warmup.currencies.iter().chain(&self.warmup.base_currencies) {
            validate_currency_code(currency.code())
                .map_err(|e| format!("Invalid warm-up currency: {e}"))?;
        }

        Ok(())
    }
}

fn load_provider<F>(var: &F, prefix: &str, credential_var: &str, settings: &mut ProviderSettings)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(credential) = var(credential_var) {
        settings.credential = Some(credential.trim().to_string());
    }
    if let Some(url) = var(&format!("{prefix}_BASE_URL")) {
        settings.base_url = url.trim_end_matches('/').to_string();
    }
    if let Some(ms) = parse_var::<u64>(var, &format!("{prefix}_TIMEOUT_MS")) {
        settings.timeout = Duration::from_millis(ms);
    }
    if let Some(capacity) = parse_var::<u32>(var, &format!("{prefix}_RATE_LIMIT_CAPACITY")) {
        settings.rate_limit_capacity = capacity;
    }
    if let Some(rate) = parse_var::<f64>(var, &format!("{prefix}_RATE_LIMIT_PER_SECOND")) {
        settings.rate_limit_per_second = rate;
    }
}

fn parse_var<T: std::str::FromStr>(var: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    let raw = var(name)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(variable = name, value = %raw, "Ignoring unparsable configuration value");
            None
        }
    }
}

fn parse_currencies(list: &str) -> Vec<Currency> {
    list.split(',')
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .map(Currency::new)
        .collect()
}
