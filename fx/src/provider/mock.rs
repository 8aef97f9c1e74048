//! Scripted provider for tests.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use splitfx_common::{Currency, ExchangeRateSet, ProviderId, RateSource};

use super::{start_of_day, ProviderStats, RateProvider};
use crate::error::{FxError, FxResult};

/// Mock rate provider with per-base rates and an optional failure mode.
pub struct MockRateProvider {
    id: ProviderId,
    rates: DashMap<Currency, BTreeMap<Currency, f64>>,
    currencies: Mutex<Vec<Currency>>,
    failure: Mutex<Option<String>>,
    calls: AtomicU64,
    errors: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl MockRateProvider {
    pub fn new(id: ProviderId) -> Self {
        Self {
            id,
            rates: DashMap::new(),
            currencies: Mutex::new(Vec::new()),
            failure: Mutex::new(None),
            calls: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            last_error: Mutex::new(None),
        }
    }

    /// Set the rate quoted for `base -> target`.
    pub fn set_rate(&self, base: Currency, target: Currency, rate: f64) {
        self.rates.entry(base).or_default().insert(target, rate);
    }

    pub fn set_supported(&self, currencies: Vec<Currency>) {
        *self.currencies.lock() = currencies;
    }

    /// Make every subsequent call fail with `message`.
    pub fn fail_with(&self, message: impl Into<String>) {
        *self.failure.lock() = Some(message.into());
    }

    pub fn recover(&self) {
        *self.failure.lock() = None;
    }

    /// Number of upstream calls made so far.
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    fn begin(&self) -> FxResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failure = self.failure.lock().clone();
        match failure {
            Some(message) => Err(self.fail(message)),
            None => Ok(()),
        }
    }

    fn fail(&self, message: String) -> FxError {
        self.errors.fetch_add(1, Ordering::SeqCst);
        *self.last_error.lock() = Some(message.clone());
        FxError::provider_call(&self.id, message)
    }

    fn lookup(&self, base: &Currency, targets: &[Currency]) -> FxResult<BTreeMap<Currency, f64>> {
        let quoted = self.rates.get(base).map(|r| r.clone()).unwrap_or_default();
        let rates: BTreeMap<Currency, f64> = targets
            .iter()
            .filter_map(|t| {
                if t == base {
                    Some((t.clone(), 1.0))
                } else {
                    quoted.get(t).map(|r| (t.clone(), *r))
                }
            })
            .collect();

        if rates.is_empty() {
            return Err(self.fail(format!("no rates for {base}")));
        }
        Ok(rates)
    }
}

#[async_trait]
impl RateProvider for MockRateProvider {
    fn id(&self) -> &ProviderId {
        &self.id
    }

    async fn get_rates(&self, base: &Currency, targets: &[Currency]) -> FxResult<ExchangeRateSet> {
        self.begin()?;
        let rates = self.lookup(base, targets)?;
        Ok(ExchangeRateSet::new(
            base.clone(),
            rates,
            Utc::now(),
            RateSource::Api,
            Some(self.id.clone()),
        ))
    }

    async fn get_historical_rates(
        &self,
        base: &Currency,
        targets: &[Currency],
        date: NaiveDate,
    ) -> FxResult<ExchangeRateSet> {
        self.begin()?;
        let rates = self.lookup(base, targets)?;
        Ok(ExchangeRateSet::new(
            base.clone(),
            rates,
            start_of_day(date),
            RateSource::Api,
            Some(self.id.clone()),
        ))
    }

    async fn supported_currencies(&self) -> FxResult<Vec<Currency>> {
        self.begin()?;
        Ok(self.currencies.lock().clone())
    }

    fn stats(&self) -> ProviderStats {
        ProviderStats {
            provider: self.id.clone(),
            request_count: self.calls.load(Ordering::SeqCst),
            error_count: self.errors.load(Ordering::SeqCst),
            last_error: self.last_error.lock().clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_provider() {
        let provider = MockRateProvider::new(ProviderId::exchangerate_api());
        provider.set_rate(Currency::usd(), Currency::eur(), 0.85);

        let set = provider.get_rates(&Currency::usd(), &[Currency::eur()]).await.unwrap();
        assert_eq!(set.rate(&Currency::eur()), Some(0.85));
        assert_eq!(provider.call_count(), 1);

        provider.fail_with("boom");
        assert!(provider.get_rates(&Currency::usd(), &[Currency::eur()]).await.is_err());
        assert_eq!(provider.stats().error_count, 1);

        provider.recover();
        assert!(provider.get_rates(&Currency::usd(), &[Currency::eur()]).await.is_ok());
    }
}
