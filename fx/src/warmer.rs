//! Proactive cache population for a matrix of currency pairs.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

use splitfx_common::{Currency, ExchangeRateSet, ProviderId};

use crate::cache::{CacheStore, SetOptions};
use crate::error::FxResult;
use crate::failover::RateQuery;

/// One base currency and the targets to warm for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarmupPair {
    pub base: Currency,
    pub targets: Vec<Currency>,
}

/// What to warm.
#[derive(Debug, Clone, Default)]
pub struct WarmupPlan {
    pub pairs: Vec<WarmupPair>,
    /// Each pair is also warmed for every date listed here.
    pub historical_dates: Vec<NaiveDate>,
    /// Cache scope and preferred provider. `None` warms the shared scope.
    pub provider: Option<ProviderId>,
}

impl WarmupPlan {
    /// Every base against all other currencies in `currencies`.
    pub fn matrix(currencies: &[Currency], bases: &[Currency]) -> Self {
        let pairs = bases
            .iter()
            .map(|base| WarmupPair {
                base: base.clone(),
                targets: currencies.iter().filter(|c| *c != base).cloned().collect(),
            })
            .filter(|pair| !pair.targets.is_empty())
            .collect();

        Self {
            pairs,
            ..Self::default()
        }
    }

    pub fn with_historical_dates(mut self, dates: Vec<NaiveDate>) -> Self {
        self.historical_dates = dates;
        self
    }

    pub fn with_provider(mut self, provider: Option<ProviderId>) -> Self {
        self.provider = provider;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarmupCounts {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarmupFailure {
    pub key: String,
    pub message: String,
}

/// Result of one warm-up run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarmupSummary {
    pub current: WarmupCounts,
    pub historical: WarmupCounts,
    pub failures: Vec<WarmupFailure>,
}

/// Writes warm-up entries into a cache store.
pub struct CacheWarmer<'a> {
    cache: &'a CacheStore,
    ttl: Duration,
    options: SetOptions,
}

impl<'a> CacheWarmer<'a> {
    pub fn new(cache: &'a CacheStore, ttl: Duration, options: SetOptions) -> Self {
        Self {
            cache,
            ttl,
            options,
        }
    }

    /// Warm every entry in `plan`, fetching misses through `fetch`.
    /// Per-entry failures are collected, never returned as an error.
    pub async fn run<F, Fut>(&self, plan: &WarmupPlan, fetch: F) -> WarmupSummary
    where
        F: Fn(RateQuery) -> Fut,
        Fut: Future<Output = FxResult<ExchangeRateSet>>,
    {
        let scope = plan
            .provider
            .clone()
            .unwrap_or_else(ProviderId::default_scope);
        let mut summary = WarmupSummary::default();

        for pair in &plan.pairs {
            let query = RateQuery::Current {
                base: pair.base.clone(),
                targets: pair.targets.clone(),
            };
            let key = query.cache_key(&scope);
            let outcome = self.warm_one(key, query, &fetch, &mut summary.failures).await;
            tally(&mut summary.current, outcome);
        }

        for date in &plan.historical_dates {
            for pair in &plan.pairs {
                let query = RateQuery::Historical {
                    base: pair.base.clone(),
                    targets: pair.targets.clone(),
                    date: *date,
                };
                let key = query.cache_key(&scope);
                let outcome = self.warm_one(key, query, &fetch, &mut summary.failures).await;
                tally(&mut summary.historical, outcome);
            }
        }

        info!(
            current_ok = summary.current.succeeded,
            current_failed = summary.current.failed,
            current_skipped = summary.current.skipped,
            historical_ok = summary.historical.succeeded,
            historical_failed = summary.historical.failed,
            historical_skipped = summary.historical.skipped,
            "Cache warm-up finished"
        );
        summary
    }

    async fn warm_one<F, Fut>(
        &self,
        key: String,
        query: RateQuery,
        fetch: &F,
        failures: &mut Vec<WarmupFailure>,
    ) -> Outcome
    where
        F: Fn(RateQuery) -> Fut,
        Fut: Future<Output = FxResult<ExchangeRateSet>>,
    {
        if self.cache.get(&key).await.is_some() {
            debug!(key = %key, "Warm-up entry already cached");
            return Outcome::Skipped;
        }

        match fetch(query.clone()).await {
            Ok(set) => {
                self.cache.set(&key, &set, self.ttl, self.options).await;
                // Also make the entry reachable under the serving provider's key.
                if let Some(provider) = set.provider() {
                    let provider_key = query.cache_key(provider);
                    if provider_key != key {
                        self.cache.set(&provider_key, &set, self.ttl, self.options).await;
                    }
                }
                Outcome::Succeeded
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Warm-up fetch failed");
                failures.push(WarmupFailure {
                    key,
                    message: e.to_string(),
                });
                Outcome::Failed
            }
        }
    }
}

enum Outcome {
    Succeeded,
    Failed,
    Skipped,
}

fn tally(counts: &mut WarmupCounts, outcome: Outcome) {
    match outcome {
        Outcome::Succeeded => counts.succeeded += 1,
        Outcome::Failed => counts.failed += 1,
        Outcome::Skipped => counts.skipped += 1,
    }
}
