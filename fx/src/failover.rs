//! Health-biased provider failover.

use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, warn};

use splitfx_common::{Currency, ExchangeRateSet, ProviderId, RateSource};

use crate::cache::{historical_key, rates_key};
use crate::error::{FxError, FxResult};
use crate::health::HealthTracker;
use crate::provider::RateProvider;

/// Boxed future returned by a routed capability call.
pub type InvokeFuture<'a, T> = Pin<Box<dyn Future<Output = FxResult<T>> + Send + 'a>>;

/// Which rates to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateQuery {
    Current {
        base: Currency,
        targets: Vec<Currency>,
    },
    Historical {
        base: Currency,
        targets: Vec<Currency>,
        date: NaiveDate,
    },
}

impl RateQuery {
    pub fn base(&self) -> &Currency {
        match self {
            RateQuery::Current { base, .. } | RateQuery::Historical { base, .. } => base,
        }
    }

    pub fn targets(&self) -> &[Currency] {
        match self {
            RateQuery::Current { targets, .. } | RateQuery::Historical { targets, .. } => targets,
        }
    }

    pub fn date(&self) -> Option<NaiveDate> {
        match self {
            RateQuery::Current { .. } => None,
            RateQuery::Historical { date, .. } => Some(*date),
        }
    }

    /// Cache key for this query under `provider`'s scope.
    pub fn cache_key(&self, provider: &ProviderId) -> String {
        match self {
            RateQuery::Current { base, targets } => rates_key(provider, base, targets),
            RateQuery::Historical {
                base,
                targets,
                date,
            } => historical_key(provider, base, targets, *date),
        }
    }
}

/// Successful routed call.
#[derive(Debug, Clone)]
pub struct RouteSuccess<T> {
    pub data: T,
    pub provider: ProviderId,
    /// Providers visited, in order, including the one that succeeded.
    pub attempted: Vec<ProviderId>,
}

/// Provider registry, health tracker and priority order for one service.
pub struct OrchestratorContext {
    registry: HashMap<ProviderId, Arc<dyn RateProvider>>,
    health: Arc<HealthTracker>,
    priority: Vec<ProviderId>,
}

impl OrchestratorContext {
    pub fn new(priority: Vec<ProviderId>, health: Arc<HealthTracker>) -> Self {
        Self {
            registry: HashMap::new(),
            health,
            priority: dedupe(&priority),
        }
    }

    /// Register a provider client under its own id.
    pub fn with_provider(mut self, provider: Arc<dyn RateProvider>) -> Self {
        self.register(provider);
        self
    }

    pub fn register(&mut self, provider: Arc<dyn RateProvider>) {
        self.registry.insert(provider.id().clone(), provider);
    }

    pub fn provider(&self, id: &ProviderId) -> Option<&Arc<dyn RateProvider>> {
        self.registry.get(id)
    }

    /// Registered providers in priority order, unlisted ones last by id.
    pub fn providers(&self) -> Vec<Arc<dyn RateProvider>> {
        let mut ids: Vec<&ProviderId> = self.registry.keys().collect();
        ids.sort_by_key(|id| {
            (
                self.priority.iter().position(|p| p == *id).unwrap_or(usize::MAX),
                (*id).clone(),
            )
        });
        ids.into_iter()
            .filter_map(|id| self.registry.get(id).cloned())
            .collect()
    }

    pub fn health(&self) -> &Arc<HealthTracker> {
        &self.health
    }

    pub fn priority(&self) -> &[ProviderId] {
        &self.priority
    }

    /// Visit order: `preferred` first, then the remaining priority list with
    /// healthy providers ahead of unhealthy ones (stable within each group).
    pub fn visit_order(&self, preferred: Option<&ProviderId>) -> Vec<ProviderId> {
        let mut order = Vec::with_capacity(self.priority.len() + 1);
        if let Some(preferred) = preferred {
            order.push(preferred.clone());
        }

        let mut rest: Vec<ProviderId> = self
            .priority
            .iter()
            .filter(|id| Some(*id) != preferred)
            .cloned()
            .collect();
        rest.sort_by_key(|id| !self.health.is_healthy(id));

        order.extend(rest);
        order
    }

    /// Try each provider in visit order until `invoke` succeeds.
    pub async fn route<'a, T, F>(
        &'a self,
        preferred: Option<&ProviderId>,
        mut invoke: F,
    ) -> FxResult<RouteSuccess<T>>
    where
        T: Send,
        F: FnMut(&'a dyn RateProvider) -> InvokeFuture<'a, T> + Send,
    {
        let order = self.visit_order(preferred);
        let mut attempted = Vec::with_capacity(order.len());
        let mut last_error: Option<FxError> = None;

        for id in order {
            attempted.push(id.clone());

            let Some(provider) = self.registry.get(&id) else {
                debug!(provider = %id, "Skipping unregistered provider");
                // A real upstream failure outranks a missing client.
                if last_error.is_none() {
                    last_error = Some(FxError::ProviderNotConfigured(id));
                }
                continue;
            };

            match invoke(provider.as_ref()).await {
                Ok(data) => {
                    self.health.mark_success(&id);
                    if attempted.len() > 1 {
                        debug!(
                            provider = %id,
                            failed_attempts = attempted.len() - 1,
                            "Failover succeeded"
                        );
                    }
                    return Ok(RouteSuccess {
                        data,
                        provider: id,
                        attempted,
                    });
                }
                Err(e) => {
                    warn!(provider = %id, error = %e, "Provider attempt failed");
                    self.health.mark_failure(&id);
                    last_error = Some(e);
                }
            }
        }

        Err(FxError::AllProvidersFailed {
            attempted,
            last_error: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no providers configured".to_string()),
        })
    }

    /// Fetch rates with failover, tagged `source=api` and the serving provider.
    pub async fn fetch_rates(
        &self,
        query: &RateQuery,
        preferred: Option<&ProviderId>,
    ) -> FxResult<ExchangeRateSet> {
        let success = match query {
            RateQuery::Current { base, targets } => {
                self.route(preferred, |p| p.get_rates(base, targets)).await?
            }
            RateQuery::Historical {
                base,
                targets,
                date,
            } => {
                let date = *date;
                self.route(preferred, move |p| p.get_historical_rates(base, targets, date))
                    .await?
            }
        };

        Ok(success
            .data
            .with_source(RateSource::Api)
            .with_provider(success.provider))
    }

    /// Supported currencies from the first provider that answers.
    pub async fn supported_currencies(
        &self,
        preferred: Option<&ProviderId>,
    ) -> FxResult<RouteSuccess<Vec<Currency>>> {
        self.route(preferred, |p| p.supported_currencies()).await
    }
}

fn dedupe(chain: &[ProviderId]) -> Vec<ProviderId> {
    let mut seen = HashSet::new();
    chain
        .iter()
        .filter(|id| seen.insert((*id).clone()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::provider::MockRateProvider;
    use std::time::Duration;

    fn ids() -> (ProviderId, ProviderId, ProviderId) {
        (ProviderId::new("a"), ProviderId::new("b"), ProviderId::new("c"))
    }

    fn mock(id: &ProviderId, eur: f64) -> Arc<MockRateProvider> {
        let provider = Arc::new(MockRateProvider::new(id.clone()));
        provider.set_rate(Currency::usd(), Currency::eur(), eur);
        provider
    }

    fn current() -> RateQuery {
        RateQuery::Current {
            base: Currency::usd(),
            targets: vec![Currency::eur()],
        }
    }

    #[test]
    fn test_visit_order_preferred_then_healthy() {
        let (a, b, c) = ids();
        let health = Arc::new(HealthTracker::new(Duration::from_secs(300)));
        health.mark_success(&b);
        let ctx = OrchestratorContext::new(vec![a.clone(), b.clone(), c.clone()], health);

        assert_eq!(ctx.visit_order(Some(&c)), vec![c.clone(), b.clone(), a.clone()]);
        assert_eq!(ctx.visit_order(None), vec![b, a, c]);
    }

    #[test]
    fn test_visit_order_inserts_unlisted_preferred_and_dedupes() {
        let (a, b, c) = ids();
        let health = Arc::new(HealthTracker::new(Duration::from_secs(300)));
        let ctx = OrchestratorContext::new(vec![a.clone(), b.clone(), a.clone()], health);

        assert_eq!(ctx.visit_order(Some(&c)), vec![c.clone(), a.clone(), b.clone()]);
        assert_eq!(ctx.visit_order(Some(&b)), vec![b.clone(), a.clone()]);
    }

    #[tokio::test]
    async fn test_first_success_short_circuits() {
        let (a, b, c) = ids();
        let (pa, pb, pc) = (mock(&a, 0.9), mock(&b, 0.85), mock(&c, 0.8));
        pa.fail_with("down");
        let health = Arc::new(HealthTracker::new(Duration::from_secs(300)));
        let ctx = OrchestratorContext::new(vec![a.clone(), b.clone(), c.clone()], health.clone())
            .with_provider(pa.clone())
            .with_provider(pb.clone())
            .with_provider(pc.clone());

        let set = ctx.fetch_rates(&current(), None).await.unwrap();

        assert_eq!(set.provider(), Some(&b));
        assert_eq!(set.source(), RateSource::Api);
        assert_eq!(set.rate(&Currency::eur()), Some(0.85));
        assert_eq!(pa.call_count(), 1);
        assert_eq!(pb.call_count(), 1);
        assert_eq!(pc.call_count(), 0);
        assert!(health.is_healthy(&b));
        assert!(!health.is_healthy(&a));
    }

    #[tokio::test]
    async fn test_all_failed_keeps_chain_and_last_error() {
        let (a, b, _) = ids();
        let (pa, pb) = (mock(&a, 0.9), mock(&b, 0.9));
        pa.fail_with("first");
        pb.fail_with("second");
        let ctx = OrchestratorContext::new(
            vec![a.clone(), b.clone()],
            Arc::new(HealthTracker::new(Duration::from_secs(300))),
        )
        .with_provider(pa)
        .with_provider(pb);

        let err = ctx.fetch_rates(&current(), None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AllProvidersFailed);
        match err {
            FxError::AllProvidersFailed {
                attempted,
                last_error,
            } => {
                assert_eq!(attempted, vec![a, b]);
                assert!(last_error.contains("second"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_unregistered_provider_is_skipped() {
        let (a, b, _) = ids();
        let pb = mock(&b, 0.85);
        let ctx = OrchestratorContext::new(
            vec![a.clone(), b.clone()],
            Arc::new(HealthTracker::new(Duration::from_secs(300))),
        )
        .with_provider(pb);

        let set = ctx.fetch_rates(&current(), Some(&a)).await.unwrap();
        assert_eq!(set.provider(), Some(&b));
    }

    #[tokio::test]
    async fn test_unregistered_last_keeps_upstream_error() {
        let (a, b, c) = ids();
        let (pa, pb) = (mock(&a, 0.9), mock(&b, 0.9));
        pa.fail_with("quota exceeded");
        pb.fail_with("invalid access key");
        let ctx = OrchestratorContext::new(
            vec![a.clone(), b.clone(), c.clone()],
            Arc::new(HealthTracker::new(Duration::from_secs(300))),
        )
        .with_provider(pa)
        .with_provider(pb);

        match ctx.fetch_rates(&current(), None).await.unwrap_err() {
            FxError::AllProvidersFailed {
                attempted,
                last_error,
            } => {
                assert_eq!(attempted, vec![a, b, c]);
                assert!(last_error.contains("invalid access key"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_only_unregistered_reports_not_configured() {
        let (a, _, _) = ids();
        let ctx = OrchestratorContext::new(
            vec![a.clone()],
            Arc::new(HealthTracker::new(Duration::from_secs(300))),
        );

        let err = ctx.fetch_rates(&current(), None).await.unwrap_err();
        assert!(err.to_string().contains("Provider not configured: a"));
    }

    #[tokio::test]
    async fn test_nothing_configured() {
        let ctx = OrchestratorContext::new(
            Vec::new(),
            Arc::new(HealthTracker::new(Duration::from_secs(300))),
        );
        let err = ctx.fetch_rates(&current(), None).await.unwrap_err();
        assert!(err.to_string().contains("no providers configured"));
    }

    #[tokio::test]
    async fn test_historical_query_routes_to_historical_capability() {
        let (a, _, _) = ids();
        let pa = mock(&a, 0.9);
        let ctx = OrchestratorContext::new(
            vec![a.clone()],
            Arc::new(HealthTracker::new(Duration::from_secs(300))),
        )
        .with_provider(pa);
        let date = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();

        let set = ctx
            .fetch_rates(
                &RateQuery::Historical {
                    base: Currency::usd(),
                    targets: vec![Currency::eur()],
                    date,
                },
                None,
            )
            .await
            .unwrap();
        assert_eq!(set.timestamp().date_naive(), date);
    }
}
