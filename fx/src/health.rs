//! Process-wide provider health, used to bias failover order.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use splitfx_common::ProviderId;

#[derive(Debug, Clone, Copy)]
struct LastSuccess {
    at: Instant,
    wall_clock: DateTime<Utc>,
}

/// Health view of one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderHealthRecord {
    pub provider: ProviderId,
    pub healthy: bool,
    pub last_success_at: Option<DateTime<Utc>>,
}

/// Tracks the last success of each provider.
///
/// A provider is healthy while its last success is younger than the
/// window. Failure clears the record. Unknown providers are unhealthy.
#[derive(Debug)]
pub struct HealthTracker {
    window: Duration,
    records: DashMap<ProviderId, Option<LastSuccess>>,
}

impl HealthTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            records: DashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn mark_success(&self, provider: &ProviderId) {
        self.records.insert(
            provider.clone(),
            Some(LastSuccess {
                at: Instant::now(),
                wall_clock: Utc::now(),
            }),
        );
    }

    pub fn mark_failure(&self, provider: &ProviderId) {
        debug!(provider = %provider, "Clearing provider health");
        self.records.insert(provider.clone(), None);
    }

    pub fn is_healthy(&self, provider: &ProviderId) -> bool {
        self.records
            .get(provider)
            .and_then(|record| *record)
            .is_some_and(|last| last.at.elapsed() < self.window)
    }

    /// Records for every provider seen so far, ordered by id.
    pub fn snapshot(&self) -> Vec<ProviderHealthRecord> {
        let mut records: Vec<ProviderHealthRecord> = self
            .records
            .iter()
            .map(|entry| {
                let last = *entry.value();
                ProviderHealthRecord {
                    provider: entry.key().clone(),
                    healthy: last.is_some_and(|l| l.at.elapsed() < self.window),
                    last_success_at: last.map(|l| l.wall_clock),
                }
            })
            .collect();
        records.sort_by(|a, b| a.provider.cmp(&b.provider));
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_health_window() {
        let tracker = HealthTracker::new(Duration::from_secs(300));
        let fixer = ProviderId::fixer();

        assert!(!tracker.is_healthy(&fixer));

        tracker.mark_success(&fixer);
        assert!(tracker.is_healthy(&fixer));

        tokio::time::advance(Duration::from_secs(299)).await;
        assert!(tracker.is_healthy(&fixer));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!tracker.is_healthy(&fixer));
    }

    #[tokio::test]
    async fn test_failure_clears_success() {
        let tracker = HealthTracker::new(Duration::from_secs(300));
        let id = ProviderId::exchangerate_api();

        tracker.mark_success(&id);
        tracker.mark_failure(&id);
        assert!(!tracker.is_healthy(&id));

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot[0].last_success_at.is_none());
    }

    #[tokio::test]
    async fn test_snapshot_sorted() {
        let tracker = HealthTracker::new(Duration::from_secs(60));
        tracker.mark_success(&ProviderId::open_exchange_rates());
        tracker.mark_failure(&ProviderId::exchangerate_api());

        let ids: Vec<_> = tracker.snapshot().into_iter().map(|r| r.provider).collect();
        assert_eq!(
            ids,
            vec![ProviderId::exchangerate_api(), ProviderId::open_exchange_rates()]
        );
    }
}
