//! Two-tier rate cache: a shared durable tier (Redis) in front of an
//! in-process tier.
//!
//! Reads try the durable tier first when it is connected, then the local
//! tier. Writes go to both tiers concurrently and succeed when either tier
//! accepted the entry. Tier failures are logged and absorbed here; callers
//! only ever see hits, misses and per-tier outcome flags.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use splitfx_common::ExchangeRateSet;

pub mod durable;
pub mod envelope;
pub mod key;
pub mod local;

pub use durable::{escape_glob, DurableTier, RedisTier};
pub use envelope::{CacheEnvelope, WireFormat};
pub use key::{historical_key, provider_pattern, rates_key};
pub use local::{LocalStats, LocalTier};

#[cfg(any(test, feature = "test-utils"))]
pub use durable::MemoryDurableTier;

use crate::config::CacheConfig;

/// Error from a single cache tier. Never leaves this module's public API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TierError {
    #[error("tier unavailable")]
    Unavailable,
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("backend error: {0}")]
    Backend(String),
    #[error("codec error: {0}")]
    Codec(String),
}

/// A cache hit.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<T> {
    pub payload: T,
    /// When the entry was written. Absent on legacy entries.
    pub cached_at: Option<DateTime<Utc>>,
    /// TTL the entry was written with, in seconds. Absent on legacy entries.
    pub ttl_seconds: Option<u64>,
}

/// Per-write options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetOptions {
    /// Compress the durable value when it exceeds the threshold.
    pub compress: bool,
}

/// Which tiers accepted a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetOutcome {
    pub durable_ok: bool,
    pub local_ok: bool,
}

impl SetOutcome {
    pub fn succeeded(&self) -> bool {
        self.durable_ok || self.local_ok
    }
}

/// How `invalidate` interprets its argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvalidateMode {
    Exact,
    /// Glob in which only `*` is special.
    Pattern,
}

/// Entries removed per tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidateCounts {
    pub durable: usize,
    pub local: usize,
}

/// State of one tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierStatus {
    Up,
    Down,
    Disabled,
}

/// Aggregate cache health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Healthy,
    Degraded,
    Down,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheHealth {
    pub durable: TierStatus,
    pub local: TierStatus,
    pub overall: OverallStatus,
    pub local_entries: usize,
}

/// Two-tier cache store.
pub struct CacheStore<T = ExchangeRateSet> {
    durable: Option<Arc<dyn DurableTier>>,
    local: LocalTier<T>,
    compression_threshold: usize,
    _payload: PhantomData<fn() -> T>,
}

impl<T> CacheStore<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync,
{
    /// Build a store. `durable = None` runs local-only.
    pub fn new(durable: Option<Arc<dyn DurableTier>>, config: &CacheConfig) -> Self {
        Self {
            durable,
            local: LocalTier::new(config.local_max_entries),
            compression_threshold: config.compression_threshold,
            _payload: PhantomData,
        }
    }

    pub fn has_durable(&self) -> bool {
        self.durable.is_some()
    }

    pub fn local(&self) -> &LocalTier<T> {
        &self.local
    }

    /// Look up `key`, durable tier first.
    pub async fn get(&self, key: &str) -> Option<CacheEntry<T>> {
        if let Some(durable) = self.connected_durable() {
            match durable.get(key).await {
                Ok(Some(raw)) => match envelope::decode::<T>(&raw) {
                    Ok((entry, format)) => {
                        debug!(key, tier = durable.name(), ?format, "Cache hit");
                        return Some(entry);
                    }
                    Err(e) => {
                        warn!(key, error = %e, "Undecodable durable entry, treating as miss");
                    }
                },
                Ok(None) => {}
                Err(e) => {
                    warn!(key, error = %e, "Durable cache read failed");
                }
            }
        }

        match self.local.get(key) {
            Some(entry) => {
                debug!(key, tier = "local", "Cache hit");
                Some(entry)
            }
            None => {
                debug!(key, "Cache miss");
                None
            }
        }
    }

    /// Write `payload` to both tiers. Both writes finish before returning.
    pub async fn set(&self, key: &str, payload: &T, ttl: Duration, options: SetOptions) -> SetOutcome {
        let cached_at = Utc::now();

        let durable_write = async {
            let Some(durable) = &self.durable else {
                return false;
            };
            let wire = match envelope::encode(
                payload,
                cached_at,
                ttl.as_secs(),
                options.compress,
                self.compression_threshold,
            ) {
                Ok(wire) => wire,
                Err(e) => {
                    warn!(key, error = %e, "Failed to encode cache entry");
                    return false;
                }
            };
            match durable.set(key, wire, ttl).await {
                Ok(()) => true,
                Err(e) => {
                    warn!(key, error = %e, "Durable cache write failed");
                    false
                }
            }
        };

        let local_write = async {
            self.local.set(key, payload.clone(), cached_at, ttl);
            true
        };

        let (durable_ok, local_ok) = tokio::join!(durable_write, local_write);
        SetOutcome {
            durable_ok,
            local_ok,
        }
    }

    /// Remove an exact key or every key matching a `*` glob.
    pub async fn invalidate(&self, key_or_pattern: &str, mode: InvalidateMode) -> InvalidateCounts {
        let local = match mode {
            InvalidateMode::Exact => self.local.remove(key_or_pattern),
            InvalidateMode::Pattern => self.local.remove_matching(key_or_pattern).unwrap_or_else(|e| {
                warn!(pattern = key_or_pattern, error = %e, "Local invalidation failed");
                0
            }),
        };

        let durable = match &self.durable {
            Some(durable) => {
                let result = match mode {
                    InvalidateMode::Exact => durable.delete(key_or_pattern).await,
                    InvalidateMode::Pattern => durable.delete_matching(key_or_pattern).await,
                };
                result.unwrap_or_else(|e| {
                    warn!(key = key_or_pattern, error = %e, "Durable invalidation failed");
                    0
                })
            }
            None => 0,
        };

        debug!(key = key_or_pattern, ?mode, durable, local, "Invalidated cache entries");
        InvalidateCounts { durable, local }
    }

    /// Probe both tiers. Never `Down` while the local tier works.
    pub async fn health_status(&self) -> CacheHealth {
        let durable = match &self.durable {
            None => TierStatus::Disabled,
            Some(durable) => match durable.ping().await {
                Ok(()) => TierStatus::Up,
                Err(e) => {
                    warn!(error = %e, "Durable cache tier health check failed");
                    TierStatus::Down
                }
            },
        };

        // The local tier is an in-process map and cannot be unreachable.
        let local = TierStatus::Up;
        let overall = match (durable, local) {
            (TierStatus::Up, TierStatus::Up) => OverallStatus::Healthy,
            (_, TierStatus::Up) => OverallStatus::Degraded,
            (TierStatus::Up, _) => OverallStatus::Degraded,
            _ => OverallStatus::Down,
        };

        CacheHealth {
            durable,
            local,
            overall,
            local_entries: self.local.len(),
        }
    }

    /// Release the durable connection.
    pub async fn shutdown(&self) {
        if let Some(durable) = &self.durable {
            durable.close().await;
        }
    }

    fn connected_durable(&self) -> Option<&Arc<dyn DurableTier>> {
        self.durable.as_ref().filter(|d| d.is_connected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use splitfx_common::{Currency, ProviderId, RateSource};
    use std::collections::BTreeMap;

    fn rates(n: usize) -> ExchangeRateSet {
        let rates: BTreeMap<Currency, f64> = (0..n)
            .map(|i| {
                let code: String = ['Q', (b'A' + (i / 26 % 26) as u8) as char, (b'A' + (i % 26) as u8) as char]
                    .iter()
                    .collect();
                (Currency::new(code), 0.5 + i as f64)
            })
            .collect();
        ExchangeRateSet::new(
            Currency::usd(),
            rates,
            Utc::now(),
            RateSource::Api,
            Some(ProviderId::exchangerate_api()),
        )
    }

    fn store(durable: Option<Arc<MemoryDurableTier>>) -> CacheStore {
        CacheStore::new(
            durable.map(|d| d as Arc<dyn DurableTier>),
            &CacheConfig::default(),
        )
    }

    const TTL: Duration = Duration::from_secs(3600);
    const PLAIN: SetOptions = SetOptions { compress: false };
    const COMPRESS: SetOptions = SetOptions { compress: true };

    #[tokio::test]
    async fn test_set_get_round_trip() {
        let durable = Arc::new(MemoryDurableTier::new());
        let store = store(Some(durable.clone()));
        let set = rates(2);

        let outcome = store.set("k", &set, TTL, PLAIN).await;
        assert!(outcome.durable_ok && outcome.local_ok);

        let entry = store.get("k").await.unwrap();
        assert_eq!(entry.payload, set);
        assert_eq!(entry.ttl_seconds, Some(3600));
        assert!(entry.cached_at.is_some());
    }

    #[tokio::test]
    async fn test_compression_only_above_threshold() {
        let durable = Arc::new(MemoryDurableTier::new());
        let store = store(Some(durable.clone()));

        let big = rates(150);
        store.set("small", &rates(2), TTL, COMPRESS).await;
        store.set("large", &big, TTL, COMPRESS).await;
        store.set("large-plain", &big, TTL, PLAIN).await;

        assert!(durable.raw("small").unwrap().starts_with('{'));
        assert!(durable.raw("large").unwrap().starts_with("gz:"));
        assert!(durable.raw("large-plain").unwrap().starts_with('{'));

        store.local().clear();
        assert_eq!(store.get("large").await.unwrap().payload, big);
        assert_eq!(store.get("large-plain").await.unwrap().payload, big);
    }

    #[tokio::test]
    async fn test_legacy_durable_entry_is_readable() {
        let durable = Arc::new(MemoryDurableTier::new());
        durable.put_raw(
            "legacy",
            r#"{"baseCurrency":"USD","rates":{"EUR":0.85},"timestamp":"2024-01-01T00:00:00Z","source":"api"}"#,
            TTL,
        );
        let store = store(Some(durable));

        let entry = store.get("legacy").await.unwrap();
        assert_eq!(entry.payload.rate(&Currency::eur()), Some(0.85));
        assert!(entry.cached_at.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_durable_entry_falls_through_to_local() {
        let durable = Arc::new(MemoryDurableTier::new());
        let store = store(Some(durable.clone()));
        let set = rates(1);

        store.set("k", &set, TTL, PLAIN).await;
        durable.put_raw("k", "gz:not-base64!", TTL);

        assert_eq!(store.get("k").await.unwrap().payload, set);
    }

    #[tokio::test]
    async fn test_durable_outage_degrades_to_local() {
        let durable = Arc::new(MemoryDurableTier::new());
        let store = store(Some(durable.clone()));
        durable.set_outage(true);

        let outcome = store.set("k", &rates(1), TTL, PLAIN).await;
        assert!(!outcome.durable_ok);
        assert!(outcome.local_ok);
        assert!(outcome.succeeded());
        assert!(store.get("k").await.is_some());

        let health = store.health_status().await;
        assert_eq!(health.durable, TierStatus::Down);
        assert_eq!(health.overall, OverallStatus::Degraded);
    }

    #[tokio::test]
    async fn test_local_only_store_is_degraded() {
        let store = store(None);
        let health = store.health_status().await;
        assert_eq!(health.durable, TierStatus::Disabled);
        assert_eq!(health.overall, OverallStatus::Degraded);
    }

    #[tokio::test]
    async fn test_healthy_with_both_tiers() {
        let store = store(Some(Arc::new(MemoryDurableTier::new())));
        assert_eq!(store.health_status().await.overall, OverallStatus::Healthy);
    }

    #[tokio::test]
    async fn test_invalidate_pattern_and_exact() {
        let durable = Arc::new(MemoryDurableTier::new());
        let store = store(Some(durable.clone()));
        let set = rates(1);
        store.set("forex:rates:fixer:USD:EUR", &set, TTL, PLAIN).await;
        store.set("forex:rates:fixer:USD:GBP", &set, TTL, PLAIN).await;
        store.set("forex:rates:default:USD:EUR", &set, TTL, PLAIN).await;

        let counts = store.invalidate("forex:rates:fixer:*", InvalidateMode::Pattern).await;
        assert_eq!(counts, InvalidateCounts { durable: 2, local: 2 });

        let counts = store
            .invalidate("forex:rates:default:USD:EUR", InvalidateMode::Exact)
            .await;
        assert_eq!(counts, InvalidateCounts { durable: 1, local: 1 });
        assert!(store.get("forex:rates:default:USD:EUR").await.is_none());
    }

    #[tokio::test]
    async fn test_shutdown_releases_durable() {
        let durable = Arc::new(MemoryDurableTier::new());
        let store = store(Some(durable.clone()));
        store.shutdown().await;

        assert!(!durable.is_connected());
        assert!(!store.set("k", &rates(1), TTL, PLAIN).await.durable_ok);
    }
}
