//! Shared durable cache tier.

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::TierError;
use crate::error::{FxError, FxResult};

/// Raw string store shared across service instances.
#[async_trait]
pub trait DurableTier: Send + Sync {
    /// Short label used in logs and health output.
    fn name(&self) -> &'static str;

    /// Whether the last operation reached the backend.
    fn is_connected(&self) -> bool;

    async fn get(&self, key: &str) -> Result<Option<String>, TierError>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), TierError>;

    async fn delete(&self, key: &str) -> Result<usize, TierError>;

    /// Delete keys matching a glob in which only `*` is special.
    async fn delete_matching(&self, pattern: &str) -> Result<usize, TierError>;

    async fn ping(&self) -> Result<(), TierError>;

    /// Release the backend connection. Later calls fail with `Unavailable`.
    async fn close(&self);
}

/// Redis-backed tier using a reconnecting `ConnectionManager`.
pub struct RedisTier {
    manager: Mutex<Option<ConnectionManager>>,
    connected: AtomicBool,
    timeout: Duration,
}

impl RedisTier {
    /// Connect to `redis_url`, failing if the server is unreachable within `timeout`.
    pub async fn connect(redis_url: &str, timeout: Duration) -> FxResult<Self> {
        let cache_error = |message: String| FxError::CacheTier {
            tier: "durable",
            message,
        };

        let client = redis::Client::open(redis_url)
            .map_err(|e| cache_error(format!("invalid Redis URL: {e}")))?;
        let manager = tokio::time::timeout(timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| cache_error(format!("connect timed out after {}ms", timeout.as_millis())))?
            .map_err(|e| cache_error(format!("connect failed: {e}")))?;

        let tier = Self {
            manager: Mutex::new(Some(manager)),
            connected: AtomicBool::new(true),
            timeout,
        };
        tier.ping()
            .await
            .map_err(|e| cache_error(format!("ping failed: {e}")))?;

        info!("Connected to Redis cache tier");
        Ok(tier)
    }

    fn connection(&self) -> Result<ConnectionManager, TierError> {
        self.manager.lock().clone().ok_or(TierError::Unavailable)
    }

    /// Bound `operation` by the tier timeout and track connectivity.
    async fn run<T, F>(&self, operation: F) -> Result<T, TierError>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        let outcome = match tokio::time::timeout(self.timeout, operation).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(TierError::Backend(e.to_string())),
            Err(_) => Err(TierError::Timeout(self.timeout)),
        };

        let reachable = outcome.is_ok();
        if self.connected.swap(reachable, Ordering::Relaxed) != reachable {
            if reachable {
                info!("Redis cache tier reachable again");
            } else {
                warn!("Redis cache tier unreachable, serving from local tier");
            }
        }
        outcome
    }
}

#[async_trait]
impl DurableTier for RedisTier {
    fn name(&self) -> &'static str {
        "redis"
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed) && self.manager.lock().is_some()
    }

    async fn get(&self, key: &str) -> Result<Option<String>, TierError> {
        let mut conn = self.connection()?;
        self.run(async move { conn.get(key).await }).await
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), TierError> {
        let mut conn = self.connection()?;
        let seconds = ttl.as_secs().max(1);
        self.run(async move { conn.set_ex::<_, _, ()>(key, value, seconds).await })
            .await
    }

    async fn delete(&self, key: &str) -> Result<usize, TierError> {
        let mut conn = self.connection()?;
        self.run(async move { conn.del::<_, usize>(key).await }).await
    }

    async fn delete_matching(&self, pattern: &str) -> Result<usize, TierError> {
        let mut conn = self.connection()?;
        let pattern = escape_glob(pattern);

        let keys: Vec<String> = self
            .run(async {
                let mut keys = Vec::new();
                let mut iter = conn.scan_match::<_, String>(&pattern).await?;
                while let Some(key) = iter.next_item().await {
                    keys.push(key);
                }
                Ok::<_, redis::RedisError>(keys)
            })
            .await?;

        if keys.is_empty() {
            return Ok(0);
        }
        debug!(pattern = %pattern, matched = keys.len(), "Deleting durable keys");

        let mut deleted = 0;
        for chunk in keys.chunks(500) {
            let batch = chunk.to_vec();
            deleted += self
                .run(async { conn.del::<_, usize>(batch).await })
                .await?;
        }
        Ok(deleted)
    }

    async fn ping(&self) -> Result<(), TierError> {
        let mut conn = self.connection()?;
        self.run(async move {
            redis::cmd("PING")
                .query_async::<_, String>(&mut conn)
                .await
                .map(|_| ())
        })
        .await
    }

    async fn close(&self) {
        if self.manager.lock().take().is_some() {
            self.connected.store(false, Ordering::Relaxed);
            info!("Released Redis cache tier connection");
        }
    }
}

/// Escape Redis glob specials except `*`.
pub fn escape_glob(pattern: &str) -> String {
    let mut escaped = String::with_capacity(pattern.len());
    for c in pattern.chars() {
        if matches!(c, '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(any(test, feature = "test-utils"))]
pub use memory::MemoryDurableTier;

#[cfg(any(test, feature = "test-utils"))]
mod memory {
    use super::*;
    use dashmap::DashMap;
    use tokio::time::Instant;

    use crate::cache::local::glob_to_regex;

    /// In-memory stand-in for Redis with an outage switch.
    #[derive(Default)]
    pub struct MemoryDurableTier {
        entries: DashMap<String, (String, Instant)>,
        down: AtomicBool,
        closed: AtomicBool,
    }

    impl MemoryDurableTier {
        pub fn new() -> Self {
            Self::default()
        }

        /// Simulate the backend becoming unreachable (or recovering).
        pub fn set_outage(&self, down: bool) {
            self.down.store(down, Ordering::SeqCst);
        }

        /// Raw wire value for `key`, bypassing expiry.
        pub fn raw(&self, key: &str) -> Option<String> {
            self.entries.get(key).map(|e| e.0.clone())
        }

        /// Store a raw wire value, e.g. a legacy entry.
        pub fn put_raw(&self, key: &str, value: impl Into<String>, ttl: Duration) {
            self.entries
                .insert(key.to_string(), (value.into(), Instant::now() + ttl));
        }

        pub fn len(&self) -> usize {
            self.entries.len()
        }

        pub fn is_empty(&self) -> bool {
            self.entries.is_empty()
        }

        fn check(&self) -> Result<(), TierError> {
            if self.closed.load(Ordering::SeqCst) {
                return Err(TierError::Unavailable);
            }
            if self.down.load(Ordering::SeqCst) {
                return Err(TierError::Backend("connection refused".to_string()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl DurableTier for MemoryDurableTier {
        fn name(&self) -> &'static str {
            "memory"
        }

        fn is_connected(&self) -> bool {
            self.check().is_ok()
        }

        async fn get(&self, key: &str) -> Result<Option<String>, TierError> {
            self.check()?;
            let value = self
                .entries
                .get(key)
                .filter(|e| e.1 > Instant::now())
                .map(|e| e.0.clone());
            Ok(value)
        }

        async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), TierError> {
            self.check()?;
            self.put_raw(key, value, ttl);
            Ok(())
        }

        async fn delete(&self, key: &str) -> Result<usize, TierError> {
            self.check()?;
            Ok(usize::from(self.entries.remove(key).is_some()))
        }

        async fn delete_matching(&self, pattern: &str) -> Result<usize, TierError> {
            self.check()?;
            let regex = glob_to_regex(pattern)?;
            let before = self.entries.len();
            self.entries.retain(|key, _| !regex.is_match(key));
            Ok(before.saturating_sub(self.entries.len()))
        }

        async fn ping(&self) -> Result<(), TierError> {
            self.check()
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_glob_keeps_star() {
        assert_eq!(escape_glob("forex:rates:*"), "forex:rates:*");
        assert_eq!(escape_glob("a?b[c]d\\e"), "a\\?b\\[c\\]d\\\\e");
    }

    #[tokio::test]
    async fn test_memory_tier_outage_and_close() {
        let tier = MemoryDurableTier::new();
        tier.set("k", "v".to_string(), Duration::from_secs(60)).await.unwrap();
        assert_eq!(tier.get("k").await.unwrap().as_deref(), Some("v"));

        tier.set_outage(true);
        assert!(!tier.is_connected());
        assert!(tier.get("k").await.is_err());

        tier.set_outage(false);
        assert_eq!(tier.delete_matching("k*").await.unwrap(), 1);

        tier.close().await;
        assert!(matches!(tier.ping().await, Err(TierError::Unavailable)));
    }

    #[tokio::test]
    async fn test_connect_to_unreachable_redis_fails() {
        let result = RedisTier::connect("redis://127.0.0.1:1/", Duration::from_millis(300)).await;
        assert!(matches!(result, Err(FxError::CacheTier { tier: "durable", .. })));
    }
}
