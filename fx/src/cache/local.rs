//! In-process cache tier with per-entry TTL.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use regex::Regex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use super::{CacheEntry, TierError};

#[derive(Debug, Clone)]
struct LocalEntry<T> {
    payload: T,
    cached_at: DateTime<Utc>,
    ttl: Duration,
    inserted: Instant,
}

impl<T> LocalEntry<T> {
    fn is_valid(&self) -> bool {
        self.inserted.elapsed() < self.ttl
    }
}

/// Thread-safe bounded map with lazy expiry.
pub struct LocalTier<T> {
    entries: DashMap<String, LocalEntry<T>>,
    max_entries: usize,
}

impl<T: Clone> LocalTier<T> {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries: max_entries.max(1),
        }
    }

    /// Get an entry if present and not expired. Expired entries are removed.
    pub fn get(&self, key: &str) -> Option<CacheEntry<T>> {
        if let Some(entry) = self.entries.get(key) {
            if entry.is_valid() {
                return Some(CacheEntry {
                    payload: entry.payload.clone(),
                    cached_at: Some(entry.cached_at),
                    ttl_seconds: Some(entry.ttl.as_secs()),
                });
            }
            debug!(key, "Local entry expired");
            drop(entry);
            self.discard_expired(key);
        }
        None
    }

    /// Drop `key` only if it is still expired; a concurrent `set` may have replaced it.
    fn discard_expired(&self, key: &str) {
        self.entries.remove_if(key, |_, entry| !entry.is_valid());
    }

    pub fn set(&self, key: &str, payload: T, cached_at: DateTime<Utc>, ttl: Duration) {
        if !self.entries.contains_key(key) && self.entries.len() >= self.max_entries {
            self.make_room();
        }

        self.entries.insert(
            key.to_string(),
            LocalEntry {
                payload,
                cached_at,
                ttl,
                inserted: Instant::now(),
            },
        );
    }

    pub fn remove(&self, key: &str) -> usize {
        usize::from(self.entries.remove(key).is_some())
    }

    /// Remove every key matching a `*` glob.
    pub fn remove_matching(&self, pattern: &str) -> Result<usize, TierError> {
        let regex = glob_to_regex(pattern)?;
        let before = self.entries.len();
        self.entries.retain(|key, _| !regex.is_match(key));
        Ok(before.saturating_sub(self.entries.len()))
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Evict expired entries.
    pub fn evict_expired(&self) {
        self.entries.retain(|_, entry| entry.is_valid());
    }

    pub fn stats(&self) -> LocalStats {
        let total = self.entries.len();
        let valid = self.entries.iter().filter(|e| e.is_valid()).count();

        LocalStats {
            total_entries: total,
            valid_entries: valid,
            expired_entries: total - valid,
            max_entries: self.max_entries,
        }
    }

    fn make_room(&self) {
        self.evict_expired();
        while self.entries.len() >= self.max_entries {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|e| e.inserted)
                .map(|e| e.key().clone());
            match oldest {
                Some(key) => {
                    debug!(key = %key, "Evicting oldest local entry");
                    self.entries.remove(&key);
                }
                None => break,
            }
        }
    }
}

/// Local tier statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalStats {
    pub total_entries: usize,
    pub valid_entries: usize,
    pub expired_entries: usize,
    pub max_entries: usize,
}

/// Anchored regex for a glob where only `*` is special.
pub(crate) fn glob_to_regex(pattern: &str) -> Result<Regex, TierError> {
    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("^{body}$")).map_err(|e| TierError::Codec(format!("invalid pattern: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tier() -> LocalTier<String> {
        LocalTier::new(100)
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry() {
        let tier = tier();
        tier.set("k", "v".to_string(), Utc::now(), Duration::from_secs(10));
        assert_eq!(tier.get("k").unwrap().payload, "v");

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(tier.get("k").is_none());
        assert!(tier.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_read_keeps_fresh_replacement() {
        let tier = tier();
        tier.set("k", "stale".to_string(), Utc::now(), Duration::from_secs(1));
        tokio::time::advance(Duration::from_secs(2)).await;

        // A writer replaces the key between the expired read and its cleanup.
        tier.set("k", "fresh".to_string(), Utc::now(), Duration::from_secs(60));
        tier.discard_expired("k");

        assert_eq!(tier.get("k").unwrap().payload, "fresh");
        assert_eq!(tier.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_evicts_expired_then_oldest() {
        let tier = LocalTier::new(2);
        tier.set("short", 1, Utc::now(), Duration::from_secs(1));
        tokio::time::advance(Duration::from_millis(10)).await;
        tier.set("old", 2, Utc::now(), Duration::from_secs(60));
        tokio::time::advance(Duration::from_secs(2)).await;

        tier.set("new", 3, Utc::now(), Duration::from_secs(60));
        assert!(tier.get("short").is_none());
        assert!(tier.get("old").is_some());

        tier.set("newer", 4, Utc::now(), Duration::from_secs(60));
        assert!(tier.get("old").is_none());
        assert_eq!(tier.len(), 2);
        assert_eq!(tier.stats().max_entries, 2);
    }

    #[test]
    fn test_pattern_escapes_regex_specials() {
        let tier = tier();
        let now = Utc::now();
        let ttl = Duration::from_secs(60);
        tier.set("forex:rates:fixer:USD:EUR", "a".into(), now, ttl);
        tier.set("forex:rates:fixer:USD:EUR,GBP", "b".into(), now, ttl);
        tier.set("forex:rates:default:USD:EUR", "c".into(), now, ttl);
        tier.set("forex.rates.fixer", "d".into(), now, ttl);

        assert_eq!(tier.remove_matching("forex:rates:fixer:*").unwrap(), 2);
        assert_eq!(tier.remove_matching("forex:rates:fixer").unwrap(), 0);
        assert_eq!(tier.len(), 2);
        assert!(glob_to_regex("a.b").unwrap().is_match("a.b"));
        assert!(!glob_to_regex("a.b").unwrap().is_match("axb"));
    }

    #[test]
    fn test_remove_and_stats() {
        let tier = tier();
        tier.set("a", "1".into(), Utc::now(), Duration::from_secs(60));
        assert_eq!(tier.remove("a"), 1);
        assert_eq!(tier.remove("a"), 0);
        assert_eq!(tier.stats().total_entries, 0);
    }
}
