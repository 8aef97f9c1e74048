//! Time utilities and constants for SplitFx.

use chrono::{DateTime, Duration, NaiveDate, Utc};

/// Rate service timing constants.
pub mod constants {
    use super::Duration;

    /// Window after a provider's last success during which it counts as healthy (5 minutes).
    pub fn provider_health_window() -> Duration {
        Duration::minutes(5)
    }

    /// TTL for current rates (1 hour).
    pub fn current_rates_ttl() -> Duration {
        Duration::hours(1)
    }

    /// TTL for historical rates, which never change upstream (24 hours).
    pub fn historical_rates_ttl() -> Duration {
        Duration::hours(24)
    }

    /// TTL for entries written by cache warm-up (2 hours).
    pub fn warmup_ttl() -> Duration {
        Duration::hours(2)
    }

    /// Upstream request timeout (10 seconds).
    pub fn provider_request_timeout() -> Duration {
        Duration::seconds(10)
    }

    /// Durable cache operation timeout (2 seconds).
    pub fn cache_operation_timeout() -> Duration {
        Duration::seconds(2)
    }
}

/// A timestamp with timezone (always UTC).
pub type Timestamp = DateTime<Utc>;

/// Get the current timestamp.
pub fn now() -> Timestamp {
    Utc::now()
}

/// Today's date in UTC.
pub fn today() -> NaiveDate {
    now().date_naive()
}

/// Check whether `timestamp` is no older than `max_age`.
pub fn is_within(timestamp: Timestamp, max_age: Duration) -> bool {
    now() - timestamp <= max_age
}

/// Duration extensions for convenient construction.
pub trait DurationExt {
    fn as_std(&self) -> std::time::Duration;
}

impl DurationExt for Duration {
    fn as_std(&self) -> std::time::Duration {
        self.to_std().unwrap_or(std::time::Duration::ZERO)
    }
}
