//! Token bucket throttling for outbound provider calls.
//!
//! Refill is computed lazily on every call from the time elapsed since the
//! last refill; there is no background timer. Whole tokens only are added,
//! and the refill timestamp moves only when at least one token was added so
//! that sub-token elapsed time is never lost.

use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{FxError, FxResult};

/// Slowest accepted refill rate: one token per day.
pub const MIN_REFILL_PER_SECOND: f64 = 1.0 / 86_400.0;

/// Longest single sleep in `acquire`; the bucket is re-checked after each.
const MAX_WAIT: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket owned by a single provider client.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: u32,
    refill_per_second: f64,
    state: Mutex<BucketState>,
}

impl RateLimiter {
    /// Create a full bucket.
    pub fn new(capacity: u32, refill_per_second: f64) -> FxResult<Self> {
        if capacity == 0 {
            return Err(FxError::Configuration(
                "rate limiter capacity must be positive".to_string(),
            ));
        }
        if !refill_per_second.is_finite() || refill_per_second < MIN_REFILL_PER_SECOND {
            return Err(FxError::Configuration(format!(
                "rate limiter refill rate must be at least {MIN_REFILL_PER_SECOND} per second, got {refill_per_second}"
            )));
        }

        Ok(Self {
            capacity,
            refill_per_second,
            state: Mutex::new(BucketState {
                tokens: f64::from(capacity),
                last_refill: Instant::now(),
            }),
        })
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn refill_per_second(&self) -> f64 {
        self.refill_per_second
    }

    /// Tokens currently available, after a lazy refill.
    pub fn available(&self) -> f64 {
        let mut state = self.state.lock();
        self.refill(&mut state, Instant::now());
        state.tokens
    }

    /// Take `n` tokens if available. Never waits; leaves state untouched on failure.
    pub fn try_consume(&self, n: u32) -> bool {
        self.try_consume_at(n, Instant::now())
    }

    /// Wait until `n` tokens are available, then take them.
    pub async fn acquire(&self, n: u32) -> FxResult<()> {
        if n > self.capacity {
            return Err(FxError::Configuration(format!(
                "cannot acquire {n} tokens from a bucket of capacity {}",
                self.capacity
            )));
        }

        loop {
            let wait = {
                let mut state = self.state.lock();
                self.refill(&mut state, Instant::now());
                if state.tokens >= f64::from(n) {
                    state.tokens -= f64::from(n);
                    return Ok(());
                }
                self.wait_for(f64::from(n) - state.tokens)
            };

            debug!(wait_ms = wait.as_millis() as u64, "Rate limiter waiting for tokens");
            tokio::time::sleep(wait).await;
        }
    }

    pub(crate) fn try_consume_at(&self, n: u32, now: Instant) -> bool {
        let mut state = self.state.lock();
        self.refill(&mut state, now);
        if state.tokens >= f64::from(n) {
            state.tokens -= f64::from(n);
            true
        } else {
            false
        }
    }

    pub(crate) fn available_at(&self, now: Instant) -> f64 {
        let mut state = self.state.lock();
        self.refill(&mut state, now);
        state.tokens
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.saturating_duration_since(state.last_refill);
        let added = (elapsed.as_secs_f64() * self.refill_per_second).floor();
        if added >= 1.0 {
            state.tokens = (state.tokens + added).min(f64::from(self.capacity));
            state.last_refill = now;
        }
    }

    fn wait_for(&self, shortfall: f64) -> Duration {
        // Whole tokens only are credited, so wait for the ceiling of the shortfall.
        let secs = shortfall.ceil() / self.refill_per_second;
        Duration::try_from_secs_f64(secs)
            .unwrap_or(MAX_WAIT)
            .clamp(Duration::from_millis(1), MAX_WAIT)
    }
}
