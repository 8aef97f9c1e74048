//! Shared plumbing composed into every adapter: throttling, timeout,
//! transport and outcome counters.

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use splitfx_common::ProviderId;

use super::http::{HttpRequest, HttpTransport};
use super::ProviderStats;
use crate::error::{FxError, FxResult};
use crate::limiter::RateLimiter;

/// Per-provider call helper. One instance per adapter.
pub struct ProviderClient {
    id: ProviderId,
    limiter: RateLimiter,
    transport: Arc<dyn HttpTransport>,
    timeout: Duration,
    request_count: AtomicU64,
    error_count: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl ProviderClient {
    pub fn new(
        id: ProviderId,
        limiter: RateLimiter,
        transport: Arc<dyn HttpTransport>,
        timeout: Duration,
    ) -> Self {
        Self {
            id,
            limiter,
            transport,
            timeout,
            request_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            last_error: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &ProviderId {
        &self.id
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run one upstream operation: wait for a token, bound it by the
    /// timeout and record the outcome.
    pub async fn call<T, F>(&self, operation: F) -> FxResult<T>
    where
        F: Future<Output = FxResult<T>>,
    {
        self.limiter.acquire(1).await?;
        self.request_count.fetch_add(1, Ordering::Relaxed);

        let outcome = match tokio::time::timeout(self.timeout, operation).await {
            Ok(result) => result,
            Err(_) => Err(FxError::provider_call(
                &self.id,
                format!("timed out after {}ms", self.timeout.as_millis()),
            )),
        };

        if let Err(e) = &outcome {
            self.record_error(e);
        }
        outcome
    }

    /// GET `request` and decode a JSON body. Non-2xx statuses fail.
    pub async fn get_json<T: DeserializeOwned>(&self, request: HttpRequest) -> FxResult<T> {
        let request = request.with_timeout(self.timeout);
        self.call(async {
            let response = self
                .transport
                .execute(request)
                .await
                .map_err(|e| FxError::provider_call(&self.id, e.to_string()))?;

            if !response.is_success() {
                return Err(FxError::provider_call(
                    &self.id,
                    format!("HTTP {}: {}", response.status, truncate(&response.body, 200)),
                ));
            }

            serde_json::from_str(&response.body).map_err(|e| {
                FxError::provider_call(&self.id, format!("invalid response body: {e}"))
            })
        })
        .await
    }

    fn record_error(&self, error: &FxError) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
        let message = error.to_string();
        warn!(provider = %self.id, error = %message, "Provider call failed");
        *self.last_error.lock() = Some(message);
    }

    /// Record a failure detected after the call itself succeeded, e.g. an
    /// upstream business error inside a 200 response.
    pub fn record_failure(&self, error: FxError) -> FxError {
        self.record_error(&error);
        error
    }

    pub fn stats(&self) -> ProviderStats {
        ProviderStats {
            provider: self.id.clone(),
            request_count: self.request_count.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
            last_error: self.last_error.lock().clone(),
        }
    }
}

fn truncate(body: &str, max: usize) -> &str {
    match body.char_indices().nth(max) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}
