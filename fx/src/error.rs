//! FX service error types.

use splitfx_common::{ProviderId, ValidationError};
use thiserror::Error;

/// Category of an [`FxError`], for callers that branch on failure type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    ProviderNotConfigured,
    ProviderCallFailed,
    AllProvidersFailed,
    CacheTier,
    Configuration,
}

/// Errors that can occur in the FX service.
#[derive(Debug, Clone, Error)]
pub enum FxError {
    /// Malformed currency code, date or amount. No I/O was performed.
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// A provider in the visit order has no client instance.
    #[error("Provider not configured: {0}")]
    ProviderNotConfigured(ProviderId),

    /// Network, timeout, HTTP status or upstream business error from one provider.
    #[error("Provider {provider} failed: {message}")]
    ProviderCallFailed { provider: ProviderId, message: String },

    /// Every candidate provider was tried and failed.
    #[error("All configured providers failed ({}): {last_error}", join_ids(.attempted))]
    AllProvidersFailed {
        attempted: Vec<ProviderId>,
        last_error: String,
    },

    /// A cache tier operation failed. Never escapes the cache layer.
    #[error("Cache tier {tier} error: {message}")]
    CacheTier { tier: &'static str, message: String },

    /// Missing or malformed configuration, including provider credentials.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl FxError {
    pub fn provider_call(provider: &ProviderId, message: impl Into<String>) -> Self {
        FxError::ProviderCallFailed {
            provider: provider.clone(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            FxError::Validation(_) => ErrorKind::Validation,
            FxError::ProviderNotConfigured(_) => ErrorKind::ProviderNotConfigured,
            FxError::ProviderCallFailed { .. } => ErrorKind::ProviderCallFailed,
            FxError::AllProvidersFailed { .. } => ErrorKind::AllProvidersFailed,
            FxError::CacheTier { .. } => ErrorKind::CacheTier,
            FxError::Configuration(_) => ErrorKind::Configuration,
        }
    }

    /// Get error code for API responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            FxError::Validation(e) => e.error_code(),
            FxError::ProviderNotConfigured(_) => "PROVIDER_NOT_CONFIGURED",
            FxError::ProviderCallFailed { .. } => "PROVIDER_CALL_FAILED",
            FxError::AllProvidersFailed { .. } => "ALL_PROVIDERS_FAILED",
            FxError::CacheTier { .. } => "CACHE_TIER_ERROR",
            FxError::Configuration(_) => "CONFIGURATION_ERROR",
        }
    }
}

fn join_ids(ids: &[ProviderId]) -> String {
    ids.iter().map(ProviderId::as_str).collect::<Vec<_>>().join(", ")
}

/// Result type for FX operations.
pub type FxResult<T> = Result<T, FxError>;
