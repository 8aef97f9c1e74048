//! SplitFx FX Service
//!
//! Exchange rate acquisition and caching for currency conversion.
//!
//! # Features
//!
//! - Multiple upstream rate providers with per-provider token bucket throttling
//! - Health-biased failover across providers
//! - Two-tier cache (Redis + in-process) with versioned, optionally compressed entries
//! - Proactive cache warm-up for common currency pairs
//!
//! # Example
//!
//! ```rust,ignore
//! use splitfx_fx::{ConversionOptions, ForexConfig, ForexService, RateOptions};
//!
//! let service = ForexService::from_config(ForexConfig::from_env()).await?;
//!
//! // Get current rates
//! let rates = service.get_exchange_rates("USD", &["EUR", "GBP"], RateOptions::default()).await?;
//!
//! // Convert amount
//! let conversion = service.convert("1000.00", "USD", "EUR", ConversionOptions::default()).await?;
//! ```

pub mod cache;
pub mod config;
pub mod conversion;
pub mod engine;
pub mod error;
pub mod failover;
pub mod health;
pub mod limiter;
pub mod provider;
pub mod warmer;

pub use cache::{CacheHealth, CacheStore, InvalidateCounts, InvalidateMode};
pub use config::{CacheConfig, ForexConfig, ProviderSettings, WarmupConfig};
pub use conversion::{Conversion, ConversionOptions};
pub use engine::{ForexService, HistoricalOptions, RateOptions, ServiceHealth, WarmupOptions};
pub use error::{ErrorKind, FxError, FxResult};
pub use failover::{OrchestratorContext, RateQuery};
pub use health::HealthTracker;
pub use limiter::RateLimiter;
pub use provider::{ProviderHealthReport, ProviderStats, RateProvider};
pub use warmer::{CacheWarmer, WarmupPlan, WarmupSummary};
