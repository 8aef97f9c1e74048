//! SplitFx FX Cache Warmer
//!
//! Keeps the rate cache populated for the configured currency matrix.

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use splitfx_common::{today, ProviderId};
use splitfx_fx::{ForexConfig, ForexService, WarmupOptions};

mod schedule;

/// SplitFx cache warm-up daemon
#[derive(Parser, Debug)]
#[command(name = "fx-warmer")]
#[command(about = "Periodically pre-populates the SplitFx exchange rate cache")]
struct Args {
    /// Seconds between warm-up rounds
    #[arg(long, default_value = "3600")]
    interval: u64,

    /// Run a single round and exit
    #[arg(long)]
    once: bool,

    /// Also warm historical rates for this many past days
    #[arg(long, default_value = "0")]
    historical_days: u32,

    /// Provider to try first and whose cache scope to fill
    #[arg(long)]
    provider: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let args = Args::parse();

    info!("Starting SplitFx cache warmer");

    // Load configuration
    let config = ForexConfig::from_env();
    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(anyhow::anyhow!("Configuration error: {}", e));
    }

    let service = Arc::new(ForexService::from_config(config).await?);

    if args.once {
        run_round(&service, &args).await;
    } else {
        info!(interval_secs = args.interval, "Warmer running");
        let shutdown = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for Ctrl+C");
            }
            info!("Shutdown signal received");
        };
        let rounds = schedule::run_until(
            schedule::round_interval(args.interval),
            || run_round(&service, &args),
            shutdown,
        )
        .await;
        info!(rounds, "Warmer loop stopped");
    }

    service.shutdown().await;
    info!("Cache warmer shutdown complete");
    Ok(())
}

/// One warm-up pass followed by a health snapshot. Never fails the daemon.
async fn run_round(service: &ForexService, args: &Args) {
    let options = WarmupOptions {
        historical_dates: schedule::historical_dates(today(), args.historical_days),
        provider: args.provider.as_deref().map(ProviderId::new),
        ..WarmupOptions::default()
    };

    let no_overrides: [&str; 0] = [];
    match service.warm_cache(&no_overrides, options).await {
        Ok(summary) => {
            info!(
                current_ok = summary.current.succeeded,
                current_failed = summary.current.failed,
                current_skipped = summary.current.skipped,
                historical_ok = summary.historical.succeeded,
                historical_failed = summary.historical.failed,
                "Warm-up round complete"
            );
            for failure in &summary.failures {
                warn!(key = %failure.key, error = %failure.message, "Warm-up entry failed");
            }
        }
        Err(e) => error!(error = %e, code = e.error_code(), "Warm-up round rejected"),
    }

    let health = service.get_health_status().await;
    match serde_json::to_value(&health) {
        Ok(snapshot) => info!(health = %snapshot, "Health snapshot"),
        Err(e) => warn!(error = %e, "Failed to serialize health snapshot"),
    }
}
