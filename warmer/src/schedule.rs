//! Warm-up round scheduling.

use chrono::{Days, NaiveDate};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};

/// The `days` dates before `today`, most recent first, as `YYYY-MM-DD`.
pub fn historical_dates(today: NaiveDate, days: u32) -> Vec<String> {
    (1..=u64::from(days))
        .filter_map(|n| today.checked_sub_days(Days::new(n)))
        .map(|date| date.format("%Y-%m-%d").to_string())
        .collect()
}

/// Round interval, never shorter than one second.
pub fn round_interval(seconds: u64) -> Duration {
    Duration::from_secs(seconds.max(1))
}

/// Run `round` every `period` until `shutdown` resolves. Shutdown also cuts
/// an in-flight round short. Returns the number of completed rounds.
pub async fn run_until<R, Fut, S>(period: Duration, mut round: R, shutdown: S) -> u64
where
    R: FnMut() -> Fut,
    Fut: Future<Output = ()>,
    S: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut ticker = tokio::time::interval(period);
    let mut completed = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = &mut shutdown => return completed,
        }

        tokio::select! {
            _ = round() => {
                completed += 1;
                debug!(completed, "Round finished");
            }
            _ = &mut shutdown => {
                info!("Shutdown during warm-up round, abandoning it");
                return completed;
            }
        }
    }
}
