//! Deterministic cache keys.

use chrono::NaiveDate;

use splitfx_common::{Currency, ProviderId};

/// Key prefix shared by every entry this service writes.
pub const KEY_PREFIX: &str = "forex";

/// Key for current rates: `forex:rates:{provider}:{BASE}:{T1,T2,..}`.
pub fn rates_key(provider: &ProviderId, base: &Currency, targets: &[Currency]) -> String {
    format!(
        "{KEY_PREFIX}:rates:{}:{}:{}",
        provider,
        base.code(),
        joined_targets(targets)
    )
}

/// Key for historical rates: `forex:historical:{provider}:{BASE}:{T1,T2,..}:{YYYY-MM-DD}`.
pub fn historical_key(
    provider: &ProviderId,
    base: &Currency,
    targets: &[Currency],
    date: NaiveDate,
) -> String {
    format!(
        "{KEY_PREFIX}:historical:{}:{}:{}:{}",
        provider,
        base.code(),
        joined_targets(targets),
        date.format("%Y-%m-%d")
    )
}

/// Pattern matching every entry for one provider, current and historical.
pub fn provider_pattern(provider: &ProviderId) -> String {
    format!("{KEY_PREFIX}:*:{provider}:*")
}

/// Upper-cased, sorted, de-duplicated target list.
fn joined_targets(targets: &[Currency]) -> String {
    let mut codes: Vec<String> = targets.iter().map(|t| t.code().to_uppercase()).collect();
    codes.sort();
    codes.dedup();
    codes.join(",")
}
