//! Identifier types for rate providers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of an upstream rate provider.
///
/// Ids are lower-case strings such as `exchangerate-api`. The pseudo-id
/// [`ProviderId::default_scope`] is used for cache keys that are not tied
/// to a specific provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(String);

impl ProviderId {
    /// Id of the ExchangeRate-API adapter.
    pub const EXCHANGERATE_API: &'static str = "exchangerate-api";
    /// Id of the Fixer adapter.
    pub const FIXER: &'static str = "fixer";
    /// Id of the Open Exchange Rates adapter.
    pub const OPEN_EXCHANGE_RATES: &'static str = "openexchangerates";
    /// Cache scope shared by all providers.
    pub const DEFAULT_SCOPE: &'static str = "default";

    /// Create a new provider ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into().trim().to_ascii_lowercase())
    }

    /// Get the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn exchangerate_api() -> Self {
        Self::new(Self::EXCHANGERATE_API)
    }

    pub fn fixer() -> Self {
        Self::new(Self::FIXER)
    }

    pub fn open_exchange_rates() -> Self {
        Self::new(Self::OPEN_EXCHANGE_RATES)
    }

    /// The generic cache scope (`default`).
    pub fn default_scope() -> Self {
        Self::new(Self::DEFAULT_SCOPE)
    }

    /// Parse a comma separated list such as `fixer, exchangerate-api`.
    pub fn parse_list(list: &str) -> Vec<Self> {
        list.split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(Self::new)
            .collect()
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ProviderId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_id_normalized() {
        assert_eq!(ProviderId::new(" Fixer ").as_str(), "fixer");
        assert_eq!(ProviderId::from("FIXER"), ProviderId::fixer());
    }

    #[test]
    fn test_parse_list_skips_blanks() {
        let ids = ProviderId::parse_list("exchangerate-api, ,fixer,");
        assert_eq!(ids, vec![ProviderId::exchangerate_api(), ProviderId::fixer()]);
    }
}
