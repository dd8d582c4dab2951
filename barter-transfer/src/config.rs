use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Reconciliation settings of the [`AssetTransferModule`](crate::module::AssetTransferModule).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct TransferConfig {
    /// Number of recent deposits requested from each exchange when correlating.
    pub deposit_history_limit: u32,
    /// Seconds after creation a completed withdrawal may remain without an observed deposit
    /// before the transfer fails. `None` waits forever.
    pub deposit_timeout_secs: Option<u64>,
    /// Polls that may scan every other exchange for an unknown destination before the
    /// transfer fails. `None` scans forever.
    pub max_discovery_scans: Option<u32>,
    /// Suggested delay between reconciliation polls.
    pub poll_interval_ms: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            deposit_history_limit: 20,
            deposit_timeout_secs: Some(86_400),
            max_discovery_scans: Some(240),
            poll_interval_ms: 10_000,
        }
    }
}

impl TransferConfig {
    /// Create from environment variables, falling back to [`Self::default`] for any that are
    /// missing or unparsable:
    /// - `TRANSFER_DEPOSIT_HISTORY_LIMIT`
    /// - `TRANSFER_DEPOSIT_TIMEOUT_SECS` (`none` disables the bound)
    /// - `TRANSFER_MAX_DISCOVERY_SCANS` (`none` disables the bound)
    /// - `TRANSFER_POLL_INTERVAL_MS`
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        Self {
            deposit_history_limit: lookup("TRANSFER_DEPOSIT_HISTORY_LIMIT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.deposit_history_limit),
            deposit_timeout_secs: lookup("TRANSFER_DEPOSIT_TIMEOUT_SECS")
                .map_or(defaults.deposit_timeout_secs, |v| {
                    parse_bound(&v, defaults.deposit_timeout_secs)
                }),
            max_discovery_scans: lookup("TRANSFER_MAX_DISCOVERY_SCANS")
                .map_or(defaults.max_discovery_scans, |v| {
                    parse_bound(&v, defaults.max_discovery_scans)
                }),
            poll_interval_ms: lookup("TRANSFER_POLL_INTERVAL_MS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.poll_interval_ms),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn deposit_timeout(&self) -> Option<chrono::Duration> {
        self.deposit_timeout_secs
            .and_then(|secs| i64::try_from(secs).ok())
            .map(chrono::Duration::seconds)
    }
}

fn parse_bound<T>(value: &str, default: Option<T>) -> Option<T>
where
    T: std::str::FromStr,
{
    if value.trim().eq_ignore_ascii_case("none") {
        return None;
    }
    value.trim().parse().ok().or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars = vars
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect::<HashMap<_, _>>();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_from_lookup_defaults_when_unset() {
        assert_eq!(TransferConfig::from_lookup(lookup(&[])), TransferConfig::default());
    }

    #[test]
    fn test_from_lookup_overrides_and_disables_bounds() {
        let config = TransferConfig::from_lookup(lookup(&[
            ("TRANSFER_DEPOSIT_HISTORY_LIMIT", "50"),
            ("TRANSFER_DEPOSIT_TIMEOUT_SECS", "none"),
            ("TRANSFER_MAX_DISCOVERY_SCANS", "12"),
            ("TRANSFER_POLL_INTERVAL_MS", "not-a-number"),
        ]));

        assert_eq!(
            config,
            TransferConfig {
                deposit_history_limit: 50,
                deposit_timeout_secs: None,
                max_discovery_scans: Some(12),
                poll_interval_ms: 10_000,
            }
        );
        assert_eq!(config.deposit_timeout(), None);
    }

    #[test]
    fn test_deposit_timeout_duration() {
        let config = TransferConfig::default();
        assert_eq!(config.deposit_timeout(), Some(chrono::Duration::hours(24)));
        assert_eq!(config.poll_interval(), Duration::from_secs(10));
    }
}
