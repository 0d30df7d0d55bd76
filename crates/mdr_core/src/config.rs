//! Engine configuration.
//!
//! # Responsibility
//! - Carry tunables for connection bootstrap, the read cache and logging.
//! - Load from JSON so hosts can keep it next to their own settings.

use serde::Deserialize;
use std::time::Duration;

/// Runtime tunables. Missing JSON keys fall back to [`EngineConfig::default`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How long a writer waits for another transaction's claim.
    pub busy_timeout_ms: u64,
    pub cache_max_capacity: u64,
    /// Zero disables time-based expiry.
    pub cache_ttl_secs: u64,
    pub log_level: String,
}

impl EngineConfig {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn cache_ttl(&self) -> Option<Duration> {
        (self.cache_ttl_secs > 0).then(|| Duration::from_secs(self.cache_ttl_secs))
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
            cache_max_capacity: 10_000,
            cache_ttl_secs: 300,
            log_level: crate::logging::default_log_level().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::EngineConfig;
    use std::time::Duration;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = EngineConfig::from_json(r#"{"busy_timeout_ms": 250}"#).unwrap();
        assert_eq!(config.busy_timeout(), Duration::from_millis(250));
        assert_eq!(config.cache_max_capacity, EngineConfig::default().cache_max_capacity);
    }

    #[test]
    fn zero_ttl_disables_expiry() {
        let config = EngineConfig {
            cache_ttl_secs: 0,
            ..EngineConfig::default()
        };
        assert_eq!(config.cache_ttl(), None);
    }
}
