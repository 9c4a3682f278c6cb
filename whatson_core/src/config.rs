//! Engine tunables.
//!
//! Everything has a sensible default; a TOML file can override any subset.

use serde::{Deserialize, Serialize};

use crate::error::SourceError;

/// Default per-source timeout in milliseconds.
pub const DEFAULT_SOURCE_TIMEOUT_MS: u64 = 15_000;

/// Default cap on the synchronous result list.
pub const DEFAULT_MAX_RESULTS: usize = 15;

/// Default dedup time-bucket width in minutes.
pub const DEFAULT_BUCKET_MINUTES: i64 = 90;

/// Default normalized-title prefix length used in the dedupe key.
pub const DEFAULT_TITLE_PREFIX_LEN: usize = 40;

/// Default background poll interval in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;

/// Default background poll wall-clock deadline in milliseconds.
pub const DEFAULT_POLL_DEADLINE_MS: u64 = 300_000;

/// Default background poll attempt budget.
pub const DEFAULT_POLL_MAX_ATTEMPTS: u32 = 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Per-source search timeout (ms); a slower source is treated as empty.
    #[serde(default = "default_source_timeout_ms")]
    pub source_timeout_ms: u64,

    /// Maximum events in the synchronous response.
    #[serde(default = "default_max_results")]
    pub max_results: usize,

    /// Width of the dedup start-time bucket (minutes).
    #[serde(default = "default_bucket_minutes")]
    pub bucket_minutes: i64,

    /// Normalized-title prefix length for the dedupe key.
    #[serde(default = "default_title_prefix_len")]
    pub title_prefix_len: usize,

    /// Background job poll interval (ms).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Background job wall-clock deadline (ms).
    #[serde(default = "default_poll_deadline_ms")]
    pub poll_deadline_ms: u64,

    /// Background job poll attempt budget.
    #[serde(default = "default_poll_max_attempts")]
    pub poll_max_attempts: u32,
}

fn default_source_timeout_ms() -> u64 {
    DEFAULT_SOURCE_TIMEOUT_MS
}

fn default_max_results() -> usize {
    DEFAULT_MAX_RESULTS
}

fn default_bucket_minutes() -> i64 {
    DEFAULT_BUCKET_MINUTES
}

fn default_title_prefix_len() -> usize {
    DEFAULT_TITLE_PREFIX_LEN
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_poll_deadline_ms() -> u64 {
    DEFAULT_POLL_DEADLINE_MS
}

fn default_poll_max_attempts() -> u32 {
    DEFAULT_POLL_MAX_ATTEMPTS
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            source_timeout_ms: DEFAULT_SOURCE_TIMEOUT_MS,
            max_results: DEFAULT_MAX_RESULTS,
            bucket_minutes: DEFAULT_BUCKET_MINUTES,
            title_prefix_len: DEFAULT_TITLE_PREFIX_LEN,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            poll_deadline_ms: DEFAULT_POLL_DEADLINE_MS,
            poll_max_attempts: DEFAULT_POLL_MAX_ATTEMPTS,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, SourceError> {
        toml::from_str(raw).map_err(|e| SourceError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_results, 15);
        assert_eq!(config.bucket_minutes, 90);
        assert_eq!(config.poll_max_attempts, 60);
    }

    #[test]
    fn partial_toml_override() {
        let config = EngineConfig::from_toml_str(
            r#"
            max_results = 5
            poll_interval_ms = 1000
            "#,
        )
        .unwrap();
        assert_eq!(config.max_results, 5);
        assert_eq!(config.poll_interval_ms, 1000);
        // untouched fields keep their defaults
        assert_eq!(config.source_timeout_ms, DEFAULT_SOURCE_TIMEOUT_MS);
    }

    #[test]
    fn bad_toml_is_a_config_error() {
        let err = EngineConfig::from_toml_str("max_results = \"lots\"").unwrap_err();
        assert_eq!(err.code_str(), "config_error");
    }
}
