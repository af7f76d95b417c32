//! Sync engine configuration

use chrono::Duration;
use serde::Deserialize;

use crate::clock::{DEFAULT_SAMPLE_CAPACITY, DEFAULT_SAMPLE_MAX_AGE_HOURS};

/// Tunables for the sync engine. All fields have sensible defaults; a
/// deserialized config only needs to name what it overrides.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    /// An `Auto` sync within this window of the last successful run is a
    /// push-only run; outside it, a full run
    pub full_sync_threshold_secs: i64,
    /// Upper bound on concurrent per-record pushes within one wave
    pub push_parallelism: usize,
    /// Clock correction sample ring capacity
    pub clock_sample_capacity: usize,
    /// Clock correction samples older than this are purged
    pub clock_sample_max_age_hours: i64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            full_sync_threshold_secs: 3600,
            push_parallelism: 4,
            clock_sample_capacity: DEFAULT_SAMPLE_CAPACITY,
            clock_sample_max_age_hours: DEFAULT_SAMPLE_MAX_AGE_HOURS,
        }
    }
}

impl SyncConfig {
    /// Set the window within which `Auto` resolves to a push-only run
    #[must_use]
    pub const fn with_full_sync_threshold_secs(mut self, secs: i64) -> Self {
        self.full_sync_threshold_secs = secs;
        self
    }

    /// Set the per-wave push concurrency bound
    #[must_use]
    pub const fn with_push_parallelism(mut self, parallelism: usize) -> Self {
        self.push_parallelism = parallelism;
        self
    }

    #[must_use]
    pub fn full_sync_threshold(&self) -> Duration {
        Duration::seconds(self.full_sync_threshold_secs)
    }

    #[must_use]
    pub fn clock_sample_max_age(&self) -> Duration {
        Duration::hours(self.clock_sample_max_age_hours)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = SyncConfig::default();
        assert_eq!(config.full_sync_threshold_secs, 3600);
        assert_eq!(config.push_parallelism, 4);
        assert_eq!(config.clock_sample_capacity, 21);
    }

    #[test]
    fn partial_config_deserializes_over_defaults() {
        let config: SyncConfig = serde_json::from_str(r#"{"push_parallelism": 2}"#).unwrap();
        assert_eq!(config.push_parallelism, 2);
        assert_eq!(config.full_sync_threshold_secs, 3600);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(serde_json::from_str::<SyncConfig>(r#"{"unknown": 1}"#).is_err());
    }
}
