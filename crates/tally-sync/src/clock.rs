//! Clock skew correction
//!
//! Device clocks drift; duration math must not. Every network round trip
//! yields an estimate of the server clock (`server_time + latency / 2`),
//! and the signed difference to the local clock goes into a bounded sample
//! ring. The exposed correction is the median of the stored samples, which
//! shrugs off latency outliers that would skew a mean.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::store::{Store, STATE_CLOCK_SAMPLES};

/// Default sample ring capacity
pub const DEFAULT_SAMPLE_CAPACITY: usize = 21;
/// Samples older than this are purged whenever a new one is recorded
pub const DEFAULT_SAMPLE_MAX_AGE_HOURS: i64 = 24;

/// One observation of local-vs-server clock disagreement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSample {
    pub measured_at: DateTime<Utc>,
    pub correction_millis: i64,
}

struct Inner {
    samples: VecDeque<TimeSample>,
    cached_correction: Option<Duration>,
}

/// Rolling clock-skew estimator
pub struct ClockService {
    inner: Mutex<Inner>,
    capacity: usize,
    max_age: Duration,
}

impl Default for ClockService {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_CAPACITY, Duration::hours(DEFAULT_SAMPLE_MAX_AGE_HOURS))
    }
}

impl ClockService {
    #[must_use]
    pub fn new(capacity: usize, max_age: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner { samples: VecDeque::new(), cached_correction: None }),
            capacity: capacity.max(1),
            max_age,
        }
    }

    /// Build a service sized per the engine configuration
    #[must_use]
    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.clock_sample_capacity, config.clock_sample_max_age())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| Error::Store("clock service lock poisoned".into()))
    }

    /// Record one round trip: the server-reported time and the measured
    /// round-trip latency, observed at local time `local_now`.
    pub fn record_at(
        &self,
        server_time: DateTime<Utc>,
        round_trip: StdDuration,
        local_now: DateTime<Utc>,
    ) -> Result<()> {
        let latency = Duration::from_std(round_trip)
            .unwrap_or_else(|_| Duration::zero());
        let estimated_server = server_time + latency / 2;
        let correction = estimated_server - local_now;

        let mut inner = self.lock()?;
        let cutoff = local_now - self.max_age;
        inner.samples.retain(|sample| sample.measured_at > cutoff);
        inner.samples.push_back(TimeSample {
            measured_at: local_now,
            correction_millis: correction.num_milliseconds(),
        });
        while inner.samples.len() > self.capacity {
            inner.samples.pop_front();
        }
        inner.cached_correction = None;
        debug!(
            correction_ms = correction.num_milliseconds(),
            samples = inner.samples.len(),
            "recorded clock correction sample"
        );
        Ok(())
    }

    /// Record one round trip against the current wall clock
    pub fn record(&self, server_time: DateTime<Utc>, round_trip: StdDuration) -> Result<()> {
        self.record_at(server_time, round_trip, Utc::now())
    }

    /// Median correction across stored samples; zero with no samples.
    /// Cached until the next sample or reload.
    pub fn correction(&self) -> Result<Duration> {
        let mut inner = self.lock()?;
        if let Some(cached) = inner.cached_correction {
            return Ok(cached);
        }
        let correction = median(inner.samples.iter().map(|s| s.correction_millis));
        inner.cached_correction = Some(correction);
        Ok(correction)
    }

    /// Corrected wall-clock time
    pub fn now(&self) -> Result<DateTime<Utc>> {
        Ok(Utc::now() + self.correction()?)
    }

    /// Persist the sample ring so the correction survives restarts
    pub fn save<S: Store>(&self, store: &S) -> Result<()> {
        let inner = self.lock()?;
        let samples: Vec<TimeSample> = inner.samples.iter().copied().collect();
        store.save_state(STATE_CLOCK_SAMPLES, &serde_json::to_string(&samples)?)
    }

    /// Reload samples from the store, invalidating the cached correction
    pub fn load<S: Store>(&self, store: &S) -> Result<()> {
        let Some(raw) = store.load_state(STATE_CLOCK_SAMPLES)? else {
            return Ok(());
        };
        let samples: Vec<TimeSample> = serde_json::from_str(&raw)?;
        let mut inner = self.lock()?;
        inner.samples = samples.into_iter().collect();
        while inner.samples.len() > self.capacity {
            inner.samples.pop_front();
        }
        inner.cached_correction = None;
        Ok(())
    }
}

/// Median of the values; even counts average the two middles after a
/// stable numeric sort.
fn median(values: impl Iterator<Item = i64>) -> Duration {
    let mut sorted: Vec<i64> = values.collect();
    if sorted.is_empty() {
        return Duration::zero();
    }
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    let millis = if sorted.len() % 2 == 1 {
        sorted[mid]
    } else {
        (sorted[mid - 1] + sorted[mid]) / 2
    };
    Duration::milliseconds(millis)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::store::MemoryStore;

    fn record_correction(service: &ClockService, now: DateTime<Utc>, millis: i64) {
        // Zero latency makes the implied correction exactly `millis`
        service
            .record_at(now + Duration::milliseconds(millis), StdDuration::ZERO, now)
            .unwrap();
    }

    #[test]
    fn no_samples_means_zero_correction() {
        let service = ClockService::default();
        assert_eq!(service.correction().unwrap(), Duration::zero());
    }

    #[test]
    fn odd_sample_count_takes_middle_value() {
        let service = ClockService::default();
        let now = Utc::now();
        record_correction(&service, now, 100);
        record_correction(&service, now, -50);
        record_correction(&service, now, 20);
        assert_eq!(service.correction().unwrap(), Duration::milliseconds(20));
    }

    #[test]
    fn even_sample_count_averages_two_middles() {
        let service = ClockService::default();
        let now = Utc::now();
        record_correction(&service, now, 100);
        record_correction(&service, now, -50);
        assert_eq!(service.correction().unwrap(), Duration::milliseconds(25));
    }

    #[test]
    fn latency_half_is_added_to_server_time() {
        let service = ClockService::default();
        let now = Utc::now();
        service
            .record_at(now, StdDuration::from_millis(200), now)
            .unwrap();
        assert_eq!(service.correction().unwrap(), Duration::milliseconds(100));
    }

    #[test]
    fn ring_is_bounded() {
        let service = ClockService::new(3, Duration::hours(24));
        let now = Utc::now();
        for millis in [10, 20, 30, 1000] {
            record_correction(&service, now, millis);
        }
        // Oldest sample (10) evicted; median of [20, 30, 1000] is 30
        assert_eq!(service.correction().unwrap(), Duration::milliseconds(30));
    }

    #[test]
    fn stale_samples_are_purged_on_record() {
        let service = ClockService::default();
        let yesterday = Utc::now() - Duration::hours(30);
        record_correction(&service, yesterday, 5000);
        record_correction(&service, Utc::now(), 10);
        assert_eq!(service.correction().unwrap(), Duration::milliseconds(10));
    }

    #[test]
    fn cache_invalidated_by_new_sample() {
        let service = ClockService::default();
        let now = Utc::now();
        record_correction(&service, now, 100);
        assert_eq!(service.correction().unwrap(), Duration::milliseconds(100));
        record_correction(&service, now, 200);
        assert_eq!(service.correction().unwrap(), Duration::milliseconds(150));
    }

    #[test]
    fn samples_survive_save_and_load() {
        let store = MemoryStore::new();
        let service = ClockService::default();
        let now = Utc::now();
        record_correction(&service, now, 40);
        service.save(&store).unwrap();

        let restored = ClockService::default();
        restored.load(&store).unwrap();
        assert_eq!(restored.correction().unwrap(), Duration::milliseconds(40));
    }

    #[test]
    fn median_outlier_resistance() {
        let service = ClockService::default();
        let now = Utc::now();
        for millis in [10, 12, 11, 9000] {
            record_correction(&service, now, millis);
        }
        // Mean would be ~2258ms; median stays near the cluster
        assert_eq!(service.correction().unwrap(), Duration::milliseconds(11));
    }
}
