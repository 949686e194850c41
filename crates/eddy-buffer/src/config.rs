//! Buffer configuration.

use std::time::Duration;

use eddy_common::utils::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Fraction of system memory used for the default ceiling.
const DEFAULT_MEMORY_FRACTION: f64 = 0.3;

/// Ceiling used when system memory cannot be detected (1 GiB).
const FALLBACK_MEMORY_BYTES: u64 = 1024 * 1024 * 1024;

/// Configuration for a [`BufferManager`](crate::BufferManager).
///
/// Every field has a default, so a partial JSON document is a valid
/// configuration:
///
/// ```
/// use eddy_buffer::BufferConfig;
///
/// let config = BufferConfig::default()
///     .with_max_memory_bytes(64 * 1024 * 1024)
///     .with_max_batch_records(10_000);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Global ceiling on estimated bytes held by the buffer.
    pub max_memory_bytes: u64,
    /// A stream becomes eligible for draining once it buffers this many bytes.
    pub min_flush_threshold_bytes: u64,
    /// Upper bound on the estimated bytes in one batch.
    pub max_batch_bytes: u64,
    /// Upper bound on the number of records in one batch.
    pub max_batch_records: usize,
    /// Streams whose oldest entry is older than this many milliseconds are
    /// drained regardless of size.
    pub max_buffer_age_ms: u64,
    /// Interval of the diagnostics report in milliseconds. Zero disables the reporter.
    pub diagnostics_interval_ms: u64,
    /// Serialized payload length is multiplied by this to estimate in-memory size.
    pub size_multiplier: u64,
    /// Fixed bytes added to every entry's estimate.
    pub entry_overhead_bytes: u64,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_memory_bytes: Self::default_memory_ceiling(),
            min_flush_threshold_bytes: 10 * 1024 * 1024,
            max_batch_bytes: 200 * 1024 * 1024,
            max_batch_records: 100_000,
            max_buffer_age_ms: 300_000,
            diagnostics_interval_ms: 10_000,
            size_multiplier: 2,
            entry_overhead_bytes: 0,
        }
    }
}

impl BufferConfig {
    /// Returns a configuration with the given memory ceiling and defaults otherwise.
    #[must_use]
    pub fn with_budget(max_memory_bytes: u64) -> Self {
        Self::default().with_max_memory_bytes(max_memory_bytes)
    }

    /// Detects total system memory in bytes, or 0 if unavailable.
    #[must_use]
    pub fn detect_system_memory() -> u64 {
        let mut system = sysinfo::System::new();
        system.refresh_memory();
        system.total_memory()
    }

    /// The default ceiling: a fraction of system memory.
    fn default_memory_ceiling() -> u64 {
        match Self::detect_system_memory() {
            0 => FALLBACK_MEMORY_BYTES,
            total => (total as f64 * DEFAULT_MEMORY_FRACTION) as u64,
        }
    }

    /// Sets the global memory ceiling.
    pub fn with_max_memory_bytes(mut self, bytes: u64) -> Self {
        self.max_memory_bytes = bytes;
        self
    }

    /// Sets the minimum buffered bytes before a stream is drained.
    pub fn with_min_flush_threshold_bytes(mut self, bytes: u64) -> Self {
        self.min_flush_threshold_bytes = bytes;
        self
    }

    /// Sets the batch byte budget.
    pub fn with_max_batch_bytes(mut self, bytes: u64) -> Self {
        self.max_batch_bytes = bytes;
        self
    }

    /// Sets the batch record budget.
    pub fn with_max_batch_records(mut self, records: usize) -> Self {
        self.max_batch_records = records;
        self
    }

    /// Sets the age after which a stream is drained regardless of size.
    pub fn with_max_buffer_age(mut self, age: Duration) -> Self {
        self.max_buffer_age_ms = duration_millis(age);
        self
    }

    /// Sets the diagnostics interval; `Duration::ZERO` disables the reporter.
    pub fn with_diagnostics_interval(mut self, interval: Duration) -> Self {
        self.diagnostics_interval_ms = duration_millis(interval);
        self
    }

    /// Sets the size-estimation heuristic.
    pub fn with_size_estimate(mut self, multiplier: u64, overhead_bytes: u64) -> Self {
        self.size_multiplier = multiplier;
        self.entry_overhead_bytes = overhead_bytes;
        self
    }

    /// Age after which a stream is drained regardless of size.
    #[must_use]
    pub fn max_buffer_age(&self) -> Duration {
        Duration::from_millis(self.max_buffer_age_ms)
    }

    /// Diagnostics interval, or `None` when disabled.
    #[must_use]
    pub fn diagnostics_interval(&self) -> Option<Duration> {
        match self.diagnostics_interval_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// Checks the configuration for values the buffer cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.max_memory_bytes == 0 {
            return Err(Error::InvalidConfig(
                "max_memory_bytes must be greater than zero".to_string(),
            ));
        }
        if self.max_batch_bytes == 0 {
            return Err(Error::InvalidConfig(
                "max_batch_bytes must be greater than zero".to_string(),
            ));
        }
        if self.max_batch_records == 0 {
            return Err(Error::InvalidConfig(
                "max_batch_records must be greater than zero".to_string(),
            ));
        }
        if self.size_multiplier == 0 && self.entry_overhead_bytes == 0 {
            return Err(Error::InvalidConfig(
                "size estimate would be zero for every entry".to_string(),
            ));
        }
        Ok(())
    }
}

/// Whole milliseconds in `duration`, rounding a non-zero sub-millisecond
/// duration up so it is never mistaken for "disabled".
fn duration_millis(duration: Duration) -> u64 {
    let ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
    if ms == 0 && !duration.is_zero() { 1 } else { ms }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = BufferConfig::default();
        assert!(config.max_memory_bytes > 0);
        assert!(config.validate().is_ok());
        assert_eq!(config.diagnostics_interval(), Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_builder_methods() {
        let config = BufferConfig::with_budget(1000)
            .with_min_flush_threshold_bytes(100)
            .with_max_batch_bytes(500)
            .with_max_batch_records(2)
            .with_max_buffer_age(Duration::from_secs(1))
            .with_diagnostics_interval(Duration::ZERO)
            .with_size_estimate(1, 0);

        assert_eq!(config.max_memory_bytes, 1000);
        assert_eq!(config.min_flush_threshold_bytes, 100);
        assert_eq!(config.max_batch_bytes, 500);
        assert_eq!(config.max_batch_records, 2);
        assert_eq!(config.max_buffer_age(), Duration::from_secs(1));
        assert_eq!(config.diagnostics_interval(), None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_sub_second_durations_are_kept() {
        let config = BufferConfig::default()
            .with_diagnostics_interval(Duration::from_millis(500))
            .with_max_buffer_age(Duration::from_millis(500));
        assert_eq!(config.diagnostics_interval(), Some(Duration::from_millis(500)));
        assert_eq!(config.max_buffer_age(), Duration::from_millis(500));

        let config = BufferConfig::default().with_diagnostics_interval(Duration::from_micros(10));
        assert_eq!(config.diagnostics_interval(), Some(Duration::from_millis(1)));
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let config = BufferConfig::with_budget(0);
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let config = BufferConfig::with_budget(10).with_max_batch_records(0);
        assert!(config.validate().is_err());

        let config = BufferConfig::with_budget(10).with_size_estimate(0, 0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: BufferConfig =
            serde_json::from_str(r#"{"max_memory_bytes": 4096, "max_batch_records": 7}"#)
                .unwrap();
        assert_eq!(config.max_memory_bytes, 4096);
        assert_eq!(config.max_batch_records, 7);
        assert_eq!(config.size_multiplier, 2);
        assert_eq!(config.max_buffer_age(), Duration::from_secs(300));
    }
}
