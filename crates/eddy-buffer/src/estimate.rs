//! Estimated in-memory size of a buffered payload.
//!
//! The estimate only has to be deterministic and monotone in the payload
//! length: the ledger charges it on admission and refunds the identical
//! value when the entry leaves the buffer.

use crate::config::BufferConfig;

/// Computes `len * multiplier + overhead`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeEstimator {
    multiplier: u64,
    overhead: u64,
}

impl SizeEstimator {
    /// Creates an estimator.
    #[must_use]
    pub const fn new(multiplier: u64, overhead: u64) -> Self {
        Self {
            multiplier,
            overhead,
        }
    }

    /// Creates an estimator from the configured heuristic.
    #[must_use]
    pub fn from_config(config: &BufferConfig) -> Self {
        Self::new(config.size_multiplier, config.entry_overhead_bytes)
    }

    /// Estimated bytes for a payload of `len` serialized bytes.
    #[inline]
    #[must_use]
    pub fn estimate(&self, len: usize) -> u64 {
        (len as u64)
            .saturating_mul(self.multiplier)
            .saturating_add(self.overhead)
    }
}
