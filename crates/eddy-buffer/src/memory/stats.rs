//! Ledger statistics and pressure levels.

use std::fmt;

use serde::{Deserialize, Serialize};

/// How close the ledger is to its ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PressureLevel {
    /// Below 70% of the ceiling.
    Normal,
    /// 70% to 85%.
    Moderate,
    /// 85% to 95%.
    High,
    /// Above 95%, or over the ceiling through an oversize grant.
    Critical,
}

impl PressureLevel {
    /// Classifies a usage fraction (allocated / max).
    #[must_use]
    pub fn from_usage(usage: f64) -> Self {
        if usage > 0.95 {
            Self::Critical
        } else if usage >= 0.85 {
            Self::High
        } else if usage >= 0.70 {
            Self::Moderate
        } else {
            Self::Normal
        }
    }

    /// Whether consumers should drain streams that are below the flush threshold.
    #[must_use]
    pub fn should_drain_eagerly(self) -> bool {
        self >= Self::High
    }
}

impl fmt::Display for PressureLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Normal => "normal",
            Self::Moderate => "moderate",
            Self::High => "high",
            Self::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Point-in-time view of the memory ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStats {
    /// Bytes currently charged.
    pub allocated_bytes: u64,
    /// The configured ceiling.
    pub max_bytes: u64,
    /// Highest value `allocated_bytes` has reached.
    pub peak_bytes: u64,
    /// Producers currently blocked in `reserve`.
    pub waiting_producers: usize,
    /// Size of the outstanding oversize grant, if one exists.
    pub oversize_bytes: Option<u64>,
}

impl MemoryStats {
    /// Allocated bytes as a fraction of the ceiling.
    #[must_use]
    pub fn usage(&self) -> f64 {
        if self.max_bytes == 0 {
            return 1.0;
        }
        self.allocated_bytes as f64 / self.max_bytes as f64
    }

    /// Allocated bytes as a percentage of the ceiling.
    #[must_use]
    pub fn percent_used(&self) -> f64 {
        self.usage() * 100.0
    }

    /// Pressure level for the current usage.
    #[must_use]
    pub fn pressure_level(&self) -> PressureLevel {
        PressureLevel::from_usage(self.usage())
    }

    /// Bytes that can still be granted without exceeding the ceiling.
    #[must_use]
    pub fn available_bytes(&self) -> u64 {
        self.max_bytes.saturating_sub(self.allocated_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pressure_thresholds() {
        assert_eq!(PressureLevel::from_usage(0.0), PressureLevel::Normal);
        assert_eq!(PressureLevel::from_usage(0.69), PressureLevel::Normal);
        assert_eq!(PressureLevel::from_usage(0.70), PressureLevel::Moderate);
        assert_eq!(PressureLevel::from_usage(0.85), PressureLevel::High);
        assert_eq!(PressureLevel::from_usage(0.96), PressureLevel::Critical);
        assert_eq!(PressureLevel::from_usage(1.5), PressureLevel::Critical);
    }

    #[test]
    fn test_drain_eagerly() {
        assert!(!PressureLevel::Moderate.should_drain_eagerly());
        assert!(PressureLevel::High.should_drain_eagerly());
        assert!(PressureLevel::Critical.should_drain_eagerly());
    }

    #[test]
    fn test_stats_usage() {
        let stats = MemoryStats {
            allocated_bytes: 750,
            max_bytes: 1000,
            peak_bytes: 900,
            waiting_producers: 0,
            oversize_bytes: None,
        };
        assert!((stats.percent_used() - 75.0).abs() < f64::EPSILON);
        assert_eq!(stats.pressure_level(), PressureLevel::Moderate);
        assert_eq!(stats.available_bytes(), 250);
    }
}
