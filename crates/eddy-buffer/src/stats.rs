//! Buffer-wide statistics and the human-readable diagnostics report.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::checkpoint::TrackerBacklog;
use crate::memory::MemoryStats;
use crate::stream::StreamStats;

/// Formats bytes as a human-readable string.
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} bytes")
    }
}

/// Snapshot of the whole buffer.
///
/// Each part is read under its own lock, so the parts are individually
/// consistent but may be a few operations apart from each other.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferStats {
    /// The memory ledger.
    pub memory: MemoryStats,
    /// One entry per known stream, sorted by stream.
    pub streams: Vec<StreamStats>,
    /// Checkpoint backlog.
    pub checkpoints: TrackerBacklog,
    /// Batches handed out and not yet closed.
    pub batches_in_flight: usize,
    /// Batches closed successfully.
    pub batches_closed: u64,
    /// Batches failed or abandoned.
    pub batches_failed: u64,
}

impl BufferStats {
    /// Records buffered across all streams.
    #[must_use]
    pub fn buffered_records(&self) -> usize {
        self.streams.iter().map(|s| s.records).sum()
    }

    /// Estimated bytes buffered across all streams.
    #[must_use]
    pub fn buffered_bytes(&self) -> u64 {
        self.streams.iter().map(|s| s.bytes).sum()
    }
}

impl fmt::Display for BufferStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "memory: {} of {} allocated ({:.1}% used, pressure {}), {} producers waiting",
            format_bytes(self.memory.allocated_bytes),
            format_bytes(self.memory.max_bytes),
            self.memory.percent_used(),
            self.memory.pressure_level(),
            self.memory.waiting_producers,
        )?;
        for stream in &self.streams {
            writeln!(
                f,
                "  stream {}: {} records, {}, {} in flight",
                stream.stream,
                stream.records,
                format_bytes(stream.bytes),
                stream.in_flight_records,
            )?;
        }
        write!(
            f,
            "checkpoints: {} scope, {} pending markers, {} outstanding records, {} batches in flight",
            self.checkpoints.mode,
            self.checkpoints.pending_markers,
            self.checkpoints.outstanding_records,
            self.batches_in_flight,
        )
    }
}
