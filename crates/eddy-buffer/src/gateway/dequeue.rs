//! Consumer-side batch dispatch.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::batch::Batch;
use crate::manager::Shared;
use crate::memory::MemoryStats;
use crate::stream::{PerStreamBuffer, StreamStats};

/// Why a stream was chosen for draining.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DrainTrigger {
    /// The stream buffers at least the flush threshold.
    Size,
    /// Memory is tight or producers are blocked, so any data is drained.
    Pressure,
    /// The stream's oldest entry has waited past the maximum buffer age.
    Age,
    /// Input has ended and whatever is left is drained.
    EndOfInput,
}

struct Candidate {
    buffer: Arc<PerStreamBuffer>,
    trigger: DrainTrigger,
    bytes: u64,
    age: Duration,
}

/// Hands batches to flush workers.
#[derive(Clone)]
pub struct DequeueGateway {
    shared: Arc<Shared>,
}

impl DequeueGateway {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Selects a stream and leases its leading entries as a [`Batch`].
    ///
    /// Streams with a batch already in flight are skipped, so concurrent
    /// callers always receive disjoint batches. Returns `None` when no idle
    /// stream is due for draining.
    #[must_use]
    pub fn next_batch(&self) -> Option<Batch> {
        self.dispatch(false)
    }

    /// Like [`next_batch`](Self::next_batch) but ignores the size and age
    /// triggers, so any idle non-empty stream is drained.
    ///
    /// Workers switch to this once producers have finished, to flush the
    /// tail of every stream.
    #[must_use]
    pub fn next_final_batch(&self) -> Option<Batch> {
        self.dispatch(true)
    }

    fn dispatch(&self, end_of_input: bool) -> Option<Batch> {
        let config = &self.shared.config;
        for candidate in self.candidates(end_of_input) {
            // Another worker may have claimed the stream since the snapshot.
            let Some(entries) = candidate
                .buffer
                .begin_drain(config.max_batch_bytes, config.max_batch_records)
            else {
                continue;
            };
            let batch = Batch::new(Arc::clone(&self.shared), candidate.buffer, entries);
            tracing::debug!(
                stream = %batch.stream(),
                records = batch.len(),
                bytes = batch.estimated_bytes(),
                trigger = ?candidate.trigger,
                "batch dispatched"
            );
            return Some(batch);
        }
        None
    }

    /// Emits checkpoint markers that are already safe, through the manager's sink.
    ///
    /// Idle workers call this so that a marker registered after its records
    /// were flushed is not held back until the next batch closes.
    pub fn flush_states(&self) -> usize {
        self.shared.emit_released()
    }

    /// Whether any stream holds records not yet leased to a batch.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        let now = Instant::now();
        self.shared
            .buffers()
            .iter()
            .map(|b| b.stats(now))
            .any(|s| s.records > s.in_flight_records)
    }

    /// Idle streams due for draining, in order of preference.
    fn candidates(&self, end_of_input: bool) -> Vec<Candidate> {
        let now = Instant::now();
        let memory = self.shared.accountant.stats();
        let mut candidates: Vec<Candidate> = self
            .shared
            .buffers()
            .into_iter()
            .filter_map(|buffer| {
                let stats = buffer.stats(now);
                let trigger = self.trigger(&stats, &memory, end_of_input)?;
                Some(Candidate {
                    trigger,
                    bytes: stats.bytes,
                    age: stats.oldest_age.unwrap_or_default(),
                    buffer,
                })
            })
            .collect();

        // Size and pressure prefer the largest stream, age the oldest.
        candidates.sort_by(|a, b| {
            a.trigger.cmp(&b.trigger).then_with(|| match a.trigger {
                DrainTrigger::Age => b.age.cmp(&a.age),
                DrainTrigger::Size | DrainTrigger::Pressure | DrainTrigger::EndOfInput => {
                    b.bytes.cmp(&a.bytes)
                }
            })
        });
        candidates
    }

    fn trigger(
        &self,
        stats: &StreamStats,
        memory: &MemoryStats,
        end_of_input: bool,
    ) -> Option<DrainTrigger> {
        if stats.records == 0 || stats.in_flight_records > 0 {
            return None;
        }
        let config = &self.shared.config;
        if stats.bytes >= config.min_flush_threshold_bytes {
            Some(DrainTrigger::Size)
        } else if memory.pressure_level().should_drain_eagerly() || memory.waiting_producers > 0 {
            Some(DrainTrigger::Pressure)
        } else if stats.oldest_age.is_some_and(|age| age >= config.max_buffer_age()) {
            Some(DrainTrigger::Age)
        } else if end_of_input {
            Some(DrainTrigger::EndOfInput)
        } else {
            None
        }
    }
}

impl std::fmt::Debug for DequeueGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DequeueGateway").finish_non_exhaustive()
    }
}
