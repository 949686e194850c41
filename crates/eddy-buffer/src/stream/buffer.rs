//! The queue behind one stream.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use eddy_common::types::{StreamId, Watermark};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::entry::Entry;

/// Whether a consumer currently holds a batch from this stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DrainState {
    /// No batch in flight.
    Idle,
    /// The first `records` entries (worth `bytes`) belong to an open batch.
    Draining {
        /// Entries reserved by the batch.
        records: usize,
        /// Their estimated bytes.
        bytes: u64,
    },
}

/// Point-in-time view of one stream's buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamStats {
    /// The stream.
    pub stream: StreamId,
    /// Entries currently buffered, including those in an open batch.
    pub records: usize,
    /// Their estimated bytes.
    pub bytes: u64,
    /// Highest `bytes` observed.
    pub max_observed_bytes: u64,
    /// Entries reserved by an in-flight batch.
    pub in_flight_records: usize,
    /// Age of the oldest buffered entry.
    pub oldest_age: Option<Duration>,
    /// Entries ever appended.
    pub total_enqueued: u64,
    /// Entries ever committed.
    pub total_flushed: u64,
}

struct StreamState {
    entries: VecDeque<Entry>,
    current_bytes: u64,
    max_observed_bytes: u64,
    drain: DrainState,
    last_watermark: Watermark,
    total_enqueued: u64,
    total_flushed: u64,
}

/// A thread-safe, ordered, byte-accounted queue for one stream.
///
/// Appends may run concurrently with a drain. Only one batch may be in
/// flight at a time: [`begin_drain`](Self::begin_drain) marks the stream
/// `Draining` and [`commit`](Self::commit) returns it to `Idle`.
///
/// Invariant: `bytes()` equals the sum of the estimated bytes of all
/// contained entries.
pub struct PerStreamBuffer {
    stream: StreamId,
    state: Mutex<StreamState>,
}

impl PerStreamBuffer {
    /// Creates an empty buffer for `stream`.
    #[must_use]
    pub fn new(stream: StreamId) -> Self {
        Self {
            stream,
            state: Mutex::new(StreamState {
                entries: VecDeque::new(),
                current_bytes: 0,
                max_observed_bytes: 0,
                drain: DrainState::Idle,
                last_watermark: Watermark::ZERO,
                total_enqueued: 0,
                total_flushed: 0,
            }),
        }
    }

    /// The stream this buffer holds.
    #[must_use]
    pub fn stream(&self) -> &StreamId {
        &self.stream
    }

    /// Appends an entry at the back of the queue.
    ///
    /// # Panics
    ///
    /// Panics if the entry's watermark does not exceed the last appended one.
    pub fn append(&self, entry: Entry) {
        let mut state = self.state.lock();
        Self::push(&mut state, entry);
    }

    /// Builds and appends an entry while holding the queue lock.
    ///
    /// Assigning the watermark inside `make` keeps watermark order and queue
    /// order identical when several producers write the same stream. If
    /// `make` fails nothing is appended.
    pub fn append_with<E>(&self, make: impl FnOnce() -> Result<Entry, E>) -> Result<Watermark, E> {
        let mut state = self.state.lock();
        let entry = make()?;
        let watermark = entry.watermark();
        Self::push(&mut state, entry);
        Ok(watermark)
    }

    fn push(state: &mut StreamState, entry: Entry) {
        assert!(
            entry.watermark() > state.last_watermark,
            "watermark regression: {} appended after {}",
            entry.watermark(),
            state.last_watermark
        );
        state.last_watermark = entry.watermark();
        state.current_bytes += entry.estimated_bytes();
        state.max_observed_bytes = state.max_observed_bytes.max(state.current_bytes);
        state.total_enqueued += 1;
        state.entries.push_back(entry);
    }

    /// Returns up to `max_count` leading entries whose bytes fit `max_bytes`.
    ///
    /// The first entry is always included, even if it alone exceeds
    /// `max_bytes`, so an oversized record cannot wedge the stream. Nothing is
    /// removed.
    #[must_use]
    pub fn peek_batch(&self, max_bytes: u64, max_count: usize) -> Vec<Entry> {
        let state = self.state.lock();
        Self::leading(&state, max_bytes, max_count)
    }

    fn leading(state: &StreamState, max_bytes: u64, max_count: usize) -> Vec<Entry> {
        let mut batch = Vec::new();
        let mut bytes = 0u64;
        for entry in state.entries.iter().take(max_count) {
            let next = bytes + entry.estimated_bytes();
            if !batch.is_empty() && next > max_bytes {
                break;
            }
            bytes = next;
            batch.push(entry.clone());
        }
        batch
    }

    /// Reserves the leading entries for a batch and marks the stream draining.
    ///
    /// Returns `None` if the stream is empty or already has a batch in flight,
    /// so two consumers racing for the same stream never receive overlapping
    /// entries.
    pub fn begin_drain(&self, max_bytes: u64, max_count: usize) -> Option<Vec<Entry>> {
        let mut state = self.state.lock();
        if state.drain != DrainState::Idle || state.entries.is_empty() {
            return None;
        }
        let batch = Self::leading(&state, max_bytes, max_count);
        let bytes = batch.iter().map(Entry::estimated_bytes).sum();
        state.drain = DrainState::Draining {
            records: batch.len(),
            bytes,
        };
        Some(batch)
    }

    /// Removes the first `n` entries, ending the in-flight batch.
    ///
    /// Returns the estimated bytes removed.
    ///
    /// # Panics
    ///
    /// Panics unless exactly `n` entries are reserved by an in-flight batch.
    pub fn commit(&self, n: usize) -> u64 {
        let mut state = self.state.lock();
        match state.drain {
            DrainState::Draining { records, .. } if records == n => {}
            other => panic!(
                "commit of {n} entries on stream {} in state {other:?}",
                self.stream
            ),
        }

        let mut removed = 0u64;
        for entry in state.entries.drain(..n) {
            removed += entry.estimated_bytes();
        }
        assert!(
            state.current_bytes >= removed,
            "stream {} byte count underflow",
            self.stream
        );
        state.current_bytes -= removed;
        state.total_flushed += n as u64;
        state.drain = DrainState::Idle;
        removed
    }

    /// Number of buffered entries, including those in an open batch.
    #[must_use]
    pub fn size(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Estimated bytes of all buffered entries.
    #[must_use]
    pub fn bytes(&self) -> u64 {
        self.state.lock().current_bytes
    }

    /// Whether the buffer holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Current drain state.
    #[must_use]
    pub fn drain_state(&self) -> DrainState {
        self.state.lock().drain
    }

    /// Returns a snapshot of this buffer.
    #[must_use]
    pub fn stats(&self, now: Instant) -> StreamStats {
        let state = self.state.lock();
        let in_flight_records = match state.drain {
            DrainState::Idle => 0,
            DrainState::Draining { records, .. } => records,
        };
        StreamStats {
            stream: self.stream.clone(),
            records: state.entries.len(),
            bytes: state.current_bytes,
            max_observed_bytes: state.max_observed_bytes,
            in_flight_records,
            oldest_age: state
                .entries
                .front()
                .map(|e| now.saturating_duration_since(e.admitted_at())),
            total_enqueued: state.total_enqueued,
            total_flushed: state.total_flushed,
        }
    }
}

impl std::fmt::Debug for PerStreamBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("PerStreamBuffer")
            .field("stream", &self.stream)
            .field("records", &state.entries.len())
            .field("bytes", &state.current_bytes)
            .field("drain", &state.drain)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryAccountant;
    use bytes::Bytes;

    fn entry(accountant: &MemoryAccountant, wm: u64, bytes: u64) -> Entry {
        Entry::new(
            StreamId::new("users"),
            Bytes::from(format!("record-{wm}")),
            accountant.reserve(bytes),
            Watermark::new(wm),
        )
    }

    #[test]
    fn test_append_tracks_bytes() {
        let accountant = MemoryAccountant::new(10_000);
        let buffer = PerStreamBuffer::new(StreamId::new("users"));
        buffer.append(entry(&accountant, 1, 100));
        buffer.append(entry(&accountant, 2, 50));

        assert_eq!(buffer.size(), 2);
        assert_eq!(buffer.bytes(), 150);
        assert!(!buffer.is_empty());
    }

    #[test]
    fn test_peek_respects_limits_and_preserves_order() {
        let accountant = MemoryAccountant::new(10_000);
        let buffer = PerStreamBuffer::new(StreamId::new("users"));
        for wm in 1..=5 {
            buffer.append(entry(&accountant, wm, 100));
        }

        let batch = buffer.peek_batch(250, 10);
        let wms: Vec<u64> = batch.iter().map(|e| e.watermark().as_u64()).collect();
        assert_eq!(wms, vec![1, 2]);

        let batch = buffer.peek_batch(10_000, 3);
        assert_eq!(batch.len(), 3);
        // Peeking removes nothing.
        assert_eq!(buffer.size(), 5);
    }

    #[test]
    fn test_peek_always_includes_first_entry() {
        let accountant = MemoryAccountant::new(10_000);
        let buffer = PerStreamBuffer::new(StreamId::new("users"));
        buffer.append(entry(&accountant, 1, 500));
        buffer.append(entry(&accountant, 2, 10));

        let batch = buffer.peek_batch(100, 10);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].estimated_bytes(), 500);
    }

    #[test]
    fn test_single_in_flight_batch() {
        let accountant = MemoryAccountant::new(10_000);
        let buffer = PerStreamBuffer::new(StreamId::new("users"));
        for wm in 1..=4 {
            buffer.append(entry(&accountant, wm, 10));
        }

        let first = buffer.begin_drain(1000, 2).unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(
            buffer.drain_state(),
            DrainState::Draining {
                records: 2,
                bytes: 20
            }
        );
        assert!(buffer.begin_drain(1000, 2).is_none());

        assert_eq!(buffer.commit(2), 20);
        assert_eq!(buffer.drain_state(), DrainState::Idle);

        let second = buffer.begin_drain(1000, 10).unwrap();
        let wms: Vec<u64> = second.iter().map(|e| e.watermark().as_u64()).collect();
        assert_eq!(wms, vec![3, 4]);
    }

    #[test]
    fn test_append_during_drain() {
        let accountant = MemoryAccountant::new(10_000);
        let buffer = PerStreamBuffer::new(StreamId::new("users"));
        buffer.append(entry(&accountant, 1, 10));
        let batch = buffer.begin_drain(1000, 10).unwrap();
        buffer.append(entry(&accountant, 2, 10));

        buffer.commit(batch.len());
        assert_eq!(buffer.size(), 1);
        assert_eq!(buffer.bytes(), 10);
        let stats = buffer.stats(Instant::now());
        assert_eq!(stats.total_enqueued, 2);
        assert_eq!(stats.total_flushed, 1);
        assert_eq!(stats.max_observed_bytes, 20);
    }

    #[test]
    fn test_append_with_failure_appends_nothing() {
        let buffer = PerStreamBuffer::new(StreamId::new("users"));
        let result: Result<Watermark, &str> = buffer.append_with(|| Err("rejected"));
        assert_eq!(result, Err("rejected"));
        assert!(buffer.is_empty());
    }

    #[test]
    #[should_panic(expected = "watermark regression")]
    fn test_watermark_regression_panics() {
        let accountant = MemoryAccountant::new(10_000);
        let buffer = PerStreamBuffer::new(StreamId::new("users"));
        buffer.append(entry(&accountant, 5, 10));
        buffer.append(entry(&accountant, 3, 10));
    }

    #[test]
    #[should_panic(expected = "commit of 1 entries")]
    fn test_commit_without_drain_panics() {
        let accountant = MemoryAccountant::new(10_000);
        let buffer = PerStreamBuffer::new(StreamId::new("users"));
        buffer.append(entry(&accountant, 1, 10));
        buffer.commit(1);
    }
}
