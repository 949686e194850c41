//! A leased run of entries from one stream.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use bytes::Bytes;
use eddy_common::types::{StreamId, Watermark};

use crate::checkpoint::CheckpointMarker;
use crate::manager::Shared;
use crate::memory::Reservation;
use crate::stream::{Entry, PerStreamBuffer};

/// Entries handed to a flush worker.
///
/// While a batch is open its stream is `Draining` and no other batch of that
/// stream can be dispatched. A batch must end in exactly one of:
///
/// - [`close`](Self::close): the data was written. Entries are removed, their
///   memory is refunded and any checkpoint they unblock is emitted.
/// - [`fail`](Self::fail): the write failed. Entries are removed and their
///   memory refunded, but no checkpoint advances and the manager refuses
///   further records.
///
/// Dropping an open batch is treated like `fail`.
#[must_use = "a batch must be closed or failed"]
pub struct Batch {
    shared: Arc<Shared>,
    buffer: Arc<PerStreamBuffer>,
    entries: Vec<Entry>,
    bytes: u64,
    /// Entries already reported through `flush_states`.
    acknowledged: usize,
    finished: bool,
}

impl Batch {
    pub(crate) fn new(shared: Arc<Shared>, buffer: Arc<PerStreamBuffer>, entries: Vec<Entry>) -> Self {
        let bytes = entries.iter().map(Entry::estimated_bytes).sum();
        shared.batches_in_flight.fetch_add(1, Ordering::Relaxed);
        Self {
            shared,
            buffer,
            entries,
            bytes,
            acknowledged: 0,
            finished: false,
        }
    }

    /// The drained stream.
    #[must_use]
    pub fn stream(&self) -> &StreamId {
        self.buffer.stream()
    }

    /// Entries in admission order.
    #[must_use]
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Payloads in admission order.
    pub fn payloads(&self) -> impl Iterator<Item = &Bytes> {
        self.entries.iter().map(Entry::payload)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the batch holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of the entries' estimated bytes.
    #[must_use]
    pub fn estimated_bytes(&self) -> u64 {
        self.bytes
    }

    /// Watermark of the first entry.
    #[must_use]
    pub fn min_watermark(&self) -> Option<Watermark> {
        self.entries.first().map(Entry::watermark)
    }

    /// Watermark of the last entry.
    #[must_use]
    pub fn max_watermark(&self) -> Option<Watermark> {
        self.entries.last().map(Entry::watermark)
    }

    /// Entries not yet reported through [`flush_states`](Self::flush_states).
    #[must_use]
    pub fn unacknowledged(&self) -> usize {
        self.entries.len() - self.acknowledged
    }

    /// Reports that the next `flushed` entries were durably written and emits
    /// every checkpoint that became safe through `emit`.
    ///
    /// Lets a worker that writes the batch in pieces advance checkpoints
    /// before the whole batch is done. Entries are still held, and their
    /// memory still charged, until [`close`](Self::close). Returns the number
    /// of markers emitted; when called from inside a checkpoint sink this is
    /// 0 and the released markers go to that sink instead.
    ///
    /// # Panics
    ///
    /// Panics if more entries are reported than the batch holds.
    pub fn flush_states(&mut self, flushed: usize, emit: impl FnMut(CheckpointMarker)) -> usize {
        self.acknowledge(flushed);
        self.shared.emit_released_with(emit)
    }

    /// Completes a successful flush.
    ///
    /// Removes the entries from the stream, refunds their memory, reports any
    /// entries not yet acknowledged and emits the checkpoints that became safe
    /// through the manager's sink.
    pub fn close(mut self) {
        self.finish();
        let remaining = self.unacknowledged();
        self.acknowledge(remaining);
        self.shared.batches_closed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            stream = %self.stream(),
            records = self.entries.len(),
            bytes = self.bytes,
            "batch closed"
        );
        self.shared.emit_released();
    }

    /// Completes a failed flush.
    ///
    /// Entries are removed and their memory refunded so the buffer does not
    /// leak, but checkpoints covering them stay pending. The manager is
    /// poisoned and every later enqueue fails with `FlushFailed`.
    pub fn fail(mut self, reason: impl Into<String>) {
        let reason = reason.into();
        self.finish();
        self.record_failure(reason);
    }

    fn acknowledge(&mut self, flushed: usize) {
        let end = self.acknowledged + flushed;
        assert!(
            end <= self.entries.len(),
            "acknowledged {end} entries of a {} entry batch on stream {}",
            self.entries.len(),
            self.buffer.stream()
        );
        let watermarks = self.entries[self.acknowledged..end]
            .iter()
            .map(Entry::watermark);
        self.shared
            .tracker
            .record_flushed(self.buffer.stream(), watermarks);
        self.acknowledged = end;
    }

    /// Commits the entries and refunds their memory.
    fn finish(&mut self) {
        self.buffer.commit(self.entries.len());
        let reservation = self
            .entries
            .iter()
            .map(Entry::reservation)
            .fold(Reservation::EMPTY, Reservation::combine);
        self.shared.accountant.release(reservation);
        self.shared.batches_in_flight.fetch_sub(1, Ordering::Relaxed);
        self.finished = true;
    }

    fn record_failure(&self, reason: String) {
        self.shared.batches_failed.fetch_add(1, Ordering::Relaxed);
        tracing::error!(
            stream = %self.stream(),
            records = self.entries.len(),
            bytes = self.bytes,
            "batch failed: {}",
            reason
        );
        self.shared.record_failure(reason);
    }
}

impl Drop for Batch {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.finish();
        let reason = format!(
            "batch of {} records from stream {} dropped without close",
            self.entries.len(),
            self.buffer.stream()
        );
        self.record_failure(reason);
    }
}

impl std::fmt::Debug for Batch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Batch")
            .field("stream", self.stream())
            .field("records", &self.entries.len())
            .field("bytes", &self.bytes)
            .field("acknowledged", &self.acknowledged)
            .finish_non_exhaustive()
    }
}
