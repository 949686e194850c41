//! Where released markers go.

use super::marker::CheckpointMarker;

/// Receives checkpoint markers once they are safe to report.
///
/// Called exactly once per marker, in watermark order within a scope. The
/// sink runs on whichever flush worker released the marker, so it should
/// hand the marker off rather than do slow work inline.
///
/// Emission is serialized by a manager-wide lock that is held while `emit`
/// runs. From inside `emit` the sink may read stats, enqueue, and even ack or
/// close batches on the same thread: such nested calls emit nothing
/// themselves and the markers they release are delivered by the outer loop
/// after `emit` returns. The sink must not block on another thread that
/// acks or closes a batch of the same manager, since that thread waits for
/// the lock the sink is holding.
pub trait CheckpointSink: Send + Sync {
    /// Delivers one released marker.
    fn emit(&self, marker: CheckpointMarker);
}

impl<F> CheckpointSink for F
where
    F: Fn(CheckpointMarker) + Send + Sync,
{
    fn emit(&self, marker: CheckpointMarker) {
        self(marker);
    }
}
