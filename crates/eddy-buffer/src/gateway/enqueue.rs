//! Producer-side admission.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use eddy_common::types::{StreamId, Watermark};
use eddy_common::utils::error::{Error, Result};

use crate::checkpoint::CheckpointRequest;
use crate::manager::Shared;
use crate::memory::Reservation;
use crate::stream::Entry;

/// Admits records and checkpoint markers into the buffer.
///
/// Admission reserves memory first and blocks while the buffer is full; that
/// stall is the backpressure a fast source feels from a slow destination.
#[derive(Clone)]
pub struct EnqueueGateway {
    shared: Arc<Shared>,
}

impl EnqueueGateway {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Buffers a record, blocking until memory is available.
    ///
    /// If `checkpoint` is given it is registered at the record's watermark
    /// and covers the record itself, so a stream-scoped marker must name
    /// `stream`. Returns the record's watermark.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MarkerStreamMismatch`] if a stream marker names another
    /// stream, [`Error::ScopeConflict`] if the marker's scope conflicts with
    /// earlier markers, [`Error::FlushFailed`] once a batch has failed, or
    /// [`Error::Closed`] after the manager is closed. Nothing is admitted on
    /// error.
    pub fn enqueue(
        &self,
        stream: &StreamId,
        payload: impl Into<Bytes>,
        checkpoint: Option<CheckpointRequest>,
    ) -> Result<Watermark> {
        self.admit(stream, payload.into(), checkpoint, None)
    }

    /// Like [`enqueue`](Self::enqueue) but gives up after `timeout`.
    ///
    /// # Errors
    ///
    /// Additionally returns [`Error::ReserveTimeout`] if memory did not free
    /// up in time; the ledger is left untouched.
    pub fn enqueue_timeout(
        &self,
        stream: &StreamId,
        payload: impl Into<Bytes>,
        checkpoint: Option<CheckpointRequest>,
        timeout: Duration,
    ) -> Result<Watermark> {
        self.admit(stream, payload.into(), checkpoint, Some(timeout))
    }

    /// Registers a standalone checkpoint marker covering everything admitted so far.
    ///
    /// The marker is emitted by a later `flush_states` once those records are
    /// flushed.
    ///
    /// # Errors
    ///
    /// Same as [`enqueue`](Self::enqueue), minus blocking.
    pub fn enqueue_checkpoint(&self, request: CheckpointRequest) -> Result<Watermark> {
        self.shared.ensure_accepting()?;
        let watermark = self.shared.tracker.admit_marker(request)?;
        tracing::trace!(watermark = watermark.as_u64(), "checkpoint registered");
        Ok(watermark)
    }

    /// Estimated bytes a payload of `len` bytes is charged.
    #[must_use]
    pub fn estimate(&self, len: usize) -> u64 {
        self.shared.estimator.estimate(len)
    }

    fn admit(
        &self,
        stream: &StreamId,
        payload: Bytes,
        checkpoint: Option<CheckpointRequest>,
        timeout: Option<Duration>,
    ) -> Result<Watermark> {
        self.shared.ensure_accepting()?;
        if let Some(request) = &checkpoint {
            self.shared.tracker.check_attached(stream, request.scope())?;
        }

        let bytes = self.shared.estimator.estimate(payload.len());
        let reservation = self.reserve(stream, bytes, timeout)?;

        // A batch may have failed while we were blocked.
        if let Err(e) = self.shared.ensure_accepting() {
            self.shared.accountant.release(reservation);
            return Err(e);
        }

        let buffer = self.shared.buffer_for(stream);
        let tracker = &self.shared.tracker;
        let appended = buffer.append_with(|| {
            let watermark = match checkpoint {
                Some(request) => tracker.admit_entry_with_marker(stream, request)?,
                None => tracker.admit_entry(stream),
            };
            Ok::<_, Error>(Entry::new(stream.clone(), payload, reservation, watermark))
        });

        match appended {
            Ok(watermark) => {
                tracing::trace!(
                    stream = %stream,
                    bytes,
                    watermark = watermark.as_u64(),
                    "record admitted"
                );
                Ok(watermark)
            }
            Err(e) => {
                self.shared.accountant.release(reservation);
                Err(e)
            }
        }
    }

    fn reserve(
        &self,
        stream: &StreamId,
        bytes: u64,
        timeout: Option<Duration>,
    ) -> Result<Reservation> {
        let Some(timeout) = timeout else {
            return Ok(self.shared.accountant.reserve(bytes));
        };
        self.shared
            .accountant
            .reserve_timeout(bytes, timeout)
            .ok_or_else(|| {
                tracing::warn!(
                    stream = %stream,
                    bytes,
                    "gave up waiting for buffer memory after {:?}",
                    timeout
                );
                Error::ReserveTimeout {
                    requested: bytes,
                    waited: timeout,
                }
            })
    }
}

impl std::fmt::Debug for EnqueueGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnqueueGateway").finish_non_exhaustive()
    }
}
