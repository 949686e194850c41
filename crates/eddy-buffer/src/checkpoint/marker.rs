//! Checkpoint requests and released markers.

use bytes::Bytes;
use eddy_common::types::{StateScope, StreamId, Watermark};

/// A caller-supplied state snapshot to be reported once it is safe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointRequest {
    scope: StateScope,
    payload: Bytes,
}

impl CheckpointRequest {
    /// Creates a request with an explicit scope.
    pub fn new(scope: StateScope, payload: impl Into<Bytes>) -> Self {
        Self {
            scope,
            payload: payload.into(),
        }
    }

    /// A marker covering every stream.
    pub fn global(payload: impl Into<Bytes>) -> Self {
        Self::new(StateScope::Global, payload)
    }

    /// A marker covering one stream.
    pub fn stream(stream: StreamId, payload: impl Into<Bytes>) -> Self {
        Self::new(StateScope::Stream(stream), payload)
    }

    /// The marker's scope.
    #[must_use]
    pub fn scope(&self) -> &StateScope {
        &self.scope
    }

    /// The opaque state snapshot.
    #[must_use]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub(crate) fn into_parts(self) -> (StateScope, Bytes) {
        (self.scope, self.payload)
    }
}

/// A checkpoint that has become safe to report downstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointMarker {
    scope: StateScope,
    watermark: Watermark,
    payload: Bytes,
    record_count: u64,
}

impl CheckpointMarker {
    pub(crate) fn new(
        scope: StateScope,
        watermark: Watermark,
        payload: Bytes,
        record_count: u64,
    ) -> Self {
        Self {
            scope,
            watermark,
            payload,
            record_count,
        }
    }

    /// The marker's scope.
    #[must_use]
    pub fn scope(&self) -> &StateScope {
        &self.scope
    }

    /// Position of the marker in admission order.
    #[must_use]
    pub fn watermark(&self) -> Watermark {
        self.watermark
    }

    /// The opaque state snapshot.
    #[must_use]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Records admitted since the previous marker of the same scope.
    ///
    /// This is the number of records the destination committed on behalf of
    /// this checkpoint.
    #[must_use]
    pub fn record_count(&self) -> u64 {
        self.record_count
    }
}
