//! A single buffered record.

use std::time::Instant;

use bytes::Bytes;
use eddy_common::types::{StreamId, Watermark};

use crate::memory::Reservation;

/// One buffered record together with the memory it was charged.
#[derive(Debug, Clone)]
pub struct Entry {
    stream: StreamId,
    payload: Bytes,
    reservation: Reservation,
    watermark: Watermark,
    admitted_at: Instant,
}

impl Entry {
    pub(crate) fn new(
        stream: StreamId,
        payload: Bytes,
        reservation: Reservation,
        watermark: Watermark,
    ) -> Self {
        Self {
            stream,
            payload,
            reservation,
            watermark,
            admitted_at: Instant::now(),
        }
    }

    /// The stream this entry belongs to.
    #[must_use]
    pub fn stream(&self) -> &StreamId {
        &self.stream
    }

    /// The serialized record.
    #[must_use]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Estimated in-memory size charged to the ledger.
    #[must_use]
    pub fn estimated_bytes(&self) -> u64 {
        self.reservation.bytes()
    }

    /// Admission order of this entry.
    #[must_use]
    pub fn watermark(&self) -> Watermark {
        self.watermark
    }

    /// When the entry was admitted.
    #[must_use]
    pub fn admitted_at(&self) -> Instant {
        self.admitted_at
    }

    pub(crate) fn reservation(&self) -> Reservation {
        self.reservation
    }
}
