//! The shared memory ledger.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::stats::MemoryStats;

/// Bytes granted by a [`MemoryAccountant`].
///
/// A reservation travels with the entry it paid for and is handed back to
/// [`MemoryAccountant::release`] when the entry leaves the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    bytes: u64,
    oversize: bool,
}

impl Reservation {
    /// A reservation of zero bytes.
    pub(crate) const EMPTY: Self = Self {
        bytes: 0,
        oversize: false,
    };

    /// Granted bytes.
    #[must_use]
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Whether this grant holds the oversize slot.
    #[must_use]
    pub fn is_oversize(&self) -> bool {
        self.oversize
    }

    /// Merges two reservations so they can be refunded together.
    ///
    /// # Panics
    ///
    /// Panics if both hold the oversize slot; only one can exist.
    pub(crate) fn combine(self, other: Self) -> Self {
        assert!(
            !(self.oversize && other.oversize),
            "two reservations claim the single oversize grant"
        );
        Self {
            bytes: self.bytes + other.bytes,
            oversize: self.oversize || other.oversize,
        }
    }
}

#[derive(Debug, Default)]
struct Ledger {
    allocated: u64,
    peak: u64,
    /// Tickets of blocked requests, oldest first.
    waiting: VecDeque<u64>,
    next_ticket: u64,
    /// Bytes of the outstanding oversize grant.
    oversize: Option<u64>,
}

impl Ledger {
    fn take_ticket(&mut self) -> u64 {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.waiting.push_back(ticket);
        ticket
    }
}

/// Tracks allocated versus maximum bytes and blocks producers at the ceiling.
///
/// A request that fits under the ceiling is granted immediately; otherwise the
/// caller waits until releases make room. A request larger than the ceiling
/// itself could never fit, so it is granted through a single oversize slot
/// once that slot is free, temporarily pushing the ledger above the ceiling.
/// No second oversize grant is issued until the first is released.
///
/// Blocked requests are served first come, first served: while any request
/// waits, new requests queue behind it even if they would fit. A large
/// request therefore cannot be starved by a steady flow of small ones, at
/// the cost of small requests waiting behind a large one.
pub struct MemoryAccountant {
    max_bytes: u64,
    ledger: Mutex<Ledger>,
    /// Signalled on every release.
    room_available: Condvar,
}

impl MemoryAccountant {
    /// Creates an accountant with the given ceiling.
    #[must_use]
    pub fn new(max_bytes: u64) -> Self {
        Self {
            max_bytes,
            ledger: Mutex::new(Ledger::default()),
            room_available: Condvar::new(),
        }
    }

    /// Returns the ceiling.
    #[must_use]
    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Returns the bytes currently charged.
    #[must_use]
    pub fn allocated_bytes(&self) -> u64 {
        self.ledger.lock().allocated
    }

    /// Returns the number of producers blocked in `reserve`.
    #[must_use]
    pub fn waiting_producers(&self) -> usize {
        self.ledger.lock().waiting.len()
    }

    /// Returns a snapshot of the ledger.
    #[must_use]
    pub fn stats(&self) -> MemoryStats {
        let ledger = self.ledger.lock();
        MemoryStats {
            allocated_bytes: ledger.allocated,
            max_bytes: self.max_bytes,
            peak_bytes: ledger.peak,
            waiting_producers: ledger.waiting.len(),
            oversize_bytes: ledger.oversize,
        }
    }

    /// Reserves `bytes`, blocking until the ledger has room and every
    /// earlier blocked request has been served.
    ///
    /// Never fails; the only way out of the wait is a release elsewhere. Use
    /// [`reserve_timeout`](Self::reserve_timeout) to bound the wait.
    pub fn reserve(&self, bytes: u64) -> Reservation {
        let mut ledger = self.ledger.lock();
        if let Some(grant) = self.try_grant_unqueued(&mut ledger, bytes) {
            return grant;
        }

        let ticket = ledger.take_ticket();
        tracing::trace!(bytes, allocated = ledger.allocated, ticket, "waiting for memory");
        loop {
            self.room_available.wait(&mut ledger);
            if let Some(grant) = self.try_grant_queued(&mut ledger, ticket, bytes) {
                return grant;
            }
        }
    }

    /// Reserves `bytes`, giving up after `timeout`.
    ///
    /// Returns `None` on timeout, in which case the ledger is unchanged.
    pub fn reserve_timeout(&self, bytes: u64, timeout: Duration) -> Option<Reservation> {
        let deadline = Instant::now() + timeout;
        let mut ledger = self.ledger.lock();
        if let Some(grant) = self.try_grant_unqueued(&mut ledger, bytes) {
            return Some(grant);
        }

        let ticket = ledger.take_ticket();
        loop {
            let timed_out = self
                .room_available
                .wait_until(&mut ledger, deadline)
                .timed_out();
            if let Some(grant) = self.try_grant_queued(&mut ledger, ticket, bytes) {
                return Some(grant);
            }
            if timed_out {
                ledger.waiting.retain(|&t| t != ticket);
                // The request behind this one may be at the head now.
                self.room_available.notify_all();
                return None;
            }
        }
    }

    /// Reserves `bytes` only if that is possible without waiting.
    ///
    /// Fails while other requests are blocked, even if `bytes` would fit.
    pub fn try_reserve(&self, bytes: u64) -> Option<Reservation> {
        let mut ledger = self.ledger.lock();
        self.try_grant_unqueued(&mut ledger, bytes)
    }

    /// Refunds a reservation and wakes every waiting producer.
    ///
    /// # Panics
    ///
    /// Panics if the refund exceeds the allocated bytes or returns an oversize
    /// grant that is not outstanding. Either means the ledger is corrupt.
    pub fn release(&self, reservation: Reservation) {
        if reservation.bytes == 0 && !reservation.oversize {
            return;
        }
        {
            let mut ledger = self.ledger.lock();
            assert!(
                ledger.allocated >= reservation.bytes,
                "memory ledger underflow: releasing {} bytes with {} allocated",
                reservation.bytes,
                ledger.allocated
            );
            ledger.allocated -= reservation.bytes;
            if reservation.oversize {
                assert!(
                    ledger.oversize.take().is_some(),
                    "released an oversize grant that was never issued"
                );
            }
        }
        self.room_available.notify_all();
    }

    fn try_grant_unqueued(&self, ledger: &mut Ledger, bytes: u64) -> Option<Reservation> {
        if !ledger.waiting.is_empty() {
            return None;
        }
        self.try_grant(ledger, bytes)
    }

    /// Grants `bytes` to the blocked request holding `ticket` once it is at
    /// the head of the queue.
    fn try_grant_queued(&self, ledger: &mut Ledger, ticket: u64, bytes: u64) -> Option<Reservation> {
        if ledger.waiting.front() != Some(&ticket) {
            return None;
        }
        let grant = self.try_grant(ledger, bytes)?;
        ledger.waiting.pop_front();
        if !ledger.waiting.is_empty() {
            self.room_available.notify_all();
        }
        Some(grant)
    }

    fn try_grant(&self, ledger: &mut Ledger, bytes: u64) -> Option<Reservation> {
        let oversize = if bytes > self.max_bytes {
            if ledger.oversize.is_some() {
                return None;
            }
            true
        } else if ledger.allocated + bytes <= self.max_bytes {
            false
        } else {
            return None;
        };

        ledger.allocated += bytes;
        ledger.peak = ledger.peak.max(ledger.allocated);
        if oversize {
            ledger.oversize = Some(bytes);
            tracing::debug!(
                bytes,
                max_bytes = self.max_bytes,
                "granted oversize reservation above the memory ceiling"
            );
        }
        Some(Reservation { bytes, oversize })
    }
}

impl std::fmt::Debug for MemoryAccountant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ledger = self.ledger.lock();
        f.debug_struct("MemoryAccountant")
            .field("max_bytes", &self.max_bytes)
            .field("allocated", &ledger.allocated)
            .field("waiting", &ledger.waiting.len())
            .finish()
    }
}
