//! Watermark assignment and checkpoint release.

use std::collections::VecDeque;
use std::fmt;

use bytes::Bytes;
use eddy_common::types::{StateScope, StreamId, Watermark};
use eddy_common::utils::error::{Error, Result};
use eddy_common::utils::hash::FastHashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use super::marker::{CheckpointMarker, CheckpointRequest};

/// Which kind of markers the tracker has committed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScopeMode {
    /// No marker seen yet; records are counted per stream.
    Undecided,
    /// Global markers only.
    Global,
    /// Stream markers only.
    PerStream,
}

impl fmt::Display for ScopeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Undecided => "undecided",
            Self::Global => "global",
            Self::PerStream => "per-stream",
        };
        f.write_str(s)
    }
}

/// Point-in-time view of the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerBacklog {
    /// Current scope mode.
    pub mode: ScopeMode,
    /// Markers admitted but not yet released.
    pub pending_markers: usize,
    /// Records admitted but not yet flushed.
    pub outstanding_records: u64,
    /// Markers released so far.
    pub released_markers: u64,
    /// The most recently assigned watermark.
    pub last_watermark: Watermark,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ScopeKey {
    Global,
    Stream(StreamId),
}

/// Records between two consecutive markers of one scope.
#[derive(Debug, Default)]
struct Bucket {
    /// Watermark of the closing marker; `None` while still open.
    upper: Option<Watermark>,
    /// Admitted records not yet flushed.
    outstanding: u64,
    /// Records ever admitted into this bucket.
    admitted: u64,
    marker: Option<CheckpointMarker>,
}

impl Bucket {
    fn is_released(&self) -> bool {
        self.marker.is_some() && self.outstanding == 0
    }
}

fn open_queue() -> VecDeque<Bucket> {
    VecDeque::from([Bucket::default()])
}

struct TrackerState {
    last: Watermark,
    mode: ScopeMode,
    /// Each queue ends with exactly one open bucket.
    queues: FastHashMap<ScopeKey, VecDeque<Bucket>>,
    pending_markers: usize,
    outstanding: u64,
    released: u64,
}

impl TrackerState {
    fn next_watermark(&mut self) -> Watermark {
        self.last = self.last.next();
        self.last
    }

    fn entry_key(&self, stream: &StreamId) -> ScopeKey {
        match self.mode {
            ScopeMode::Global => ScopeKey::Global,
            ScopeMode::Undecided | ScopeMode::PerStream => ScopeKey::Stream(stream.clone()),
        }
    }

    fn check_scope(&self, scope: &StateScope) -> Result<()> {
        let conflict = match (self.mode, scope) {
            (ScopeMode::Global, StateScope::Stream(_)) => true,
            (ScopeMode::PerStream, StateScope::Global) => true,
            _ => false,
        };
        if conflict {
            return Err(Error::ScopeConflict {
                active: self.mode.to_string(),
                requested: scope.to_string(),
            });
        }
        Ok(())
    }

    /// A stream marker attached to a record must belong to the record's stream,
    /// otherwise it could be released while the record is still buffered.
    fn check_attached(&self, stream: &StreamId, scope: &StateScope) -> Result<()> {
        if let StateScope::Stream(target) = scope
            && target != stream
        {
            return Err(Error::MarkerStreamMismatch {
                record: stream.to_string(),
                marker: scope.to_string(),
            });
        }
        self.check_scope(scope)
    }

    fn count_entry(&mut self, stream: &StreamId) {
        let key = self.entry_key(stream);
        let open = self
            .queues
            .entry(key)
            .or_insert_with(open_queue)
            .back_mut()
            .expect("scope queue always ends with an open bucket");
        open.outstanding += 1;
        open.admitted += 1;
        self.outstanding += 1;
    }

    /// Folds every per-stream count into one global queue.
    fn convert_to_global(&mut self) {
        let mut merged = Bucket::default();
        for (key, queue) in self.queues.drain() {
            debug_assert!(matches!(key, ScopeKey::Stream(_)));
            assert!(
                queue.len() == 1,
                "per-stream markers present while converting to global scope"
            );
            for bucket in queue {
                merged.outstanding += bucket.outstanding;
                merged.admitted += bucket.admitted;
            }
        }
        self.queues
            .insert(ScopeKey::Global, VecDeque::from([merged]));
        self.mode = ScopeMode::Global;
        tracing::debug!("checkpoint tracker switched to global scope");
    }

    fn close_bucket(&mut self, scope: StateScope, watermark: Watermark, payload: Bytes) {
        let key = match &scope {
            StateScope::Global => {
                if self.mode == ScopeMode::Undecided {
                    self.convert_to_global();
                }
                ScopeKey::Global
            }
            StateScope::Stream(stream) => {
                self.mode = ScopeMode::PerStream;
                ScopeKey::Stream(stream.clone())
            }
        };

        let queue = self.queues.entry(key).or_insert_with(open_queue);
        let open = queue
            .back_mut()
            .expect("scope queue always ends with an open bucket");
        open.upper = Some(watermark);
        open.marker = Some(CheckpointMarker::new(
            scope,
            watermark,
            payload,
            open.admitted,
        ));
        queue.push_back(Bucket::default());
        self.pending_markers += 1;
    }

    fn flush_one(&mut self, key: &ScopeKey, watermark: Watermark) {
        let queue = self
            .queues
            .get_mut(key)
            .unwrap_or_else(|| panic!("flushed {watermark} on a scope with no admitted records"));
        let idx = queue.partition_point(|b| b.upper.is_some_and(|upper| upper < watermark));
        let bucket = &mut queue[idx];
        assert!(
            bucket.outstanding > 0,
            "flushed {watermark} more times than it was admitted"
        );
        bucket.outstanding -= 1;
        self.outstanding -= 1;
    }
}

/// Assigns watermarks and decides when checkpoint markers are safe to emit.
///
/// All state sits behind one lock that is independent of the memory ledger
/// and of the per-stream queues. Watermark assignment and bucket accounting
/// happen under that lock together, so a marker always covers exactly the
/// records admitted before it.
pub struct CheckpointTracker {
    state: Mutex<TrackerState>,
}

impl CheckpointTracker {
    /// Creates an empty tracker in [`ScopeMode::Undecided`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TrackerState {
                last: Watermark::ZERO,
                mode: ScopeMode::Undecided,
                queues: FastHashMap::default(),
                pending_markers: 0,
                outstanding: 0,
                released: 0,
            }),
        }
    }

    /// Fails if a marker of `scope` would conflict with the current mode.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ScopeConflict`] when mixing global and stream markers.
    pub fn check_scope(&self, scope: &StateScope) -> Result<()> {
        self.state.lock().check_scope(scope)
    }

    /// Fails if a marker of `scope` cannot be attached to a record of `stream`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MarkerStreamMismatch`] for a marker of another stream,
    /// or [`Error::ScopeConflict`] as [`check_scope`](Self::check_scope) does.
    pub fn check_attached(&self, stream: &StreamId, scope: &StateScope) -> Result<()> {
        self.state.lock().check_attached(stream, scope)
    }

    /// Assigns the next watermark to a record of `stream` and counts it.
    pub fn admit_entry(&self, stream: &StreamId) -> Watermark {
        let mut state = self.state.lock();
        let watermark = state.next_watermark();
        state.count_entry(stream);
        watermark
    }

    /// Admits a record and a marker that covers it, atomically.
    ///
    /// The marker shares the record's watermark.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MarkerStreamMismatch`] or [`Error::ScopeConflict`]
    /// without assigning a watermark.
    pub fn admit_entry_with_marker(
        &self,
        stream: &StreamId,
        request: CheckpointRequest,
    ) -> Result<Watermark> {
        let mut state = self.state.lock();
        state.check_attached(stream, request.scope())?;
        let watermark = state.next_watermark();
        state.count_entry(stream);
        let (scope, payload) = request.into_parts();
        state.close_bucket(scope, watermark, payload);
        Ok(watermark)
    }

    /// Admits a standalone marker at a fresh watermark.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ScopeConflict`] without assigning a watermark.
    pub fn admit_marker(&self, request: CheckpointRequest) -> Result<Watermark> {
        let mut state = self.state.lock();
        state.check_scope(request.scope())?;
        let watermark = state.next_watermark();
        let (scope, payload) = request.into_parts();
        state.close_bucket(scope, watermark, payload);
        Ok(watermark)
    }

    /// Records that entries of `stream` with the given watermarks were flushed.
    ///
    /// # Panics
    ///
    /// Panics if a watermark is flushed more often than it was admitted.
    pub fn record_flushed<I>(&self, stream: &StreamId, watermarks: I)
    where
        I: IntoIterator<Item = Watermark>,
    {
        let mut state = self.state.lock();
        let key = state.entry_key(stream);
        for watermark in watermarks {
            state.flush_one(&key, watermark);
        }
    }

    /// Removes and returns every marker that is now safe to emit.
    ///
    /// Within each scope markers come out in watermark order and a marker is
    /// never skipped; the combined result is sorted by watermark.
    pub fn take_released(&self) -> SmallVec<[CheckpointMarker; 4]> {
        let mut state = self.state.lock();
        let mut released: SmallVec<[CheckpointMarker; 4]> = SmallVec::new();
        for queue in state.queues.values_mut() {
            while queue.front().is_some_and(Bucket::is_released) {
                if let Some(marker) = queue.pop_front().and_then(|b| b.marker) {
                    released.push(marker);
                }
            }
        }
        released.sort_by_key(CheckpointMarker::watermark);
        state.pending_markers -= released.len();
        state.released += released.len() as u64;
        released
    }

    /// Returns a snapshot of pending work.
    #[must_use]
    pub fn backlog(&self) -> TrackerBacklog {
        let state = self.state.lock();
        TrackerBacklog {
            mode: state.mode,
            pending_markers: state.pending_markers,
            outstanding_records: state.outstanding,
            released_markers: state.released,
            last_watermark: state.last,
        }
    }
}

impl Default for CheckpointTracker {
    fn default() -> Self {
        Self::new()
    }
}
