//! Checkpoint tracking and release.
//!
//! A checkpoint marker arrives interleaved with records. It may only be
//! reported downstream once every record admitted before it has been
//! flushed. The [`CheckpointTracker`] keeps, per scope, a queue of buckets:
//! each bucket counts the not-yet-flushed records between two consecutive
//! markers and is closed by the later marker. A marker is released when its
//! bucket reaches zero and every earlier bucket of the same scope has been
//! released.
//!
//! ```text
//!   scope queue (oldest first)
//!   ┌────────────┬────────────┬────────────┬─────────────┐
//!   │ M@4  out=0 │ M@9  out=2 │ M@12 out=0 │ open  out=5 │
//!   └────────────┴────────────┴────────────┴─────────────┘
//!     released     blocks M@12   waits         no marker yet
//! ```

mod marker;
mod sink;
mod tracker;

pub use marker::{CheckpointMarker, CheckpointRequest};
pub use sink::CheckpointSink;
pub use tracker::{CheckpointTracker, ScopeMode, TrackerBacklog};
