//! Error types for Eddy.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for Eddy operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for Eddy.
///
/// Accounting invariant violations are not represented here: they abort
/// through a panic, since continuing would corrupt checkpoint correctness.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A memory reservation was abandoned at its deadline.
    ///
    /// The ledger was not modified and no entry was appended.
    #[error("memory reservation of {requested} bytes timed out after {waited:?}")]
    ReserveTimeout {
        /// Bytes that were requested.
        requested: u64,
        /// How long the caller waited.
        waited: Duration,
    },

    /// A checkpoint marker's scope conflicts with the scope already in use.
    #[error("checkpoint scope conflict: tracker is in {active} mode, got a {requested} marker")]
    ScopeConflict {
        /// Mode the tracker is locked into.
        active: String,
        /// Scope of the rejected marker.
        requested: String,
    },

    /// A stream-scoped marker was attached to a record of another stream.
    #[error("checkpoint marker for {marker} cannot cover a record of stream {record}")]
    MarkerStreamMismatch {
        /// Stream of the record the marker was attached to.
        record: String,
        /// Scope of the rejected marker.
        marker: String,
    },

    /// A previous flush failed or a batch was abandoned; buffered data was lost.
    #[error("flush failed: {0}")]
    FlushFailed(String),

    /// The buffer manager has been closed.
    #[error("buffer manager is closed")]
    Closed,

    /// Configuration is invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
