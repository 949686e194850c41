//! Checkpoint scope.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::StreamId;

/// What a checkpoint marker covers.
///
/// A global marker covers every record admitted before it, on every stream.
/// A stream marker covers only the records of its own stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StateScope {
    /// Covers all streams.
    Global,
    /// Covers a single stream.
    Stream(StreamId),
}

impl StateScope {
    /// Returns true for [`StateScope::Global`].
    #[must_use]
    pub fn is_global(&self) -> bool {
        matches!(self, Self::Global)
    }

    /// Returns the stream for a stream-scoped marker.
    #[must_use]
    pub fn stream(&self) -> Option<&StreamId> {
        match self {
            Self::Global => None,
            Self::Stream(stream) => Some(stream),
        }
    }
}

impl fmt::Display for StateScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => f.write_str("global"),
            Self::Stream(stream) => write!(f, "stream {stream}"),
        }
    }
}
