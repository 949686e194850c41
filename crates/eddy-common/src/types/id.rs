//! Identifier types.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Identifies one logical stream of records.
///
/// A stream is named by an optional namespace (schema, dataset, bucket
/// prefix...) plus a name. Cloning is cheap: both parts are shared.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamId {
    namespace: Option<Arc<str>>,
    name: Arc<str>,
}

impl StreamId {
    /// Creates a stream identifier without a namespace.
    #[must_use]
    pub fn new(name: impl AsRef<str>) -> Self {
        Self {
            namespace: None,
            name: Arc::from(name.as_ref()),
        }
    }

    /// Creates a namespaced stream identifier.
    #[must_use]
    pub fn with_namespace(namespace: impl AsRef<str>, name: impl AsRef<str>) -> Self {
        Self {
            namespace: Some(Arc::from(namespace.as_ref())),
            name: Arc::from(name.as_ref()),
        }
    }

    /// Returns the stream name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the namespace, if any.
    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{ns}.{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

impl From<&str> for StreamId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Admission order of a buffered entry or checkpoint marker.
///
/// Watermarks are handed out from a single counter owned by the checkpoint
/// tracker, so they are totally ordered across all streams. The first value
/// handed out is 1; [`Watermark::ZERO`] means "nothing admitted yet".
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct Watermark(pub u64);

impl Watermark {
    /// The watermark before any admission.
    pub const ZERO: Self = Self(0);

    /// Creates a watermark from a raw value.
    #[inline]
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the watermark immediately after this one.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "wm:{}", self.0)
    }
}
