//! Per-stream FIFO queues.
//!
//! Each logical stream gets its own [`PerStreamBuffer`] so that producers on
//! one stream and the consumer draining another never contend on the same
//! lock. Within a stream, entries leave in exactly the order they arrived.

mod buffer;
mod entry;

pub use buffer::{DrainState, PerStreamBuffer, StreamStats};
pub use entry::Entry;
