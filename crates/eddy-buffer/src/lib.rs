//! # eddy-buffer
//!
//! Memory-bounded, checkpoint-aware ingestion buffer.
//!
//! Producers push records for many streams into an [`EnqueueGateway`]; flush
//! workers pull per-stream batches from a [`DequeueGateway`], write them to
//! the destination and close them. In between, the buffer enforces three
//! guarantees:
//!
//! - total buffered memory stays under a ceiling, and producers block when
//!   it is reached (backpressure),
//! - within a stream, records leave in the order they arrived,
//! - a checkpoint marker is emitted only after every record admitted before
//!   it has been flushed, and markers of a scope are emitted in order.
//!
//! ## Modules
//!
//! - [`memory`] - Global memory ledger and pressure levels
//! - [`stream`] - Per-stream FIFO queues
//! - [`checkpoint`] - Watermarks, markers and their release
//! - [`gateway`] - Producer and consumer entry points, [`Batch`]
//! - [`config`] - [`BufferConfig`]

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod checkpoint;
pub mod config;
pub mod diagnostics;
pub mod estimate;
pub mod gateway;
pub mod memory;
pub mod stats;
pub mod stream;

mod manager;

pub use checkpoint::{CheckpointMarker, CheckpointRequest, CheckpointSink, ScopeMode};
pub use config::BufferConfig;
pub use gateway::{Batch, DequeueGateway, DrainTrigger, EnqueueGateway};
pub use manager::BufferManager;
pub use memory::{MemoryStats, PressureLevel};
pub use stats::BufferStats;
pub use stream::StreamStats;
