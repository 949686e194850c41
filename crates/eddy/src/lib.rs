//! # Eddy
//!
//! A memory-bounded, checkpoint-aware ingestion buffer.
//!
//! Eddy sits between a source that reads records and a destination that
//! writes them. Producers enqueue records into per-stream queues under a
//! global memory ceiling and block when it is reached; flush workers pull
//! batches, write them, and close them. A checkpoint marker from the source
//! is emitted only after every record admitted before it has been flushed,
//! so a restarted job can resume from the last emitted marker without losing
//! data.
//!
//! Start with [`BufferManager`].
//!
//! ## Quick Start
//!
//! ```rust
//! use std::time::Duration;
//! use eddy::{BufferConfig, BufferManager, CheckpointMarker, CheckpointRequest, StreamId};
//!
//! let config = BufferConfig::with_budget(64 * 1024 * 1024)
//!     .with_min_flush_threshold_bytes(1)
//!     .with_diagnostics_interval(Duration::ZERO);
//! let manager = BufferManager::new(config, |marker: CheckpointMarker| {
//!     // Persist the source state; everything before it is durable.
//!     let _ = marker.payload();
//! })?;
//!
//! let orders = StreamId::with_namespace("shop", "orders");
//! let producer = manager.enqueue_gateway();
//! producer.enqueue(&orders, "{\"id\":1}", None)?;
//! producer.enqueue(&orders, "{\"id\":2}", Some(CheckpointRequest::global("{\"cursor\":2}")))?;
//!
//! let consumer = manager.dequeue_gateway();
//! while let Some(batch) = consumer.next_batch() {
//!     // Write batch.payloads() to the destination, then:
//!     batch.close();
//! }
//! assert_eq!(manager.stats().checkpoints.released_markers, 1);
//! manager.close()?;
//! # Ok::<(), eddy::Error>(())
//! ```

// Re-export the buffer API
pub use eddy_buffer::{
    Batch, BufferConfig, BufferManager, BufferStats, CheckpointMarker, CheckpointRequest,
    CheckpointSink, DequeueGateway, DrainTrigger, EnqueueGateway, MemoryStats, PressureLevel,
    ScopeMode, StreamStats,
};

// Formatting helper shared with the diagnostics report
pub use eddy_buffer::stats::format_bytes;

// Re-export core types
pub use eddy_common::types::{StateScope, StreamId, Watermark};
pub use eddy_common::utils::error::{Error, Result};
