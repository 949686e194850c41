//! The buffer's composition root.

use std::cell::Cell;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

use eddy_common::types::StreamId;
use eddy_common::utils::error::{Error, Result};
use eddy_common::utils::hash::FastHashMap;
use parking_lot::{Mutex, ReentrantMutex, RwLock};

use crate::checkpoint::{CheckpointMarker, CheckpointSink, CheckpointTracker};
use crate::config::BufferConfig;
use crate::diagnostics::DiagnosticsTask;
use crate::estimate::SizeEstimator;
use crate::gateway::{DequeueGateway, EnqueueGateway};
use crate::memory::MemoryAccountant;
use crate::stats::BufferStats;
use crate::stream::PerStreamBuffer;

/// State shared by the manager, both gateways, open batches and the
/// diagnostics reporter.
pub(crate) struct Shared {
    pub(crate) config: BufferConfig,
    pub(crate) estimator: SizeEstimator,
    pub(crate) accountant: MemoryAccountant,
    pub(crate) tracker: CheckpointTracker,
    buffers: RwLock<FastHashMap<StreamId, Arc<PerStreamBuffer>>>,
    sink: Box<dyn CheckpointSink>,
    /// Serializes emission so released markers reach the sink in order. The
    /// flag is set while this thread is inside the emission loop.
    emit_lock: ReentrantMutex<Cell<bool>>,
    /// First flush failure, if any.
    failure: Mutex<Option<String>>,
    closed: AtomicBool,
    pub(crate) batches_in_flight: AtomicUsize,
    pub(crate) batches_closed: AtomicU64,
    pub(crate) batches_failed: AtomicU64,
}

impl Shared {
    fn new(config: BufferConfig, sink: Box<dyn CheckpointSink>) -> Self {
        Self {
            estimator: SizeEstimator::from_config(&config),
            accountant: MemoryAccountant::new(config.max_memory_bytes),
            tracker: CheckpointTracker::new(),
            buffers: RwLock::new(FastHashMap::default()),
            sink,
            emit_lock: ReentrantMutex::new(Cell::new(false)),
            failure: Mutex::new(None),
            closed: AtomicBool::new(false),
            batches_in_flight: AtomicUsize::new(0),
            batches_closed: AtomicU64::new(0),
            batches_failed: AtomicU64::new(0),
            config,
        }
    }

    /// Returns the buffer for `stream`, creating it on first use.
    pub(crate) fn buffer_for(&self, stream: &StreamId) -> Arc<PerStreamBuffer> {
        if let Some(buffer) = self.buffers.read().get(stream) {
            return Arc::clone(buffer);
        }
        let mut buffers = self.buffers.write();
        let buffer = buffers.entry(stream.clone()).or_insert_with(|| {
            tracing::debug!("creating buffer for stream {}", stream);
            Arc::new(PerStreamBuffer::new(stream.clone()))
        });
        Arc::clone(buffer)
    }

    /// Clones out every known buffer so callers can inspect them unlocked.
    pub(crate) fn buffers(&self) -> Vec<Arc<PerStreamBuffer>> {
        self.buffers.read().values().map(Arc::clone).collect()
    }

    /// Fails once the manager is closed or a flush has failed.
    pub(crate) fn ensure_accepting(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        if let Some(reason) = self.failure.lock().as_ref() {
            return Err(Error::FlushFailed(reason.clone()));
        }
        Ok(())
    }

    /// Records a flush failure. Only the first reason is kept.
    pub(crate) fn record_failure(&self, reason: String) {
        let mut failure = self.failure.lock();
        if failure.is_none() {
            tracing::error!("flush failed, refusing further records: {}", reason);
            *failure = Some(reason);
        }
    }

    pub(crate) fn failure(&self) -> Option<String> {
        self.failure.lock().clone()
    }

    /// Emits every releasable marker through `emit`, in watermark order.
    ///
    /// A call made from inside `emit` on the same thread returns 0 at once;
    /// the outer call keeps draining until nothing is releasable, so markers
    /// released by the nested call still go out, in order, through the outer
    /// `emit`.
    pub(crate) fn emit_released_with(&self, mut emit: impl FnMut(CheckpointMarker)) -> usize {
        let guard = self.emit_lock.lock();
        if guard.replace(true) {
            return 0;
        }
        let _emitting = Emitting(&guard);

        let mut count = 0;
        loop {
            let released = self.tracker.take_released();
            if released.is_empty() {
                return count;
            }
            count += released.len();
            for marker in released {
                tracing::trace!("emitting checkpoint {} at {}", marker.scope(), marker.watermark());
                emit(marker);
            }
        }
    }

    /// Emits every releasable marker through the configured sink.
    pub(crate) fn emit_released(&self) -> usize {
        self.emit_released_with(|marker| self.sink.emit(marker))
    }

    pub(crate) fn stats(&self) -> BufferStats {
        let now = Instant::now();
        let mut streams: Vec<_> = self.buffers().iter().map(|b| b.stats(now)).collect();
        streams.sort_by(|a, b| a.stream.cmp(&b.stream));
        BufferStats {
            memory: self.accountant.stats(),
            streams,
            checkpoints: self.tracker.backlog(),
            batches_in_flight: self.batches_in_flight.load(Ordering::Relaxed),
            batches_closed: self.batches_closed.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
        }
    }
}

/// Clears the emission flag, also when the sink panics.
struct Emitting<'a>(&'a Cell<bool>);

impl Drop for Emitting<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// Owns the buffer and hands out its two gateways.
///
/// # Example
///
/// ```
/// use eddy_buffer::{BufferConfig, BufferManager, CheckpointMarker, CheckpointRequest};
/// use eddy_common::types::StreamId;
/// use std::time::Duration;
///
/// let config = BufferConfig::with_budget(1024 * 1024)
///     .with_min_flush_threshold_bytes(1)
///     .with_diagnostics_interval(Duration::ZERO);
/// let manager = BufferManager::new(config, |marker: CheckpointMarker| {
///     println!("checkpoint at {}", marker.watermark());
/// })?;
///
/// let users = StreamId::new("users");
/// let producer = manager.enqueue_gateway();
/// producer.enqueue(&users, &b"{\"id\":1}"[..], None)?;
/// producer.enqueue_checkpoint(CheckpointRequest::global(&b"{\"cursor\":1}"[..]))?;
///
/// let consumer = manager.dequeue_gateway();
/// let batch = consumer.next_batch().expect("stream is over the flush threshold");
/// assert_eq!(batch.len(), 1);
/// batch.close();
///
/// manager.close()?;
/// # Ok::<(), eddy_common::Error>(())
/// ```
pub struct BufferManager {
    shared: Arc<Shared>,
    diagnostics: Mutex<Option<DiagnosticsTask>>,
}

impl BufferManager {
    /// Creates a manager and starts the diagnostics reporter if configured.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the configuration fails validation.
    pub fn new(config: BufferConfig, sink: impl CheckpointSink + 'static) -> Result<Self> {
        config.validate()?;
        tracing::info!(
            "starting buffer with {} bytes of memory, flush threshold {} bytes",
            config.max_memory_bytes,
            config.min_flush_threshold_bytes
        );

        let interval = config.diagnostics_interval();
        let shared = Arc::new(Shared::new(config, Box::new(sink)));
        let diagnostics = interval.and_then(|interval| {
            let reporter = Arc::clone(&shared);
            DiagnosticsTask::start(interval, move || reporter.stats())
        });

        Ok(Self {
            shared,
            diagnostics: Mutex::new(diagnostics),
        })
    }

    /// Returns a producer-side handle.
    #[must_use]
    pub fn enqueue_gateway(&self) -> EnqueueGateway {
        EnqueueGateway::new(Arc::clone(&self.shared))
    }

    /// Returns a consumer-side handle.
    #[must_use]
    pub fn dequeue_gateway(&self) -> DequeueGateway {
        DequeueGateway::new(Arc::clone(&self.shared))
    }

    /// The validated configuration.
    #[must_use]
    pub fn config(&self) -> &BufferConfig {
        &self.shared.config
    }

    /// The global memory ledger.
    #[must_use]
    pub fn memory(&self) -> &MemoryAccountant {
        &self.shared.accountant
    }

    /// Returns a snapshot of the whole buffer.
    #[must_use]
    pub fn stats(&self) -> BufferStats {
        self.shared.stats()
    }

    /// Emits any releasable checkpoint markers through the sink.
    pub fn flush_states(&self) -> usize {
        self.shared.emit_released()
    }

    /// The first flush failure, if one has been recorded.
    #[must_use]
    pub fn flush_failure(&self) -> Option<String> {
        self.shared.failure()
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Stops the reporter and refuses further records.
    ///
    /// Call this after every producer and consumer has stopped. Releasable
    /// markers are emitted one last time; data still buffered is reported
    /// and dropped with the manager.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Closed`] if already closed, or
    /// [`Error::FlushFailed`] if any batch failed during the manager's life.
    pub fn close(&self) -> Result<()> {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return Err(Error::Closed);
        }
        if let Some(mut task) = self.diagnostics.lock().take() {
            task.stop();
        }

        self.shared.emit_released();
        let stats = self.shared.stats();
        if stats.buffered_records() > 0 || stats.batches_in_flight > 0 {
            tracing::warn!(
                "closing with {} buffered records and {} open batches",
                stats.buffered_records(),
                stats.batches_in_flight
            );
        }
        tracing::info!("buffer closed: {}", stats);

        match self.shared.failure() {
            Some(reason) => Err(Error::FlushFailed(reason)),
            None => Ok(()),
        }
    }
}

impl Drop for BufferManager {
    fn drop(&mut self) {
        if let Some(mut task) = self.diagnostics.lock().take() {
            task.stop();
        }
    }
}

impl std::fmt::Debug for BufferManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferManager")
            .field("accountant", &self.shared.accountant)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
