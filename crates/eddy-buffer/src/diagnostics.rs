//! Periodic diagnostics reporter.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Sender};

use crate::stats::BufferStats;

/// A background thread that logs a [`BufferStats`] report on a fixed cadence.
///
/// The task is owned by the [`BufferManager`](crate::BufferManager) and
/// stopped by it; it never touches buffer state other than through the
/// snapshot closure.
pub struct DiagnosticsTask {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl DiagnosticsTask {
    /// Starts the reporter. Returns `None` if the thread could not be spawned.
    pub fn start<F>(interval: Duration, snapshot: F) -> Option<Self>
    where
        F: Fn() -> BufferStats + Send + 'static,
    {
        let (stop_tx, stop_rx) = channel::bounded::<()>(1);
        let ticker = channel::tick(interval);

        let spawned = thread::Builder::new()
            .name("eddy-diagnostics".to_string())
            .spawn(move || {
                loop {
                    crossbeam::select! {
                        recv(stop_rx) -> _ => break,
                        recv(ticker) -> _ => report(&snapshot()),
                    }
                }
            });

        match spawned {
            Ok(handle) => Some(Self {
                stop: Some(stop_tx),
                handle: Some(handle),
            }),
            Err(e) => {
                tracing::warn!("failed to start diagnostics reporter: {}", e);
                None
            }
        }
    }

    /// Stops the reporter and waits for its thread to exit.
    pub fn stop(&mut self) {
        // Dropping the sender disconnects the stop channel.
        self.stop.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("diagnostics reporter panicked");
            }
        }
    }

    /// Whether the reporter thread is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for DiagnosticsTask {
    fn drop(&mut self) {
        self.stop();
    }
}

fn report(stats: &BufferStats) {
    tracing::info!(
        allocated_bytes = stats.memory.allocated_bytes,
        max_bytes = stats.memory.max_bytes,
        streams = stats.streams.len(),
        pending_markers = stats.checkpoints.pending_markers,
        "{}",
        stats
    );
}
