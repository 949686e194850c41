//! Property tests over random single-threaded operation sequences.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use eddy_buffer::{Batch, BufferConfig, BufferManager, CheckpointMarker, CheckpointRequest};
use eddy_common::types::{StateScope, StreamId, Watermark};
use parking_lot::Mutex;
use proptest::prelude::*;

const PROPTEST_CASES: u32 = 128;

#[derive(Clone, Debug)]
enum Op {
    Enqueue { stream: u8, len: usize, marker: bool },
    Checkpoint { stream: u8 },
    Dispatch,
    CloseOldest,
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        6 => (0u8..3, 1usize..64, prop::bool::weighted(0.15))
            .prop_map(|(stream, len, marker)| Op::Enqueue { stream, len, marker }),
        1 => (0u8..3).prop_map(|stream| Op::Checkpoint { stream }),
        2 => Just(Op::Dispatch),
        2 => Just(Op::CloseOldest),
    ]
}

fn stream_id(index: u8) -> StreamId {
    StreamId::new(format!("s{index}"))
}

/// Records admitted and records durably closed, per stream.
#[derive(Default)]
struct Ledger {
    admitted: HashMap<StreamId, Vec<Watermark>>,
    closed: HashMap<StreamId, Watermark>,
}

impl Ledger {
    /// Whether every record of `stream` at or below `watermark` is closed.
    fn covered(&self, stream: &StreamId, watermark: Watermark) -> bool {
        let closed = self.closed.get(stream).copied().unwrap_or(Watermark::ZERO);
        self.admitted
            .get(stream)
            .into_iter()
            .flatten()
            .all(|&wm| wm > watermark || wm <= closed)
    }

    /// Whether `marker` only covers records that are already closed.
    fn releasable(&self, marker: &CheckpointMarker) -> bool {
        match marker.scope() {
            StateScope::Global => self
                .admitted
                .keys()
                .all(|stream| self.covered(stream, marker.watermark())),
            StateScope::Stream(stream) => self.covered(stream, marker.watermark()),
        }
    }
}

struct Harness {
    manager: BufferManager,
    per_stream: bool,
    emitted: Arc<Mutex<Vec<CheckpointMarker>>>,
    early: Arc<Mutex<Vec<CheckpointMarker>>>,
    ledger: Arc<Mutex<Ledger>>,
    open: VecDeque<Batch>,
}

impl Harness {
    fn new(per_stream: bool) -> Self {
        let emitted = Arc::new(Mutex::new(Vec::new()));
        let early = Arc::new(Mutex::new(Vec::new()));
        let ledger = Arc::new(Mutex::new(Ledger::default()));
        let sink = {
            let emitted = Arc::clone(&emitted);
            let early = Arc::clone(&early);
            let ledger = Arc::clone(&ledger);
            move |m: CheckpointMarker| {
                if !ledger.lock().releasable(&m) {
                    early.lock().push(m.clone());
                }
                emitted.lock().push(m);
            }
        };
        let config = BufferConfig::with_budget(1 << 20)
            .with_min_flush_threshold_bytes(1)
            .with_max_batch_records(5)
            .with_diagnostics_interval(Duration::ZERO);
        let manager = BufferManager::new(config, sink).unwrap();
        Self {
            manager,
            per_stream,
            emitted,
            early,
            ledger,
            open: VecDeque::new(),
        }
    }

    fn request(&self, stream: &StreamId) -> CheckpointRequest {
        if self.per_stream {
            CheckpointRequest::stream(stream.clone(), "state")
        } else {
            CheckpointRequest::global("state")
        }
    }

    fn apply(&mut self, op: &Op) {
        match op {
            Op::Enqueue { stream, len, marker } => {
                let stream = stream_id(*stream);
                let checkpoint = marker.then(|| self.request(&stream));
                let watermark = self
                    .manager
                    .enqueue_gateway()
                    .enqueue(&stream, vec![0u8; *len], checkpoint)
                    .unwrap();
                self.ledger
                    .lock()
                    .admitted
                    .entry(stream)
                    .or_default()
                    .push(watermark);
            }
            Op::Checkpoint { stream } => {
                let request = self.request(&stream_id(*stream));
                self.manager
                    .enqueue_gateway()
                    .enqueue_checkpoint(request)
                    .unwrap();
            }
            Op::Dispatch => {
                if let Some(batch) = self.manager.dequeue_gateway().next_batch() {
                    self.open.push_back(batch);
                }
            }
            Op::CloseOldest => {
                if let Some(batch) = self.open.pop_front() {
                    self.close(batch);
                }
            }
        }
    }

    fn close(&mut self, batch: Batch) {
        let watermarks: Vec<Watermark> = batch.entries().iter().map(|e| e.watermark()).collect();
        assert!(watermarks.windows(2).all(|w| w[0] < w[1]));
        {
            let mut ledger = self.ledger.lock();
            let previous = ledger
                .closed
                .get(batch.stream())
                .copied()
                .unwrap_or(Watermark::ZERO);
            assert!(watermarks[0] > previous);
            ledger
                .closed
                .insert(batch.stream().clone(), watermarks[watermarks.len() - 1]);
        }
        batch.close();
    }

    fn drain_all(&mut self) {
        while let Some(batch) = self.open.pop_front() {
            self.close(batch);
        }
        while let Some(batch) = self.manager.dequeue_gateway().next_batch() {
            self.close(batch);
        }
        self.manager.flush_states();
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(PROPTEST_CASES))]

    #[test]
    fn prop_ledger_matches_buffered_bytes(
        per_stream in any::<bool>(),
        ops in prop::collection::vec(arb_op(), 1..80),
    ) {
        let mut harness = Harness::new(per_stream);
        for op in &ops {
            harness.apply(op);
            let stats = harness.manager.stats();
            prop_assert_eq!(stats.memory.allocated_bytes, stats.buffered_bytes());
        }
        harness.drain_all();
        prop_assert_eq!(harness.manager.memory().allocated_bytes(), 0);
    }

    #[test]
    fn prop_markers_ascend_and_all_release(
        per_stream in any::<bool>(),
        ops in prop::collection::vec(arb_op(), 1..80),
    ) {
        let mut harness = Harness::new(per_stream);
        for op in &ops {
            harness.apply(op);
        }
        harness.drain_all();

        let registered = ops
            .iter()
            .filter(|op| matches!(op, Op::Checkpoint { .. } | Op::Enqueue { marker: true, .. }))
            .count();
        let emitted = harness.emitted.lock();
        prop_assert_eq!(emitted.len(), registered);

        let mut last: HashMap<StateScope, Watermark> = HashMap::new();
        for marker in emitted.iter() {
            prop_assert_eq!(marker.scope().is_global(), !per_stream);
            let previous = last.insert(marker.scope().clone(), marker.watermark());
            prop_assert!(previous.is_none_or(|wm| wm < marker.watermark()));
        }
        prop_assert_eq!(harness.manager.stats().checkpoints.pending_markers, 0);
    }

    #[test]
    fn prop_markers_never_outrun_their_records(
        per_stream in any::<bool>(),
        ops in prop::collection::vec(arb_op(), 1..80),
    ) {
        let mut harness = Harness::new(per_stream);
        for op in &ops {
            harness.apply(op);
        }
        harness.drain_all();

        let early = harness.early.lock();
        prop_assert!(early.is_empty(), "released before their records closed: {:?}", *early);
    }
}
