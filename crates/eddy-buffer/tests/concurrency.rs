//! Multi-threaded producer/consumer scenarios.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use eddy_buffer::{BufferConfig, BufferManager, CheckpointMarker};
use eddy_common::types::{StreamId, Watermark};
use parking_lot::Mutex;

fn config(budget: u64) -> BufferConfig {
    BufferConfig::with_budget(budget)
        .with_min_flush_threshold_bytes(1)
        .with_diagnostics_interval(Duration::ZERO)
        .with_size_estimate(1, 0)
}

fn wait_for(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn test_producer_blocks_until_batch_closes() {
    let manager = BufferManager::new(
        config(1000).with_max_batch_records(1),
        |_marker: CheckpointMarker| {},
    )
    .unwrap();
    let stream = StreamId::new("a");
    let finished = AtomicBool::new(false);

    thread::scope(|s| {
        let producer = manager.enqueue_gateway();
        let stream = &stream;
        let finished = &finished;
        s.spawn(move || {
            for _ in 0..3 {
                producer.enqueue(stream, vec![0u8; 400], None).unwrap();
            }
            finished.store(true, Ordering::SeqCst);
        });

        wait_for(|| manager.memory().waiting_producers() == 1);
        assert_eq!(manager.memory().allocated_bytes(), 800);
        assert!(!finished.load(Ordering::SeqCst));

        let batch = manager.dequeue_gateway().next_batch().unwrap();
        assert_eq!(batch.len(), 1);
        batch.close();
    });

    assert!(finished.load(Ordering::SeqCst));
    assert_eq!(manager.memory().allocated_bytes(), 800);
    assert_eq!(manager.stats().buffered_records(), 2);
}

#[test]
fn test_concurrent_workers_never_share_entries() {
    const STREAMS: usize = 4;
    const PER_STREAM: usize = 500;

    let manager = BufferManager::new(
        config(64 * 1024).with_max_batch_records(17),
        |_marker: CheckpointMarker| {},
    )
    .unwrap();
    let streams: Vec<StreamId> = (0..STREAMS).map(|i| StreamId::new(format!("s{i}"))).collect();
    let admitted: Mutex<HashMap<StreamId, Vec<Watermark>>> = Mutex::new(HashMap::new());
    let drained: Mutex<HashMap<StreamId, Vec<Watermark>>> = Mutex::new(HashMap::new());
    let producers_done = AtomicBool::new(false);

    thread::scope(|s| {
        let producer_handles: Vec<_> = streams
            .iter()
            .map(|stream| {
                let producer = manager.enqueue_gateway();
                let admitted = &admitted;
                s.spawn(move || {
                    let mut mine = Vec::with_capacity(PER_STREAM);
                    for i in 0..PER_STREAM {
                        mine.push(producer.enqueue(stream, vec![0u8; 8 + i % 32], None).unwrap());
                    }
                    admitted.lock().insert(stream.clone(), mine);
                })
            })
            .collect();

        for _ in 0..3 {
            let consumer = manager.dequeue_gateway();
            let drained = &drained;
            let producers_done = &producers_done;
            s.spawn(move || {
                loop {
                    if let Some(batch) = consumer.next_batch() {
                        drained
                            .lock()
                            .entry(batch.stream().clone())
                            .or_default()
                            .extend(batch.entries().iter().map(|e| e.watermark()));
                        batch.close();
                    } else if producers_done.load(Ordering::SeqCst) && !consumer.has_pending() {
                        break;
                    } else {
                        thread::yield_now();
                    }
                }
            });
        }

        for handle in producer_handles {
            handle.join().unwrap();
        }
        producers_done.store(true, Ordering::SeqCst);
    });

    let admitted = admitted.into_inner();
    let drained = drained.into_inner();
    for stream in &streams {
        assert_eq!(drained[stream], admitted[stream], "stream {stream}");
    }
    let stats = manager.stats();
    assert_eq!(stats.memory.allocated_bytes, 0);
    assert_eq!(stats.buffered_records(), 0);
    assert!(manager.close().is_ok());
}

#[test]
fn test_markers_follow_their_records() {
    const PRODUCERS: usize = 3;
    const RECORDS: usize = 300;

    let flushed: Arc<Mutex<Vec<Watermark>>> = Arc::new(Mutex::new(Vec::new()));
    let emitted: Arc<Mutex<Vec<(CheckpointMarker, Vec<Watermark>)>>> =
        Arc::new(Mutex::new(Vec::new()));

    let sink_flushed = Arc::clone(&flushed);
    let sink_emitted = Arc::clone(&emitted);
    let manager = BufferManager::new(
        config(16 * 1024).with_max_batch_records(7),
        move |marker: CheckpointMarker| {
            let snapshot = sink_flushed.lock().clone();
            sink_emitted.lock().push((marker, snapshot));
        },
    )
    .unwrap();

    let admitted: Mutex<Vec<Watermark>> = Mutex::new(Vec::new());
    let producers_done = AtomicBool::new(false);

    thread::scope(|s| {
        let producer_handles: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let producer = manager.enqueue_gateway();
                let admitted = &admitted;
                s.spawn(move || {
                    let stream = StreamId::new(format!("p{p}"));
                    for i in 0..RECORDS {
                        let watermark = producer.enqueue(&stream, vec![1u8; 16], None).unwrap();
                        admitted.lock().push(watermark);
                        if i % 25 == 24 {
                            producer
                                .enqueue_checkpoint(eddy_buffer::CheckpointRequest::global(
                                    format!("{p}:{i}"),
                                ))
                                .unwrap();
                        }
                    }
                })
            })
            .collect();

        for _ in 0..2 {
            let consumer = manager.dequeue_gateway();
            let flushed = Arc::clone(&flushed);
            let producers_done = &producers_done;
            s.spawn(move || {
                loop {
                    if let Some(batch) = consumer.next_batch() {
                        flushed
                            .lock()
                            .extend(batch.entries().iter().map(|e| e.watermark()));
                        batch.close();
                    } else if producers_done.load(Ordering::SeqCst) && !consumer.has_pending() {
                        break;
                    } else {
                        consumer.flush_states();
                        thread::yield_now();
                    }
                }
            });
        }

        for handle in producer_handles {
            handle.join().unwrap();
        }
        producers_done.store(true, Ordering::SeqCst);
    });

    manager.flush_states();
    let admitted = admitted.into_inner();
    let emitted = emitted.lock();
    assert_eq!(emitted.len(), PRODUCERS * RECORDS / 25);

    let mut previous = Watermark::ZERO;
    let mut covered = 0;
    for (marker, flushed_at_emit) in emitted.iter() {
        assert!(marker.watermark() > previous, "markers out of order");
        previous = marker.watermark();
        covered += marker.record_count();
        for watermark in admitted.iter().filter(|w| **w < marker.watermark()) {
            assert!(
                flushed_at_emit.contains(watermark),
                "{} emitted before {} was flushed",
                marker.watermark(),
                watermark
            );
        }
    }
    assert_eq!(covered, (PRODUCERS * RECORDS) as u64);
    assert_eq!(manager.stats().checkpoints.pending_markers, 0);
}
