//! Throughput benchmarks for the ingestion buffer.

use std::hint::black_box;
use std::time::Duration;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use eddy_buffer::{BufferConfig, BufferManager, CheckpointMarker, CheckpointRequest};
use eddy_common::types::StreamId;

fn manager() -> BufferManager {
    let config = BufferConfig::with_budget(256 * 1024 * 1024)
        .with_min_flush_threshold_bytes(1)
        .with_max_batch_records(1_000)
        .with_diagnostics_interval(Duration::ZERO);
    BufferManager::new(config, |marker: CheckpointMarker| {
        black_box(marker);
    })
    .unwrap()
}

fn bench_enqueue_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("enqueue_drain");

    for records in [1_000usize, 10_000] {
        group.throughput(Throughput::Elements(records as u64));
        group.bench_with_input(BenchmarkId::from_parameter(records), &records, |b, &records| {
            let payload = bytes::Bytes::from(vec![7u8; 256]);
            let streams: Vec<StreamId> = (0..8).map(|i| StreamId::new(format!("s{i}"))).collect();
            b.iter(|| {
                let manager = manager();
                let producer = manager.enqueue_gateway();
                let consumer = manager.dequeue_gateway();
                for i in 0..records {
                    let checkpoint =
                        (i % 1_000 == 999).then(|| CheckpointRequest::global("cursor"));
                    producer
                        .enqueue(&streams[i % streams.len()], payload.clone(), checkpoint)
                        .unwrap();
                }
                while let Some(batch) = consumer.next_batch() {
                    black_box(batch.len());
                    batch.close();
                }
            });
        });
    }

    group.finish();
}

fn bench_concurrent_enqueue(c: &mut Criterion) {
    c.bench_function("concurrent_enqueue_4x2500", |b| {
        let payload = bytes::Bytes::from(vec![7u8; 128]);
        b.iter(|| {
            let manager = manager();
            std::thread::scope(|s| {
                for p in 0..4 {
                    let producer = manager.enqueue_gateway();
                    let payload = payload.clone();
                    s.spawn(move || {
                        let stream = StreamId::new(format!("p{p}"));
                        for _ in 0..2_500 {
                            producer.enqueue(&stream, payload.clone(), None).unwrap();
                        }
                    });
                }
            });
            black_box(manager.stats().buffered_records());
        });
    });
}

criterion_group!(benches, bench_enqueue_drain, bench_concurrent_enqueue);
criterion_main!(benches);
