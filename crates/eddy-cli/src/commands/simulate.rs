//! Synthetic workload command.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use clap::Args;
use comfy_table::Cell;
use eddy::{
    BufferConfig, BufferManager, CheckpointMarker, CheckpointRequest, DequeueGateway,
    EnqueueGateway, Error, StreamId, format_bytes,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

use crate::OutputFormat;
use crate::output::{self, Format};

/// Workload shape for `eddy simulate`.
#[derive(Args, Debug, Clone)]
pub struct SimulateArgs {
    /// Number of streams records are spread across
    #[arg(long, default_value_t = 4)]
    streams: usize,

    /// Number of producer threads
    #[arg(long, default_value_t = 2)]
    producers: usize,

    /// Records enqueued by each producer
    #[arg(long, default_value_t = 10_000)]
    records: u64,

    /// Payload size of each record in bytes
    #[arg(long, default_value_t = 512)]
    record_size: usize,

    /// Number of flush worker threads
    #[arg(long, default_value_t = 2)]
    workers: usize,

    /// Register a global checkpoint after every N records of a producer (0 disables)
    #[arg(long, default_value_t = 1_000)]
    checkpoint_every: u64,

    /// Simulated destination latency per batch, in milliseconds
    #[arg(long, default_value_t = 0)]
    flush_delay_ms: u64,

    /// Fail the Nth batch to exercise the failure path
    #[arg(long)]
    fail_batch: Option<u64>,

    /// Override the memory ceiling in bytes
    #[arg(long)]
    max_memory: Option<u64>,
}

/// Simulation result output.
#[derive(Serialize)]
struct SimulationOutput {
    records_enqueued: u64,
    records_flushed: u64,
    batches_closed: u64,
    batches_failed: u64,
    checkpoints_emitted: u64,
    records_covered_by_checkpoints: u64,
    peak_memory_bytes: u64,
    max_memory_bytes: u64,
    elapsed_ms: u128,
    records_per_sec: f64,
    flush_failure: Option<String>,
}

#[derive(Default)]
struct Counters {
    enqueued: AtomicU64,
    flushed: AtomicU64,
    dispatched: AtomicU64,
    checkpoints: AtomicU64,
    covered: AtomicU64,
}

/// Run the simulate command.
pub fn run(
    args: &SimulateArgs,
    mut config: BufferConfig,
    format: OutputFormat,
    quiet: bool,
) -> Result<()> {
    if args.streams == 0 || args.producers == 0 || args.workers == 0 {
        return Err(anyhow!("streams, producers and workers must all be at least 1"));
    }
    if let Some(max_memory) = args.max_memory {
        config = config.with_max_memory_bytes(max_memory);
    }

    let counters = Arc::new(Counters::default());
    let sink_counters = Arc::clone(&counters);
    let manager = BufferManager::new(config, move |marker: CheckpointMarker| {
        sink_counters.checkpoints.fetch_add(1, Ordering::Relaxed);
        sink_counters
            .covered
            .fetch_add(marker.record_count(), Ordering::Relaxed);
    })?;

    let total = args.records * args.producers as u64;
    let progress = if quiet {
        ProgressBar::hidden()
    } else {
        let bar = ProgressBar::new(total);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} flushed ({per_sec})",
            )?
            .progress_chars("=> "),
        );
        bar
    };

    let streams: Vec<StreamId> = (0..args.streams)
        .map(|i| StreamId::with_namespace("simulate", format!("stream_{i}")))
        .collect();
    let producers_done = AtomicBool::new(false);
    let started = Instant::now();

    output::status(
        &format!(
            "Simulating {} records over {} streams with {} producers and {} workers",
            total, args.streams, args.producers, args.workers
        ),
        quiet,
    );

    let producer_results: Vec<std::result::Result<(), Error>> = thread::scope(|s| {
        let handles: Vec<_> = (0..args.producers)
            .map(|p| {
                let producer = manager.enqueue_gateway();
                let streams = &streams;
                let counters = &counters;
                s.spawn(move || produce(&producer, p, streams, args, counters))
            })
            .collect();

        for _ in 0..args.workers {
            let consumer = manager.dequeue_gateway();
            let counters = &counters;
            let progress = &progress;
            let producers_done = &producers_done;
            s.spawn(move || drain(&consumer, args, counters, progress, producers_done));
        }

        let results: Vec<_> = handles
            .into_iter()
            .map(|h| h.join().unwrap_or(Err(Error::FlushFailed("producer panicked".to_string()))))
            .collect();
        producers_done.store(true, Ordering::SeqCst);
        results
    });

    progress.finish_and_clear();
    let elapsed = started.elapsed();
    let stats = manager.stats();
    let failure = manager.flush_failure();
    let closed = manager.close();

    for result in &producer_results {
        if let Err(e) = result {
            tracing::debug!("producer stopped: {}", e);
        }
    }

    let flushed = counters.flushed.load(Ordering::Relaxed);
    let result = SimulationOutput {
        records_enqueued: counters.enqueued.load(Ordering::Relaxed),
        records_flushed: flushed,
        batches_closed: stats.batches_closed,
        batches_failed: stats.batches_failed,
        checkpoints_emitted: counters.checkpoints.load(Ordering::Relaxed),
        records_covered_by_checkpoints: counters.covered.load(Ordering::Relaxed),
        peak_memory_bytes: stats.memory.peak_bytes,
        max_memory_bytes: stats.memory.max_bytes,
        elapsed_ms: elapsed.as_millis(),
        records_per_sec: flushed as f64 / elapsed.as_secs_f64().max(f64::EPSILON),
        flush_failure: failure,
    };

    match Format::from(format) {
        Format::Json => output::print_json(&result, quiet)?,
        Format::Table => print_table(&result, quiet),
    }

    match closed {
        Ok(()) => {
            output::success("Simulation completed", quiet);
            Ok(())
        }
        Err(e) => {
            output::error("Simulation ended with a flush failure");
            Err(e.into())
        }
    }
}

fn produce(
    producer: &EnqueueGateway,
    index: usize,
    streams: &[StreamId],
    args: &SimulateArgs,
    counters: &Counters,
) -> std::result::Result<(), Error> {
    let payload = bytes_of(args.record_size, index);
    for i in 0..args.records {
        let stream = &streams[(i as usize + index) % streams.len()];
        producer.enqueue(stream, payload.clone(), None)?;
        counters.enqueued.fetch_add(1, Ordering::Relaxed);

        if args.checkpoint_every > 0 && (i + 1) % args.checkpoint_every == 0 {
            let state = format!("{{\"producer\":{index},\"position\":{}}}", i + 1);
            producer.enqueue_checkpoint(CheckpointRequest::global(state))?;
        }
    }
    Ok(())
}

fn drain(
    consumer: &DequeueGateway,
    args: &SimulateArgs,
    counters: &Counters,
    progress: &ProgressBar,
    producers_done: &AtomicBool,
) {
    let delay = Duration::from_millis(args.flush_delay_ms);
    loop {
        let finishing = producers_done.load(Ordering::SeqCst);
        let next = if finishing {
            consumer.next_final_batch()
        } else {
            consumer.next_batch()
        };
        if let Some(batch) = next {
            if !delay.is_zero() {
                thread::sleep(delay);
            }
            let number = counters.dispatched.fetch_add(1, Ordering::Relaxed) + 1;
            if args.fail_batch == Some(number) {
                batch.fail(format!("simulated failure of batch {number}"));
                continue;
            }
            let records = batch.len() as u64;
            batch.close();
            counters.flushed.fetch_add(records, Ordering::Relaxed);
            progress.inc(records);
        } else if finishing && !consumer.has_pending() {
            consumer.flush_states();
            break;
        } else {
            consumer.flush_states();
            thread::sleep(Duration::from_millis(1));
        }
    }
}

fn bytes_of(size: usize, seed: usize) -> Vec<u8> {
    (0..size).map(|i| b'a' + ((i + seed) % 26) as u8).collect()
}

fn print_table(result: &SimulationOutput, quiet: bool) {
    if quiet {
        return;
    }
    let mut table = output::create_table();
    output::add_header(&mut table, &["Metric", "Value"]);
    let rows = [
        ("Records Enqueued", result.records_enqueued.to_string()),
        ("Records Flushed", result.records_flushed.to_string()),
        ("Batches Closed", result.batches_closed.to_string()),
        ("Batches Failed", result.batches_failed.to_string()),
        ("Checkpoints Emitted", result.checkpoints_emitted.to_string()),
        (
            "Records Covered",
            result.records_covered_by_checkpoints.to_string(),
        ),
        (
            "Peak Memory",
            format!(
                "{} of {}",
                format_bytes(result.peak_memory_bytes),
                format_bytes(result.max_memory_bytes)
            ),
        ),
        ("Elapsed", format!("{} ms", result.elapsed_ms)),
        ("Throughput", format!("{:.0} records/s", result.records_per_sec)),
    ];
    for (metric, value) in rows {
        table.add_row(vec![Cell::new(metric), Cell::new(value)]);
    }
    println!("{table}");
}
