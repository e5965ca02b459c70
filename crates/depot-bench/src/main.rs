//! Load generators for a depot and its telemetry store.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::task::JoinSet;
use tracing::info;

use depot_lib::telemetry::{TelemetryError, TelemetryRecord, TelemetryRecorder, TelemetryStore};
use depot_protocol::{DepotClient, Poll};

#[derive(Parser, Debug)]
#[command(name = "depot-bench")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upsert throughput of the telemetry store
    Telemetry {
        #[arg(long, default_value = "bench.db")]
        db: PathBuf,
        #[arg(long, default_value_t = 16)]
        workers: usize,
        /// Records per worker
        #[arg(long, default_value_t = 2048)]
        ops: usize,
        /// Distinct client ids to spread the records over
        #[arg(long, default_value_t = 6000)]
        clients: u32,
        #[arg(long, default_value_t = 4096)]
        queue: usize,
        #[arg(long, default_value_t = 7)]
        seed: u64,
    },
    /// Hammer `/latest_version` on a running depot
    Poll {
        #[arg(long, default_value = "http://127.0.0.1:38686")]
        url: String,
        #[arg(long, default_value_t = 64)]
        concurrency: usize,
        /// Requests per concurrent poller
        #[arg(long, default_value_t = 100)]
        requests: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    match Args::parse().command {
        Command::Telemetry {
            db,
            workers,
            ops,
            clients,
            queue,
            seed,
        } => telemetry(db, workers, ops, clients.max(1), queue.max(1), seed).await,
        Command::Poll {
            url,
            concurrency,
            requests,
        } => poll(url, concurrency, requests).await,
    }
}

async fn telemetry(
    db: PathBuf,
    workers: usize,
    ops: usize,
    clients: u32,
    queue: usize,
    seed: u64,
) -> anyhow::Result<()> {
    let store = TelemetryStore::open(&db)?;
    let (recorder, writer) = TelemetryRecorder::spawn(store, queue);
    let started = Instant::now();

    let mut tasks = JoinSet::new();
    for worker in 0..workers {
        let recorder = recorder.clone();
        let mut rng = StdRng::seed_from_u64(seed.wrapping_add(worker as u64));
        tasks.spawn(async move {
            let mut dropped = 0usize;
            for _ in 0..ops {
                let client = format!("client-{}", rng.gen_range(0..clients));
                let version = format!("1.{}.{}", rng.gen_range(0..10), rng.gen_range(0..100));
                // Wait for room instead of dropping; the point is to measure the store.
                let record = TelemetryRecord::now(client, version);
                loop {
                    match recorder.try_record(record.clone()) {
                        Ok(()) => break,
                        Err(TelemetryError::QueueFull) => {
                            tokio::task::yield_now().await;
                        }
                        Err(_) => {
                            dropped += 1;
                            break;
                        }
                    }
                }
            }
            dropped
        });
    }

    let mut dropped = 0;
    while let Some(result) = tasks.join_next().await {
        dropped += result?;
    }
    drop(recorder);
    let store = writer.finish().await?;
    let elapsed = started.elapsed();

    let written = workers * ops - dropped;
    println!("elapsed:  {:?}", elapsed);
    println!("records:  {} ({} dropped)", written, dropped);
    println!("clients:  {}", store.count()?);
    println!("tps:      {:.0}", rate(written, elapsed));
    Ok(())
}

#[derive(Default)]
struct Tally {
    latest: usize,
    not_loaded: usize,
    throttled: usize,
    unexpected: usize,
    failed: usize,
}

async fn poll(url: String, concurrency: usize, requests: usize) -> anyhow::Result<()> {
    let client = Arc::new(DepotClient::new(url)?);
    info!("Polling {} with {} workers", client.base_url(), concurrency);
    let started = Instant::now();

    let mut tasks = JoinSet::new();
    for _ in 0..concurrency {
        let client = Arc::clone(&client);
        tasks.spawn(async move {
            let mut tally = Tally::default();
            for _ in 0..requests {
                match client.latest_version().await {
                    Ok(Poll::Latest(_)) => tally.latest += 1,
                    Ok(Poll::NotLoaded) => tally.not_loaded += 1,
                    Ok(Poll::Throttled) => tally.throttled += 1,
                    Ok(Poll::Unexpected(_)) => tally.unexpected += 1,
                    Err(_) => tally.failed += 1,
                }
            }
            tally
        });
    }

    let mut total = Tally::default();
    while let Some(result) = tasks.join_next().await {
        let tally = result?;
        total.latest += tally.latest;
        total.not_loaded += tally.not_loaded;
        total.throttled += tally.throttled;
        total.unexpected += tally.unexpected;
        total.failed += tally.failed;
    }
    let elapsed = started.elapsed();
    let sent = concurrency * requests;

    println!("elapsed:     {:?}", elapsed);
    println!("latest:      {}", total.latest);
    println!("not loaded:  {}", total.not_loaded);
    println!("throttled:   {}", total.throttled);
    println!("unexpected:  {}", total.unexpected);
    println!("failed:      {}", total.failed);
    println!("req/s:       {:.0}", rate(sent, elapsed));
    Ok(())
}

fn rate(count: usize, elapsed: Duration) -> f64 {
    count as f64 / elapsed.as_secs_f64().max(f64::EPSILON)
}
