//! profmeta CLI
//!
//! Command-line interface for inserting and querying profile metadata.

use std::collections::HashSet;
use std::process;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use profmeta::{Config, MetaError, ProfileMeta, RangeStore, Result, TimeWindow, WalSyncStrategy};
use tracing_subscriber::{fmt, EnvFilter};

/// profmeta CLI
#[derive(Parser, Debug)]
#[command(name = "profmeta-cli")]
#[command(about = "Time-indexed profile metadata store")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./profmeta_data")]
    data_dir: String,

    /// Sequence values reserved per lease refill
    #[arg(short, long, default_value = "1000")]
    batch_size: u64,

    /// fsync the WAL after every commit
    #[arg(long)]
    sync_every_write: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Insert one record keyed at the current time
    Insert {
        /// Partition prefix
        prefix: String,

        #[arg(long, default_value = "1")]
        profile_id: u64,

        /// Sample duration in nanoseconds
        #[arg(long, default_value = "0", allow_hyphen_values = true)]
        duration_ns: i64,

        #[arg(long, default_value = "alloc_objects")]
        sample_type: String,

        #[arg(long, default_value = "count")]
        unit: String,
    },

    /// Print records inserted within the last N seconds
    Scan {
        prefix: String,

        #[arg(short, long, default_value = "3600")]
        since_secs: u64,
    },

    /// Count records inserted within the last N seconds
    Count {
        prefix: String,

        #[arg(short, long, default_value = "3600")]
        since_secs: u64,
    },

    /// Write a checkpoint and truncate the WAL
    Checkpoint,

    /// Concurrent insert load; verifies every key is unique
    Bench {
        #[arg(long, default_value = "bench")]
        prefix: String,

        #[arg(short, long, default_value = "4")]
        writers: usize,

        #[arg(short = 'n', long, default_value = "10000")]
        per_writer: usize,
    },
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,profmeta=info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    if let Err(e) = run(args) {
        tracing::error!("{}", e);
        process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let sync = if args.sync_every_write {
        WalSyncStrategy::EveryWrite
    } else {
        WalSyncStrategy::EveryNEntries { count: 100 }
    };
    let config = Config::builder()
        .data_dir(&args.data_dir)
        .sequence_batch_size(args.batch_size)
        .wal_sync_strategy(sync)
        .build();

    let store = RangeStore::open(config)?;

    match args.command {
        Commands::Insert {
            prefix,
            profile_id,
            duration_ns,
            sample_type,
            unit,
        } => {
            let record = ProfileMeta::new(
                profile_id,
                now_millis(),
                duration_ns,
                sample_type,
                unit,
            );
            let key = store.insert(prefix.as_bytes(), &record)?;
            println!("inserted {} ({} byte key)", prefix, key.len());
        }
        Commands::Scan { prefix, since_secs } => {
            let window = TimeWindow::last(Duration::from_secs(since_secs));
            for entry in store.scan(prefix.as_bytes(), window)?.entries() {
                let entry = entry?;
                println!(
                    "{}\t{}\tid={}\tts={}\tdur={}ns\t{}/{}",
                    entry.time,
                    entry.seq,
                    entry.record.profile_id,
                    entry.record.timestamp,
                    entry.record.duration,
                    entry.record.sample_type,
                    entry.record.sample_type_unit,
                );
            }
        }
        Commands::Count { prefix, since_secs } => {
            let window = TimeWindow::last(Duration::from_secs(since_secs));
            println!("{}", store.count(prefix.as_bytes(), window)?);
        }
        Commands::Checkpoint => {
            let stats = store.checkpoint()?;
            println!(
                "checkpoint at lsn {}: {} entries, {} counters, {} bytes",
                stats.lsn, stats.entries, stats.counters, stats.bytes
            );
        }
        Commands::Bench {
            prefix,
            writers,
            per_writer,
        } => bench(&store, prefix.as_bytes(), writers, per_writer)?,
    }

    store.close()
}

fn bench(store: &RangeStore, prefix: &[u8], writers: usize, per_writer: usize) -> Result<()> {
    let started = Instant::now();

    let per_thread: Vec<Result<Vec<Vec<u8>>>> = crossbeam::thread::scope(|s| {
        let handles: Vec<_> = (0..writers)
            .map(|w| {
                s.spawn(move |_| -> Result<Vec<Vec<u8>>> {
                    let mut keys = Vec::with_capacity(per_writer);
                    for i in 0..per_writer {
                        let record = ProfileMeta::new(
                            (w * per_writer + i) as u64,
                            now_millis(),
                            0,
                            "alloc_objects",
                            "count",
                        );
                        keys.push(store.insert(prefix, &record)?);
                    }
                    Ok(keys)
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|h| {
                h.join()
                    .unwrap_or_else(|_| Err(MetaError::Engine("writer thread panicked".into())))
            })
            .collect()
    })
    .map_err(|_| MetaError::Engine("writer scope panicked".to_string()))?;

    let mut unique = HashSet::with_capacity(writers * per_writer);
    for keys in per_thread {
        unique.extend(keys?);
    }

    let elapsed = started.elapsed();
    let total = writers * per_writer;
    if unique.len() != total {
        return Err(MetaError::Engine(format!(
            "{} duplicate keys out of {}",
            total - unique.len(),
            total
        )));
    }

    println!(
        "{} inserts by {} writers in {:.2?} ({:.0} inserts/s), all keys unique",
        total,
        writers,
        elapsed,
        total as f64 / elapsed.as_secs_f64().max(f64::EPSILON)
    );
    Ok(())
}

fn now_millis() -> i64 {
    profmeta::keys::now_nanos() / 1_000_000
}
