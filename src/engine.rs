//! Engine Module
//!
//! The embedded ordered key-value engine the profile store runs on.
//!
//! ## Responsibilities
//! - Coordinate WAL, MemTable and checkpoint files
//! - Atomic write transactions and snapshot-isolated iterators
//! - Durable counters for sequence leases
//! - Crash recovery on startup, checkpoints when the WAL grows

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use fs2::FileExt;
use parking_lot::Mutex;

use crate::config::Config;
use crate::error::{MetaError, Result};
use crate::kv::{KvEngine, KvIterator, WriteBatch};
use crate::memtable::{MemTable, SnapshotGuard};
use crate::storage::{self, CheckpointImage, CheckpointWriter};
use crate::wal::{Operation, WalRecovery, WalWriter};

/// The main storage engine
///
/// ## Concurrency Model: Single-Writer / Multiple-Reader (SWMR)
///
/// - **Writes** (commit/advance_counter/checkpoint): serialized by `writer`
///   - Must acquire: writer → WAL append → memtable apply → publish LSN
///
/// - **Reads** (get/iter): never take `writer`
///   - A snapshot pins the published LSN at creation
///   - Each iterator step takes the memtable read lock briefly, so an open
///     scan never blocks commits
pub struct Engine {
    /// Engine configuration
    config: Config,

    /// Multi-version in-memory state (shared with live iterators)
    memtable: Arc<MemTable>,

    /// WAL and counters, only touched by writers
    writer: Mutex<WriterState>,

    checkpoint_path: PathBuf,

    /// Exclusive lock on the data directory, released on drop
    _lock: DirLock,
}

struct WriterState {
    wal: WalWriter,
    counters: BTreeMap<Vec<u8>, u64>,
}

/// Summary of a completed checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointStats {
    pub lsn: u64,
    pub entries: usize,
    pub counters: usize,
    pub bytes: u64,
}

impl Engine {
    // =========================================================================
    // Internal Path Constants
    // =========================================================================
    const WAL_FILENAME: &'static str = "wal.log";
    const CHECKPOINT_FILENAME: &'static str = "checkpoint.dat";
    const LOCK_FILENAME: &'static str = "LOCK";

    /// Open or create an engine with the given config
    ///
    /// On startup:
    /// 1. Create and lock the data directory
    /// 2. Load the last checkpoint, if any
    /// 3. Replay WAL entries newer than the checkpoint
    /// 4. Ready to serve requests
    ///
    /// Fails with `MetaError::Engine` if another engine holds the directory.
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;

        // Step 1: Create data directory if it doesn't exist, then lock it
        fs::create_dir_all(&config.data_dir)?;
        let lock = DirLock::acquire(&config.data_dir.join(Self::LOCK_FILENAME))?;
        let wal_path = config.data_dir.join(Self::WAL_FILENAME);
        let checkpoint_path = config.data_dir.join(Self::CHECKPOINT_FILENAME);

        // Step 2: Load checkpoint image
        let image = storage::load(&checkpoint_path)?.unwrap_or_default();
        let mut last_lsn = image.last_lsn;
        let memtable = Arc::new(MemTable::new(last_lsn));
        if !image.entries.is_empty() {
            let puts: Vec<Operation> = image
                .entries
                .into_iter()
                .map(|(key, value)| Operation::Put {
                    key,
                    value: value.to_vec(),
                })
                .collect();
            memtable.apply(last_lsn, &puts);
        }
        let mut counters: BTreeMap<Vec<u8>, u64> = image.counters.into_iter().collect();

        // Step 3: Replay WAL on top of the checkpoint
        if wal_path.exists() {
            let (entries, recovery) = WalRecovery::recover(&wal_path)?;
            let mut replayed = 0u64;

            for entry in entries {
                // Already part of the checkpoint (crash before WAL truncation)
                if entry.lsn <= last_lsn {
                    continue;
                }
                for op in &entry.operations {
                    if let Operation::SetCounter { name, value } = op {
                        counters.insert(name.clone(), *value);
                    }
                }
                memtable.apply(entry.lsn, &entry.operations);
                last_lsn = entry.lsn;
                replayed += 1;
            }

            if recovery.entries_recovered > 0 || recovery.was_truncated {
                tracing::info!(
                    recovered = recovery.entries_recovered,
                    replayed,
                    corrupted = recovery.entries_corrupted,
                    truncated = recovery.was_truncated,
                    last_lsn,
                    "WAL recovery complete"
                );
            }
        }

        let wal = WalWriter::open(&wal_path, config.wal_sync_strategy, last_lsn)?;

        tracing::info!(
            data_dir = %config.data_dir.display(),
            keys = memtable.entry_count(),
            counters = counters.len(),
            last_lsn,
            "engine opened"
        );

        Ok(Self {
            config,
            memtable,
            writer: Mutex::new(WriterState { wal, counters }),
            checkpoint_path,
            _lock: lock,
        })
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: &Path) -> Result<Self> {
        Self::open(Config::builder().data_dir(path).build())
    }

    /// Put a single key-value pair
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.put(key, value);
        self.commit(batch)
    }

    /// Delete a single key
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.delete(key);
        self.commit(batch)
    }

    /// Current durable value of a counter (zero if never advanced)
    pub fn counter(&self, name: &[u8]) -> u64 {
        self.writer.lock().counters.get(name).copied().unwrap_or(0)
    }

    /// Write a checkpoint and truncate the WAL
    pub fn checkpoint(&self) -> Result<CheckpointStats> {
        let mut state = self.writer.lock();
        self.checkpoint_locked(&mut state)
    }

    /// Called with the writer lock held, so the memtable is quiescent at `lsn`
    fn checkpoint_locked(&self, state: &mut WriterState) -> Result<CheckpointStats> {
        let lsn = state.wal.current_lsn();
        let image = CheckpointImage {
            last_lsn: lsn,
            entries: self.memtable.entries_at(lsn),
            counters: state
                .counters
                .iter()
                .map(|(name, value)| (name.clone(), *value))
                .collect(),
        };

        let bytes = CheckpointWriter::create(&self.checkpoint_path)?.write(&image)?;

        // Checkpoint is durable; entries up to `lsn` are no longer needed
        state.wal.truncate()?;

        let stats = CheckpointStats {
            lsn,
            entries: image.entries.len(),
            counters: image.counters.len(),
            bytes,
        };
        tracing::info!(
            lsn = stats.lsn,
            entries = stats.entries,
            counters = stats.counters,
            bytes = stats.bytes,
            "checkpoint written"
        );
        Ok(stats)
    }

    /// Append to the WAL, apply, and checkpoint if the WAL is over its limit
    fn commit_locked(
        &self,
        state: &mut WriterState,
        operations: &[Operation],
        force_sync: bool,
    ) -> Result<u64> {
        let lsn = state.wal.append(operations, force_sync)?;
        self.memtable.apply(lsn, operations);

        if state.wal.size() >= self.config.wal_size_limit {
            // The commit itself is durable; a failed checkpoint only delays truncation
            if let Err(e) = self.checkpoint_locked(state) {
                tracing::warn!(error = %e, "automatic checkpoint failed");
            }
        }
        Ok(lsn)
    }

    /// Close the engine gracefully
    ///
    /// Checkpoints so the next open does not replay the WAL
    pub fn close(self) -> Result<()> {
        let mut state = self.writer.lock();
        if state.wal.size() > 0 {
            self.checkpoint_locked(&mut state)?;
        }
        state.wal.sync()?;
        tracing::info!(lsn = state.wal.current_lsn(), "engine closed");
        Ok(())
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// LSN of the last published commit
    pub fn committed_lsn(&self) -> u64 {
        self.memtable.committed_lsn()
    }

    /// Current WAL size in bytes
    pub fn wal_size(&self) -> u64 {
        self.writer.lock().wal.size()
    }

    /// Number of keys tracked by the memtable
    pub fn key_count(&self) -> usize {
        self.memtable.entry_count()
    }

    /// Approximate memtable size in bytes
    pub fn memtable_size(&self) -> usize {
        self.memtable.size()
    }

    /// Number of open read snapshots
    pub fn active_snapshots(&self) -> usize {
        self.memtable.active_snapshots()
    }
}

impl KvEngine for Engine {
    type Iter = EngineIterator;

    fn commit(&self, batch: WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let operations = batch.into_operations();
        let mut state = self.writer.lock();
        self.commit_locked(&mut state, &operations, false)?;
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let lsn = self.memtable.committed_lsn();
        Ok(self.memtable.get(key, lsn).map(|v| v.to_vec()))
    }

    fn iter(&self) -> Result<EngineIterator> {
        Ok(EngineIterator {
            snapshot: self.memtable.snapshot(),
            current: None,
        })
    }

    fn advance_counter(&self, name: &[u8], by: u64) -> Result<u64> {
        let mut state = self.writer.lock();
        let previous = state.counters.get(name).copied().unwrap_or(0);
        let value = previous.checked_add(by).ok_or_else(|| {
            MetaError::Engine(format!(
                "counter {:?} overflows advancing {} by {}",
                String::from_utf8_lossy(name),
                previous,
                by
            ))
        })?;

        let op = [Operation::SetCounter {
            name: name.to_vec(),
            value,
        }];
        // Visible to an automatic checkpoint taken inside the commit
        state.counters.insert(name.to_vec(), value);
        if let Err(e) = self.commit_locked(&mut state, &op, true) {
            state.counters.insert(name.to_vec(), previous);
            return Err(e);
        }
        Ok(previous)
    }
}

/// Advisory exclusive lock on `{data_dir}/LOCK`
///
/// The file itself is left in place; only the lock is released when the
/// handle closes.
struct DirLock {
    file: File,
}

impl DirLock {
    fn acquire(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        file.try_lock_exclusive().map_err(|e| {
            MetaError::Engine(format!(
                "data directory is locked by another engine ({}): {}",
                path.display(),
                e
            ))
        })?;
        Ok(Self { file })
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        // Best effort; closing the handle releases it anyway
        let _ = FileExt::unlock(&self.file);
    }
}

/// Forward iterator over an engine snapshot
///
/// Unpositioned until the first `seek`.
pub struct EngineIterator {
    snapshot: SnapshotGuard,
    current: Option<(Vec<u8>, Bytes)>,
}

impl EngineIterator {
    /// LSN this iterator reads at
    pub fn snapshot_lsn(&self) -> u64 {
        self.snapshot.lsn()
    }
}

impl KvIterator for EngineIterator {
    fn seek(&mut self, target: &[u8]) -> Result<()> {
        self.current = self
            .snapshot
            .table()
            .seek(Bound::Included(target), self.snapshot.lsn());
        Ok(())
    }

    fn valid(&self) -> bool {
        self.current.is_some()
    }

    fn next(&mut self) -> Result<()> {
        if let Some((key, _)) = self.current.take() {
            self.current = self
                .snapshot
                .table()
                .seek(Bound::Excluded(key.as_slice()), self.snapshot.lsn());
        }
        Ok(())
    }

    fn key(&self) -> &[u8] {
        self.current.as_ref().map(|(k, _)| k.as_slice()).unwrap_or(&[])
    }

    fn value(&self) -> &[u8] {
        self.current.as_ref().map(|(_, v)| v.as_ref()).unwrap_or(&[])
    }
}
