//! MemTable implementation
//!
//! BTreeMap of version chains with RwLock for concurrency.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};

use super::Version;
use crate::wal::Operation;

/// Per-version bookkeeping overhead used for size accounting
const VERSION_OVERHEAD: usize = 16;

/// In-memory multi-version table
///
/// ## Concurrency:
/// - `data`: RwLock, writers are serialized by the engine's write lock
/// - `committed`: published after a commit is fully applied
/// - `snapshots`: refcounted LSNs of live readers, used as the prune watermark
pub struct MemTable {
    data: RwLock<BTreeMap<Vec<u8>, Vec<Version>>>,
    committed: AtomicU64,
    snapshots: Mutex<BTreeMap<u64, usize>>,
    size: AtomicUsize,
}

impl MemTable {
    /// Create an empty table whose state is as of `lsn`
    pub fn new(lsn: u64) -> Self {
        Self {
            data: RwLock::new(BTreeMap::new()),
            committed: AtomicU64::new(lsn),
            snapshots: Mutex::new(BTreeMap::new()),
            size: AtomicUsize::new(0),
        }
    }

    /// Apply a committed transaction and publish it
    ///
    /// All operations become visible to new snapshots at once, when
    /// `committed` advances to `lsn`. Counter operations are ignored here.
    pub fn apply(&self, lsn: u64, operations: &[Operation]) {
        let watermark = self.watermark();
        let mut data = self.data.write();

        for op in operations {
            let (key, value) = match op {
                Operation::Put { key, value } => (key, Some(Bytes::copy_from_slice(value))),
                Operation::Delete { key } => (key, None),
                Operation::SetCounter { .. } => continue,
            };

            let added = key.len() + value.as_ref().map_or(0, |v| v.len()) + VERSION_OVERHEAD;
            let chain = data.entry(key.clone()).or_default();
            chain.push(Version { lsn, value });
            self.size.fetch_add(added, Ordering::Relaxed);

            let removed = prune(chain, watermark, key.len());
            if removed > 0 {
                self.size.fetch_sub(removed, Ordering::Relaxed);
            }
        }

        // Tombstone-only chains nobody can read any more
        if operations.iter().any(|op| matches!(op, Operation::Delete { .. })) {
            data.retain(|_, chain| {
                !(chain.len() == 1 && chain[0].value.is_none() && chain[0].lsn <= watermark)
            });
        }

        drop(data);
        self.committed.store(lsn, Ordering::Release);
    }

    /// Pin the current committed state for reading
    pub fn snapshot(self: &Arc<Self>) -> SnapshotGuard {
        let mut snapshots = self.snapshots.lock();
        let lsn = self.committed.load(Ordering::Acquire);
        *snapshots.entry(lsn).or_insert(0) += 1;
        SnapshotGuard {
            table: Arc::clone(self),
            lsn,
        }
    }

    /// Point lookup at `lsn`
    pub fn get(&self, key: &[u8], lsn: u64) -> Option<Bytes> {
        let data = self.data.read();
        data.get(key).and_then(|chain| visible(chain, lsn))
    }

    /// First live key at or after `from` (or strictly after, if excluded)
    pub fn seek(&self, from: Bound<&[u8]>, lsn: u64) -> Option<(Vec<u8>, Bytes)> {
        let data = self.data.read();
        data.range::<[u8], _>((from, Bound::Unbounded))
            .find_map(|(key, chain)| visible(chain, lsn).map(|value| (key.clone(), value)))
    }

    /// All live entries at `lsn`, in key order
    pub fn entries_at(&self, lsn: u64) -> Vec<(Vec<u8>, Bytes)> {
        let data = self.data.read();
        data.iter()
            .filter_map(|(key, chain)| visible(chain, lsn).map(|value| (key.clone(), value)))
            .collect()
    }

    /// LSN of the latest published commit
    pub fn committed_lsn(&self) -> u64 {
        self.committed.load(Ordering::Acquire)
    }

    /// Approximate size in bytes, including retained old versions
    pub fn size(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    /// Number of keys (live or tombstoned) currently tracked
    pub fn entry_count(&self) -> usize {
        self.data.read().len()
    }

    /// Number of snapshots currently pinned
    pub fn active_snapshots(&self) -> usize {
        self.snapshots.lock().values().sum()
    }

    /// Oldest LSN any reader may still observe
    fn watermark(&self) -> u64 {
        let snapshots = self.snapshots.lock();
        let committed = self.committed.load(Ordering::Acquire);
        snapshots
            .keys()
            .next()
            .map_or(committed, |oldest| (*oldest).min(committed))
    }

    fn release(&self, lsn: u64) {
        let mut snapshots = self.snapshots.lock();
        if let Some(count) = snapshots.get_mut(&lsn) {
            *count -= 1;
            if *count == 0 {
                snapshots.remove(&lsn);
            }
        }
    }
}

/// A registered read snapshot; unregisters on drop
pub struct SnapshotGuard {
    table: Arc<MemTable>,
    lsn: u64,
}

impl SnapshotGuard {
    pub fn lsn(&self) -> u64 {
        self.lsn
    }

    pub fn table(&self) -> &MemTable {
        &self.table
    }
}

impl Drop for SnapshotGuard {
    fn drop(&mut self) {
        self.table.release(self.lsn);
    }
}

/// Newest non-tombstone value with `version.lsn <= lsn`
fn visible(chain: &[Version], lsn: u64) -> Option<Bytes> {
    chain
        .iter()
        .rev()
        .find(|v| v.lsn <= lsn)
        .and_then(|v| v.value.clone())
}

/// Drop versions shadowed below the watermark; returns bytes freed
///
/// Keeps the newest version `<= watermark` and everything newer.
fn prune(chain: &mut Vec<Version>, watermark: u64, key_len: usize) -> usize {
    let Some(keep_from) = chain.iter().rposition(|v| v.lsn <= watermark) else {
        return 0;
    };
    if keep_from == 0 {
        return 0;
    }
    chain
        .drain(..keep_from)
        .map(|v| key_len + v.value.map_or(0, |b| b.len()) + VERSION_OVERHEAD)
        .sum()
}
