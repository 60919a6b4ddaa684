//! MemTable Module
//!
//! In-memory multi-version table holding every live key.
//!
//! ## Responsibilities
//! - Ordered storage of versions tagged with their commit LSN
//! - Snapshot reads: a reader pinned at LSN `n` sees the newest version `<= n`
//! - Pruning of versions no registered snapshot can observe
//! - Single-writer/multi-reader access pattern
//!
//! ## Data Structure Choice
//! BTreeMap wrapped in RwLock:
//! - Ordered keys (required for range scans and checkpoints)
//! - Readers take the lock per lookup, never across iterator steps

mod table;

pub use table::{MemTable, SnapshotGuard};

use bytes::Bytes;

/// One committed version of a key
#[derive(Debug, Clone, PartialEq)]
pub struct Version {
    /// Commit LSN that produced this version
    pub lsn: u64,

    /// The value, or `None` for a tombstone
    pub value: Option<Bytes>,
}
