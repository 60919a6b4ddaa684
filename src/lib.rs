//! # profmeta
//!
//! A time-indexed store for profile metadata with:
//! - Sortable keys embedding wall-clock time and a uniqueness suffix
//! - Lease-based per-prefix sequence allocation
//! - A versioned binary record layout
//! - Snapshot-isolated range scans over an embedded ordered KV engine
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        RangeStore                            │
//! │        insert(prefix, record)    scan(prefix, window)        │
//! └──────┬───────────────┬───────────────────┬──────────────────┘
//!        │               │                   │
//!        ▼               ▼                   ▼
//!  ┌───────────┐   ┌───────────┐       ┌───────────┐
//!  │ Sequence  │   │   Keys    │       │  Record   │
//!  │ (leases)  │   │ (codec)   │       │  (codec)  │
//!  └─────┬─────┘   └───────────┘       └───────────┘
//!        │
//!        ▼            KvEngine trait
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Engine                               │
//! │    WAL (append)  →  MemTable (MVCC)  →  Checkpoint file      │
//! └─────────────────────────────────────────────────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;

pub mod engine;
pub mod kv;
pub mod memtable;
pub mod storage;
pub mod wal;

pub mod keys;
pub mod record;
pub mod sequence;
pub mod store;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use config::{Config, WalSyncStrategy};
pub use engine::Engine;
pub use error::{MetaError, Result};
pub use keys::{build_key, compare_key, TimeWindow};
pub use kv::{KvEngine, KvIterator, WriteBatch};
pub use record::ProfileMeta;
pub use sequence::SequenceAllocator;
pub use store::{RangeStore, Scan, ScanEntry};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of profmeta
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
