//! Range store
//!
//! Ties the pieces together:
//! - insert: sequence → key → encoded record → one write transaction
//! - scan: bound keys → snapshot iterator → key compare → decode

use std::sync::Arc;

use crate::config::Config;
use crate::engine::{CheckpointStats, Engine};
use crate::error::{MetaError, Result};
use crate::keys::{self, TimeWindow, SUFFIX_LEN};
use crate::kv::{KvEngine, KvIterator, WriteBatch};
use crate::record::ProfileMeta;
use crate::sequence::SequenceAllocator;

/// Time-indexed store of profile metadata
///
/// Cheap to share behind an `Arc`; every method takes `&self` and runs in its
/// own engine transaction.
pub struct RangeStore<E: KvEngine = Engine> {
    engine: Arc<E>,
    sequences: SequenceAllocator<E>,
    batch_size: u64,
}

impl RangeStore<Engine> {
    /// Open the embedded engine described by `config`
    pub fn open(config: Config) -> Result<Self> {
        let batch_size = config.sequence_batch_size;
        let engine = Arc::new(Engine::open(config)?);
        Self::with_engine(engine, batch_size)
    }

    /// Checkpoint the underlying engine
    pub fn checkpoint(&self) -> Result<CheckpointStats> {
        self.engine.checkpoint()
    }

    /// Close the store, checkpointing the engine
    ///
    /// If the engine is still shared elsewhere it is checkpointed and left open.
    pub fn close(self) -> Result<()> {
        let RangeStore {
            engine, sequences, ..
        } = self;
        drop(sequences);

        match Arc::try_unwrap(engine) {
            Ok(engine) => engine.close(),
            Err(shared) => {
                tracing::debug!("engine still shared at close, checkpointing only");
                shared.checkpoint().map(|_| ())
            }
        }
    }
}

impl<E: KvEngine> RangeStore<E> {
    /// Build a store over an existing engine
    pub fn with_engine(engine: Arc<E>, batch_size: u64) -> Result<Self> {
        if batch_size == 0 {
            return Err(MetaError::Config(
                "sequence batch size must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            sequences: SequenceAllocator::new(Arc::clone(&engine)),
            engine,
            batch_size,
        })
    }

    /// Insert `record` under `prefix`, keyed by the current wall-clock time
    ///
    /// Returns the key written.
    pub fn insert(&self, prefix: &[u8], record: &ProfileMeta) -> Result<Vec<u8>> {
        self.insert_at(prefix, keys::now_nanos(), record)
    }

    /// Insert `record` keyed at `nanos`
    ///
    /// The record's own `timestamp` is stored as-is and need not match `nanos`.
    /// A failed commit leaves nothing visible; the sequence value it consumed
    /// is skipped.
    pub fn insert_at(&self, prefix: &[u8], nanos: i64, record: &ProfileMeta) -> Result<Vec<u8>> {
        let seq = self.sequences.next(prefix, self.batch_size)?;
        let key = keys::build_insert_key(prefix, nanos, seq);
        let value = record.encode()?;

        let mut batch = WriteBatch::new();
        batch.put(key.clone(), value.to_vec());
        self.engine.commit(batch)?;

        tracing::trace!(seq, nanos, profile_id = record.profile_id, "inserted profile meta");
        Ok(key)
    }

    /// Records under `prefix` keyed inside `window`, oldest first
    ///
    /// The scan reads one snapshot: inserts that commit after this call are
    /// not seen. The first decode or engine error is yielded and ends the scan.
    ///
    /// An empty `prefix` scans the whole store. Every key is visited and
    /// filtered by the time in its last 16 bytes, so results come back in key
    /// order (grouped by prefix), not globally by time.
    pub fn scan(&self, prefix: &[u8], window: TimeWindow) -> Result<Scan<E::Iter>> {
        let (lower, upper) = window.bounds(prefix);
        let mut iter = self.engine.iter()?;
        if prefix.is_empty() {
            iter.seek(&[])?;
        } else {
            iter.seek(&lower)?;
        }
        Ok(Scan {
            iter,
            prefix: prefix.to_vec(),
            upper,
            window,
            positioned: true,
            done: false,
        })
    }

    /// Number of records under `prefix` keyed inside `window`, without decoding
    pub fn count(&self, prefix: &[u8], window: TimeWindow) -> Result<usize> {
        let mut scan = self.scan(prefix, window)?;
        let mut count = 0;
        while let Some(result) = scan.next_key() {
            result?;
            count += 1;
        }
        Ok(count)
    }

    /// The underlying engine
    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    /// The sequence allocator used for inserts
    pub fn sequences(&self) -> &SequenceAllocator<E> {
        &self.sequences
    }

    pub fn batch_size(&self) -> u64 {
        self.batch_size
    }
}

/// A decoded record together with its key components
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanEntry {
    /// Insertion time from the key, epoch nanoseconds
    pub time: i64,
    /// Sequence number from the key
    pub seq: u64,
    pub record: ProfileMeta,
}

/// Lazy, single-pass scan over one snapshot
///
/// Yields `Result<ProfileMeta>` in key order. Dropping it releases the snapshot.
pub struct Scan<I: KvIterator> {
    iter: I,
    prefix: Vec<u8>,
    upper: Vec<u8>,
    window: TimeWindow,
    /// The iterator sits on an entry not yet yielded
    positioned: bool,
    done: bool,
}

impl<I: KvIterator> Scan<I> {
    /// Yield entries with their key time and sequence instead of bare records
    pub fn entries(self) -> Entries<I> {
        Entries { scan: self }
    }

    /// Move to the next in-range key of exactly this prefix; `Ok(false)` at the end
    fn advance(&mut self) -> Result<bool> {
        if !self.positioned {
            self.iter.next()?;
        }
        self.positioned = false;

        if self.prefix.is_empty() {
            return self.advance_store_wide();
        }

        loop {
            if !self.iter.valid() {
                return Ok(false);
            }
            let key = self.iter.key();
            if !key.starts_with(&self.prefix) || !keys::compare_key(key, &self.upper) {
                return Ok(false);
            }
            // A longer sibling prefix that shares our bytes
            if key.len() == self.prefix.len() + SUFFIX_LEN {
                return Ok(true);
            }
            self.iter.next()?;
        }
    }

    /// Key order is not time order across prefixes, so there is no early stop
    fn advance_store_wide(&mut self) -> Result<bool> {
        while self.iter.valid() {
            let key = self.iter.key();
            if key.len() >= SUFFIX_LEN {
                let (time, _) = keys::split_key(key, key.len() - SUFFIX_LEN)?;
                if self.window.contains(time) {
                    return Ok(true);
                }
            }
            self.iter.next()?;
        }
        Ok(false)
    }

    /// Step to the next key, leaving the value undecoded
    fn next_key(&mut self) -> Option<Result<()>> {
        if self.done {
            return None;
        }
        match self.advance() {
            Ok(true) => Some(Ok(())),
            Ok(false) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }

    fn next_entry(&mut self) -> Option<Result<ScanEntry>> {
        if let Err(e) = self.next_key()? {
            return Some(Err(e));
        }

        // The suffix is always the last 16 bytes, store-wide scans included
        let key = self.iter.key();
        let prefix_len = key.len().saturating_sub(SUFFIX_LEN);
        let decoded = keys::split_key(key, prefix_len).and_then(|(time, seq)| {
            let record = ProfileMeta::decode(self.iter.value())?;
            Ok(ScanEntry { time, seq, record })
        });
        if decoded.is_err() {
            self.done = true;
        }
        Some(decoded)
    }
}

impl<I: KvIterator> Iterator for Scan<I> {
    type Item = Result<ProfileMeta>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_entry().map(|r| r.map(|entry| entry.record))
    }
}

/// Scan adapter yielding [`ScanEntry`] values
pub struct Entries<I: KvIterator> {
    scan: Scan<I>,
}

impl<I: KvIterator> Iterator for Entries<I> {
    type Item = Result<ScanEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        self.scan.next_entry()
    }
}
