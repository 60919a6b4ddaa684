//! Ordered key-value engine boundary
//!
//! The profile store drives any engine exposing these operations:
//! - an atomic write transaction (`commit` of a `WriteBatch`)
//! - a read-only snapshot with a forward iterator
//! - a transactional read-modify-write on durable counters

use crate::error::Result;
use crate::wal::Operation;

/// A set of writes committed atomically
#[derive(Debug, Default, Clone, PartialEq)]
pub struct WriteBatch {
    operations: Vec<Operation>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> &mut Self {
        self.operations.push(Operation::Put {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn delete(&mut self, key: impl Into<Vec<u8>>) -> &mut Self {
        self.operations.push(Operation::Delete { key: key.into() });
        self
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub(crate) fn into_operations(self) -> Vec<Operation> {
        self.operations
    }
}

/// Forward iterator over a read snapshot
///
/// Follows the usual cursor protocol: `seek` positions at the first key
/// `>= target`, `valid` reports whether the cursor is on an entry, and `key`
/// / `value` are only meaningful while valid.
pub trait KvIterator {
    /// Position at the first key greater than or equal to `target`
    fn seek(&mut self, target: &[u8]) -> Result<()>;

    /// Whether the cursor is on an entry
    fn valid(&self) -> bool;

    /// Advance to the next key
    fn next(&mut self) -> Result<()>;

    /// Current key (empty when not valid)
    fn key(&self) -> &[u8];

    /// Current value (empty when not valid)
    fn value(&self) -> &[u8];
}

/// An embedded ordered key-value engine
pub trait KvEngine: Send + Sync {
    type Iter: KvIterator + Send;

    /// Apply every write in `batch` atomically
    fn commit(&self, batch: WriteBatch) -> Result<()>;

    /// Read the latest committed value of `key`
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Open a read snapshot; it is released when the iterator is dropped
    fn iter(&self) -> Result<Self::Iter>;

    /// Durably advance counter `name` by `by`, returning its previous value
    ///
    /// Counters start at zero and are not visible to iterators. The new value
    /// is on stable storage before this returns.
    fn advance_counter(&self, name: &[u8], by: u64) -> Result<u64>;
}
