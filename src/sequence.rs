//! Per-prefix sequence allocation
//!
//! Hands out unique, increasing integers per prefix without a durable write
//! per call. Each prefix holds an in-memory lease `[next, end)`; when it runs
//! out, the durable high-water-mark is advanced by a whole batch first and only
//! then is the new range handed out. A crash therefore skips at most
//! `batch_size - 1` values and never reuses one.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{MetaError, Result};
use crate::kv::KvEngine;

/// Namespace for high-water-mark counters in the engine
const COUNTER_PREFIX: &[u8] = b"seq:";

/// Local lease state for one prefix
#[derive(Debug, Default)]
struct Lease {
    /// Next value to return
    next: u64,
    /// End of the current lease (exclusive)
    end: u64,
}

/// Sequence generator backed by durable counters in `E`
///
/// Several allocators may share one engine (e.g. separate processes or
/// stores); the engine serializes their refills, so their ranges never overlap.
pub struct SequenceAllocator<E: KvEngine> {
    engine: Arc<E>,
    /// One lock per prefix; refills of different prefixes don't contend
    leases: Mutex<HashMap<Vec<u8>, Arc<Mutex<Lease>>>>,
}

impl<E: KvEngine> SequenceAllocator<E> {
    pub fn new(engine: Arc<E>) -> Self {
        Self {
            engine,
            leases: Mutex::new(HashMap::new()),
        }
    }

    /// Next value for `prefix`
    ///
    /// Fast path: take from the local lease.
    /// Slow path: durably reserve `[mark, mark + batch_size)` and take `mark`.
    /// If the reservation fails the lease is left as it was.
    pub fn next(&self, prefix: &[u8], batch_size: u64) -> Result<u64> {
        if batch_size == 0 {
            return Err(MetaError::allocation(prefix, "batch size must be at least 1"));
        }

        let lease = self.lease(prefix);
        let mut lease = lease.lock();

        if lease.next < lease.end {
            let id = lease.next;
            lease.next += 1;
            return Ok(id);
        }

        let range = self.reserve(prefix, batch_size)?;
        lease.next = range.start + 1;
        lease.end = range.end;

        tracing::debug!(
            prefix = %String::from_utf8_lossy(prefix),
            batch_start = range.start,
            batch_end = range.end,
            "reserved new sequence batch"
        );
        Ok(range.start)
    }

    /// Durably reserve `count` values for `prefix`, bypassing the lease
    pub fn reserve(&self, prefix: &[u8], count: u64) -> Result<Range<u64>> {
        if count == 0 {
            return Err(MetaError::allocation(prefix, "reservation must be at least 1"));
        }
        let start = self
            .engine
            .advance_counter(&counter_name(prefix), count)
            .map_err(|e| MetaError::allocation(prefix, e.to_string()))?;
        // advance_counter refuses to overflow, so start + count fits
        Ok(start..start + count)
    }

    /// Remaining local lease for `prefix` as `[next, end)`, if one was ever taken
    pub fn lease_state(&self, prefix: &[u8]) -> Option<Range<u64>> {
        let leases = self.leases.lock();
        leases.get(prefix).map(|lease| {
            let lease = lease.lock();
            lease.next..lease.end
        })
    }

    /// Durable high-water-mark key for `prefix`
    pub fn counter_key(prefix: &[u8]) -> Vec<u8> {
        counter_name(prefix)
    }

    /// Get or create the lease slot; created empty so the first call refills
    fn lease(&self, prefix: &[u8]) -> Arc<Mutex<Lease>> {
        let mut leases = self.leases.lock();
        if let Some(lease) = leases.get(prefix) {
            return Arc::clone(lease);
        }
        let lease = Arc::new(Mutex::new(Lease::default()));
        leases.insert(prefix.to_vec(), Arc::clone(&lease));
        lease
    }
}

fn counter_name(prefix: &[u8]) -> Vec<u8> {
    let mut name = Vec::with_capacity(COUNTER_PREFIX.len() + prefix.len());
    name.extend_from_slice(COUNTER_PREFIX);
    name.extend_from_slice(prefix);
    name
}
