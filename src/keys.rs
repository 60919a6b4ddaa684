//! Sortable binary keys
//!
//! ## Key Layout
//! ```text
//! ┌──────────────────┬──────────────────────┬────────────────────┐
//! │ Prefix (var)     │ Time (8, big-endian) │ Sequence (8, BE)   │
//! └──────────────────┴──────────────────────┴────────────────────┘
//! ```
//!
//! Time is signed nanoseconds since the Unix epoch. It is stored with the
//! sign bit flipped so that byte order matches numeric order across the whole
//! `i64` range, including instants before 1970. Every store uses this one
//! resolution; the layout is the persisted contract and changing it requires a
//! new format version.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::{MetaError, Result};

/// Width of the time component in bytes
pub const TIME_LEN: usize = 8;

/// Width of the sequence component in bytes
pub const SEQ_LEN: usize = 8;

/// Bytes a full insert key adds after the prefix
pub const SUFFIX_LEN: usize = TIME_LEN + SEQ_LEN;

const SIGN_BIT: u64 = 1 << 63;

/// Order-preserving encoding of a signed nanosecond timestamp
pub fn encode_time(nanos: i64) -> [u8; TIME_LEN] {
    ((nanos as u64) ^ SIGN_BIT).to_be_bytes()
}

/// Inverse of [`encode_time`]
pub fn decode_time(bytes: [u8; TIME_LEN]) -> i64 {
    (u64::from_be_bytes(bytes) ^ SIGN_BIT) as i64
}

/// `prefix ‖ time`: a scan bound, or the time-ordered head of an insert key
pub fn build_key(prefix: &[u8], nanos: i64) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + SUFFIX_LEN);
    key.extend_from_slice(prefix);
    key.extend_from_slice(&encode_time(nanos));
    key
}

/// `prefix ‖ time ‖ sequence`: the key a record is stored under
pub fn build_insert_key(prefix: &[u8], nanos: i64, seq: u64) -> Vec<u8> {
    let mut key = build_key(prefix, nanos);
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

/// Whether `candidate` is still inside an ascending scan bounded by `bound`
///
/// Plain byte-lexicographic `candidate <= bound`; nothing is decoded.
#[inline]
pub fn compare_key(candidate: &[u8], bound: &[u8]) -> bool {
    candidate <= bound
}

/// Split an insert key into `(time, sequence)` given its prefix length
pub fn split_key(key: &[u8], prefix_len: usize) -> Result<(i64, u64)> {
    if key.len() != prefix_len + SUFFIX_LEN {
        return Err(MetaError::malformed(format!(
            "key of {} bytes does not fit prefix length {}",
            key.len(),
            prefix_len
        )));
    }
    let mut time = [0u8; TIME_LEN];
    let mut seq = [0u8; SEQ_LEN];
    time.copy_from_slice(&key[prefix_len..prefix_len + TIME_LEN]);
    seq.copy_from_slice(&key[prefix_len + TIME_LEN..]);
    Ok((decode_time(time), u64::from_be_bytes(seq)))
}

/// Wall-clock time as signed nanoseconds since the epoch
///
/// Saturates outside the `i64` range (roughly years 1677 to 2262).
pub fn now_nanos() -> i64 {
    system_time_nanos(SystemTime::now())
}

/// Convert a `SystemTime` to signed epoch nanoseconds, saturating
pub fn system_time_nanos(t: SystemTime) -> i64 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(after) => i64::try_from(after.as_nanos()).unwrap_or(i64::MAX),
        Err(before) => i64::try_from(before.duration().as_nanos())
            .map(|n| -n)
            .unwrap_or(i64::MIN),
    }
}

/// Half-open time range `[min, max)` in epoch nanoseconds
///
/// Used only to build scan bounds; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub min: i64,
    pub max: i64,
}

impl TimeWindow {
    pub fn new(min: i64, max: i64) -> Result<Self> {
        if min > max {
            return Err(MetaError::InvalidArgument(format!(
                "time window min {} is after max {}",
                min, max
            )));
        }
        Ok(Self { min, max })
    }

    /// The window ending now and covering `span`
    pub fn last(span: Duration) -> Self {
        let max = now_nanos();
        let span = i64::try_from(span.as_nanos()).unwrap_or(i64::MAX);
        Self {
            min: max.saturating_sub(span),
            max,
        }
    }

    pub fn between(start: SystemTime, end: SystemTime) -> Result<Self> {
        Self::new(system_time_nanos(start), system_time_nanos(end))
    }

    /// Every representable instant
    pub fn all() -> Self {
        Self {
            min: i64::MIN,
            max: i64::MAX,
        }
    }

    pub fn contains(&self, nanos: i64) -> bool {
        self.min <= nanos && nanos < self.max
    }

    /// `(min_key, max_key)` for `prefix`
    ///
    /// Keys stored at exactly `max` sort after `max_key` (they carry a
    /// sequence suffix), which is what makes the window half-open.
    pub fn bounds(&self, prefix: &[u8]) -> (Vec<u8>, Vec<u8>) {
        (build_key(prefix, self.min), build_key(prefix, self.max))
    }
}
