//! Profile metadata record and its binary codec
//!
//! ## Layout (version 1)
//! ```text
//! ┌─────────┬────────────────┬───────────────┬──────────────┐
//! │ Ver (1) │ ProfileID (8)  │ Timestamp (8) │ Duration (8) │
//! ├─────────┴──────┬─────────┴───────────────┴──────────────┤
//! │ TypeLen (4)    │ SampleType (TypeLen bytes, UTF-8)       │
//! ├────────────────┼─────────────────────────────────────────┤
//! │ UnitLen (4)    │ SampleTypeUnit (UnitLen bytes, UTF-8)   │
//! └────────────────┴─────────────────────────────────────────┘
//! ```
//! All integers big-endian. The version byte lets later layouts coexist with
//! data already on disk.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{MetaError, Result};

/// Layout version written by [`ProfileMeta::encode`]
pub const RECORD_VERSION: u8 = 1;

/// Version + three 8-byte integers + two 4-byte length prefixes
pub const FIXED_LEN: usize = 1 + 8 * 3 + 4 * 2;

/// Metadata describing one profiling sample
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProfileMeta {
    pub profile_id: u64,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    /// Nanoseconds; may be negative under clock skew
    pub duration: i64,
    /// e.g. "alloc_objects"
    pub sample_type: String,
    /// e.g. "count"
    pub sample_type_unit: String,
}

impl ProfileMeta {
    pub fn new(
        profile_id: u64,
        timestamp: i64,
        duration: i64,
        sample_type: impl Into<String>,
        sample_type_unit: impl Into<String>,
    ) -> Self {
        Self {
            profile_id,
            timestamp,
            duration,
            sample_type: sample_type.into(),
            sample_type_unit: sample_type_unit.into(),
        }
    }

    /// Exact size of the encoded form
    pub fn encoded_len(&self) -> usize {
        FIXED_LEN + self.sample_type.len() + self.sample_type_unit.len()
    }

    /// Encode into the version-1 layout
    ///
    /// Fails only if a string is longer than `u32::MAX` bytes.
    pub fn encode(&self) -> Result<Bytes> {
        let type_len = str_len(&self.sample_type, "sample_type")?;
        let unit_len = str_len(&self.sample_type_unit, "sample_type_unit")?;

        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_u8(RECORD_VERSION);
        buf.put_u64(self.profile_id);
        buf.put_i64(self.timestamp);
        buf.put_i64(self.duration);
        buf.put_u32(type_len);
        buf.put_slice(self.sample_type.as_bytes());
        buf.put_u32(unit_len);
        buf.put_slice(self.sample_type_unit.as_bytes());
        Ok(buf.freeze())
    }

    /// Decode a value produced by [`encode`](Self::encode)
    ///
    /// Every structural inconsistency is a `MalformedRecord`: unknown version,
    /// a buffer shorter than a declared field, or bytes left over at the end.
    pub fn decode(mut data: &[u8]) -> Result<Self> {
        let total = data.len();
        need(&data, 1, "version", total)?;
        let version = data.get_u8();
        if version != RECORD_VERSION {
            return Err(MetaError::malformed(format!(
                "unsupported record version {}",
                version
            )));
        }

        need(&data, 8, "profile_id", total)?;
        let profile_id = data.get_u64();
        need(&data, 8, "timestamp", total)?;
        let timestamp = data.get_i64();
        need(&data, 8, "duration", total)?;
        let duration = data.get_i64();
        let sample_type = get_string(&mut data, "sample_type", total)?;
        let sample_type_unit = get_string(&mut data, "sample_type_unit", total)?;

        if data.has_remaining() {
            return Err(MetaError::malformed(format!(
                "{} trailing bytes after a {}-byte record",
                data.remaining(),
                total - data.remaining()
            )));
        }

        Ok(Self {
            profile_id,
            timestamp,
            duration,
            sample_type,
            sample_type_unit,
        })
    }
}

fn str_len(s: &str, field: &str) -> Result<u32> {
    u32::try_from(s.len())
        .map_err(|_| MetaError::Serialization(format!("{} is {} bytes long", field, s.len())))
}

fn need(data: &&[u8], n: usize, field: &str, total: usize) -> Result<()> {
    if data.remaining() < n {
        return Err(MetaError::malformed(format!(
            "{} needs {} bytes at offset {}, only {} left",
            field,
            n,
            total - data.remaining(),
            data.remaining()
        )));
    }
    Ok(())
}

fn get_string(data: &mut &[u8], field: &str, total: usize) -> Result<String> {
    need(data, 4, field, total)?;
    let len = data.get_u32() as usize;
    need(data, len, field, total)?;
    let s = std::str::from_utf8(&data[..len])
        .map_err(|e| MetaError::malformed(format!("{} is not UTF-8: {}", field, e)))?
        .to_owned();
    data.advance(len);
    Ok(s)
}
