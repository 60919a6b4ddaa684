//! WAL Entry definitions
//!
//! Defines the structure of individual WAL log entries.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{MetaError, Result};

/// Frame header size: LSN (8) + CRC (4) + Len (4)
pub const HEADER_SIZE: usize = 16;

/// Upper bound on a single entry payload; anything larger is treated as corruption
pub const MAX_PAYLOAD_SIZE: u32 = 256 * 1024 * 1024;

/// A single committed transaction in the WAL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalEntry {
    /// Log Sequence Number - monotonically increasing, doubles as commit version
    pub lsn: u64,

    /// Operations applied atomically by this entry
    pub operations: Vec<Operation>,

    /// Timestamp (unix millis) when entry was created
    pub timestamp: u64,
}

/// Operations that can be logged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// Put a key-value pair
    Put { key: Vec<u8>, value: Vec<u8> },

    /// Delete a key
    Delete { key: Vec<u8> },

    /// Set a durable counter to an absolute value
    SetCounter { name: Vec<u8>, value: u64 },
}

impl WalEntry {
    pub fn new(lsn: u64, operations: Vec<Operation>) -> Self {
        Self {
            lsn,
            operations,
            timestamp: unix_millis(),
        }
    }

    /// Encode as a framed record: `[lsn][crc][len][payload]`
    pub fn serialize(&self) -> Result<Vec<u8>> {
        Self::encode_frame(self.lsn, self.timestamp, &self.operations)
    }

    /// Frame `operations` without building an owned entry first
    pub(crate) fn encode_frame(
        lsn: u64,
        timestamp: u64,
        operations: &[Operation],
    ) -> Result<Vec<u8>> {
        let payload = bincode::serialize(&(timestamp, operations))?;
        let len = u32::try_from(payload.len())
            .ok()
            .filter(|len| *len <= MAX_PAYLOAD_SIZE)
            .ok_or_else(|| {
                MetaError::Serialization(format!("WAL payload too large: {} bytes", payload.len()))
            })?;

        let crc = Self::compute_crc(lsn, &payload);

        let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
        buf.extend_from_slice(&lsn.to_le_bytes());
        buf.extend_from_slice(&crc.to_le_bytes());
        buf.extend_from_slice(&len.to_le_bytes());
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    /// Decode a complete framed record, verifying its checksum
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let header = FrameHeader::parse(bytes)?;
        let end = HEADER_SIZE + header.len as usize;
        if bytes.len() < end {
            return Err(MetaError::WalCorruption(format!(
                "entry truncated: need {} bytes, have {}",
                end,
                bytes.len()
            )));
        }
        Self::from_payload(&header, &bytes[HEADER_SIZE..end])
    }

    /// Build an entry from an already-split header and payload
    pub(crate) fn from_payload(header: &FrameHeader, payload: &[u8]) -> Result<Self> {
        let actual = Self::compute_crc(header.lsn, payload);
        if actual != header.crc {
            return Err(MetaError::WalCorruption(format!(
                "CRC mismatch at lsn {}: expected {:#010x}, got {:#010x}",
                header.lsn, header.crc, actual
            )));
        }

        let (timestamp, operations): (u64, Vec<Operation>) = bincode::deserialize(payload)?;
        Ok(Self {
            lsn: header.lsn,
            operations,
            timestamp,
        })
    }

    /// CRC32 over the LSN and payload
    pub fn compute_crc(lsn: u64, payload: &[u8]) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&lsn.to_le_bytes());
        hasher.update(payload);
        hasher.finalize()
    }
}

/// Parsed fixed-size frame header
#[derive(Debug, Clone, Copy)]
pub(crate) struct FrameHeader {
    pub lsn: u64,
    pub crc: u32,
    pub len: u32,
}

impl FrameHeader {
    pub(crate) fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(MetaError::WalCorruption(format!(
                "header truncated: {} bytes",
                bytes.len()
            )));
        }
        let mut lsn = [0u8; 8];
        let mut crc = [0u8; 4];
        let mut len = [0u8; 4];
        lsn.copy_from_slice(&bytes[0..8]);
        crc.copy_from_slice(&bytes[8..12]);
        len.copy_from_slice(&bytes[12..16]);

        let header = Self {
            lsn: u64::from_le_bytes(lsn),
            crc: u32::from_le_bytes(crc),
            len: u32::from_le_bytes(len),
        };
        if header.len > MAX_PAYLOAD_SIZE {
            return Err(MetaError::WalCorruption(format!(
                "implausible payload length {} at lsn {}",
                header.len, header.lsn
            )));
        }
        Ok(header)
    }
}

/// Wall-clock milliseconds, zero if the clock is before the epoch
pub(crate) fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
