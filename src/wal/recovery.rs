//! WAL Recovery
//!
//! Handles crash recovery by replaying the WAL.

use std::fs::OpenOptions;
use std::path::Path;

use crate::error::Result;

use super::{WalEntry, WalRead, WalReader};

/// Handles WAL recovery after crash
pub struct WalRecovery;

/// Result of a recovery operation
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryResult {
    /// Number of entries successfully recovered
    pub entries_recovered: u64,

    /// Number of corrupted entries encountered (recovery stops at the first)
    pub entries_corrupted: u64,

    /// Last valid LSN
    pub last_lsn: u64,

    /// Whether the WAL was truncated (partial or corrupt tail removed)
    pub was_truncated: bool,
}

impl WalRecovery {
    /// Recover entries from a WAL file
    ///
    /// This will:
    /// 1. Read entries in order until the end of the file
    /// 2. Stop at the first torn or corrupted frame
    /// 3. Truncate the file at the last good entry boundary
    /// 4. Return all valid entries in order
    pub fn recover(path: &Path) -> Result<(Vec<WalEntry>, RecoveryResult)> {
        let (entries, mut result, good_len) = Self::scan(path)?;

        let file_len = std::fs::metadata(path)?.len();
        if good_len < file_len {
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(good_len)?;
            file.sync_all()?;
            result.was_truncated = true;
            tracing::warn!(
                path = %path.display(),
                kept_bytes = good_len,
                dropped_bytes = file_len - good_len,
                "truncated WAL tail"
            );
        }

        Ok((entries, result))
    }

    /// Verify integrity of a WAL file without modifying it
    pub fn verify(path: &Path) -> Result<RecoveryResult> {
        let (_, mut result, good_len) = Self::scan(path)?;
        result.was_truncated = good_len < std::fs::metadata(path)?.len();
        Ok(result)
    }

    fn scan(path: &Path) -> Result<(Vec<WalEntry>, RecoveryResult, u64)> {
        let mut reader = WalReader::open(path)?;
        let mut entries = Vec::new();
        let mut result = RecoveryResult::default();

        loop {
            match reader.read_next()? {
                WalRead::Entry(entry) => {
                    result.entries_recovered += 1;
                    result.last_lsn = entry.lsn;
                    entries.push(entry);
                }
                WalRead::End => break,
                WalRead::Partial => {
                    tracing::warn!(offset = reader.position(), "partial WAL entry at tail");
                    break;
                }
                WalRead::Corrupt(e) => {
                    tracing::error!(offset = reader.position(), error = %e, "corrupt WAL entry");
                    result.entries_corrupted += 1;
                    break;
                }
            }
        }

        let good_len = reader.position();
        Ok((entries, result, good_len))
    }
}
