//! WAL Writer
//!
//! Handles appending entries to the WAL file.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use crate::config::WalSyncStrategy;
use crate::error::Result;

use super::entry::unix_millis;
use super::{Operation, WalEntry};

/// Writes entries to the WAL file
pub struct WalWriter {
    file: File,
    /// LSN of the last appended entry
    current_lsn: u64,
    sync_strategy: WalSyncStrategy,
    /// Entries appended since the last fsync
    unsynced: usize,
    /// Bytes of well-formed entries in the file
    size: u64,
}

impl WalWriter {
    /// Open or create a WAL file, continuing after `last_lsn`
    ///
    /// The caller is expected to have run recovery first so the file ends on
    /// an entry boundary.
    pub fn open(path: &Path, sync_strategy: WalSyncStrategy, last_lsn: u64) -> Result<Self> {
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;
        let size = file.seek(SeekFrom::End(0))?;

        Ok(Self {
            file,
            current_lsn: last_lsn,
            sync_strategy,
            unsynced: 0,
            size,
        })
    }

    /// Append one transaction; returns its LSN
    ///
    /// `force_sync` fsyncs regardless of the sync strategy. On failure the file
    /// is cut back to the previous entry boundary and the LSN is not consumed.
    pub fn append(&mut self, operations: &[Operation], force_sync: bool) -> Result<u64> {
        let lsn = self.current_lsn + 1;
        let bytes = WalEntry::encode_frame(lsn, unix_millis(), operations)?;

        if let Err(e) = self.write_and_sync(&bytes, force_sync) {
            tracing::error!(lsn, error = %e, "WAL append failed, rolling back partial entry");
            // Best effort; recovery truncates torn tails anyway
            let _ = self.file.set_len(self.size);
            let _ = self.file.seek(SeekFrom::Start(self.size));
            return Err(e);
        }

        self.size += bytes.len() as u64;
        self.current_lsn = lsn;
        Ok(lsn)
    }

    fn write_and_sync(&mut self, bytes: &[u8], force_sync: bool) -> Result<()> {
        self.file.write_all(bytes)?;
        self.unsynced += 1;

        let due = match self.sync_strategy {
            WalSyncStrategy::EveryWrite => true,
            WalSyncStrategy::EveryNEntries { count } => self.unsynced >= count,
        };
        if due || force_sync {
            self.sync()?;
        }
        Ok(())
    }

    /// Force sync to disk
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_data()?;
        self.unsynced = 0;
        Ok(())
    }

    /// Drop every entry; the LSN keeps counting from where it was
    pub fn truncate(&mut self) -> Result<()> {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.sync_all()?;
        self.size = 0;
        self.unsynced = 0;
        Ok(())
    }

    /// Get the LSN of the last appended entry
    pub fn current_lsn(&self) -> u64 {
        self.current_lsn
    }

    /// Current file size in bytes
    pub fn size(&self) -> u64 {
        self.size
    }
}
