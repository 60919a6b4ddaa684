//! WAL Reader
//!
//! Handles reading entries from the WAL file.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;

use crate::error::{MetaError, Result};

use super::entry::FrameHeader;
use super::{WalEntry, HEADER_SIZE};

/// Outcome of reading one frame
#[derive(Debug)]
pub enum WalRead {
    /// A complete, checksummed entry
    Entry(WalEntry),
    /// Clean end of file on an entry boundary
    End,
    /// The file ends in the middle of a frame (torn write)
    Partial,
    /// A complete frame whose header or checksum is invalid
    Corrupt(MetaError),
}

/// Reads entries from the WAL file
pub struct WalReader {
    reader: BufReader<File>,
    /// Offset just past the last well-formed entry
    position: u64,
}

impl WalReader {
    /// Open a WAL file for reading
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            reader: BufReader::new(file),
            position: 0,
        })
    }

    /// Read the next frame, classifying how it ended
    pub fn read_next(&mut self) -> Result<WalRead> {
        let mut header_buf = [0u8; HEADER_SIZE];
        match read_full(&mut self.reader, &mut header_buf)? {
            0 => return Ok(WalRead::End),
            n if n < HEADER_SIZE => return Ok(WalRead::Partial),
            _ => {}
        }

        let header = match FrameHeader::parse(&header_buf) {
            Ok(h) => h,
            Err(e) => return Ok(WalRead::Corrupt(e)),
        };

        let mut payload = vec![0u8; header.len as usize];
        if read_full(&mut self.reader, &mut payload)? < payload.len() {
            return Ok(WalRead::Partial);
        }

        match WalEntry::from_payload(&header, &payload) {
            Ok(entry) => {
                self.position += (HEADER_SIZE + payload.len()) as u64;
                Ok(WalRead::Entry(entry))
            }
            Err(e) => Ok(WalRead::Corrupt(e)),
        }
    }

    /// Read the next entry from the WAL
    ///
    /// Torn or corrupt frames are reported as `WalCorruption`.
    pub fn next_entry(&mut self) -> Result<Option<WalEntry>> {
        match self.read_next()? {
            WalRead::Entry(entry) => Ok(Some(entry)),
            WalRead::End => Ok(None),
            WalRead::Partial => Err(MetaError::WalCorruption(format!(
                "partial entry at offset {}",
                self.position
            ))),
            WalRead::Corrupt(e) => Err(e),
        }
    }

    /// Offset just past the last well-formed entry read so far
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Iterate over entries until the end or the first bad frame
    pub fn entries(self) -> WalIterator {
        WalIterator {
            reader: self,
            done: false,
        }
    }
}

/// Iterator over WAL entries
pub struct WalIterator {
    reader: WalReader,
    done: bool,
}

impl Iterator for WalIterator {
    type Item = Result<WalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.next_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Fill `buf` as far as the file allows; returns bytes read
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}
