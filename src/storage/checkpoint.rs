//! Checkpoint files
//!
//! Writes and loads a full image of the store so the WAL can be truncated.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use bytes::{Buf, Bytes};

use crate::error::{MetaError, Result};

use super::{FOOTER_SIZE, HEADER_SIZE, MAGIC, VERSION};

/// Contents of a checkpoint file
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CheckpointImage {
    /// LSN the image reflects; WAL entries at or below it are already included
    pub last_lsn: u64,
    /// Live key/value pairs in key order
    pub entries: Vec<(Vec<u8>, Bytes)>,
    /// Durable counters
    pub counters: Vec<(Vec<u8>, u64)>,
}

/// Streams a checkpoint to a temporary file and renames it into place
pub struct CheckpointWriter {
    path: PathBuf,
    tmp_path: PathBuf,
    writer: BufWriter<File>,
    hasher: crc32fast::Hasher,
}

impl CheckpointWriter {
    pub fn create(path: &Path) -> Result<Self> {
        let tmp_path = path.with_extension("tmp");
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;

        Ok(Self {
            path: path.to_path_buf(),
            tmp_path,
            writer: BufWriter::new(file),
            hasher: crc32fast::Hasher::new(),
        })
    }

    fn put(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_all(bytes)?;
        self.hasher.update(bytes);
        Ok(())
    }

    /// Write the whole image and atomically replace the previous checkpoint
    ///
    /// On failure the temporary file is removed and the previous checkpoint,
    /// if any, is left untouched.
    pub fn write(self, image: &CheckpointImage) -> Result<u64> {
        let tmp_path = self.tmp_path.clone();
        let result = self.write_image(image);
        if let Err(e) = &result {
            tracing::error!(
                path = %tmp_path.display(),
                error = %e,
                "checkpoint write failed, removing temp file"
            );
            // Best effort; a stale temp file is overwritten by the next checkpoint
            let _ = fs::remove_file(&tmp_path);
        }
        result
    }

    fn write_image(mut self, image: &CheckpointImage) -> Result<u64> {
        self.put(MAGIC)?;
        self.put(&VERSION.to_le_bytes())?;
        self.put(&image.last_lsn.to_le_bytes())?;
        self.put(&(image.entries.len() as u64).to_le_bytes())?;
        self.put(&(image.counters.len() as u64).to_le_bytes())?;

        for (key, value) in &image.entries {
            self.put(&len_u32(key.len())?.to_le_bytes())?;
            self.put(&len_u32(value.len())?.to_le_bytes())?;
            self.put(key)?;
            self.put(value)?;
        }

        for (name, value) in &image.counters {
            self.put(&len_u32(name.len())?.to_le_bytes())?;
            self.put(&value.to_le_bytes())?;
            self.put(name)?;
        }

        let crc = self.hasher.clone().finalize();
        self.writer.write_all(&crc.to_le_bytes())?;
        self.writer.flush()?;

        let file = self
            .writer
            .into_inner()
            .map_err(|e| MetaError::Checkpoint(format!("failed to flush checkpoint: {}", e)))?;
        file.sync_all()?;
        let size = file.metadata()?.len();
        drop(file);

        fs::rename(&self.tmp_path, &self.path)?;
        if let Some(dir) = self.path.parent() {
            // Directory fsync is not supported everywhere
            if let Ok(dir) = File::open(dir) {
                let _ = dir.sync_all();
            }
        }

        Ok(size)
    }
}

/// Load a checkpoint, verifying magic, version and checksum
///
/// Returns `None` when no checkpoint exists yet.
pub fn load(path: &Path) -> Result<Option<CheckpointImage>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = fs::read(path)?;
    if data.len() < HEADER_SIZE + FOOTER_SIZE {
        return Err(MetaError::Checkpoint(format!(
            "file too short: {} bytes",
            data.len()
        )));
    }

    let (body, footer) = data.split_at(data.len() - FOOTER_SIZE);
    let mut footer = footer;
    let expected = footer.get_u32_le();
    let actual = crc32fast::hash(body);
    if expected != actual {
        return Err(MetaError::Checkpoint(format!(
            "CRC mismatch: expected {:#010x}, got {:#010x}",
            expected, actual
        )));
    }

    let mut buf = body;
    if &buf[..4] != MAGIC {
        return Err(MetaError::Checkpoint(format!(
            "invalid magic: {:?}",
            &buf[..4]
        )));
    }
    buf.advance(4);

    let version = buf.get_u16_le();
    if version != VERSION {
        return Err(MetaError::Checkpoint(format!(
            "unsupported version: {}",
            version
        )));
    }

    let last_lsn = buf.get_u64_le();
    let entry_count = buf.get_u64_le();
    let counter_count = buf.get_u64_le();

    let mut entries = Vec::new();
    for _ in 0..entry_count {
        need(&buf, 8)?;
        let key_len = buf.get_u32_le() as usize;
        let val_len = buf.get_u32_le() as usize;
        need(&buf, key_len + val_len)?;
        let key = buf[..key_len].to_vec();
        buf.advance(key_len);
        let value = Bytes::copy_from_slice(&buf[..val_len]);
        buf.advance(val_len);
        entries.push((key, value));
    }

    let mut counters = Vec::new();
    for _ in 0..counter_count {
        need(&buf, 12)?;
        let name_len = buf.get_u32_le() as usize;
        let value = buf.get_u64_le();
        need(&buf, name_len)?;
        let name = buf[..name_len].to_vec();
        buf.advance(name_len);
        counters.push((name, value));
    }

    if buf.has_remaining() {
        return Err(MetaError::Checkpoint(format!(
            "{} trailing bytes after counters",
            buf.remaining()
        )));
    }

    Ok(Some(CheckpointImage {
        last_lsn,
        entries,
        counters,
    }))
}

fn need(buf: &&[u8], n: usize) -> Result<()> {
    if buf.remaining() < n {
        return Err(MetaError::Checkpoint(format!(
            "truncated body: need {} bytes, have {}",
            n,
            buf.remaining()
        )));
    }
    Ok(())
}

fn len_u32(len: usize) -> Result<u32> {
    u32::try_from(len)
        .map_err(|_| MetaError::Checkpoint(format!("field too large: {} bytes", len)))
}
