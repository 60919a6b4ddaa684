//! Storage Module
//!
//! Persistent image of the store, written at checkpoints.
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Header (30 bytes)                                       │
//! │   Magic: "PMCK" (4) | Version: u16 (2) | LastLsn (8)    │
//! │   EntryCount: u64 (8) | CounterCount: u64 (8)           │
//! ├─────────────────────────────────────────────────────────┤
//! │ Data Block (variable)                                   │
//! │   [KeyLen: u32][ValLen: u32][Key][Value]                │
//! ├─────────────────────────────────────────────────────────┤
//! │ Counter Block (variable)                                │
//! │   [NameLen: u32][Value: u64][Name]                      │
//! ├─────────────────────────────────────────────────────────┤
//! │ Footer (4 bytes)                                        │
//! │   CRC32 of everything above                             │
//! └─────────────────────────────────────────────────────────┘
//! ```
//! All integers little-endian.

mod checkpoint;

pub use checkpoint::{load, CheckpointImage, CheckpointWriter};

/// Magic bytes identifying a checkpoint file
pub(crate) const MAGIC: &[u8; 4] = b"PMCK";

/// Current checkpoint format version
pub(crate) const VERSION: u16 = 1;

/// Magic (4) + Version (2) + LastLsn (8) + EntryCount (8) + CounterCount (8)
pub(crate) const HEADER_SIZE: usize = 30;

/// CRC32 (4)
pub(crate) const FOOTER_SIZE: usize = 4;
