//! The fixed 32-byte index record stored in an entry file's index region.
//!
//! Layout, big-endian u64s: term [0..8), index [8..16), payload offset
//! [16..24), entry type [24..32). An index of zero marks the slot empty and
//! terminates the occupied prefix of a file.

use std::path::Path;

use crate::error::{WalError, WalResult};
use crate::message::EntryType;

pub const SLOT_SIZE: usize = 32;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Slot {
    pub term: u64,
    pub index: u64,
    pub payload_offset: u64,
    pub entry_type: u64,
}

impl Slot {
    pub fn new(term: u64, index: u64, payload_offset: u64, entry_type: EntryType) -> Self {
        Self {
            term,
            index,
            payload_offset,
            entry_type: entry_type.code(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.index == 0
    }

    pub fn to_bytes(&self) -> [u8; SLOT_SIZE] {
        let mut b = [0u8; SLOT_SIZE];
        b[0..8].copy_from_slice(&self.term.to_be_bytes());
        b[8..16].copy_from_slice(&self.index.to_be_bytes());
        b[16..24].copy_from_slice(&self.payload_offset.to_be_bytes());
        b[24..32].copy_from_slice(&self.entry_type.to_be_bytes());
        b
    }

    pub fn from_bytes(b: &[u8]) -> WalResult<Self> {
        if b.len() < SLOT_SIZE {
            return Err(WalError::corruption(
                Path::new("<slot>"),
                0,
                format!("slot record truncated to {} bytes", b.len()),
            ));
        }
        Ok(Self {
            term: u64::from_be_bytes(b[0..8].try_into().expect("8 bytes")),
            index: u64::from_be_bytes(b[8..16].try_into().expect("8 bytes")),
            payload_offset: u64::from_be_bytes(b[16..24].try_into().expect("8 bytes")),
            entry_type: u64::from_be_bytes(b[24..32].try_into().expect("8 bytes")),
        })
    }

    /// Decode the stored type code, failing on codes outside the Raft
    /// entry-type enumeration.
    pub fn entry_type(&self, path: &Path, offset: u64) -> WalResult<EntryType> {
        EntryType::from_code(self.entry_type).ok_or_else(|| {
            WalError::corruption(
                path,
                offset,
                format!("unknown entry type code {}", self.entry_type),
            )
        })
    }
}
