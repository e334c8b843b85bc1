//! A single entry file: 30 000 index slots, a payload high-water footer,
//! and a payload heap from the 1 MiB mark upward.

use std::fs;
use std::path::Path;

use tracing::warn;

use crate::error::{WalError, WalResult};
use crate::message::EntryType;
use crate::storage::log::entry::{Slot, SLOT_SIZE};
use crate::storage::log::{FILE_INIT_SIZE, FILE_MAX_SIZE, HWM_OFFSET, MAX_ENTRIES, PAYLOAD_BASE};
use crate::storage::mmap::MmapRegion;

pub struct EntryFile {
    region: MmapRegion,
    /// Index stored in slot 0; zero while the file is empty.
    first_index: u64,
    /// Length of the occupied slot prefix.
    len: usize,
    payload_hwm: u64,
}

impl EntryFile {
    /// Create a fresh, zero-initialized entry file. A stale file at `path`
    /// (left behind by a rotation that crashed before its first append) is
    /// replaced.
    pub fn create(path: &Path) -> WalResult<Self> {
        if path.exists() {
            warn!(path = %path.display(), "replacing stale entry file");
            fs::remove_file(path).map_err(WalError::io("unlink", path))?;
        }
        let mut region = MmapRegion::open(path, FILE_INIT_SIZE, FILE_MAX_SIZE)?;
        region.write_at(HWM_OFFSET, &PAYLOAD_BASE.to_be_bytes())?;
        Ok(Self {
            region,
            first_index: 0,
            len: 0,
            payload_hwm: PAYLOAD_BASE,
        })
    }

    /// Open an existing entry file and validate its index region: occupied
    /// slots must form a prefix of consecutive indices with in-range,
    /// non-decreasing payload offsets.
    pub fn open(path: &Path) -> WalResult<Self> {
        let region = MmapRegion::open(path, FILE_INIT_SIZE, FILE_MAX_SIZE)?;

        let hwm_bytes = region.read_at(HWM_OFFSET, 8)?;
        let mut payload_hwm = u64::from_be_bytes(hwm_bytes.try_into().expect("8 byte read"));
        if payload_hwm == 0 {
            payload_hwm = PAYLOAD_BASE;
        }
        if payload_hwm < PAYLOAD_BASE || payload_hwm > region.len() {
            return Err(WalError::corruption(
                path,
                HWM_OFFSET,
                format!("payload high-water {payload_hwm} out of range"),
            ));
        }

        let mut first_index = 0;
        let mut len = 0;
        let mut prev_offset = PAYLOAD_BASE;
        for i in 0..MAX_ENTRIES {
            let offset = (i * SLOT_SIZE) as u64;
            let slot = Slot::from_bytes(region.read_at(offset, SLOT_SIZE)?)?;
            if slot.is_empty() {
                break;
            }
            if i == 0 {
                first_index = slot.index;
            } else if slot.index != first_index + i as u64 {
                return Err(WalError::corruption(
                    path,
                    offset,
                    format!(
                        "slot index {} breaks the run starting at {}",
                        slot.index, first_index
                    ),
                ));
            }
            if slot.payload_offset < PAYLOAD_BASE || slot.payload_offset > payload_hwm {
                return Err(WalError::corruption(
                    path,
                    offset,
                    format!("payload offset {} out of range", slot.payload_offset),
                ));
            }
            if slot.payload_offset < prev_offset {
                return Err(WalError::corruption(
                    path,
                    offset,
                    format!("payload offset {} regresses", slot.payload_offset),
                ));
            }
            prev_offset = slot.payload_offset;
            len += 1;
        }

        Ok(Self {
            region,
            first_index,
            len,
            payload_hwm,
        })
    }

    pub fn path(&self) -> &Path {
        self.region.path()
    }

    /// Index of the first entry; zero means the file is empty.
    pub fn first_index(&self) -> u64 {
        self.first_index
    }

    /// Number of occupied index slots, which is also the first empty one.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Index of the last entry; zero when the file is empty.
    pub fn last_index(&self) -> u64 {
        if self.len == 0 {
            0
        } else {
            self.first_index + self.len as u64 - 1
        }
    }

    pub fn payload_hwm(&self) -> u64 {
        self.payload_hwm
    }

    pub fn slot(&self, i: usize) -> WalResult<Slot> {
        if i >= MAX_ENTRIES {
            return Err(WalError::corruption(
                self.path(),
                (i * SLOT_SIZE) as u64,
                format!("slot {i} beyond the index region"),
            ));
        }
        Slot::from_bytes(self.region.read_at((i * SLOT_SIZE) as u64, SLOT_SIZE)?)
    }

    /// Append one entry to the tail of this file. The caller rotates before
    /// calling once the file is full.
    pub fn append(&mut self, term: u64, index: u64, ty: EntryType, data: &[u8]) -> WalResult<()> {
        debug_assert!(self.len < MAX_ENTRIES, "appending to a full entry file");

        // The payload offset is recorded even for empty payloads (a
        // zero-length slice at the high-water mark), keeping payload ends
        // uniformly "successor offset or high-water mark".
        let payload_offset = self.payload_hwm;
        if !data.is_empty() {
            self.region.write_at(payload_offset, data)?;
            self.payload_hwm = payload_offset + data.len() as u64;
            self.write_hwm()?;
        }

        let slot = Slot::new(term, index, payload_offset, ty);
        self.region
            .write_at((self.len * SLOT_SIZE) as u64, &slot.to_bytes())?;
        if self.len == 0 {
            self.first_index = index;
        }
        self.len += 1;
        Ok(())
    }

    /// The payload bytes of `slot`, ending at its successor's payload
    /// offset, or at the file's high-water mark for the last entry.
    pub fn payload(&self, slot: &Slot, next: Option<&Slot>) -> WalResult<&[u8]> {
        let end = next.map(|n| n.payload_offset).unwrap_or(self.payload_hwm);
        if end < slot.payload_offset {
            return Err(WalError::corruption(
                self.path(),
                slot.payload_offset,
                "payload ends before it starts",
            ));
        }
        self.region
            .read_at(slot.payload_offset, (end - slot.payload_offset) as usize)
    }

    /// Zero the index slots from `from` to the end of the slot region, so
    /// the occupied prefix stays unambiguous after a crash.
    pub fn zero_slots_from(&mut self, from: usize) -> WalResult<()> {
        if from >= MAX_ENTRIES {
            return Ok(());
        }
        self.region.zero_at(
            (from * SLOT_SIZE) as u64,
            ((MAX_ENTRIES - from) * SLOT_SIZE) as u64,
        )
    }

    /// Drop every entry from slot `keep` on: zero the slots and rewind the
    /// payload high-water mark to where the first removed payload began.
    pub fn truncate_to(&mut self, keep: usize) -> WalResult<()> {
        if keep >= self.len {
            return Ok(());
        }
        let new_hwm = self.slot(keep)?.payload_offset;
        self.zero_slots_from(keep)?;
        self.len = keep;
        if keep == 0 {
            self.first_index = 0;
        }
        self.payload_hwm = new_hwm;
        self.write_hwm()
    }

    pub fn flush(&self) -> WalResult<()> {
        self.region.flush()
    }

    fn write_hwm(&mut self) -> WalResult<()> {
        self.region
            .write_at(HWM_OFFSET, &self.payload_hwm.to_be_bytes())
    }
}
