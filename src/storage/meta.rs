//! The `wal.meta` page.
//!
//! A single 4 KiB region holding the raft identity and the three
//! variable-length records the log must keep durable: the application
//! checkpoint, the Raft hard state, and the latest snapshot.
//!
//! Layout (offsets in bytes):
//!
//! | field            | offset | capacity |
//! |------------------|--------|----------|
//! | raft id (BE u64) | 0      | 8        |
//! | checkpoint       | 8      | 504      |
//! | hard state       | 512    | 512      |
//! | snapshot         | 1024   | 3072     |
//!
//! Each record is a 4-byte little-endian length followed by a bincode
//! payload. Writes zero the length, lay down the payload, then write the
//! length last, so a crash mid-write leaves either the old record intact
//! or a zero length (read back as absent; the peer catches the node up on
//! restart). Every mutation flushes before returning.

use std::path::Path;

use tracing::warn;

use crate::error::{WalError, WalResult};
use crate::message::{HardState, Snapshot};
use crate::storage::mmap::MmapRegion;

pub const META_FILE: &str = "wal.meta";
pub const META_SIZE: u64 = 4096;

const RAFT_ID_OFFSET: u64 = 0;
const CHECKPOINT_OFFSET: u64 = 8;
const HARD_STATE_OFFSET: u64 = 512;
const SNAPSHOT_OFFSET: u64 = 1024;

const CHECKPOINT_CAPACITY: u64 = HARD_STATE_OFFSET - CHECKPOINT_OFFSET;
const HARD_STATE_CAPACITY: u64 = SNAPSHOT_OFFSET - HARD_STATE_OFFSET;
const SNAPSHOT_CAPACITY: u64 = META_SIZE - SNAPSHOT_OFFSET;

const LEN_PREFIX: u64 = 4;

pub struct MetaPage {
    region: MmapRegion,
}

impl MetaPage {
    pub fn open(dir: &Path) -> WalResult<Self> {
        let region = MmapRegion::open(&dir.join(META_FILE), META_SIZE, META_SIZE)?;
        Ok(Self { region })
    }

    pub fn raft_id(&self) -> WalResult<u64> {
        let b = self.region.read_at(RAFT_ID_OFFSET, 8)?;
        Ok(u64::from_be_bytes(b.try_into().expect("8 byte read")))
    }

    pub fn set_raft_id(&mut self, id: u64) -> WalResult<()> {
        self.region.write_at(RAFT_ID_OFFSET, &id.to_be_bytes())?;
        self.region.flush()
    }

    pub fn hard_state(&self) -> WalResult<HardState> {
        Ok(self
            .read_record::<HardState>(HARD_STATE_OFFSET, HARD_STATE_CAPACITY)?
            .unwrap_or_default())
    }

    /// Persist `hs`. Writing an empty hard state is a no-op, as is a hard
    /// state whose term regresses below the persisted one.
    pub fn set_hard_state(&mut self, hs: &HardState) -> WalResult<()> {
        if hs.is_empty() {
            return Ok(());
        }
        let current = self.hard_state()?;
        if hs.term < current.term {
            warn!(
                new_term = hs.term,
                stored_term = current.term,
                "skipping hard state with regressed term"
            );
            return Ok(());
        }
        self.write_record(HARD_STATE_OFFSET, HARD_STATE_CAPACITY, hs)
    }

    pub fn snapshot(&self) -> WalResult<Snapshot> {
        Ok(self
            .read_record::<Snapshot>(SNAPSHOT_OFFSET, SNAPSHOT_CAPACITY)?
            .unwrap_or_default())
    }

    /// Persist `snap`. Writing an empty snapshot is a no-op.
    pub fn set_snapshot(&mut self, snap: &Snapshot) -> WalResult<()> {
        if snap.is_empty() {
            return Ok(());
        }
        self.write_record(SNAPSHOT_OFFSET, SNAPSHOT_CAPACITY, snap)
    }

    /// The application checkpoint index, zero when none has been stored.
    pub fn checkpoint(&self) -> WalResult<u64> {
        Ok(self
            .read_record::<Snapshot>(CHECKPOINT_OFFSET, CHECKPOINT_CAPACITY)?
            .map(|snap| snap.index)
            .unwrap_or(0))
    }

    /// Store a snapshot-shaped checkpoint record.
    pub fn set_checkpoint(&mut self, snap: &Snapshot) -> WalResult<()> {
        self.write_record(CHECKPOINT_OFFSET, CHECKPOINT_CAPACITY, snap)
    }

    pub fn flush(&self) -> WalResult<()> {
        self.region.flush()
    }

    fn write_record<T: bincode::Encode>(
        &mut self,
        offset: u64,
        capacity: u64,
        value: &T,
    ) -> WalResult<()> {
        let payload = bincode::encode_to_vec(value, bincode::config::standard()).map_err(|e| {
            WalError::corruption(self.region.path(), offset, format!("encode record: {e}"))
        })?;
        if payload.len() as u64 + LEN_PREFIX > capacity {
            return Err(WalError::OutOfSpace {
                path: self.region.path().to_path_buf(),
                limit: capacity,
            });
        }

        self.region.zero_at(offset, LEN_PREFIX)?;
        self.region.write_at(offset + LEN_PREFIX, &payload)?;
        self.region
            .write_at(offset, &(payload.len() as u32).to_le_bytes())?;
        self.region.flush()
    }

    fn read_record<T: bincode::Decode<()>>(
        &self,
        offset: u64,
        capacity: u64,
    ) -> WalResult<Option<T>> {
        let len_bytes = self.region.read_at(offset, 4)?;
        let len = u32::from_le_bytes(len_bytes.try_into().expect("4 byte read")) as u64;
        if len == 0 {
            return Ok(None);
        }
        if len + LEN_PREFIX > capacity {
            return Err(WalError::corruption(
                self.region.path(),
                offset,
                format!("record length {len} exceeds slot capacity {capacity}"),
            ));
        }
        let payload = self.region.read_at(offset + LEN_PREFIX, len as usize)?;
        let (value, _) = bincode::decode_from_slice(payload, bincode::config::standard())
            .map_err(|e| {
                WalError::corruption(self.region.path(), offset, format!("decode record: {e}"))
            })?;
        Ok(Some(value))
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use crate::message::ConfState;

    use super::*;

    #[test]
    fn fresh_page_reads_as_absent() {
        let dir = TempDir::new().unwrap();
        let meta = MetaPage::open(dir.path()).unwrap();
        assert_eq!(meta.raft_id().unwrap(), 0);
        assert!(meta.hard_state().unwrap().is_empty());
        assert!(meta.snapshot().unwrap().is_empty());
        assert_eq!(meta.checkpoint().unwrap(), 0);
    }

    #[test]
    fn raft_id_round_trip_is_big_endian() {
        let dir = TempDir::new().unwrap();
        let mut meta = MetaPage::open(dir.path()).unwrap();
        meta.set_raft_id(7).unwrap();
        assert_eq!(meta.raft_id().unwrap(), 7);

        let raw = std::fs::read(dir.path().join(META_FILE)).unwrap();
        assert_eq!(&raw[0..8], &[0, 0, 0, 0, 0, 0, 0, 7]);
    }

    #[test]
    fn hard_state_round_trip_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let hs = HardState {
            term: 3,
            vote: 2,
            commit: 11,
        };
        {
            let mut meta = MetaPage::open(dir.path()).unwrap();
            meta.set_hard_state(&hs).unwrap();
        }
        let meta = MetaPage::open(dir.path()).unwrap();
        assert_eq!(meta.hard_state().unwrap(), hs);
    }

    #[test]
    fn empty_hard_state_is_not_written() {
        let dir = TempDir::new().unwrap();
        let mut meta = MetaPage::open(dir.path()).unwrap();
        let hs = HardState {
            term: 5,
            vote: 1,
            commit: 9,
        };
        meta.set_hard_state(&hs).unwrap();
        meta.set_hard_state(&HardState::default()).unwrap();
        assert_eq!(meta.hard_state().unwrap(), hs);
    }

    #[test]
    fn regressed_term_is_skipped() {
        let dir = TempDir::new().unwrap();
        let mut meta = MetaPage::open(dir.path()).unwrap();
        let hs = HardState {
            term: 5,
            vote: 1,
            commit: 9,
        };
        meta.set_hard_state(&hs).unwrap();
        meta.set_hard_state(&HardState {
            term: 4,
            vote: 1,
            commit: 10,
        })
        .unwrap();
        assert_eq!(meta.hard_state().unwrap(), hs);
    }

    #[test]
    fn snapshot_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut meta = MetaPage::open(dir.path()).unwrap();
        let snap = Snapshot::new(
            30,
            2,
            ConfState {
                voters: vec![1, 2, 3],
                learners: vec![],
            },
            b"state machine bytes".to_vec(),
        );
        meta.set_snapshot(&snap).unwrap();
        assert_eq!(meta.snapshot().unwrap(), snap);
    }

    #[test]
    fn checkpoint_stores_the_index() {
        let dir = TempDir::new().unwrap();
        let mut meta = MetaPage::open(dir.path()).unwrap();
        let record = Snapshot::new(123, 4, ConfState::default(), Vec::new());
        meta.set_checkpoint(&record).unwrap();
        assert_eq!(meta.checkpoint().unwrap(), 123);
    }

    #[test]
    fn oversized_record_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut meta = MetaPage::open(dir.path()).unwrap();
        let snap = Snapshot::new(1, 1, ConfState::default(), vec![0u8; 4096]);
        assert!(matches!(
            meta.set_snapshot(&snap),
            Err(WalError::OutOfSpace { .. })
        ));
        assert!(meta.snapshot().unwrap().is_empty());
    }
}
