//! `WalStore`, the storage façade a Raft node drives.
//!
//! Composes the meta page and the entry log, and owns the background
//! worker that unlinks entry files superseded by a snapshot. One driver
//! thread is expected to serialize all reads and writes; the worker only
//! ever removes whole files below the snapshot index.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::{WalError, WalResult};
use crate::message::{ConfState, Entry, HardState, Snapshot};
use crate::storage::log::manager::EntryLog;
use crate::storage::meta::MetaPage;
use crate::traits::RaftStorage;

pub const DEFAULT_DISCARD_QUEUE_DEPTH: usize = 16;

#[derive(Debug, Clone)]
pub struct WalOptions {
    /// Directory holding `wal.meta` and the entry files, one per Raft group.
    pub dir: PathBuf,
    pub raft_id: u64,
    pub group_id: u32,
    /// Capacity of the discard queue; the driver blocks on snapshot writes
    /// once the worker falls this far behind.
    pub discard_queue_depth: usize,
}

impl WalOptions {
    pub fn new(dir: impl Into<PathBuf>, raft_id: u64, group_id: u32) -> Self {
        Self {
            dir: dir.into(),
            raft_id,
            group_id,
            discard_queue_depth: DEFAULT_DISCARD_QUEUE_DEPTH,
        }
    }
}

/// Entry range superseded by a snapshot; `until` itself is retained.
#[derive(Debug, Clone, Copy)]
struct IndexRange {
    from: u64,
    until: u64,
}

pub struct WalStore {
    raft_id: u64,
    group_id: u32,
    meta: RwLock<MetaPage>,
    log: Arc<RwLock<EntryLog>>,
    /// Typed cache of the snapshot record in the meta page.
    snapshot: RwLock<Snapshot>,
    discard_tx: Mutex<Option<mpsc::Sender<IndexRange>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl WalStore {
    /// Open (or initialize) the log directory and start the discard
    /// worker. Must be called from within a Tokio runtime.
    pub fn open(options: WalOptions) -> WalResult<Self> {
        fs::create_dir_all(&options.dir).map_err(WalError::io("mkdir", &options.dir))?;

        let mut meta = MetaPage::open(&options.dir)?;
        let stored = meta.raft_id()?;
        if stored == 0 || stored != options.raft_id {
            meta.set_raft_id(options.raft_id)?;
        }

        let log = EntryLog::open(&options.dir)?;
        let snapshot = meta.snapshot()?;

        // A fresh log needs no seeding: the zeroed slot 0 already reads as
        // the (term 0, index 0) anchor entry Raft matches against.

        let log = Arc::new(RwLock::new(log));
        let (tx, rx) = mpsc::channel(options.discard_queue_depth.max(1));
        let worker = tokio::spawn(discard_worker(Arc::clone(&log), rx));

        // Redo compaction that may have been lost to a crash.
        if !snapshot.is_empty() {
            let _ = tx.try_send(IndexRange {
                from: 0,
                until: snapshot.index,
            });
        }

        info!(
            raft_id = options.raft_id,
            group_id = options.group_id,
            dir = %options.dir.display(),
            "opened write-ahead log"
        );

        Ok(Self {
            raft_id: options.raft_id,
            group_id: options.group_id,
            meta: RwLock::new(meta),
            log,
            snapshot: RwLock::new(snapshot),
            discard_tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn raft_id(&self) -> u64 {
        self.raft_id
    }

    pub fn group_id(&self) -> u32 {
        self.group_id
    }

    /// The durable hard state plus the membership from the latest snapshot.
    pub fn initial_state(&self) -> WalResult<(HardState, ConfState)> {
        let hs = self.meta.read().hard_state()?;
        let cs = self.snapshot.read().conf_state.clone();
        Ok((hs, cs))
    }

    pub fn hard_state(&self) -> WalResult<HardState> {
        self.meta.read().hard_state()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.read().clone()
    }

    pub fn checkpoint(&self) -> WalResult<u64> {
        self.meta.read().checkpoint()
    }

    /// Store the application checkpoint, a snapshot-shaped record distinct
    /// from the Raft snapshot.
    pub fn update_checkpoint(&self, record: &Snapshot) -> WalResult<()> {
        self.meta.write().set_checkpoint(record)
    }

    /// Effective first index: the snapshot floor plus one once a snapshot
    /// exists, otherwise whatever the earliest entry file starts at.
    pub fn first_index(&self) -> u64 {
        let snap_index = self.snapshot.read().index;
        if snap_index > 0 {
            snap_index + 1
        } else {
            self.log.read().first_index()
        }
    }

    pub fn last_index(&self) -> u64 {
        self.log.read().last_index().max(self.snapshot.read().index)
    }

    pub fn num_entries(&self) -> usize {
        self.log.read().num_entries()
    }

    pub fn term(&self, index: u64) -> WalResult<u64> {
        {
            let snap = self.snapshot.read();
            // The snapshot metadata answers for its own index even after
            // the file holding that entry is gone; this is also the dummy
            // anchor (term 0 at index 0) of a fresh log.
            if index == snap.index {
                return Ok(snap.term);
            }
            if index < snap.index {
                return Err(WalError::Compacted);
            }
        }
        if index > self.last_index() {
            return Err(WalError::Unavailable);
        }
        self.log.read().term(index)
    }

    /// Entries in `[lo, hi)` bounded by `max_bytes`, always at least one
    /// when any exist.
    pub fn entries(&self, lo: u64, hi: u64, max_bytes: u64) -> WalResult<Vec<Entry>> {
        if lo < self.first_index() {
            return Err(WalError::Compacted);
        }
        if hi > self.last_index() + 1 {
            return Err(WalError::Unavailable);
        }
        self.log.read().entries(lo, hi, max_bytes)
    }

    /// Persist a Raft ready: entries first (flushed), then the hard state
    /// referencing them, then the snapshot, so a crash at any point leaves
    /// a consistent prefix. A non-empty snapshot queues the superseded
    /// files for the discard worker.
    pub async fn save(
        &self,
        hard_state: &HardState,
        entries: &[Entry],
        snapshot: &Snapshot,
    ) -> WalResult<()> {
        if !entries.is_empty() {
            self.log.write().append(entries)?;
        }
        self.meta.write().set_hard_state(hard_state)?;
        if !snapshot.is_empty() {
            let from = self.snapshot.read().index;
            self.meta.write().set_snapshot(snapshot)?;
            *self.snapshot.write() = snapshot.clone();
            self.enqueue_discard(from, snapshot.index).await?;
        }
        Ok(())
    }

    /// Build a snapshot at `index` from the stored term, persist it, and
    /// queue the files it supersedes for removal.
    pub async fn create_snapshot(
        &self,
        index: u64,
        conf_state: ConfState,
        data: Vec<u8>,
    ) -> WalResult<()> {
        let from = self.snapshot.read().index;
        if index <= from {
            return Err(WalError::SnapshotOutOfDate);
        }
        let term = self.term(index)?;
        let snap = Snapshot::new(index, term, conf_state, data);
        self.meta.write().set_snapshot(&snap)?;
        *self.snapshot.write() = snap;
        self.enqueue_discard(from, index).await
    }

    /// Flush the meta page and the tail entry file.
    pub fn sync(&self) -> WalResult<()> {
        self.meta.read().flush()?;
        self.log.read().sync()
    }

    /// Stop the discard worker after it drains every queued range, then
    /// flush. Pending `save` calls must have completed.
    pub async fn close(&self) -> WalResult<()> {
        drop(self.discard_tx.lock().take());
        let worker = self.worker.lock().take();
        if let Some(handle) = worker {
            if let Err(e) = handle.await {
                warn!("discard worker exited abnormally: {e}");
            }
        }
        self.sync()?;
        info!(raft_id = self.raft_id, "closed write-ahead log");
        Ok(())
    }

    async fn enqueue_discard(&self, from: u64, until: u64) -> WalResult<()> {
        if from == until {
            return Ok(());
        }
        let tx = { self.discard_tx.lock().clone() }.ok_or(WalError::Closed)?;
        tx.send(IndexRange { from, until })
            .await
            .map_err(|_| WalError::Closed)
    }
}

/// Runs until every sender is gone, draining whatever is still queued so
/// enqueued compaction always completes before shutdown.
async fn discard_worker(log: Arc<RwLock<EntryLog>>, mut rx: mpsc::Receiver<IndexRange>) {
    while let Some(range) = rx.recv().await {
        if range.from == range.until {
            continue;
        }
        match log.write().discard(range.until) {
            Ok(removed) if removed > 0 => {
                info!(until = range.until, removed, "discard pass complete");
            }
            Ok(_) => {}
            Err(e) => warn!(until = range.until, "discard failed: {e}"),
        }
    }
}

#[async_trait]
impl RaftStorage for WalStore {
    async fn initial_state(&self) -> WalResult<(HardState, ConfState)> {
        WalStore::initial_state(self)
    }

    async fn entries(&self, lo: u64, hi: u64, max_bytes: u64) -> WalResult<Vec<Entry>> {
        WalStore::entries(self, lo, hi, max_bytes)
    }

    async fn term(&self, index: u64) -> WalResult<u64> {
        WalStore::term(self, index)
    }

    async fn first_index(&self) -> WalResult<u64> {
        Ok(WalStore::first_index(self))
    }

    async fn last_index(&self) -> WalResult<u64> {
        Ok(WalStore::last_index(self))
    }

    async fn snapshot(&self) -> WalResult<Snapshot> {
        Ok(WalStore::snapshot(self))
    }

    async fn save(
        &self,
        hard_state: &HardState,
        entries: &[Entry],
        snapshot: &Snapshot,
    ) -> WalResult<()> {
        WalStore::save(self, hard_state, entries, snapshot).await
    }

    async fn create_snapshot(
        &self,
        index: u64,
        conf_state: ConfState,
        data: Vec<u8>,
    ) -> WalResult<()> {
        WalStore::create_snapshot(self, index, conf_state, data).await
    }
}
