//! The storage contract a Raft node requires of its write-ahead log.

use async_trait::async_trait;

use crate::error::WalResult;
use crate::message::{ConfState, Entry, HardState, Snapshot};

#[async_trait]
pub trait RaftStorage: Send + Sync {
    /// The durable hard state and cluster membership recovered at startup.
    async fn initial_state(&self) -> WalResult<(HardState, ConfState)>;

    /// Entries in `[lo, hi)` bounded by `max_bytes`; returns at least one
    /// entry when any exist in the range.
    async fn entries(&self, lo: u64, hi: u64, max_bytes: u64) -> WalResult<Vec<Entry>>;

    /// Term of the entry at `index`, valid from one below the first index
    /// (the snapshot anchor) through the last index.
    async fn term(&self, index: u64) -> WalResult<u64>;

    async fn first_index(&self) -> WalResult<u64>;

    async fn last_index(&self) -> WalResult<u64>;

    /// The most recent snapshot, empty if none has been taken.
    async fn snapshot(&self) -> WalResult<Snapshot>;

    /// Durably apply a Raft ready: entries, then hard state, then snapshot.
    async fn save(
        &self,
        hard_state: &HardState,
        entries: &[Entry],
        snapshot: &Snapshot,
    ) -> WalResult<()>;

    /// Compact the log up to `index` behind a freshly built snapshot.
    async fn create_snapshot(
        &self,
        index: u64,
        conf_state: ConfState,
        data: Vec<u8>,
    ) -> WalResult<()>;
}
