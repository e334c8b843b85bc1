//! Persistent write-ahead log backing a Raft consensus node.
//!
//! The log keeps everything Raft needs durable between restarts: the
//! replicated entries, the (term, vote, commit) hard state, and the most
//! recent snapshot. On disk that is one 4 KiB memory-mapped meta page plus
//! a rotating sequence of pre-allocated entry files, each holding up to
//! 30 000 fixed-size index slots and a heap of variable-length payloads.
//! Compaction removes whole files once a snapshot supersedes them, on a
//! background worker with an acknowledged shutdown.
//!
//! [`WalStore`] is the entry point; [`RaftStorage`] is the contract the
//! Raft driver consumes.

pub mod error;
pub mod message;
pub mod storage;
pub mod traits;

pub use error::{WalError, WalResult};
pub use message::{ConfState, Entry, EntryType, HardState, Snapshot};
pub use storage::log::store::{WalOptions, WalStore};
pub use traits::RaftStorage;
