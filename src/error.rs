use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the write-ahead log.
///
/// The first four variants are routine Raft protocol errors: the driver
/// matches on them and adapts its own state. Everything else is fatal to
/// the node; a corrupt or out-of-space log is replaced by re-replicating
/// from peers rather than repaired in place.
#[derive(Debug, Error)]
pub enum WalError {
    #[error("requested index has been compacted into a snapshot")]
    Compacted,

    #[error("requested index is not yet available in the log")]
    Unavailable,

    #[error("snapshot is temporarily unavailable")]
    SnapshotTemporarilyUnavailable,

    #[error("snapshot index does not advance past the existing snapshot")]
    SnapshotOutOfDate,

    #[error("{}: write would exceed the {limit} byte file limit", path.display())]
    OutOfSpace { path: PathBuf, limit: u64 },

    #[error("{}: corrupt data at offset {offset}: {reason}", path.display())]
    Corruption {
        path: PathBuf,
        offset: u64,
        reason: String,
    },

    #[error("{op} {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("log has been closed")]
    Closed,
}

pub type WalResult<T> = Result<T, WalError>;

impl WalError {
    /// Routine errors are handled by the Raft driver; everything else
    /// should abort the node.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            WalError::Compacted
                | WalError::Unavailable
                | WalError::SnapshotTemporarilyUnavailable
                | WalError::SnapshotOutOfDate
        )
    }

    pub(crate) fn corruption(
        path: impl Into<PathBuf>,
        offset: u64,
        reason: impl Into<String>,
    ) -> Self {
        WalError::Corruption {
            path: path.into(),
            offset,
            reason: reason.into(),
        }
    }

    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| WalError::Io { op, path, source }
    }
}
