use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// Kind of a replicated log entry.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Encode, Decode,
)]
pub enum EntryType {
    #[default]
    Normal,
    ConfChange,
}

impl EntryType {
    /// On-disk type code stored in the entry file index slot.
    pub fn code(self) -> u64 {
        match self {
            EntryType::Normal => 0,
            EntryType::ConfChange => 1,
        }
    }

    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(EntryType::Normal),
            1 => Some(EntryType::ConfChange),
            _ => None,
        }
    }
}

/// A single replicated log entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct Entry {
    pub term: u64,
    pub index: u64,
    pub entry_type: EntryType,
    pub data: Vec<u8>,
}

impl Entry {
    pub fn new(term: u64, index: u64, data: Vec<u8>) -> Self {
        Self {
            term,
            index,
            entry_type: EntryType::Normal,
            data,
        }
    }

    /// Size charged against the `max_bytes` budget of a range read: the
    /// three fixed u64 fields plus the payload.
    pub fn serialized_size(&self) -> u64 {
        24 + self.data.len() as u64
    }
}

/// The (term, vote, commit) triple Raft requires to be durable before it
/// acknowledges a write. A vote of zero means no vote has been cast.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct HardState {
    pub term: u64,
    pub vote: u64,
    pub commit: u64,
}

impl HardState {
    pub fn is_empty(&self) -> bool {
        self.term == 0 && self.vote == 0 && self.commit == 0
    }
}

/// Cluster membership configuration carried inside a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct ConfState {
    pub voters: Vec<u64>,
    pub learners: Vec<u64>,
}

/// A compacted view of the state machine at `index`. Entries with index
/// at or below `index` are semantically deleted from the log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct Snapshot {
    pub index: u64,
    pub term: u64,
    pub conf_state: ConfState,
    pub data: Vec<u8>,
}

impl Snapshot {
    pub fn new(index: u64, term: u64, conf_state: ConfState, data: Vec<u8>) -> Self {
        Self {
            index,
            term,
            conf_state,
            data,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.index == 0
    }
}
