//! The on-disk entry log.
//!
//! Entries live in pre-allocated `<first-index>.ent` files. Each file
//! reserves 1 MiB for up to 30 000 fixed 32-byte index slots (plus a
//! payload high-water footer in the slack after the slots) and grows a
//! payload heap upward from the 1 MiB mark. Only the newest file (the
//! tail) is ever written; older files are immutable until a snapshot
//! supersedes them and they are unlinked whole.

pub mod entry;
pub mod file;
pub mod manager;
pub mod store;


pub use entry::{Slot, SLOT_SIZE};
pub use file::EntryFile;
pub use manager::EntryLog;
pub use store::{WalOptions, WalStore};

/// Maximum number of index slots per entry file; the file rotates beyond it.
pub const MAX_ENTRIES: usize = 30_000;

/// Start of the payload heap within an entry file.
pub const PAYLOAD_BASE: u64 = 1 << 20;

/// Initial pre-allocated size of an entry file.
pub const FILE_INIT_SIZE: u64 = 4 * PAYLOAD_BASE;

/// Hard ceiling on an entry file's size.
pub const FILE_MAX_SIZE: u64 = 1 << 30;

/// Extension of entry files, named `<first-index>.ent`.
pub const ENTRY_FILE_EXT: &str = "ent";

/// Byte length of the index-slot region.
pub const SLOT_REGION_SIZE: u64 = (MAX_ENTRIES * SLOT_SIZE) as u64;

/// Offset of the payload high-water footer, in the reserved slack between
/// the slot region and the payload heap.
pub const HWM_OFFSET: u64 = SLOT_REGION_SIZE;
