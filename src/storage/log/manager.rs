//! The full, ordered log built from entry files.
//!
//! `EntryLog` keeps the files sorted by first index; the last one is the
//! tail and the only one written. Lookups binary-search the file list, so
//! an index→entry read costs O(log F) plus one slot read.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::{WalError, WalResult};
use crate::message::Entry;
use crate::storage::log::entry::SLOT_SIZE;
use crate::storage::log::file::EntryFile;
use crate::storage::log::{ENTRY_FILE_EXT, MAX_ENTRIES};

pub struct EntryLog {
    dir: PathBuf,
    /// Ordered by first index; never empty, the last file is the tail.
    files: Vec<EntryFile>,
    /// Largest index ever appended (and not truncated away).
    last_index: u64,
}

impl EntryLog {
    /// Scan `dir` for entry files, validate them, and recover the tail's
    /// write position. An empty directory gets a fresh `1.ent`.
    pub fn open(dir: &Path) -> WalResult<Self> {
        let mut files = Vec::new();
        for dirent in fs::read_dir(dir).map_err(WalError::io("readdir", dir))? {
            let dirent = dirent.map_err(WalError::io("readdir", dir))?;
            let path = dirent.path();
            if path.extension().and_then(|e| e.to_str()) == Some(ENTRY_FILE_EXT) {
                files.push(EntryFile::open(&path)?);
            }
        }

        // An empty file is only meaningful as the sole file; otherwise it
        // is a leftover from a rotation that crashed before its first
        // append.
        if files.len() > 1 {
            let mut kept = Vec::with_capacity(files.len());
            let any_occupied = files.iter().any(|f| !f.is_empty());
            for f in files {
                if f.is_empty() && (any_occupied || !kept.is_empty()) {
                    let path = f.path().to_path_buf();
                    warn!(path = %path.display(), "removing stale empty entry file");
                    drop(f);
                    fs::remove_file(&path).map_err(WalError::io("unlink", &path))?;
                } else {
                    kept.push(f);
                }
            }
            files = kept;
        }

        if files.is_empty() {
            let path = dir.join(format!("1.{ENTRY_FILE_EXT}"));
            files.push(EntryFile::create(&path)?);
            info!(path = %path.display(), "created initial entry file");
        }

        files.sort_by_key(|f| f.first_index());
        for pair in files.windows(2) {
            if pair[1].first_index() <= pair[0].last_index() {
                return Err(WalError::corruption(
                    pair[1].path(),
                    0,
                    format!(
                        "first index {} overlaps the previous file ending at {}",
                        pair[1].first_index(),
                        pair[0].last_index()
                    ),
                ));
            }
        }

        // Anything past the tail's occupied prefix is garbage from a torn
        // write; zero it so the prefix invariant holds after recovery.
        let tail = files.last_mut().expect("at least one entry file");
        let free = tail.len();
        tail.zero_slots_from(free)?;

        let last_index = files.last().expect("tail").last_index();
        Ok(Self {
            dir: dir.to_path_buf(),
            files,
            last_index,
        })
    }

    /// First index materially stored, zero when the log is empty. The
    /// store overlays the snapshot on top of this.
    pub fn first_index(&self) -> u64 {
        self.files
            .first()
            .map(|f| f.first_index())
            .unwrap_or_default()
    }

    pub fn last_index(&self) -> u64 {
        self.last_index
    }

    pub fn is_empty(&self) -> bool {
        self.files.len() == 1 && self.files[0].is_empty()
    }

    /// Entry count ignoring compaction: full slot counts for sealed files
    /// plus the tail's occupied prefix.
    pub fn num_entries(&self) -> usize {
        (self.files.len() - 1) * MAX_ENTRIES + self.tail().len()
    }

    /// Term of the entry at `index`.
    pub fn term(&self, index: u64) -> WalResult<u64> {
        let fidx = self.locate(index).ok_or(WalError::Compacted)?;
        let file = &self.files[fidx];
        let k = (index - file.first_index()) as usize;
        if k >= file.len() {
            // Between two files the index can only have been superseded by
            // a snapshot; past the tail it simply does not exist yet.
            return Err(if fidx + 1 < self.files.len() {
                WalError::Compacted
            } else {
                WalError::Unavailable
            });
        }
        Ok(file.slot(k)?.term)
    }

    /// A bounded prefix of the range `[lo, hi)`. The entry that crosses
    /// `max_bytes` is included before iteration stops, so at least one
    /// entry is returned whenever any exist.
    pub fn entries(&self, lo: u64, hi: u64, max_bytes: u64) -> WalResult<Vec<Entry>> {
        let mut out = Vec::new();
        if lo >= hi {
            return Ok(out);
        }
        if lo < self.first_index() {
            return Err(WalError::Compacted);
        }
        if hi > self.last_index + 1 {
            return Err(WalError::Unavailable);
        }
        let mut fidx = self.locate(lo).ok_or(WalError::Compacted)?;
        let mut next = lo;
        let mut size = 0u64;

        'files: while next < hi && fidx < self.files.len() {
            let file = &self.files[fidx];
            if next < file.first_index() {
                // the range runs into a compaction gap
                return Err(WalError::Compacted);
            }
            let start = (next - file.first_index()) as usize;
            for k in start..file.len() {
                if next >= hi {
                    break 'files;
                }
                let slot = file.slot(k)?;
                let succ = if k + 1 < file.len() {
                    Some(file.slot(k + 1)?)
                } else {
                    None
                };
                let data = file.payload(&slot, succ.as_ref())?.to_vec();
                let entry = Entry {
                    term: slot.term,
                    index: slot.index,
                    entry_type: slot.entry_type(file.path(), (k * SLOT_SIZE) as u64)?,
                    data,
                };
                size += entry.serialized_size();
                out.push(entry);
                next += 1;
                if size > max_bytes {
                    break 'files;
                }
            }
            fidx += 1;
        }
        Ok(out)
    }

    /// Append entries in order, rotating at the 30 000-slot boundary,
    /// truncating first when an index overwrites persisted entries, and
    /// rotating to a fresh file when Raft jumps past a snapshot install.
    /// The tail is flushed before returning.
    pub fn append(&mut self, entries: &[Entry]) -> WalResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        for e in entries {
            debug_assert!(e.index > 0, "log indices start at 1");
            if !self.is_empty() {
                if e.index <= self.last_index {
                    self.truncate(e.index)?;
                } else if e.index > self.last_index + 1 {
                    self.rotate(e.index)?;
                }
            }
            if self.tail().len() == MAX_ENTRIES {
                self.rotate(e.index)?;
            }

            let tail = self.files.last_mut().expect("tail");
            tail.append(e.term, e.index, e.entry_type, &e.data)?;
            self.last_index = e.index;
        }
        self.tail().flush()
    }

    /// Remove every entry with index >= `from`: whole files above it are
    /// unlinked and the surviving tail is rewound.
    pub fn truncate(&mut self, from: u64) -> WalResult<()> {
        if self.is_empty() || from > self.last_index {
            self.last_index = self.last_index.min(from.saturating_sub(1));
            return Ok(());
        }

        let cut = self
            .files
            .partition_point(|f| !f.is_empty() && f.first_index() < from);
        while self.files.len() > cut {
            let f = self.files.pop().expect("file past the cut");
            let path = f.path().to_path_buf();
            drop(f);
            fs::remove_file(&path).map_err(WalError::io("unlink", &path))?;
            info!(path = %path.display(), from, "removed truncated entry file");
        }

        if self.files.is_empty() {
            let path = self.dir.join(format!("{from}.{ENTRY_FILE_EXT}"));
            self.files.push(EntryFile::create(&path)?);
            info!(path = %path.display(), "recreated tail after full truncation");
            self.last_index = from.saturating_sub(1);
            return Ok(());
        }

        let tail = self.files.last_mut().expect("tail");
        if from <= tail.last_index() {
            let keep = (from - tail.first_index()) as usize;
            tail.truncate_to(keep)?;
        }
        self.last_index = self.tail().last_index();
        Ok(())
    }

    /// Seal the current tail and switch writes to a fresh file named by
    /// the index of its first entry.
    fn rotate(&mut self, first_index: u64) -> WalResult<()> {
        self.tail().flush()?;
        let path = self.dir.join(format!("{first_index}.{ENTRY_FILE_EXT}"));
        let file = EntryFile::create(&path)?;
        info!(path = %path.display(), first_index, "rotated to new entry file");
        self.files.push(file);
        Ok(())
    }

    /// Unlink every file fully below `snapshot_index`. The file containing
    /// the snapshot index and the tail are retained, so `term` at the
    /// snapshot index keeps working. Returns the number of files removed.
    pub fn discard(&mut self, snapshot_index: u64) -> WalResult<usize> {
        let mut cut = 0;
        for (i, f) in self.files.iter().enumerate() {
            if i + 1 == self.files.len() {
                break;
            }
            if f.last_index() < snapshot_index {
                cut = i + 1;
            } else {
                break;
            }
        }

        let removed: Vec<EntryFile> = self.files.drain(..cut).collect();
        let n = removed.len();
        for f in removed {
            let path = f.path().to_path_buf();
            drop(f);
            fs::remove_file(&path).map_err(WalError::io("unlink", &path))?;
            info!(path = %path.display(), snapshot_index, "discarded entry file");
        }
        Ok(n)
    }

    /// Flush the tail file.
    pub fn sync(&self) -> WalResult<()> {
        self.tail().flush()
    }

    pub fn num_files(&self) -> usize {
        self.files.len()
    }

    fn tail(&self) -> &EntryFile {
        self.files.last().expect("at least one entry file")
    }

    /// Index of the last file whose first index is <= `index`.
    fn locate(&self, index: u64) -> Option<usize> {
        let n = self.files.partition_point(|f| f.first_index() <= index);
        n.checked_sub(1)
    }
}
