//! Memory-mapped file region.
//!
//! One region owns one file descriptor and one mutable mapping. Growth past
//! the current size goes through `ftruncate` plus a fresh mapping, so the
//! borrow checker keeps readers from holding slices across a growth event.
//! `flush` is the only durability primitive above the filesystem.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use memmap2::MmapMut;

use crate::error::{WalError, WalResult};

pub struct MmapRegion {
    path: PathBuf,
    file: File,
    mmap: MmapMut,
    len: u64,
    chunk: u64,
    max_size: u64,
}

impl MmapRegion {
    /// Open or create `path`, extend it to at least `initial_size`, and map
    /// it. An existing file larger than `initial_size` is mapped at its
    /// current length. Writes may later grow the file in `initial_size`
    /// chunks up to `max_size`.
    pub fn open(path: &Path, initial_size: u64, max_size: u64) -> WalResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .map_err(WalError::io("open", path))?;

        let existing = file
            .metadata()
            .map_err(WalError::io("stat", path))?
            .len();
        let len = existing.max(initial_size);
        if existing < len {
            file.set_len(len).map_err(WalError::io("truncate", path))?;
        }

        let mmap = unsafe { MmapMut::map_mut(&file) }.map_err(WalError::io("mmap", path))?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
            mmap,
            len,
            chunk: initial_size,
            max_size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current mapped (and file) size in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn read_at(&self, offset: u64, len: usize) -> WalResult<&[u8]> {
        let end = offset + len as u64;
        if end > self.len {
            return Err(WalError::corruption(
                &self.path,
                offset,
                format!("read of {} bytes past mapped length {}", len, self.len),
            ));
        }
        Ok(&self.mmap[offset as usize..end as usize])
    }

    /// Write `data` at `offset`, growing the file and remapping if the
    /// write lands past the current length. Fails with `OutOfSpace` once
    /// the region would exceed its maximum size.
    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> WalResult<()> {
        let end = offset + data.len() as u64;
        if end > self.len {
            self.grow(end)?;
        }
        self.mmap[offset as usize..end as usize].copy_from_slice(data);
        Ok(())
    }

    /// Zero `len` bytes starting at `offset`. The range must already be
    /// mapped.
    pub fn zero_at(&mut self, offset: u64, len: u64) -> WalResult<()> {
        let end = offset + len;
        if end > self.len {
            return Err(WalError::corruption(
                &self.path,
                offset,
                "zero range past mapped length",
            ));
        }
        self.mmap[offset as usize..end as usize].fill(0);
        Ok(())
    }

    /// Synchronously push dirty mapped pages to durable storage.
    pub fn flush(&self) -> WalResult<()> {
        self.mmap.flush().map_err(WalError::io("msync", &self.path))
    }

    fn grow(&mut self, needed: u64) -> WalResult<()> {
        if needed > self.max_size {
            return Err(WalError::OutOfSpace {
                path: self.path.clone(),
                limit: self.max_size,
            });
        }
        let mut new_len = self.len;
        while new_len < needed {
            new_len += self.chunk;
        }
        let new_len = new_len.min(self.max_size);

        self.file
            .set_len(new_len)
            .map_err(WalError::io("truncate", &self.path))?;
        // The old mapping is invalidated here; no slices can outlive it
        // because read_at borrows &self.
        self.mmap =
            unsafe { MmapMut::map_mut(&self.file) }.map_err(WalError::io("mmap", &self.path))?;
        self.len = new_len;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn open_extends_to_initial_size() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("region");
        let region = MmapRegion::open(&path, 4096, 1 << 20).unwrap();
        assert_eq!(region.len(), 4096);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 4096);
    }

    #[test]
    fn write_read_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut region = MmapRegion::open(&dir.path().join("region"), 4096, 1 << 20).unwrap();
        region.write_at(100, b"hello").unwrap();
        assert_eq!(region.read_at(100, 5).unwrap(), b"hello");
    }

    #[test]
    fn write_past_length_grows_in_chunks() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("region");
        let mut region = MmapRegion::open(&path, 4096, 1 << 20).unwrap();
        region.write_at(5000, b"x").unwrap();
        assert_eq!(region.len(), 8192);
        assert_eq!(region.read_at(5000, 1).unwrap(), b"x");
    }

    #[test]
    fn growth_is_capped_at_max_size() {
        let dir = TempDir::new().unwrap();
        let mut region = MmapRegion::open(&dir.path().join("region"), 4096, 8192).unwrap();
        let err = region.write_at(8192, b"y").unwrap_err();
        assert!(matches!(err, WalError::OutOfSpace { limit: 8192, .. }));
    }

    #[test]
    fn reopen_preserves_contents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("region");
        {
            let mut region = MmapRegion::open(&path, 4096, 1 << 20).unwrap();
            region.write_at(0, b"persist").unwrap();
            region.flush().unwrap();
        }
        let region = MmapRegion::open(&path, 4096, 1 << 20).unwrap();
        assert_eq!(region.read_at(0, 7).unwrap(), b"persist");
    }

    #[test]
    fn read_past_end_is_rejected() {
        let dir = TempDir::new().unwrap();
        let region = MmapRegion::open(&dir.path().join("region"), 4096, 4096).unwrap();
        assert!(matches!(
            region.read_at(4090, 16),
            Err(WalError::Corruption { .. })
        ));
    }
}
