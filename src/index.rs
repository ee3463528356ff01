//! Memory-mapped, fixed-width offset index for one segment (spec §4.2, C2).
//!
//! Grounded in `crates/chronicle-core/src/mmap.rs`'s `MmapFile` (create with
//! `set_len` up front, `flush`/`sync` on close) and in
//! `examples/original_source/src/log/index.go`'s preallocate / mmap /
//! truncate-on-close lifecycle, which this module reproduces: the
//! underlying file is grown to `max_index_bytes` so the mmap never needs to
//! be remapped, and shrunk back to the valid prefix on `close` so a later
//! re-open sees the true entry count rather than a file full of zeros.

use std::fs::File;

use memmap2::{MmapMut, MmapOptions};

use crate::config::ENTRY_WIDTH;
use crate::error::{LogError, LogResult};

pub struct Index {
    file: File,
    mmap: MmapMut,
    size: u64,
}

impl Index {
    /// Open (or create) the index file backing `file`, preallocating it to
    /// `max_index_bytes` and mapping the whole range read-write.
    pub fn new(file: File, max_index_bytes: u64) -> LogResult<Self> {
        let size = file.metadata()?.len();
        file.set_len(max_index_bytes)?;
        let mmap = unsafe { MmapOptions::new().len(max_index_bytes as usize).map_mut(&file)? };
        Ok(Self { file, mmap, size })
    }

    /// Read the `in`-th entry, or the last entry if `in == -1`.
    ///
    /// Fails with `Empty`/`OffsetOutOfRange`-shaped errors (surfaced here as
    /// `LogError::Empty`) when the index has no entries or the requested
    /// slot is past the written prefix — this is the same "end of stream"
    /// signal the Go source returns as `io.EOF`.
    pub fn read(&self, r#in: i64) -> LogResult<(u32, u64)> {
        if self.size == 0 {
            return Err(LogError::Empty);
        }

        let out: u64 = if r#in == -1 {
            self.size / ENTRY_WIDTH - 1
        } else {
            r#in as u64
        };

        let pos = out * ENTRY_WIDTH;
        if self.size < pos + ENTRY_WIDTH {
            return Err(LogError::Empty);
        }

        let rel_offset = u32::from_be_bytes(
            self.mmap[pos as usize..pos as usize + 4]
                .try_into()
                .expect("4-byte slice"),
        );
        let file_pos = u64::from_be_bytes(
            self.mmap[pos as usize + 4..pos as usize + 12]
                .try_into()
                .expect("8-byte slice"),
        );
        Ok((rel_offset, file_pos))
    }

    /// Append one `(rel_offset, file_pos)` entry at the current size.
    ///
    /// Returns `SegmentFull` when the preallocated mmap is exhausted — this
    /// is the rollover trigger, not a fatal error (spec §4.2).
    pub fn write(&mut self, rel_offset: u32, file_pos: u64) -> LogResult<()> {
        if (self.mmap.len() as u64) < self.size + ENTRY_WIDTH {
            return Err(LogError::SegmentFull);
        }
        let pos = self.size as usize;
        self.mmap[pos..pos + 4].copy_from_slice(&rel_offset.to_be_bytes());
        self.mmap[pos + 4..pos + 12].copy_from_slice(&file_pos.to_be_bytes());
        self.size += ENTRY_WIDTH;
        Ok(())
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Flush the mmap, fsync the file, then truncate back to the valid
    /// prefix. Order matters: skipping the truncate corrupts a later
    /// re-open, which would see the file as full (spec §4.2).
    pub fn close(&mut self) -> LogResult<()> {
        self.mmap.flush()?;
        self.file.sync_all()?;
        self.file.set_len(self.size)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_rw(path: &std::path::Path) -> File {
        std::fs::OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)
            .unwrap()
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let mut idx = Index::new(open_rw(&dir.path().join("0.index")), 1024).unwrap();

        idx.write(0, 0).unwrap();
        idx.write(1, 16).unwrap();

        assert_eq!(idx.read(0).unwrap(), (0, 0));
        assert_eq!(idx.read(1).unwrap(), (1, 16));
        assert_eq!(idx.read(-1).unwrap(), (1, 16));
    }

    #[test]
    fn empty_index_is_end_of_stream() {
        let dir = tempdir().unwrap();
        let idx = Index::new(open_rw(&dir.path().join("0.index")), 1024).unwrap();
        assert!(matches!(idx.read(-1), Err(LogError::Empty)));
    }

    #[test]
    fn write_past_capacity_signals_rollover() {
        let dir = tempdir().unwrap();
        // exactly two entries fit
        let mut idx = Index::new(open_rw(&dir.path().join("0.index")), 2 * ENTRY_WIDTH).unwrap();
        idx.write(0, 0).unwrap();
        idx.write(1, 8).unwrap();
        assert!(matches!(idx.write(2, 16), Err(LogError::SegmentFull)));
    }

    #[test]
    fn close_truncates_to_valid_prefix_and_reopen_preserves_entries() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("0.index");
        {
            let mut idx = Index::new(open_rw(&path), 1024).unwrap();
            idx.write(0, 0).unwrap();
            idx.write(1, 16).unwrap();
            idx.close().unwrap();
        }
        let on_disk = std::fs::metadata(&path).unwrap().len();
        assert_eq!(on_disk, 2 * ENTRY_WIDTH);

        let idx = Index::new(open_rw(&path), 1024).unwrap();
        assert_eq!(idx.size(), 2 * ENTRY_WIDTH);
        assert_eq!(idx.read(0).unwrap(), (0, 0));
        assert_eq!(idx.read(1).unwrap(), (1, 16));
    }
}
