//! Append-only byte store backing one segment (spec §4.1, C1).
//!
//! Grounded in the teacher's buffered-writer pattern (`src/writer.rs`'s
//! `Mutex`-guarded append path) and in
//! `examples/original_source/src/log/store.go`, whose
//! `[len: u64 big-endian][payload]` framing and "flush before positional
//! read" discipline this module ports directly.

use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::os::unix::fs::FileExt;
use std::sync::Mutex;

use crate::config::LEN_WIDTH;
use crate::error::LogResult;

/// A single append-only file: a sequence of `[len: u64][payload]` records.
///
/// One mutex serializes every operation. `Read`/`ReadAt` must flush the
/// buffered writer first, so reads and writes can never interleave and see
/// a torn length prefix (spec §4.1, "Concurrency").
pub struct Store {
    file: File,
    inner: Mutex<StoreInner>,
}

struct StoreInner {
    buf: BufWriter<File>,
    size: u64,
}

impl Store {
    /// Wrap an already-open file (created with `append` + `read` + `write`
    /// by the caller, as `Segment::new` does).
    pub fn new(file: File) -> LogResult<Self> {
        let size = file.metadata()?.len();
        let buf = BufWriter::new(file.try_clone()?);
        Ok(Self {
            file,
            inner: Mutex::new(StoreInner { buf, size }),
        })
    }

    /// Append `data`, returning `(bytes_written, pos)`. Does not fsync —
    /// durability here is delegated to the replicator's commit protocol
    /// (spec §4.1).
    pub fn append(&self, data: &[u8]) -> LogResult<(u64, u64)> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        let pos = inner.size;

        inner.buf.write_all(&(data.len() as u64).to_be_bytes())?;
        inner.buf.write_all(data)?;

        let written = LEN_WIDTH + data.len() as u64;
        inner.size += written;
        Ok((written, pos))
    }

    /// Read the record stored at `pos`, flushing the write buffer first so
    /// a record written moments ago is visible.
    pub fn read(&self, pos: u64) -> LogResult<Vec<u8>> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        inner.buf.flush()?;

        let mut len_buf = [0u8; LEN_WIDTH as usize];
        self.file.read_exact_at(&mut len_buf, pos)?;
        let len = u64::from_be_bytes(len_buf);

        let mut record = vec![0u8; len as usize];
        self.file.read_exact_at(&mut record, pos + LEN_WIDTH)?;
        Ok(record)
    }

    /// Positional read into a caller-supplied buffer, flushing first.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> LogResult<usize> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        inner.buf.flush()?;
        Ok(self.file.read_at(buf, offset)?)
    }

    /// Current size in bytes, including buffered-but-unflushed writes.
    pub fn size(&self) -> u64 {
        self.inner.lock().expect("store mutex poisoned").size
    }

    /// A reader over the whole file from the start, used by `Log::reader`
    /// to stream a segment's contents verbatim for snapshotting.
    pub fn reader(&self) -> LogResult<impl Read> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        inner.buf.flush()?;
        let mut f = self.file.try_clone()?;
        f.seek(SeekFrom::Start(0))?;
        Ok(f)
    }

    pub fn close(&self) -> LogResult<()> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        inner.buf.flush()?;
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
    fn append_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let store = Store::new(open_rw(&dir.path().join("0.store"))).unwrap();

        let (n, pos) = store.append(b"hello world").unwrap();
        assert_eq!(n, 8 + 11);
        assert_eq!(pos, 0);

        let got = store.read(pos).unwrap();
        assert_eq!(got, b"hello world");
    }

    #[test]
    fn append_advances_size_and_pos() {
        let dir = tempdir().unwrap();
        let store = Store::new(open_rw(&dir.path().join("0.store"))).unwrap();

        let (_, pos1) = store.append(b"aaaaaaaa").unwrap();
        let (_, pos2) = store.append(b"bbbbbbbb").unwrap();
        assert_eq!(pos1, 0);
        assert_eq!(pos2, 8 + 8);
        assert_eq!(store.size(), 2 * (8 + 8));
    }

    #[test]
    fn reopen_preserves_existing_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("0.store");
        {
            let store = Store::new(open_rw(&path)).unwrap();
            store.append(b"persisted").unwrap();
            store.close().unwrap();
        }
        let store = Store::new(open_rw(&path)).unwrap();
        assert_eq!(store.size(), 8 + 9);
    }
}
