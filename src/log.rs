//! Ordered set of segments under one directory (spec §4.4, C4).
//!
//! Grounded in `examples/other_examples/.../qmilangowin-proglog-rs
//! __src-storage-log.rs.rs` for the overall shape of a Rust `Log` that owns
//! a `Vec` of segments and routes reads/rollover (same idea as the Go
//! original's `log.New`/`Append`/`Read`), and in the teacher's directory
//! scanning style from `crates/chronicle-core/src/segment_store.rs`
//! (`discover_segments`) for enumerating on-disk segment files.

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use log::{debug, info};

use crate::config::SegmentConfig;
use crate::error::{LogError, LogResult};
use crate::record::Record;
use crate::segment::Segment;

/// Directory of `<base>.store`/`<base>.index` pairs forming one ordered,
/// append-only log. Exactly one segment (the highest base offset) is
/// active and accepts appends; the rest are immutable.
pub struct Log {
    dir: PathBuf,
    config: SegmentConfig,
    inner: RwLock<Inner>,
}

struct Inner {
    segments: Vec<Segment>,
}

impl Log {
    pub fn new(dir: &Path, config: SegmentConfig) -> LogResult<Self> {
        std::fs::create_dir_all(dir)?;
        let mut segments = Vec::new();
        for base_offset in discover_base_offsets(dir)? {
            segments.push(Segment::new(dir, base_offset, config)?);
        }

        if segments.is_empty() {
            segments.push(Segment::new(dir, config.initial_offset, config)?);
        }

        info!(
            "opened log at {:?} with {} segment(s)",
            dir,
            segments.len()
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            config,
            inner: RwLock::new(Inner { segments }),
        })
    }

    /// Append a record, rolling to a new segment first if the active one is
    /// maxed. Returns the assigned absolute offset.
    pub fn append(&self, record: Record) -> LogResult<u64> {
        let mut inner = self.inner.write().expect("log lock poisoned");
        if inner.active().is_maxed() {
            let next_base = inner.active().next_offset();
            debug!("rolling over to new segment at base offset {next_base}");
            inner.segments.push(Segment::new(&self.dir, next_base, self.config)?);
        }
        inner.active_mut().append(record)
    }

    pub fn read(&self, offset: u64) -> LogResult<Record> {
        let inner = self.inner.read().expect("log lock poisoned");
        let segment = inner
            .segments
            .iter()
            .find(|s| s.base_offset() <= offset && offset < s.next_offset())
            .ok_or_else(|| LogError::OffsetOutOfRange {
                offset,
                lowest: inner.segments.first().map(|s| s.base_offset()).unwrap_or(0),
                highest: self.highest_offset_locked(&inner),
            })?;
        segment.read(offset)
    }

    pub fn lowest_offset(&self) -> u64 {
        let inner = self.inner.read().expect("log lock poisoned");
        inner.segments.first().map(|s| s.base_offset()).unwrap_or(0)
    }

    /// `None` when the log has never had a record appended.
    pub fn highest_offset(&self) -> Option<u64> {
        let inner = self.inner.read().expect("log lock poisoned");
        let next = inner.active().next_offset();
        let base = inner.segments.first().map(|s| s.base_offset()).unwrap_or(next);
        if next == base && inner.segments.iter().all(Segment::is_empty) {
            None
        } else {
            Some(next - 1)
        }
    }

    fn highest_offset_locked(&self, inner: &Inner) -> u64 {
        inner.active().next_offset().saturating_sub(1)
    }

    /// Remove every segment whose last offset is below `lowest`. Used by
    /// the replicator to compact history after a snapshot (spec §4.4).
    pub fn truncate(&self, lowest: u64) -> LogResult<()> {
        let mut inner = self.inner.write().expect("log lock poisoned");
        let mut kept = Vec::new();
        for segment in inner.segments.drain(..) {
            if segment.next_offset().saturating_sub(1) < lowest {
                segment.remove()?;
            } else {
                kept.push(segment);
            }
        }
        if kept.is_empty() {
            kept.push(Segment::new(&self.dir, lowest, self.config)?);
        }
        inner.segments = kept;
        Ok(())
    }

    /// A reader that concatenates every segment's store file verbatim, in
    /// base-offset order — the whole log as a stream of length-prefixed
    /// records, used by `Fsm::snapshot`.
    pub fn reader(&self) -> LogResult<impl std::io::Read> {
        let inner = self.inner.read().expect("log lock poisoned");
        let mut readers: Vec<Box<dyn std::io::Read>> = Vec::new();
        for segment in &inner.segments {
            readers.push(Box::new(segment.reader()?));
        }
        Ok(MultiReader { readers, idx: 0 })
    }

    /// Close and delete every segment, then reopen fresh at `config`'s
    /// `initial_offset`. Used when restoring from a snapshot that begins at
    /// a non-zero offset (spec §4.4).
    pub fn reset(&self) -> LogResult<()> {
        self.reset_to(self.config.initial_offset)
    }

    /// Like `reset`, but the fresh segment starts at `initial_offset`
    /// instead of the configured default. Used by `Fsm::restore`, which
    /// must reopen the log at the snapshot's first record's offset
    /// (mirrors `fsm.go` setting `Config.InitialOffset` before calling
    /// `Log.Reset`).
    pub fn reset_to(&self, initial_offset: u64) -> LogResult<()> {
        let mut inner = self.inner.write().expect("log lock poisoned");
        for segment in inner.segments.drain(..) {
            segment.remove()?;
        }
        inner.segments.push(Segment::new(&self.dir, initial_offset, self.config)?);
        Ok(())
    }

    pub fn close(&self) -> LogResult<()> {
        let mut inner = self.inner.write().expect("log lock poisoned");
        for segment in inner.segments.iter_mut() {
            segment.close()?;
        }
        Ok(())
    }

    pub fn remove(self) -> LogResult<()> {
        self.close()?;
        std::fs::remove_dir_all(&self.dir)?;
        Ok(())
    }
}

impl Inner {
    fn active(&self) -> &Segment {
        self.segments.last().expect("log always has an active segment")
    }

    fn active_mut(&mut self) -> &mut Segment {
        self.segments.last_mut().expect("log always has an active segment")
    }
}

struct MultiReader {
    readers: Vec<Box<dyn std::io::Read>>,
    idx: usize,
}

impl std::io::Read for MultiReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        while self.idx < self.readers.len() {
            let n = self.readers[self.idx].read(buf)?;
            if n > 0 {
                return Ok(n);
            }
            self.idx += 1;
        }
        Ok(0)
    }
}

/// Scan `dir` for `<base>.store`/`<base>.index` pairs and return the
/// distinct base offsets in ascending order (spec §4.4).
fn discover_base_offsets(dir: &Path) -> LogResult<Vec<u64>> {
    let mut bases = std::collections::BTreeSet::new();
    if !dir.exists() {
        return Ok(Vec::new());
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if let Some(stem) = name.strip_suffix(".store").or_else(|| name.strip_suffix(".index")) {
            if let Ok(base) = stem.parse::<u64>() {
                bases.insert(base);
            }
        }
    }
    Ok(bases.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read as _;
    use tempfile::tempdir;

    fn cfg(max_store: u64, max_index: u64) -> SegmentConfig {
        SegmentConfig {
            max_store_bytes: max_store,
            max_index_bytes: max_index,
            initial_offset: 0,
        }
    }

    fn rec(value: &[u8]) -> Record {
        Record {
            value: value.to_vec(),
            offset: 0,
            server: String::new(),
        }
    }

    /// Spec §8, S1: round-trip on a single node.
    #[test]
    fn s1_round_trip_single_node() {
        let dir = tempdir().unwrap();
        let log = Log::new(dir.path(), cfg(32, 24)).unwrap();

        let offset = log.append(rec(b"hello world")).unwrap();
        assert_eq!(offset, 0);

        let got = log.read(0).unwrap();
        assert_eq!(got.value, b"hello world");

        assert!(matches!(
            log.read(1),
            Err(LogError::OffsetOutOfRange { offset: 1, .. })
        ));
    }

    /// Spec §8, S2: segment rollover.
    #[test]
    fn s2_segment_rollover() {
        let dir = tempdir().unwrap();
        let log = Log::new(dir.path(), cfg(32, 24)).unwrap();

        log.append(rec(b"aaaaaaaa")).unwrap();
        log.append(rec(b"aaaaaaaa")).unwrap();
        let third = log.append(rec(b"aaaaaaaa")).unwrap();
        assert_eq!(third, 2);

        assert_eq!(log.highest_offset(), Some(2));
        assert_eq!(log.read(1).unwrap().value, b"aaaaaaaa");

        let mut bases: Vec<u64> = discover_base_offsets(dir.path()).unwrap();
        bases.sort_unstable();
        assert_eq!(bases, vec![0, 2]);
    }

    /// Spec §8, invariant 6 + S6: crash-safe close.
    #[test]
    fn s6_crash_safe_close_reopen() {
        let dir = tempdir().unwrap();
        {
            let log = Log::new(dir.path(), cfg(256, 120)).unwrap();
            for i in 0..1000u32 {
                log.append(rec(format!("record-{i}").as_bytes())).unwrap();
            }
            log.close().unwrap();
        }

        let log = Log::new(dir.path(), cfg(256, 120)).unwrap();
        assert_eq!(log.highest_offset(), Some(999));
        for i in 0..1000u64 {
            let got = log.read(i).unwrap();
            assert_eq!(got.value, format!("record-{i}").as_bytes());
        }
    }

    #[test]
    fn truncate_drops_segments_below_lowest() {
        let dir = tempdir().unwrap();
        let log = Log::new(dir.path(), cfg(32, 24)).unwrap();
        for _ in 0..4 {
            log.append(rec(b"aaaaaaaa")).unwrap();
        }
        assert_eq!(log.lowest_offset(), 0);

        log.truncate(2).unwrap();
        assert_eq!(log.lowest_offset(), 2);
        assert!(log.read(0).is_err());
        assert_eq!(log.read(2).unwrap().value, b"aaaaaaaa");
    }

    #[test]
    fn reset_clears_all_segments_and_starts_fresh() {
        let dir = tempdir().unwrap();
        let log = Log::new(dir.path(), cfg(1024, 1024)).unwrap();
        log.append(rec(b"first")).unwrap();
        log.reset().unwrap();
        assert_eq!(log.highest_offset(), None);
        assert_eq!(log.lowest_offset(), 0);
    }

    #[test]
    fn reader_streams_every_segment_in_order() {
        let dir = tempdir().unwrap();
        let log = Log::new(dir.path(), cfg(32, 24)).unwrap();
        for _ in 0..4 {
            log.append(rec(b"aaaaaaaa")).unwrap();
        }

        let mut buf = Vec::new();
        log.reader().unwrap().read_to_end(&mut buf).unwrap();
        assert!(!buf.is_empty());
    }
}
