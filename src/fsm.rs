//! Deterministic applier turning committed consensus entries into local
//! `Log` appends (spec §4.5, C5).
//!
//! Ported from `examples/original_source/src/distributedLog/fsm.go`:
//! the `[request_type: u8][payload]` command frame, the single `Append`
//! command kind, and the snapshot/restore pair that streams
//! `[len: u64][record bytes]` entries are all the same shape here. Spec
//! §9 calls out that the Log must never reference the FSM — this module
//! only holds a `Log` reference, never the reverse, so there is no cycle.

use std::io::Read;
use std::sync::Arc;

use prost::Message;

use crate::error::{LogError, LogResult};
use crate::log::Log;
use crate::record::Record;

/// Tag byte prefixing every proposed raft entry, matching
/// `distributedLog.RequestType` in the Go source. Room is left for future
/// command kinds without breaking the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReplicatedCommand {
    Append = 0,
}

impl ReplicatedCommand {
    fn from_tag(tag: u8) -> LogResult<Self> {
        match tag {
            0 => Ok(Self::Append),
            _ => Err(LogError::Corrupt("unknown replicated command tag")),
        }
    }
}

/// Result of applying one committed entry, returned to the proposer
/// (the leader's `Replicator::append` waiter).
#[derive(Debug, Clone)]
pub struct AppendResult {
    pub offset: u64,
}

/// The deterministic state machine: a thin view over a `Log`. It never
/// holds a back-reference to the replicator — only `Log::append`/`reader`/
/// `reset` are used, so it stays a pure function of (current state,
/// committed entry) -> new state.
pub struct Fsm {
    log: Arc<Log>,
}

impl Fsm {
    pub fn new(log: Arc<Log>) -> Self {
        Self { log }
    }

    /// Apply one committed raft log entry. `data` is `[tag][record bytes]`
    /// where the record bytes are a `Record` protobuf encoding the value to
    /// append (the wire `WriteRequest.record`, already unwrapped by the
    /// replicator before the entry was proposed).
    pub fn apply(&self, data: &[u8]) -> LogResult<AppendResult> {
        let (&tag, rest) = data.split_first().ok_or(LogError::Corrupt("empty command frame"))?;
        match ReplicatedCommand::from_tag(tag)? {
            ReplicatedCommand::Append => self.apply_append(rest),
        }
    }

    fn apply_append(&self, payload: &[u8]) -> LogResult<AppendResult> {
        let record = Record::decode(payload)?;
        let offset = self.log.append(record)?;
        Ok(AppendResult { offset })
    }

    /// Encode one `Append` command frame ready to hand to the replicator's
    /// `propose`. Lives alongside `apply` since the tag format is this
    /// module's concern.
    pub fn encode_append(record: &Record) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + record.encoded_len());
        buf.push(ReplicatedCommand::Append as u8);
        record.encode(&mut buf).expect("encoding to a Vec cannot fail");
        buf
    }

    /// A byte stream of the whole log's store files, concatenated —
    /// the snapshot the replicator persists in its own format.
    pub fn snapshot(&self) -> LogResult<impl Read> {
        self.log.reader()
    }

    /// Restore from a stream of `[len: u64][record bytes]` entries. On the
    /// first record, resets the log so it begins at that record's offset,
    /// then appends every record in order. Relies on the snapshot stream
    /// being ordered by offset (spec §9, open question) — the replicator's
    /// snapshot producer is the only writer of this stream and always
    /// walks `Log::reader` in segment order, so the invariant holds here.
    pub fn restore(&self, mut reader: impl Read) -> LogResult<()> {
        let mut len_buf = [0u8; 8];
        let mut first = true;
        loop {
            match reader.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            let len = u64::from_be_bytes(len_buf) as usize;
            let mut payload = vec![0u8; len];
            reader.read_exact(&mut payload)?;
            let record = Record::decode(payload.as_slice())?;

            if first {
                self.log.reset_to(record.offset)?;
                first = false;
            }
            self.log.append(record)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SegmentConfig;
    use std::io::Read as _;
    use tempfile::tempdir;

    fn cfg() -> SegmentConfig {
        SegmentConfig {
            max_store_bytes: 1024,
            max_index_bytes: 1024,
            initial_offset: 0,
        }
    }

    #[test]
    fn apply_append_writes_to_log_and_returns_offset() {
        let dir = tempdir().unwrap();
        let log = Arc::new(Log::new(dir.path(), cfg()).unwrap());
        let fsm = Fsm::new(log.clone());

        let record = Record {
            value: b"foo".to_vec(),
            offset: 0,
            server: "node-0".into(),
        };
        let frame = Fsm::encode_append(&record);
        let result = fsm.apply(&frame).unwrap();
        assert_eq!(result.offset, 0);
        assert_eq!(log.read(0).unwrap().value, b"foo");
    }

    #[test]
    fn snapshot_then_restore_reproduces_the_log() {
        let src_dir = tempdir().unwrap();
        let src_log = Arc::new(Log::new(src_dir.path(), cfg()).unwrap());
        let src_fsm = Fsm::new(src_log.clone());
        for i in 0..5u8 {
            src_log
                .append(Record {
                    value: vec![i; 4],
                    offset: 0,
                    server: String::new(),
                })
                .unwrap();
        }

        let mut buf = Vec::new();
        src_fsm.snapshot().unwrap().read_to_end(&mut buf).unwrap();

        let dst_dir = tempdir().unwrap();
        let dst_log = Arc::new(Log::new(dst_dir.path(), cfg()).unwrap());
        let dst_fsm = Fsm::new(dst_log.clone());
        dst_fsm.restore(buf.as_slice()).unwrap();

        assert_eq!(dst_log.lowest_offset(), src_log.lowest_offset());
        for i in 0..5u64 {
            assert_eq!(dst_log.read(i).unwrap().value, src_log.read(i).unwrap().value);
        }
    }
}
