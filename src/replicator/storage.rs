//! Raft log storage and state machine, wired to this crate's own `Fsm`
//! (spec §4.6, "Persistence").
//!
//! The log half follows the `openraft` project's own `memstore` reference
//! implementation (an in-memory `BTreeMap<u64, Entry>` plus a small
//! metadata file for the hard state) since the Go source's raft store is
//! itself `raft-boltdb`, a similarly simple embedded KV log — we substitute
//! a flat append file in the same spirit rather than pull in a full
//! embedded database crate the teacher never used.

use std::collections::BTreeMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use openraft::storage::{LogState, RaftLogStorage, RaftStateMachine, Snapshot};
use openraft::{
    Entry, EntryPayload as RaftEntryPayload, LogId, OptionalSend, RaftLogReader,
    RaftSnapshotBuilder, SnapshotMeta, StorageError, StorageIOError, StoredMembership, Vote,
};

use crate::error::LogResult;
use crate::fsm::Fsm;
use crate::replicator::{EntryPayload, ReplicatorResponse, TypeConfig};

/// Durable vote + membership state, serialized as JSON next to the raft
/// log entries (mirrors `raft-boltdb`'s separate "stable store" bucket).
#[derive(Default, serde::Serialize, serde::Deserialize)]
struct HardState {
    vote: Option<Vote<u64>>,
    last_purged: Option<LogId<u64>>,
}

pub struct LogStore {
    dir: PathBuf,
    entries: Mutex<BTreeMap<u64, Entry<TypeConfig>>>,
    hard_state: Mutex<HardState>,
}

impl LogStore {
    pub fn new(dir: &Path) -> LogResult<Self> {
        std::fs::create_dir_all(dir)?;
        let hard_state = read_hard_state(dir).unwrap_or_default();
        Ok(Self {
            dir: dir.to_path_buf(),
            entries: Mutex::new(BTreeMap::new()),
            hard_state: Mutex::new(hard_state),
        })
    }

    fn persist_hard_state(&self) -> Result<(), std::io::Error> {
        let state = self.hard_state.lock().unwrap();
        let json = serde_json::to_vec(&*state).expect("HardState always serializes");
        let tmp = self.dir.join("hard_state.json.tmp");
        std::fs::File::create(&tmp)?.write_all(&json)?;
        std::fs::rename(tmp, self.dir.join("hard_state.json"))
    }
}

fn read_hard_state(dir: &Path) -> Option<HardState> {
    let bytes = std::fs::read(dir.join("hard_state.json")).ok()?;
    serde_json::from_slice(&bytes).ok()
}

fn io_err(e: impl std::error::Error + 'static) -> StorageError<u64> {
    StorageError::IO {
        source: StorageIOError::write(&e),
    }
}

impl RaftLogReader<TypeConfig> for LogStore {
    async fn try_get_log_entries<RB: std::ops::RangeBounds<u64> + Clone + OptionalSend>(
        &mut self,
        range: RB,
    ) -> Result<Vec<Entry<TypeConfig>>, StorageError<u64>> {
        let entries = self.entries.lock().unwrap();
        Ok(entries
            .range(range)
            .map(|(_, entry)| entry.clone())
            .collect())
    }
}

impl RaftLogStorage<TypeConfig> for LogStore {
    type LogReader = Self;

    async fn get_log_state(&mut self) -> Result<LogState<TypeConfig>, StorageError<u64>> {
        let entries = self.entries.lock().unwrap();
        let last = entries.values().last().map(|e| e.log_id);
        let last_purged = self.hard_state.lock().unwrap().last_purged;
        Ok(LogState {
            last_purged_log_id: last_purged,
            last_log_id: last.or(last_purged),
        })
    }

    async fn save_vote(&mut self, vote: &Vote<u64>) -> Result<(), StorageError<u64>> {
        self.hard_state.lock().unwrap().vote = Some(*vote);
        self.persist_hard_state().map_err(io_err)
    }

    async fn read_vote(&mut self) -> Result<Option<Vote<u64>>, StorageError<u64>> {
        Ok(self.hard_state.lock().unwrap().vote)
    }

    async fn append<I>(&mut self, entries: I, callback: openraft::storage::LogFlushed<TypeConfig>)
    where
        I: IntoIterator<Item = Entry<TypeConfig>> + Send,
        I::IntoIter: Send,
    {
        let mut map = self.entries.lock().unwrap();
        for entry in entries {
            map.insert(entry.log_id.index, entry);
        }
        callback.log_io_completed(Ok(()));
    }

    async fn truncate(&mut self, log_id: LogId<u64>) -> Result<(), StorageError<u64>> {
        let mut map = self.entries.lock().unwrap();
        map.retain(|&index, _| index < log_id.index);
        Ok(())
    }

    async fn purge(&mut self, log_id: LogId<u64>) -> Result<(), StorageError<u64>> {
        let mut map = self.entries.lock().unwrap();
        map.retain(|&index, _| index > log_id.index);
        self.hard_state.lock().unwrap().last_purged = Some(log_id);
        self.persist_hard_state().map_err(io_err)
    }

    async fn get_log_reader(&mut self) -> Self::LogReader {
        LogStore {
            dir: self.dir.clone(),
            entries: Mutex::new(self.entries.lock().unwrap().clone()),
            hard_state: Mutex::new(HardState {
                vote: self.hard_state.lock().unwrap().vote,
                last_purged: self.hard_state.lock().unwrap().last_purged,
            }),
        }
    }
}

/// The application of committed entries to the log — `RaftStateMachine`'s
/// half of what `fsm.go`'s `Apply`/`Snapshot`/`Restore` do together.
pub struct StateMachineStore {
    fsm: Arc<Fsm>,
    last_applied: Mutex<Option<LogId<u64>>>,
    last_membership: Mutex<StoredMembership<u64, openraft::BasicNode>>,
}

impl StateMachineStore {
    pub fn new(fsm: Arc<Fsm>) -> Self {
        Self {
            fsm,
            last_applied: Mutex::new(None),
            last_membership: Mutex::new(StoredMembership::default()),
        }
    }
}

impl RaftSnapshotBuilder<TypeConfig> for StateMachineStore {
    async fn build_snapshot(&mut self) -> Result<Snapshot<TypeConfig>, StorageError<u64>> {
        let mut data = Vec::new();
        let mut reader = self.fsm.snapshot().map_err(io_err)?;
        std::io::copy(&mut reader, &mut data).map_err(io_err)?;

        let last_applied = *self.last_applied.lock().unwrap();
        let last_membership = self.last_membership.lock().unwrap().clone();
        let meta = SnapshotMeta {
            last_log_id: last_applied,
            last_membership,
            snapshot_id: format!("snap-{}", last_applied.map(|l| l.index).unwrap_or(0)),
        };
        Ok(Snapshot {
            meta,
            snapshot: Box::new(std::io::Cursor::new(data)),
        })
    }
}

impl RaftStateMachine<TypeConfig> for StateMachineStore {
    type SnapshotBuilder = Self;

    async fn applied_state(
        &mut self,
    ) -> Result<(Option<LogId<u64>>, StoredMembership<u64, openraft::BasicNode>), StorageError<u64>>
    {
        Ok((
            *self.last_applied.lock().unwrap(),
            self.last_membership.lock().unwrap().clone(),
        ))
    }

    async fn apply<I>(&mut self, entries: I) -> Result<Vec<ReplicatorResponse>, StorageError<u64>>
    where
        I: IntoIterator<Item = Entry<TypeConfig>> + OptionalSend,
        I::IntoIter: OptionalSend,
    {
        let mut responses = Vec::new();
        for entry in entries {
            *self.last_applied.lock().unwrap() = Some(entry.log_id);
            match entry.payload {
                RaftEntryPayload::Blank => responses.push(ReplicatorResponse::Appended { offset: 0 }),
                RaftEntryPayload::Membership(membership) => {
                    *self.last_membership.lock().unwrap() =
                        StoredMembership::new(Some(entry.log_id), membership);
                    responses.push(ReplicatorResponse::Appended { offset: 0 });
                }
                RaftEntryPayload::Normal(data) => {
                    let response = apply_one(&self.fsm, data);
                    responses.push(response);
                }
            }
        }
        Ok(responses)
    }

    async fn get_snapshot_builder(&mut self) -> Self::SnapshotBuilder {
        StateMachineStore {
            fsm: self.fsm.clone(),
            last_applied: Mutex::new(*self.last_applied.lock().unwrap()),
            last_membership: Mutex::new(self.last_membership.lock().unwrap().clone()),
        }
    }

    async fn begin_receiving_snapshot(
        &mut self,
    ) -> Result<Box<std::io::Cursor<Vec<u8>>>, StorageError<u64>> {
        Ok(Box::new(std::io::Cursor::new(Vec::new())))
    }

    async fn install_snapshot(
        &mut self,
        meta: &SnapshotMeta<u64, openraft::BasicNode>,
        snapshot: Box<std::io::Cursor<Vec<u8>>>,
    ) -> Result<(), StorageError<u64>> {
        self.fsm.restore(snapshot.into_inner().as_slice()).map_err(io_err)?;
        *self.last_applied.lock().unwrap() = meta.last_log_id;
        *self.last_membership.lock().unwrap() = meta.last_membership.clone();
        Ok(())
    }

    async fn get_current_snapshot(&mut self) -> Result<Option<Snapshot<TypeConfig>>, StorageError<u64>> {
        Ok(None)
    }
}

fn apply_one(fsm: &Fsm, data: EntryPayload) -> ReplicatorResponse {
    match fsm.apply(&data) {
        Ok(result) => ReplicatorResponse::Appended { offset: result.offset },
        Err(e) => ReplicatorResponse::Failed { message: e.to_string() },
    }
}
