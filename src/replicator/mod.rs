//! Consensus node wrapping the FSM (spec §4.6, C6).
//!
//! The Go source drives `hashicorp/raft` with a custom `fsm` and
//! `StreamLayer` (`examples/original_source/src/distributedLog/{fsm,config}.go`).
//! The idiomatic Rust analogue of `hashicorp/raft` is `openraft`; this
//! module plays the same role `distributedLog.DistributedLog` plays in the
//! Go source: own a `Raft` handle, the `Fsm`, and expose
//! `append`/`read`/`get_leader`/`get_servers`/`join`/`leave`/`wait_for_leader`.

pub mod network;
pub mod storage;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use openraft::{BasicNode, Config as RaftConfig, Raft};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::time::timeout;

use crate::error::{Error, Result};
use crate::fsm::Fsm;
use crate::log::Log;
use crate::record::Record;

pub type NodeId = u64;

openraft::declare_raft_types!(
    pub TypeConfig:
        D = EntryPayload,
        R = ReplicatorResponse,
        NodeId = NodeId,
        Node = BasicNode,
);

/// The `[tag][record bytes]` command frame produced by `Fsm::encode_append`,
/// proposed to raft verbatim as one log entry's application data.
pub type EntryPayload = Vec<u8>;

/// What `StateMachineStore::apply` returns for one committed entry —
/// mirrors `fsm.go`'s `Apply` returning either `*api.WriteResponse` or an
/// error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ReplicatorResponse {
    Appended { offset: u64 },
    Failed { message: String },
}

/// Metadata describing one cluster member — the unit gossiped by
/// membership and returned by `GetServers` (spec §3, "ServerInfo").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerInfo {
    pub node_name: String,
    pub rpc_addr: String,
    pub is_leader: bool,
    pub latitude: f64,
    pub longitude: f64,
}

/// Tag byte prefixing raft connections on the shared RPC port (spec §4.6,
/// "Stream layer"). Plain gRPC connections write no tag at all — they are
/// told apart by peeking this byte and finding it isn't `RAFT_MUX_TAG`
/// (see `replicator::network::read_mux_tag`), since an HTTP/2 client
/// preface never starts with this value.
pub const RAFT_MUX_TAG: u8 = 0x01;

pub struct Replicator {
    pub raft: Raft<TypeConfig>,
    pub node_id: NodeId,
    pub node_name: String,
    log: Arc<Log>,
    fsm: Arc<Fsm>,
    /// Seeded by the bootstrap node, replicated as ordinary cluster
    /// metadata (spec §4.6, "Server info replication").
    servers: RwLock<BTreeMap<NodeId, ServerInfo>>,
}

impl Replicator {
    pub async fn new(
        node_id: NodeId,
        node_name: String,
        rpc_addr: String,
        log: Arc<Log>,
        bootstrap: bool,
        raft_dir: &std::path::Path,
    ) -> Result<Arc<Self>> {
        let fsm = Arc::new(Fsm::new(log.clone()));

        let raft_config = Arc::new(
            RaftConfig {
                heartbeat_interval: 250,
                election_timeout_min: 800,
                election_timeout_max: 1500,
                ..Default::default()
            }
            .validate()
            .map_err(|e| Error::Raft(e.to_string()))?,
        );

        let log_store = storage::LogStore::new(raft_dir)?;
        let state_machine = storage::StateMachineStore::new(fsm.clone());
        let network = network::Network::default();

        let raft = Raft::new(node_id, raft_config, network, log_store, state_machine)
            .await
            .map_err(|e| Error::Raft(e.to_string()))?;

        let replicator = Arc::new(Self {
            raft,
            node_id,
            node_name: node_name.clone(),
            log,
            fsm,
            servers: RwLock::new(BTreeMap::new()),
        });

        if bootstrap {
            let mut members = BTreeMap::new();
            members.insert(node_id, BasicNode::new(rpc_addr.clone()));
            replicator
                .raft
                .initialize(members)
                .await
                .map_err(|e| Error::Raft(e.to_string()))?;
            replicator.servers.write().await.insert(
                node_id,
                ServerInfo {
                    node_name,
                    rpc_addr,
                    is_leader: true,
                    latitude: 0.0,
                    longitude: 0.0,
                },
            );
            info!("bootstrapped single-voter raft cluster as node {node_id}");
        }

        Ok(replicator)
    }

    /// Propose a write, blocking until it is committed and applied
    /// (spec §4.6, "Append").
    pub async fn append(&self, record: Record) -> Result<u64> {
        let frame = Fsm::encode_append(&record);
        let response = self
            .raft
            .client_write(frame)
            .await
            .map_err(|e| Error::Raft(e.to_string()))?;
        match response.data {
            ReplicatorResponse::Appended { offset } => Ok(offset),
            ReplicatorResponse::Failed { message } => Err(Error::Raft(message)),
        }
    }

    /// Stale-tolerant read straight from the local log (spec §4.6, "Read").
    pub fn read(&self, offset: u64) -> Result<Record> {
        Ok(self.log.read(offset)?)
    }

    pub async fn get_leader(&self) -> Result<Option<(String, NodeId)>> {
        let metrics = self.raft.metrics().borrow().clone();
        let Some(leader_id) = metrics.current_leader else {
            return Ok(None);
        };
        let servers = self.servers.read().await;
        Ok(servers.get(&leader_id).map(|s| (s.rpc_addr.clone(), leader_id)))
    }

    pub async fn is_leader(&self) -> bool {
        matches!(self.get_leader().await, Ok(Some((_, id))) if id == self.node_id)
    }

    pub async fn get_servers(&self) -> Vec<ServerInfo> {
        let leader_id = self.raft.metrics().borrow().current_leader;
        let mut servers: Vec<ServerInfo> = self.servers.read().await.values().cloned().collect();
        if let Some(leader_id) = leader_id {
            for s in servers.iter_mut() {
                s.is_leader = self
                    .servers
                    .try_read()
                    .map(|m| m.get(&leader_id).map(|l| l.rpc_addr == s.rpc_addr).unwrap_or(false))
                    .unwrap_or(false);
            }
        }
        servers
    }

    /// Called by `Membership` when gossip reports a new peer (spec §4.7).
    pub async fn join(&self, node_id: NodeId, info: ServerInfo) -> Result<()> {
        self.raft
            .add_learner(node_id, BasicNode::new(info.rpc_addr.clone()), true)
            .await
            .map_err(|e| Error::Raft(e.to_string()))?;

        let mut members: std::collections::BTreeSet<NodeId> =
            self.raft.metrics().borrow().membership_config.voter_ids().collect();
        members.insert(node_id);
        self.raft
            .change_membership(members, false)
            .await
            .map_err(|e| Error::Raft(e.to_string()))?;

        self.servers.write().await.insert(node_id, info);
        Ok(())
    }

    /// Called by `Membership` when gossip reports a peer left (spec §4.7).
    /// Leaving on self triggers shutdown, handled one level up by `Agent`.
    pub async fn leave(&self, node_id: NodeId) -> Result<()> {
        let mut members: std::collections::BTreeSet<NodeId> =
            self.raft.metrics().borrow().membership_config.voter_ids().collect();
        members.remove(&node_id);
        if let Err(e) = self.raft.change_membership(members, false).await {
            warn!("leave({node_id}) could not update membership: {e}");
        }
        self.servers.write().await.remove(&node_id);
        Ok(())
    }

    pub async fn wait_for_leader(&self, wait: Duration) -> Result<NodeId> {
        let deadline = timeout(wait, async {
            loop {
                if let Some(id) = self.raft.metrics().borrow().current_leader {
                    return id;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        });
        deadline.await.map_err(|_| Error::LeaderTimeout)
    }

    /// Graceful shutdown: snapshot/flush via raft, then the log
    /// (spec §5, "Cancellation").
    pub async fn close(&self) -> Result<()> {
        self.raft
            .shutdown()
            .await
            .map_err(|e| Error::Raft(e.to_string()))?;
        self.fsm.snapshot().ok();
        self.log.close()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SegmentConfig;
    use tempfile::tempdir;

    fn cfg() -> SegmentConfig {
        SegmentConfig {
            max_store_bytes: 1 << 20,
            max_index_bytes: 1 << 20,
            initial_offset: 1,
        }
    }

    #[tokio::test]
    async fn single_node_bootstrap_becomes_leader_and_appends() {
        let data_dir = tempdir().unwrap();
        let raft_dir = data_dir.path().join("raft");
        std::fs::create_dir_all(&raft_dir).unwrap();
        let log = Arc::new(Log::new(&data_dir.path().join("log"), cfg()).unwrap());

        let replicator = Replicator::new(
            1,
            "0".to_string(),
            "127.0.0.1:0".to_string(),
            log,
            true,
            &raft_dir,
        )
        .await
        .unwrap();

        let leader = replicator.wait_for_leader(Duration::from_secs(5)).await.unwrap();
        assert_eq!(leader, 1);

        let offset = replicator
            .append(Record {
                value: b"foo".to_vec(),
                offset: 0,
                server: "0".into(),
            })
            .await
            .unwrap();
        assert_eq!(offset, 1); // initial_offset = 1 in replicated mode

        let read_back = replicator.read(offset).unwrap();
        assert_eq!(read_back.value, b"foo");
    }
}
