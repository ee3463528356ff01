//! Cluster membership resolver (spec §4.8, C8).
//!
//! Mirrors `loadbalance/resolver.go`'s `Resolver`: on start it dials any
//! one known server, calls `GetServers`, and republishes the result on an
//! interval (`ResolveNow`/periodic re-resolve in the Go source is a single
//! ticker loop here too). Consumers (the `Picker`) read the latest
//! `ServerSet` through a `watch` channel rather than grpc-go's
//! `resolver.ClientConn.UpdateState` callback.

use std::time::Duration;

use log::{debug, warn};
use tokio::sync::watch;
use tonic::transport::Channel;

use crate::error::{Error, Result};
use crate::pb::log_client::LogClient;
use crate::pb::GetServersRequest;
use crate::replicator::ServerInfo;

/// The latest known cluster membership, as seen by `GetServers`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerSet {
    pub servers: Vec<ServerInfo>,
}

impl ServerSet {
    pub fn leader(&self) -> Option<&ServerInfo> {
        self.servers.iter().find(|s| s.is_leader)
    }

    pub fn followers(&self) -> Vec<&ServerInfo> {
        self.servers.iter().filter(|s| !s.is_leader).collect()
    }
}

/// Polls one of the cluster's servers for `GetServers` and republishes the
/// result (spec §4.8, "Resolution interval").
pub struct Resolver {
    tx: watch::Sender<ServerSet>,
}

impl Resolver {
    /// Spawn the polling task against `seed_addr` (any known node — the
    /// Go source dials whichever address the client was configured with)
    /// and return a handle plus a receiver the `Picker` subscribes to.
    pub fn start(seed_addr: String, interval: Duration) -> (Self, watch::Receiver<ServerSet>) {
        let (tx, rx) = watch::channel(ServerSet::default());
        let tx_task = tx.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                match resolve_once(&seed_addr).await {
                    Ok(set) => {
                        debug!("resolver updated: {} server(s)", set.servers.len());
                        let _ = tx_task.send(set);
                    }
                    Err(e) => warn!("resolve against {seed_addr} failed: {e}"),
                }
            }
        });

        (Self { tx }, rx)
    }

    /// Force an immediate re-resolve — the analogue of grpc-go's
    /// `resolver.ClientConn.ResolveNow`, used after a write fails with
    /// `NotLeader` so the picker doesn't keep hammering a stale leader.
    pub fn resolve_now(&self, set: ServerSet) {
        let _ = self.tx.send(set);
    }
}

async fn resolve_once(addr: &str) -> Result<ServerSet> {
    let channel = Channel::from_shared(format!("http://{addr}"))
        .map_err(|e| Error::Config(e.to_string()))?
        .connect()
        .await?;
    let mut client = LogClient::new(channel);
    let response = client.get_servers(GetServersRequest {}).await?;
    let servers = response
        .into_inner()
        .servers
        .into_iter()
        .map(|s| ServerInfo {
            node_name: s.node_name,
            rpc_addr: s.rpc_addr,
            is_leader: s.is_leader,
            latitude: s.latitude,
            longitude: s.longitude,
        })
        .collect();
    Ok(ServerSet { servers })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leader_and_followers_partition_the_set() {
        let set = ServerSet {
            servers: vec![
                ServerInfo {
                    node_name: "0".into(),
                    rpc_addr: "a".into(),
                    is_leader: true,
                    latitude: 0.0,
                    longitude: 0.0,
                },
                ServerInfo {
                    node_name: "1".into(),
                    rpc_addr: "b".into(),
                    is_leader: false,
                    latitude: 0.0,
                    longitude: 0.0,
                },
            ],
        };
        assert_eq!(set.leader().unwrap().rpc_addr, "a");
        assert_eq!(set.followers().len(), 1);
    }
}
