//! Leader/follower-aware call routing (spec §4.9, C9).
//!
//! `loadbalance/picker.go`'s `Picker.Pick` sends writes to the one
//! sub-connection tagged leader and round-robins reads across the rest
//! using an atomic counter. Since `tonic` has no `base.Picker` extension
//! point, `Picker` instead holds a live `watch::Receiver<ServerSet>` from
//! the `Resolver` and lazily dials/caches a `Channel` per address,
//! reproducing the same routing decision per call.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tonic::transport::Channel;

use crate::client::resolver::ServerSet;
use crate::error::{Error, Result};

/// Routes `write()` to the current leader and `read()` round-robin across
/// followers, falling back to the leader if there are none yet (mirrors
/// `picker.go`'s behavior before any follower has been discovered).
pub struct Picker {
    servers: watch::Receiver<ServerSet>,
    channels: Mutex<HashMap<String, Channel>>,
    round_robin: AtomicUsize,
}

impl Picker {
    pub fn new(servers: watch::Receiver<ServerSet>) -> Arc<Self> {
        Arc::new(Self {
            servers,
            channels: Mutex::new(HashMap::new()),
            round_robin: AtomicUsize::new(0),
        })
    }

    /// Channel to send a write RPC on (spec §4.9, "Write routing").
    pub async fn write_channel(&self) -> Result<Channel> {
        let set = self.servers.borrow().clone();
        let leader = set.leader().ok_or(Error::NoLeader)?;
        self.channel_for(&leader.rpc_addr).await
    }

    /// Channel to send a read RPC on: round-robins followers, or falls
    /// back to the leader when there are no followers yet (spec §4.9,
    /// "Read routing").
    pub async fn read_channel(&self) -> Result<Channel> {
        let set = self.servers.borrow().clone();
        let followers = set.followers();
        if followers.is_empty() {
            let leader = set.leader().ok_or(Error::NoLeader)?;
            return self.channel_for(&leader.rpc_addr).await;
        }
        let idx = self.round_robin.fetch_add(1, Ordering::Relaxed) % followers.len();
        self.channel_for(&followers[idx].rpc_addr).await
    }

    async fn channel_for(&self, addr: &str) -> Result<Channel> {
        let mut channels = self.channels.lock().await;
        if let Some(channel) = channels.get(addr) {
            return Ok(channel.clone());
        }
        let channel = Channel::from_shared(format!("http://{addr}"))
            .map_err(|e| Error::Config(e.to_string()))?
            .connect()
            .await?;
        channels.insert(addr.to_string(), channel.clone());
        Ok(channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replicator::ServerInfo;
    use tokio::sync::watch;

    fn server(addr: &str, is_leader: bool) -> ServerInfo {
        ServerInfo {
            node_name: addr.to_string(),
            rpc_addr: addr.to_string(),
            is_leader,
            latitude: 0.0,
            longitude: 0.0,
        }
    }

    #[tokio::test]
    async fn write_routes_to_leader_no_leader_errors() {
        let (_tx, rx) = watch::channel(ServerSet { servers: vec![] });
        let picker = Picker::new(rx);
        assert!(matches!(picker.write_channel().await, Err(Error::NoLeader)));
    }

    #[tokio::test]
    async fn read_round_robins_across_followers() {
        let (tx, rx) = watch::channel(ServerSet {
            servers: vec![server("l", true), server("f1", false), server("f2", false)],
        });
        let picker = Picker::new(rx);
        let _ = tx; // keep sender alive for the receiver's lifetime

        // We can't actually connect in a unit test (no listener), but the
        // round-robin index itself advances deterministically regardless
        // of connection success, so assert on that cheaply instead.
        let set = picker.servers.borrow().clone();
        let followers = set.followers();
        assert_eq!(followers.len(), 2);
        let first = picker.round_robin.fetch_add(1, std::sync::atomic::Ordering::Relaxed) % followers.len();
        let second = picker.round_robin.fetch_add(1, std::sync::atomic::Ordering::Relaxed) % followers.len();
        assert_ne!(first, second);
    }
}
