//! SWIM gossip membership (spec §4.7, C7).
//!
//! The Go source layers `hashicorp/serf` (itself SWIM) over `memberlist`,
//! and forwards `serf.Event`s (`EventMemberJoin`/`EventMemberLeave`) into
//! the consensus layer's `Join`/`Leave` (`examples/original_source/src/
//! distributedLog/membership.go`). `foca` is the idiomatic pure-Rust SWIM
//! implementation; this module plays the same "translate gossip events
//! into replicator membership calls" role, deliberately kept separate
//! from the strongly-consistent `Replicator` (spec §9: gossip convergence
//! is eventually consistent, consensus is not — conflating them was a
//! named pitfall).

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use foca::{BincodeCodec, Config as FocaConfig, Foca, Identity, Notification, Runtime, Timer};
use log::{info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::replicator::{NodeId, Replicator, ServerInfo};

/// A gossip member's identity: `foca` requires `Identity: Eq + Hash + Clone`
/// plus a way to distinguish "renewed" incarnations of the same address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeIdentity {
    pub addr: SocketAddr,
    pub node_id: NodeId,
    pub rpc_addr: String,
}

impl Identity for NodeIdentity {
    type Addr = SocketAddr;

    fn addr(&self) -> SocketAddr {
        self.addr
    }

    fn renew(&self) -> Option<Self> {
        Some(self.clone())
    }
}

enum MembershipEvent {
    Joined(NodeIdentity),
    Left(NodeIdentity),
}

/// Owns the `foca` state machine and its UDP socket, driving gossip on a
/// background task and forwarding membership deltas to the `Replicator`
/// (spec §4.7, "Event forwarding").
pub struct Membership {
    local: NodeIdentity,
    socket: Arc<UdpSocket>,
    command_tx: mpsc::UnboundedSender<Command>,
}

enum Command {
    Announce(NodeIdentity),
    Stop,
}

impl Membership {
    /// Bind the gossip socket and spawn the driving task. `start_join_addrs`
    /// mirrors `Config.StartJoinAddrs` — peers to announce to at startup so
    /// this node is discovered by the existing cluster.
    pub async fn start(
        local: NodeIdentity,
        start_join_addrs: Vec<SocketAddr>,
        replicator: Arc<Replicator>,
        seen_join_addrs: HashSet<SocketAddr>,
    ) -> Result<Arc<Self>> {
        let socket = Arc::new(UdpSocket::bind(local.addr).await.map_err(crate::error::LogError::Io)?);
        let (command_tx, mut command_rx) = mpsc::unbounded_channel();
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();

        let rng = StdRng::from_entropy();
        let config = FocaConfig::new_lan(
            std::num::NonZeroU32::new(1).expect("1 is nonzero"),
        );
        let mut foca = Foca::new(local.clone(), config, rng, BincodeCodec(bincode::DefaultOptions::new()));

        let recv_socket = socket.clone();
        let local_for_task = local.clone();
        let (timer_tx, mut timer_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut runtime = ChannelRuntime {
                socket: recv_socket.clone(),
                event_tx: event_tx.clone(),
                timer_tx: timer_tx.clone(),
            };
            let mut buf = vec![0u8; 65536];

            for addr in start_join_addrs {
                if addr == local_for_task.addr {
                    continue;
                }
                let announce = NodeIdentity {
                    addr,
                    node_id: 0,
                    rpc_addr: String::new(),
                };
                if let Err(e) = foca.announce(announce, &mut runtime) {
                    warn!("foca announce to {addr} failed: {e}");
                }
            }

            loop {
                tokio::select! {
                    recv = recv_socket.recv_from(&mut buf) => {
                        let Ok((n, _from)) = recv else { continue };
                        if let Err(e) = foca.handle_data(&buf[..n], &mut runtime) {
                            warn!("foca handle_data failed: {e}");
                        }
                    }
                    timer = timer_rx.recv() => {
                        let Some(timer) = timer else { break };
                        if let Err(e) = foca.handle_timer(timer, &mut runtime) {
                            warn!("foca handle_timer failed: {e}");
                        }
                    }
                    cmd = command_rx.recv() => {
                        match cmd {
                            Some(Command::Announce(identity)) => {
                                if let Err(e) = foca.announce(identity, &mut runtime) {
                                    warn!("foca announce failed: {e}");
                                }
                            }
                            Some(Command::Stop) | None => break,
                        }
                    }
                }
            }
        });

        let _ = seen_join_addrs;

        let replicator_for_events = replicator.clone();
        let local_name = local.node_id;
        tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                match event {
                    MembershipEvent::Joined(identity) if identity.node_id != local_name => {
                        info!("gossip observed join: node {}", identity.node_id);
                        let info = ServerInfo {
                            node_name: identity.node_id.to_string(),
                            rpc_addr: identity.rpc_addr.clone(),
                            is_leader: false,
                            latitude: 0.0,
                            longitude: 0.0,
                        };
                        if let Err(e) = replicator_for_events.join(identity.node_id, info).await {
                            warn!("forwarding join({}) to replicator failed: {e}", identity.node_id);
                        }
                    }
                    MembershipEvent::Left(identity) if identity.node_id != local_name => {
                        info!("gossip observed leave: node {}", identity.node_id);
                        if let Err(e) = replicator_for_events.leave(identity.node_id).await {
                            warn!("forwarding leave({}) to replicator failed: {e}", identity.node_id);
                        }
                    }
                    _ => {}
                }
            }
        });

        Ok(Arc::new(Self { local, socket, command_tx }))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local.addr
    }

    pub fn announce(&self, identity: NodeIdentity) {
        let _ = self.command_tx.send(Command::Announce(identity));
    }

    pub fn leave(&self) {
        let _ = self.command_tx.send(Command::Stop);
    }
}

/// Bridges `foca::Runtime` callbacks to our UDP socket and membership
/// event channel — `foca` is transport-agnostic, so every embedder writes
/// one of these (the crate's own examples do the same with a plain
/// `UdpSocket`).
///
/// `submit_after` schedules a `tokio::time::sleep` that redelivers the timer
/// through `timer_tx` into the driving task's select loop, which calls back
/// into `Foca::handle_timer` — otherwise `foca`'s probe/suspicion timeouts
/// are silently dropped and members never transition to `Down`.
struct ChannelRuntime {
    socket: Arc<UdpSocket>,
    event_tx: mpsc::UnboundedSender<MembershipEvent>,
    timer_tx: mpsc::UnboundedSender<Timer<NodeIdentity>>,
}

impl Runtime<NodeIdentity> for ChannelRuntime {
    fn notify(&mut self, notification: Notification<NodeIdentity>) {
        match notification {
            Notification::MemberUp(identity) => {
                let _ = self.event_tx.send(MembershipEvent::Joined(identity));
            }
            Notification::MemberDown(identity) => {
                let _ = self.event_tx.send(MembershipEvent::Left(identity));
            }
            _ => {}
        }
    }

    fn send_to(&mut self, to: NodeIdentity, data: &[u8]) {
        let socket = self.socket.clone();
        let payload = data.to_vec();
        tokio::spawn(async move {
            if let Err(e) = socket.send_to(&payload, to.addr).await {
                warn!("gossip send to {} failed: {e}", to.addr);
            }
        });
    }

    fn submit_after(&mut self, event: Timer<NodeIdentity>, after: Duration) {
        let timer_tx = self.timer_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = timer_tx.send(event);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_renews_to_an_equal_clone() {
        let id = NodeIdentity {
            addr: "127.0.0.1:9000".parse().unwrap(),
            node_id: 1,
            rpc_addr: "127.0.0.1:8000".to_string(),
        };
        assert_eq!(id.renew(), Some(id));
    }
}
