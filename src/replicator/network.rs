//! Raft RPC transport, multiplexed onto the same TCP port as the gRPC
//! server (spec §4.6, "Stream layer").
//!
//! `examples/original_source`'s `config.go` wires a `raft.StreamLayer`
//! backed by a `cmux`-style listener so raft's `AppendEntries`/`Vote`
//! traffic and the gRPC service share one port. `cmux` works by *sniffing*
//! the connection's first bytes without consuming them, then routing based
//! on what it saw; `read_mux_tag` does the same with `TcpStream::peek` —
//! raft connections write `RAFT_MUX_TAG` as their first byte and nothing
//! else does (an HTTP/2 client preface starts with `P`), so a peeked tag
//! that doesn't match is left on the socket untouched and the *original*
//! stream, byte-for-byte intact, is handed to tonic via
//! `serve_with_incoming` — see `agent.rs`.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use openraft::error::{InstallSnapshotError, NetworkError, RPCError, RaftError, Unreachable};
use openraft::network::{RaftNetwork, RaftNetworkFactory};
use openraft::raft::{
    AppendEntriesRequest, AppendEntriesResponse, InstallSnapshotRequest, InstallSnapshotResponse,
    VoteRequest, VoteResponse,
};
use openraft::BasicNode;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::replicator::{NodeId, TypeConfig, RAFT_MUX_TAG};

/// Peek (not consume) the connection's first byte; `peek` awaits
/// readability itself, so this returns as soon as the peer has written
/// anything. A peeked length of `0` means the peer closed before sending a
/// byte.
pub async fn read_mux_tag(stream: &TcpStream) -> io::Result<u8> {
    let mut byte = [0u8; 1];
    match stream.peek(&mut byte).await? {
        0 => Err(io::Error::new(io::ErrorKind::UnexpectedEof, "peer closed before sending any bytes")),
        _ => Ok(byte[0]),
    }
}

/// Consume the one raft mux tag byte a peeked `RAFT_MUX_TAG` already
/// confirmed is sitting at the front of the stream.
pub async fn consume_mux_tag(stream: &mut TcpStream) -> io::Result<()> {
    let mut byte = [0u8; 1];
    stream.read_exact(&mut byte).await?;
    Ok(())
}

async fn write_framed(stream: &mut TcpStream, payload: &[u8]) -> io::Result<()> {
    stream.write_u32(payload.len() as u32).await?;
    stream.write_all(payload).await?;
    stream.flush().await
}

async fn read_framed(stream: &mut TcpStream) -> io::Result<Vec<u8>> {
    let len = stream.read_u32().await? as usize;
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;
    Ok(buf)
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
enum RaftRpc {
    AppendEntries(AppendEntriesRequest<TypeConfig>),
    Vote(VoteRequest<NodeId>),
    InstallSnapshot(InstallSnapshotRequest<TypeConfig>),
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
enum RaftRpcResponse {
    AppendEntries(AppendEntriesResponse<NodeId>),
    Vote(VoteResponse<NodeId>),
    InstallSnapshot(InstallSnapshotResponse<NodeId>),
}

/// `RaftNetworkFactory` impl: dials a fresh connection per target node per
/// call, writes the mux tag, then a length-prefixed bincode request.
#[derive(Default, Clone)]
pub struct Network;

impl RaftNetworkFactory<TypeConfig> for Network {
    type Network = PeerConnection;

    async fn new_client(&mut self, _target: NodeId, node: &BasicNode) -> Self::Network {
        PeerConnection {
            addr: node.addr.clone(),
        }
    }
}

pub struct PeerConnection {
    addr: String,
}

impl PeerConnection {
    async fn call(&self, rpc: RaftRpc) -> Result<RaftRpcResponse, io::Error> {
        let mut stream = tokio::time::timeout(Duration::from_secs(5), TcpStream::connect(&self.addr))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??;
        stream.write_u8(RAFT_MUX_TAG).await?;

        let request = bincode::serialize(&rpc).expect("RaftRpc always serializes");
        write_framed(&mut stream, &request).await?;

        let response = read_framed(&mut stream).await?;
        bincode::deserialize(&response)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))
    }
}

impl RaftNetwork<TypeConfig> for PeerConnection {
    async fn append_entries(
        &mut self,
        rpc: AppendEntriesRequest<TypeConfig>,
        _option: openraft::network::RPCOption,
    ) -> Result<AppendEntriesResponse<NodeId>, RPCError<NodeId, BasicNode, RaftError<NodeId>>> {
        match self.call(RaftRpc::AppendEntries(rpc)).await {
            Ok(RaftRpcResponse::AppendEntries(resp)) => Ok(resp),
            Ok(_) => unreachable!("server always answers the RPC kind it was sent"),
            Err(e) => Err(RPCError::Unreachable(Unreachable::new(&e))),
        }
    }

    async fn install_snapshot(
        &mut self,
        rpc: InstallSnapshotRequest<TypeConfig>,
        _option: openraft::network::RPCOption,
    ) -> Result<
        InstallSnapshotResponse<NodeId>,
        RPCError<NodeId, BasicNode, RaftError<NodeId, InstallSnapshotError>>,
    > {
        match self.call(RaftRpc::InstallSnapshot(rpc)).await {
            Ok(RaftRpcResponse::InstallSnapshot(resp)) => Ok(resp),
            Ok(_) => unreachable!("server always answers the RPC kind it was sent"),
            Err(e) => Err(RPCError::Unreachable(Unreachable::new(&e))),
        }
    }

    async fn vote(
        &mut self,
        rpc: VoteRequest<NodeId>,
        _option: openraft::network::RPCOption,
    ) -> Result<VoteResponse<NodeId>, RPCError<NodeId, BasicNode, RaftError<NodeId>>> {
        match self.call(RaftRpc::Vote(rpc)).await {
            Ok(RaftRpcResponse::Vote(resp)) => Ok(resp),
            Ok(_) => unreachable!("server always answers the RPC kind it was sent"),
            Err(e) => Err(RPCError::Unreachable(Unreachable::new(&e))),
        }
    }
}

/// Server side of one already-tagged raft connection: read one framed
/// request, dispatch to `raft`, write the framed response, repeat until
/// the peer disconnects. Spawned per accepted raft-tagged connection by
/// `agent::serve_mux_listener`.
pub async fn handle_raft_connection(mut stream: TcpStream, raft: openraft::Raft<TypeConfig>) {
    loop {
        let request = match read_framed(&mut stream).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return,
            Err(e) => {
                log::warn!("raft connection read failed: {e}");
                return;
            }
        };
        let rpc: RaftRpc = match bincode::deserialize(&request) {
            Ok(rpc) => rpc,
            Err(e) => {
                log::warn!("raft connection sent an undecodable frame: {e}");
                return;
            }
        };

        let response = match rpc {
            RaftRpc::AppendEntries(req) => raft
                .append_entries(req)
                .await
                .map(RaftRpcResponse::AppendEntries)
                .map_err(|e| e.to_string()),
            RaftRpc::Vote(req) => raft
                .vote(req)
                .await
                .map(RaftRpcResponse::Vote)
                .map_err(|e| e.to_string()),
            RaftRpc::InstallSnapshot(req) => raft
                .install_snapshot(req)
                .await
                .map(RaftRpcResponse::InstallSnapshot)
                .map_err(|e| e.to_string()),
        };

        let encoded = match response {
            Ok(resp) => bincode::serialize(&resp).expect("RaftRpcResponse always serializes"),
            Err(e) => {
                log::warn!("raft rpc handler error: {e}");
                return;
            }
        };

        if write_framed(&mut stream, &encoded).await.is_err() {
            return;
        }
    }
}

#[allow(dead_code)]
fn type_witness(_: Arc<Network>) {}
