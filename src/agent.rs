//! Wires storage, consensus, gossip and RPC into one running node (spec
//! §4, overview; C1–C10 composed).
//!
//! The Go source's `internal/agent.Agent` (referenced by `agent_test.go`;
//! `agent.go` itself was filtered from the retrieval pack, so this is
//! reconstructed from that test's expectations and `cmd/server-cli/main.go`)
//! owns exactly these pieces and the same startup order: open the log,
//! start the replicator, start membership gossip forwarding into it, then
//! serve RPC. Shutdown runs the same steps in reverse.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use futures_util::StreamExt as _;
use log::info;
use tokio::net::TcpListener;
use tonic::transport::{Identity, Server, ServerTlsConfig};

use crate::auth::{AllowAll, Authorizer, CsvAuthorizer};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::log::Log;
use crate::membership::{Membership, NodeIdentity};
use crate::pb::log_server::LogServer;
use crate::replicator::{Replicator, RAFT_MUX_TAG};
use crate::server::LogService;

/// A single running cluster member: the composition root for C1–C10.
pub struct Agent {
    pub replicator: Arc<Replicator>,
    pub membership: Arc<Membership>,
}

impl Agent {
    pub async fn start(config: Config) -> Result<Arc<Self>> {
        let data_dir = PathBuf::from(&config.raft.data_dir);
        let log = Arc::new(Log::new(&data_dir.join("log"), config.segment)?);

        let raft_dir = data_dir.join("raft");
        std::fs::create_dir_all(&raft_dir).map_err(crate::error::LogError::Io)?;

        let node_id = node_id_from_name(&config.raft.node_name);
        let rpc_addr = format!("{}:{}", config.raft.bind_addr, config.raft.rpc_port);

        let replicator = Replicator::new(
            node_id,
            config.raft.node_name.clone(),
            rpc_addr.clone(),
            log,
            config.raft.bootstrap,
            &raft_dir,
        )
        .await?;

        let gossip_addr: SocketAddr = format!("{}:{}", config.raft.bind_addr, config.raft.serf_port)
            .parse()
            .map_err(|e: std::net::AddrParseError| Error::Config(e.to_string()))?;
        let local_identity = NodeIdentity {
            addr: gossip_addr,
            node_id,
            rpc_addr: rpc_addr.clone(),
        };
        let start_join_addrs = match &config.raft.join_addr {
            Some(addr) => vec![addr
                .parse()
                .map_err(|e: std::net::AddrParseError| Error::Config(e.to_string()))?],
            None => Vec::new(),
        };
        let membership = Membership::start(
            local_identity,
            start_join_addrs,
            replicator.clone(),
            Default::default(),
        )
        .await?;

        let authorizer: Arc<dyn Authorizer> = if config.certs.acl_policy_file.is_empty() {
            Arc::new(AllowAll)
        } else {
            Arc::new(CsvAuthorizer::from_path(std::path::Path::new(
                &config.certs.acl_policy_file,
            ))?)
        };

        let rpc_listen_addr: SocketAddr = rpc_addr
            .parse()
            .map_err(|e: std::net::AddrParseError| Error::Config(e.to_string()))?;
        let tls = server_tls(&config)?;
        spawn_rpc_server(rpc_listen_addr, replicator.clone(), authorizer, tls)?;

        info!("agent {} listening for rpc on {rpc_addr}", config.raft.node_name);

        Ok(Arc::new(Self { replicator, membership }))
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.membership.leave();
        self.replicator.close().await
    }
}

fn node_id_from_name(name: &str) -> u64 {
    if let Ok(id) = name.parse::<u64>() {
        return id;
    }
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    name.hash(&mut hasher);
    hasher.finish()
}

fn server_tls(config: &Config) -> Result<Option<ServerTlsConfig>> {
    if config.certs.server_cert_file.is_empty() {
        return Ok(None);
    }
    let cert = std::fs::read(&config.certs.server_cert_file).map_err(crate::error::LogError::Io)?;
    let key = std::fs::read(&config.certs.server_key_file).map_err(crate::error::LogError::Io)?;
    Ok(Some(ServerTlsConfig::new().identity(Identity::from_pem(cert, key))))
}

/// Accept loop demultiplexing raft-tagged connections from ordinary gRPC
/// connections on one TCP port (spec §4.6, "Stream layer"). Peeks the
/// first byte rather than consuming it, so a connection that turns out to
/// be plain gRPC is forwarded to tonic untouched (see
/// `replicator::network::read_mux_tag`).
fn spawn_rpc_server(
    addr: SocketAddr,
    replicator: Arc<Replicator>,
    authorizer: Arc<dyn Authorizer>,
    tls: Option<ServerTlsConfig>,
) -> Result<()> {
    let (rpc_tx, rpc_rx) = tokio::sync::mpsc::unbounded_channel();
    let raft = replicator.raft.clone();

    tokio::spawn(async move {
        let listener = match TcpListener::bind(addr).await {
            Ok(l) => l,
            Err(e) => {
                log::error!("rpc listener bind({addr}) failed: {e}");
                return;
            }
        };
        loop {
            let (mut stream, peer) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    log::warn!("rpc accept failed: {e}");
                    continue;
                }
            };
            let raft = raft.clone();
            let rpc_tx = rpc_tx.clone();
            tokio::spawn(async move {
                match crate::replicator::network::read_mux_tag(&stream).await {
                    Ok(tag) if tag == RAFT_MUX_TAG => {
                        if let Err(e) = crate::replicator::network::consume_mux_tag(&mut stream).await {
                            log::debug!("dropping raft connection from {peer}: {e}");
                            return;
                        }
                        crate::replicator::network::handle_raft_connection(stream, raft).await;
                    }
                    Ok(_) => {
                        // Not a raft tag: the peeked byte is still unread on the
                        // socket, so the stream handed to tonic is byte-for-byte
                        // what the gRPC client wrote (its HTTP/2 preface included).
                        let _ = rpc_tx.send(stream);
                    }
                    Err(e) => {
                        log::debug!("dropping connection from {peer}: {e}");
                    }
                }
            });
        }
    });

    let service = LogService::new(replicator, authorizer);
    tokio::spawn(async move {
        let incoming = tokio_stream::wrappers::UnboundedReceiverStream::new(rpc_rx).map(Ok::<_, std::io::Error>);
        let mut builder = Server::builder();
        if let Some(tls) = tls {
            builder = match builder.tls_config(tls) {
                Ok(b) => b,
                Err(e) => {
                    log::error!("invalid TLS config: {e}");
                    return;
                }
            };
        }
        if let Err(e) = builder
            .add_service(LogServer::new(service))
            .serve_with_incoming(incoming)
            .await
        {
            log::error!("rpc server exited: {e}");
        }
    });

    Ok(())
}
