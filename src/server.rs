//! gRPC service implementation (spec §4.10, C10): `Write`/`Read`/
//! `WriteStream`/`ReadStream`/`GetServers`, with authorization and
//! leader-forwarding.
//!
//! Grounded in `examples/original_source/src/server/server.go`: every RPC
//! first extracts the caller's identity (there, the TLS client cert's
//! Subject CN; here via `x509-parser` over `tonic`'s `peer_certs()`), asks
//! the `Authorizer` oracle, and only then touches the replicator. `Write`
//! on a non-leader forwards to the leader rather than failing, matching
//! `server.go`'s `produce` handler when `s.Config.DistributedLog.GetLeader`
//! disagrees with the local node.

use std::pin::Pin;
use std::sync::Arc;

use futures_core::Stream;
use log::debug;
use tonic::{Request, Response, Status, Streaming};

use crate::auth::Authorizer;
use crate::error::Error;
use crate::pb::log_client::LogClient;
use crate::pb::log_server::Log;
use crate::pb::{
    GetServersRequest, GetServersResponse, ReadRequest, ReadResponse, Record, ServerInfo,
    WriteRequest, WriteResponse,
};
use crate::replicator::Replicator;

const OBJECT: &str = "*";
const ACTION_WRITE: &str = "write";
const ACTION_READ: &str = "read";

pub struct LogService {
    replicator: Arc<Replicator>,
    authorizer: Arc<dyn Authorizer>,
}

impl LogService {
    pub fn new(replicator: Arc<Replicator>, authorizer: Arc<dyn Authorizer>) -> Self {
        Self { replicator, authorizer }
    }

    fn subject_of<T>(request: &Request<T>) -> String {
        request
            .peer_certs()
            .and_then(|certs| certs.first().cloned())
            .and_then(|cert| subject_cn(cert.as_ref()))
            .unwrap_or_else(|| "anonymous".to_string())
    }

    async fn forward_write(&self, record: Record) -> Result<WriteResponse, Error> {
        let (leader_addr, _) = self.replicator.get_leader().await?.ok_or(Error::NoLeader)?;
        let channel = tonic::transport::Channel::from_shared(format!("http://{leader_addr}"))
            .map_err(|e| Error::Config(e.to_string()))?
            .connect()
            .await?;
        let mut client = LogClient::new(channel);
        let response = client.write(WriteRequest { record: Some(record) }).await?;
        Ok(response.into_inner())
    }
}

/// Pull the Subject Common Name out of a DER-encoded client certificate
/// (spec §4.10, "Authorization subject").
fn subject_cn(der: &[u8]) -> Option<String> {
    let (_, cert) = x509_parser::parse_x509_certificate(der).ok()?;
    cert.subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_string)
}

#[tonic::async_trait]
impl Log for LogService {
    async fn write(&self, request: Request<WriteRequest>) -> Result<Response<WriteResponse>, Status> {
        let subject = Self::subject_of(&request);
        self.authorizer
            .authorize(&subject, OBJECT, ACTION_WRITE)
            .map_err(Status::from)?;

        let mut record = request
            .into_inner()
            .record
            .ok_or_else(|| Status::invalid_argument("missing record"))?;

        if self.replicator.is_leader().await {
            // Stamp the origin before proposing: the committed entry carries
            // this `server` value to every replica, so a follower's
            // `ReadStream` can tell which node a record originated from
            // (spec §3 "ServerInfo"/§4.10 dedup) without re-deriving it.
            record.server = self.replicator.node_name.clone();
            let offset = self.replicator.append(record).await.map_err(Status::from)?;
            return Ok(Response::new(WriteResponse { offset }));
        }

        debug!("forwarding write from {subject} to the leader");
        let response = self.forward_write(record).await.map_err(Status::from)?;
        Ok(Response::new(response))
    }

    async fn read(&self, request: Request<ReadRequest>) -> Result<Response<ReadResponse>, Status> {
        let subject = Self::subject_of(&request);
        self.authorizer
            .authorize(&subject, OBJECT, ACTION_READ)
            .map_err(Status::from)?;

        let offset = request.into_inner().offset;
        let record = self.replicator.read(offset).map_err(Status::from)?;
        Ok(Response::new(ReadResponse { record: Some(record) }))
    }

    type WriteStreamStream =
        Pin<Box<dyn Stream<Item = Result<WriteResponse, Status>> + Send + 'static>>;

    async fn write_stream(
        &self,
        request: Request<Streaming<WriteRequest>>,
    ) -> Result<Response<Self::WriteStreamStream>, Status> {
        let subject = Self::subject_of(&request);
        self.authorizer
            .authorize(&subject, OBJECT, ACTION_WRITE)
            .map_err(Status::from)?;

        let replicator = self.replicator.clone();
        let node_name = self.replicator.node_name.clone();
        let mut inbound = request.into_inner();

        let output = async_stream::try_stream! {
            while let Some(write_request) = inbound.message().await? {
                let Some(mut record) = write_request.record else {
                    Err(Status::invalid_argument("missing record"))?;
                    continue;
                };
                let offset = if replicator.is_leader().await {
                    record.server = node_name.clone();
                    replicator.append(record).await.map_err(Status::from)?
                } else {
                    return Err(Status::failed_precondition("write stream requires connecting to the leader"))?;
                };
                yield WriteResponse { offset };
            }
        };

        Ok(Response::new(Box::pin(output)))
    }

    type ReadStreamStream = Pin<Box<dyn Stream<Item = Result<ReadResponse, Status>> + Send + 'static>>;

    async fn read_stream(
        &self,
        request: Request<ReadRequest>,
    ) -> Result<Response<Self::ReadStreamStream>, Status> {
        let subject = Self::subject_of(&request);
        self.authorizer
            .authorize(&subject, OBJECT, ACTION_READ)
            .map_err(Status::from)?;

        let replicator = self.replicator.clone();
        let node_name = self.replicator.node_name.clone();
        let mut next_offset = request.into_inner().offset;

        // Spec §4.10/§7: `OffsetOutOfRange` means "not committed yet" and is
        // a busy-retry signal, not a fault — every other error (decode,
        // corrupt store, I/O) terminates the stream. Records are filtered
        // to this node's own origin so that several follower streams
        // forwarding the same replicated entry don't each redeliver it.
        let output = async_stream::try_stream! {
            loop {
                match replicator.read(next_offset) {
                    Ok(record) => {
                        next_offset += 1;
                        if record.server == node_name {
                            yield ReadResponse { record: Some(record) };
                        }
                    }
                    Err(Error::Log(crate::error::LogError::OffsetOutOfRange { .. })) => {
                        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                    }
                    Err(e) => {
                        Err(Status::from(e))?;
                    }
                }
            }
        };

        Ok(Response::new(Box::pin(output)))
    }

    async fn get_servers(
        &self,
        _request: Request<GetServersRequest>,
    ) -> Result<Response<GetServersResponse>, Status> {
        let servers = self
            .replicator
            .get_servers()
            .await
            .into_iter()
            .map(|s| ServerInfo {
                node_name: s.node_name,
                rpc_addr: s.rpc_addr,
                is_leader: s.is_leader,
                latitude: s.latitude,
                longitude: s.longitude,
            })
            .collect();
        Ok(Response::new(GetServersResponse { servers }))
    }
}

