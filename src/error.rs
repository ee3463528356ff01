//! Crate-wide error types.
//!
//! Mirrors the teacher's flat, per-layer `Error` enum (this file, pre-rewrite)
//! but uses `thiserror` since several variants need distinct `Display` text
//! and `#[from]` conversions threaded through multiple layers.

use thiserror::Error;

/// Errors from the store/index/segment/log layer (spec §7: "I/O failures"
/// and "index exhaustion").
#[derive(Debug, Error)]
pub enum LogError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("record encode/decode failed: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("record encode failed: {0}")]
    Encode(#[from] prost::EncodeError),

    /// Not a fatal error: signals the active segment (or its index) is
    /// full and the log should roll to a new one.
    #[error("segment is full")]
    SegmentFull,

    /// Requested offset is outside `[lowest_offset, highest_offset]`.
    #[error("offset {offset} out of range [{lowest}, {highest}]")]
    OffsetOutOfRange {
        offset: u64,
        lowest: u64,
        highest: u64,
    },

    #[error("log is empty")]
    Empty,

    #[error("segment config invalid: {0}")]
    InvalidConfig(&'static str),

    #[error("corrupt on-disk state: {0}")]
    Corrupt(&'static str),
}

/// Errors surfaced by the RPC-facing layer (server, replicator, client).
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Log(#[from] LogError),

    #[error("permission denied: {subject} may not {action} {object}")]
    PermissionDenied {
        subject: String,
        object: String,
        action: String,
    },

    #[error("not the leader")]
    NotLeader,

    #[error("no leader elected yet")]
    NoLeader,

    #[error("timed out waiting for a leader")]
    LeaderTimeout,

    #[error("raft error: {0}")]
    Raft(String),

    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("rpc status: {0}")]
    Status(#[from] tonic::Status),

    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
pub type LogResult<T> = std::result::Result<T, LogError>;

impl From<Error> for tonic::Status {
    fn from(err: Error) -> Self {
        match err {
            Error::Log(LogError::OffsetOutOfRange { .. }) => {
                tonic::Status::out_of_range(err.to_string())
            }
            Error::PermissionDenied { .. } => tonic::Status::permission_denied(err.to_string()),
            Error::NotLeader => tonic::Status::failed_precondition(err.to_string()),
            Error::NoLeader => tonic::Status::unavailable(err.to_string()),
            Error::LeaderTimeout => tonic::Status::unavailable(err.to_string()),
            Error::Raft(_) => tonic::Status::unavailable(err.to_string()),
            Error::Status(status) => status,
            other => tonic::Status::internal(other.to_string()),
        }
    }
}
