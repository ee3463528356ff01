//! A distributed, Raft-replicated, append-only commit log.
//!
//! Layered bottom-up: [`store`]/[`index`]/[`segment`]/[`log`] persist
//! records to disk; [`fsm`] applies committed consensus entries to a
//! [`log::Log`]; [`replicator`] drives consensus over the FSM; [`membership`]
//! gossips cluster membership into the replicator; [`server`] exposes it
//! all over gRPC; [`client`] resolves and routes calls from the caller's
//! side; [`agent`] composes one running node out of all of the above.

pub mod agent;
pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod fsm;
pub mod index;
pub mod log;
pub mod membership;
pub mod record;
pub mod replicator;
pub mod segment;
pub mod server;
pub mod store;

pub mod pb {
    tonic::include_proto!("log.v1");
}

pub use error::{Error, Result};
