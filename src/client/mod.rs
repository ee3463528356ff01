//! Leader-aware client (spec §4.8–4.9, C8/C9): discovers cluster servers
//! through `GetServers` and routes writes to the leader, reads round-robin
//! across followers.
//!
//! grpc-go exposes this as a custom `resolver.Builder` + `base.PickerBuilder`
//! pair registered under a private URL scheme
//! (`examples/original_source/src/loadbalance/resolver.go`,
//! `picker.go`). `tonic`'s client stack has no equivalent resolver/picker
//! extension point, so the same behavior is rebuilt directly: `Resolver`
//! polls `GetServers` and republishes the address list; `Picker` holds
//! that list and chooses a `tonic::transport::Channel` per call.

pub mod picker;
pub mod resolver;

pub use picker::Picker;
pub use resolver::{Resolver, ServerSet};
