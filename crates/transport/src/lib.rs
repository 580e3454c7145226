// crates/transport/src/lib.rs
//! Concrete transports for the blockml bridge.
//!
//! Two bindings of the same protocol:
//!
//! - [`ChannelTransport`] models the postMessage boundary of an in-process
//!   extension host: commands and events cross as serialized messages on a
//!   shared channel that also carries unrelated traffic.
//! - [`HttpTransport`] binds to the legacy classifier endpoints: GET
//!   classify with `If-Modified-Since` conditional revalidation, GET
//!   status, POST store/train.
//!
//! Both feed host responses into the bridge's inbound channel; correlation
//! lives in `blockml-bridge`, not here.

pub mod channel;
pub mod http;

pub use channel::{ChannelTransport, HostChannel};
pub use http::{EndpointConfig, HttpTransport};
