// crates/bridge/src/transport.rs
//! The transport seam between the bridge and a concrete message channel.
//!
//! Two very different channels carry the same protocol: a postMessage-style
//! structured-clone boundary and the legacy HTTP/JSONP endpoints. The bridge
//! only ever sees this trait; correlation, caching, and state tracking are
//! written once on top of it.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use blockml_types::{Envelope, HostEvent, SandboxCommand};

/// Errors raised by a transport while shipping a command out of the sandbox.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("classifier service unreachable: {0}")]
    Unreachable(String),

    #[error("project already has the maximum allowed amount of training data")]
    TrainingLimit,

    #[error("command not supported by this transport")]
    Unsupported,

    #[error("transport channel closed")]
    Closed,

    #[error("failed to encode message: {0}")]
    Encode(#[from] blockml_types::commands::WireError),
}

/// One direction of the bridge protocol: sandbox -> host.
///
/// Responses travel the other way on the inbound channel the adapter was
/// constructed with; the bridge correlates them by request id, never by
/// `deliver` returning. How much work `deliver` does before completing is
/// the adapter's business: the channel adapter returns once the command is
/// on the channel, the HTTP adapter only after the exchange finished and
/// the response was pushed inbound. Either way the caller's request
/// deadline bounds the whole delivery.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn deliver(&self, envelope: Envelope<SandboxCommand>) -> Result<(), TransportError>;
}

/// The host->sandbox side of the protocol, handed to adapters at
/// construction so they can feed responses back to the bridge.
pub type InboundSender = mpsc::UnboundedSender<Envelope<HostEvent>>;
pub type InboundReceiver = mpsc::UnboundedReceiver<Envelope<HostEvent>>;

/// Create the inbound event channel shared by a transport and its bridge.
pub fn inbound_channel() -> (InboundSender, InboundReceiver) {
    mpsc::unbounded_channel()
}
