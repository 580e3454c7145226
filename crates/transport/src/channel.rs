// crates/transport/src/channel.rs
//! postMessage-style transport: serialized messages over shared channels.
//!
//! The real extension host delivers structured-clone messages through a
//! single global listener per sandbox. Here both directions are
//! JSON-serialized strings over mpsc channels, which keeps the same
//! property the bridge has to tolerate: the channel is shared, so inbound
//! traffic may belong to other models or other protocols entirely. Anything
//! that does not decode as one of our events is dropped with a debug log.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use blockml_bridge::{InboundSender, Transport, TransportError};
use blockml_types::{Envelope, HostEvent, SandboxCommand};

/// The host-side ends of the channel pair, for wiring up an extension host
/// (or a scripted one in tests).
pub struct HostChannel {
    /// Commands arriving from the sandbox, JSON-encoded.
    pub from_sandbox: mpsc::UnboundedReceiver<String>,
    /// Events to push back into the sandbox, JSON-encoded.
    pub to_sandbox: mpsc::UnboundedSender<String>,
}

pub struct ChannelTransport {
    outbound: mpsc::UnboundedSender<String>,
}

impl ChannelTransport {
    /// Create the transport and its host-side endpoints. Host messages are
    /// decoded on a background task and forwarded to the bridge's inbound
    /// channel.
    pub fn new(inbound: InboundSender) -> (Self, HostChannel) {
        let (outbound, from_sandbox) = mpsc::unbounded_channel();
        let (to_sandbox, mut host_messages) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            while let Some(raw) = host_messages.recv().await {
                match Envelope::<HostEvent>::from_json(&raw) {
                    Ok(envelope) => {
                        if inbound.send(envelope).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!(error = %e, "ignoring unrecognized message on shared channel")
                    }
                }
            }
        });

        (
            Self { outbound },
            HostChannel {
                from_sandbox,
                to_sandbox,
            },
        )
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn deliver(&self, envelope: Envelope<SandboxCommand>) -> Result<(), TransportError> {
        let raw = envelope.to_json()?;
        self.outbound
            .send(raw)
            .map_err(|_| TransportError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockml_bridge::inbound_channel;
    use blockml_types::ClassifyInput;

    #[tokio::test]
    async fn commands_reach_the_host_as_json() {
        let (inbound_tx, _inbound_rx) = inbound_channel();
        let (transport, mut host) = ChannelTransport::new(inbound_tx);

        transport
            .deliver(Envelope::new(
                "model-a",
                SandboxCommand::Classify {
                    requestid: 1,
                    input: ClassifyInput::Text("hello".into()),
                    last_modified: None,
                },
            ))
            .await
            .unwrap();

        let raw = host.from_sandbox.recv().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["model"], "model-a");
        assert_eq!(value["command"], "classify");
    }

    #[tokio::test]
    async fn host_events_are_decoded_and_forwarded() {
        let (inbound_tx, mut inbound_rx) = inbound_channel();
        let (_transport, host) = ChannelTransport::new(inbound_tx);

        host.to_sandbox
            .send(r#"{"model":"model-a","command":"modelready"}"#.to_string())
            .unwrap();

        let envelope = inbound_rx.recv().await.unwrap();
        assert_eq!(envelope.model, "model-a");
        assert_eq!(envelope.body, HostEvent::ModelReady);
    }

    #[tokio::test]
    async fn foreign_traffic_on_the_channel_is_dropped() {
        let (inbound_tx, mut inbound_rx) = inbound_channel();
        let (_transport, host) = ChannelTransport::new(inbound_tx);

        // Another extension's message and plain junk share the channel.
        host.to_sandbox
            .send(r#"{"othertool":{"command":"ping"}}"#.to_string())
            .unwrap();
        host.to_sandbox.send("not even json".to_string()).unwrap();
        host.to_sandbox
            .send(r#"{"model":"model-a","command":"modelinit"}"#.to_string())
            .unwrap();

        // Only the recognizable event comes through.
        let envelope = inbound_rx.recv().await.unwrap();
        assert_eq!(envelope.body, HostEvent::ModelInit);
        assert!(inbound_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn delivery_fails_once_the_host_is_gone() {
        let (inbound_tx, _inbound_rx) = inbound_channel();
        let (transport, host) = ChannelTransport::new(inbound_tx);
        drop(host);

        let result = transport
            .deliver(Envelope::new("model-a", SandboxCommand::Init))
            .await;
        assert!(matches!(result, Err(TransportError::Closed)));
    }
}
