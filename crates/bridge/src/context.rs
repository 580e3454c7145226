// crates/bridge/src/context.rs
//! Request/response correlation for one loaded classifier.
//!
//! The context owns all per-classifier state: the request-id counter, the
//! pending-callback map, the result cache, and the model state. One context
//! exists per loaded model, so two models in the same session can never
//! cross-resolve each other's callbacks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{broadcast, oneshot};
use tokio::time::timeout;
use tracing::{debug, warn};

use blockml_types::{Envelope, HostEvent, SandboxCommand};

use crate::cache::ResultCache;
use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::model_state::ModelState;
use crate::transport::{InboundReceiver, Transport, TransportError};

/// A sound recognized by the host while the sandbox is listening.
#[derive(Debug, Clone, PartialEq)]
pub struct Recognition {
    pub label: String,
    pub confidence: f64,
}

/// Model lifecycle events fanned out to interested parties (the classifier
/// facade auto-trains on `ModelInit`, for instance).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    ModelInit,
    ModelReady,
    ModelFailed,
}

pub struct BridgeContext {
    config: BridgeConfig,
    transport: Box<dyn Transport>,
    next_id: AtomicU64,
    pending: DashMap<u64, oneshot::Sender<HostEvent>>,
    model: ModelState,
    cache: ResultCache,
    lifecycle_tx: broadcast::Sender<LifecycleEvent>,
    recognized_tx: broadcast::Sender<Recognition>,
}

impl BridgeContext {
    /// Build a context over a transport and start dispatching the inbound
    /// event stream.
    pub fn spawn(
        config: BridgeConfig,
        transport: Box<dyn Transport>,
        mut inbound: InboundReceiver,
    ) -> Arc<Self> {
        let (lifecycle_tx, _) = broadcast::channel(16);
        let (recognized_tx, _) = broadcast::channel(64);
        let cache = ResultCache::new(config.throttle_window);
        let ctx = Arc::new(Self {
            config,
            transport,
            next_id: AtomicU64::new(1),
            pending: DashMap::new(),
            model: ModelState::new(),
            cache,
            lifecycle_tx,
            recognized_tx,
        });

        let dispatch_ctx = Arc::clone(&ctx);
        tokio::spawn(async move {
            while let Some(envelope) = inbound.recv().await {
                dispatch_ctx.dispatch(envelope);
            }
            debug!("inbound event channel closed");
        });

        ctx
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn model(&self) -> &ModelState {
        &self.model
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// Issue a correlated request: allocate the next request id, register
    /// the pending continuation, ship the command, await the response.
    ///
    /// The configured deadline bounds the whole exchange, delivery
    /// included: a transport that blocks on a hung endpoint times out the
    /// same way an unanswered request does, frees its pending entry, and
    /// fails with [`BridgeError::Timeout`]. Without a deadline the request
    /// waits forever, matching the legacy behavior.
    pub async fn request(
        &self,
        make: impl FnOnce(u64) -> SandboxCommand,
    ) -> Result<HostEvent, BridgeError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        let envelope = Envelope::new(self.config.model_id.clone(), make(id));
        let exchange = async {
            self.transport
                .deliver(envelope)
                .await
                .map_err(BridgeError::from)?;
            rx.await.map_err(|_| BridgeError::Closed)
        };

        let result = match self.config.request_deadline {
            Some(deadline) => match timeout(deadline, exchange).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(requestid = id, "request deadline elapsed");
                    Err(BridgeError::Timeout)
                }
            },
            None => exchange.await,
        };
        if result.is_err() {
            self.pending.remove(&id);
        }
        result
    }

    /// Ship a fire-and-forget command (init, train, listen, store).
    pub async fn notify(&self, command: SandboxCommand) -> Result<(), TransportError> {
        self.transport
            .deliver(Envelope::new(self.config.model_id.clone(), command))
            .await
    }

    pub fn subscribe_lifecycle(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.lifecycle_tx.subscribe()
    }

    pub fn subscribe_recognized(&self) -> broadcast::Receiver<Recognition> {
        self.recognized_tx.subscribe()
    }

    /// Number of requests still waiting for a response.
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    /// Route one inbound envelope.
    ///
    /// Both adapters share a single channel per sandbox, so this filters on
    /// the model id as well as the command: a response for another model
    /// must never resolve one of our callbacks. Anything unmatched is
    /// dropped silently — the channel carries unrelated traffic by design.
    fn dispatch(&self, envelope: Envelope<HostEvent>) {
        if envelope.model != self.config.model_id {
            debug!(model = %envelope.model, "ignoring message for another model");
            return;
        }

        match envelope.body {
            HostEvent::ModelInit => {
                self.publish_lifecycle(LifecycleEvent::ModelInit);
            }
            HostEvent::ModelReady => {
                self.model.transition(blockml_types::ModelPhase::Ready);
                self.publish_lifecycle(LifecycleEvent::ModelReady);
            }
            HostEvent::ModelFailed => {
                self.model.fail("model training failed");
                self.publish_lifecycle(LifecycleEvent::ModelFailed);
            }
            HostEvent::Recognized { label, confidence } => {
                let _ = self.recognized_tx.send(Recognition { label, confidence });
            }
            event => {
                let Some(id) = event.requestid() else {
                    debug!("dropping uncorrelated event");
                    return;
                };
                match self.pending.remove(&id) {
                    Some((_, tx)) => {
                        // Receiver gone means the caller timed out; drop.
                        let _ = tx.send(event);
                    }
                    None => debug!(requestid = id, "no pending request for response"),
                }
            }
        }
    }

    fn publish_lifecycle(&self, event: LifecycleEvent) {
        let _ = self.lifecycle_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::inbound_channel;
    use blockml_types::{Classification, ClassifyInput, ModelPhase};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Transport double that records everything delivered to it.
    struct RecordingTransport {
        sent: Arc<Mutex<Vec<Envelope<SandboxCommand>>>>,
    }

    #[async_trait::async_trait]
    impl Transport for RecordingTransport {
        async fn deliver(
            &self,
            envelope: Envelope<SandboxCommand>,
        ) -> Result<(), TransportError> {
            self.sent.lock().unwrap().push(envelope);
            Ok(())
        }
    }

    fn context() -> (
        Arc<BridgeContext>,
        crate::transport::InboundSender,
        Arc<Mutex<Vec<Envelope<SandboxCommand>>>>,
    ) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let transport = RecordingTransport {
            sent: Arc::clone(&sent),
        };
        let (inbound_tx, inbound_rx) = inbound_channel();
        let ctx = BridgeContext::spawn(
            BridgeConfig::new("model-a"),
            Box::new(transport),
            inbound_rx,
        );
        (ctx, inbound_tx, sent)
    }

    fn cat() -> Classification {
        Classification {
            class_name: "cat".into(),
            confidence: 90.0,
            classifier_timestamp: None,
            random: false,
        }
    }

    /// Find the request id an outbound classify envelope was assigned, by
    /// the text it carried.
    fn id_for(sent: &Mutex<Vec<Envelope<SandboxCommand>>>, text: &str) -> u64 {
        sent.lock()
            .unwrap()
            .iter()
            .find_map(|envelope| match &envelope.body {
                SandboxCommand::Classify {
                    requestid,
                    input: ClassifyInput::Text(t),
                    ..
                } if t == text => Some(*requestid),
                _ => None,
            })
            .expect("classify command not delivered")
    }

    #[tokio::test]
    async fn responses_resolve_by_id_not_arrival_order() {
        let (ctx, inbound, sent) = context();

        let a = {
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move {
                ctx.request(|id| SandboxCommand::Classify {
                    requestid: id,
                    input: ClassifyInput::Text("first".into()),
                    last_modified: None,
                })
                .await
            })
        };
        let b = {
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move {
                ctx.request(|id| SandboxCommand::Classify {
                    requestid: id,
                    input: ClassifyInput::Text("second".into()),
                    last_modified: None,
                })
                .await
            })
        };

        // Let both requests register their pending entries.
        while ctx.pending_requests() < 2 {
            tokio::task::yield_now().await;
        }

        let id_first = id_for(&sent, "first");
        let id_second = id_for(&sent, "second");

        // Answer in reverse order of issue.
        for (id, label) in [(id_second, "for-second"), (id_first, "for-first")] {
            let mut result = cat();
            result.class_name = label.into();
            inbound
                .send(Envelope::new(
                    "model-a",
                    HostEvent::ClassifyResponse {
                        requestid: id,
                        results: vec![result],
                    },
                ))
                .unwrap();
        }

        let a = a.await.unwrap().unwrap();
        let b = b.await.unwrap().unwrap();
        match a {
            HostEvent::ClassifyResponse { requestid, results } => {
                assert_eq!(requestid, id_first);
                assert_eq!(results[0].class_name, "for-first");
            }
            other => panic!("unexpected event {other:?}"),
        }
        match b {
            HostEvent::ClassifyResponse { requestid, results } => {
                assert_eq!(requestid, id_second);
                assert_eq!(results[0].class_name, "for-second");
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(ctx.pending_requests(), 0);
    }

    #[tokio::test]
    async fn responses_for_another_model_are_ignored() {
        let (ctx, inbound, _) = context();

        let pending = {
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move {
                ctx.request(|id| SandboxCommand::StatusCheck { requestid: id })
                    .await
            })
        };
        while ctx.pending_requests() < 1 {
            tokio::task::yield_now().await;
        }

        // Same requestid, wrong model: must not resolve our callback.
        inbound
            .send(Envelope::new(
                "model-b",
                HostEvent::ClassifyResponse {
                    requestid: 1,
                    results: vec![cat()],
                },
            ))
            .unwrap();
        tokio::task::yield_now().await;
        assert_eq!(ctx.pending_requests(), 1);

        inbound
            .send(Envelope::new(
                "model-a",
                HostEvent::StatusResponse {
                    requestid: 1,
                    status: blockml_types::ClassifierStatus::ok(),
                },
            ))
            .unwrap();
        assert!(pending.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_requests_expire_and_free_their_entry() {
        let (ctx, _inbound, _) = context();

        let result = ctx
            .request(|id| SandboxCommand::StatusCheck { requestid: id })
            .await;
        assert!(matches!(result, Err(BridgeError::Timeout)));
        assert_eq!(ctx.pending_requests(), 0);
    }

    /// Transport that accepts the command but never finishes delivering it,
    /// like an HTTP exchange against a hung endpoint.
    struct StallingTransport;

    #[async_trait::async_trait]
    impl Transport for StallingTransport {
        async fn deliver(
            &self,
            _envelope: Envelope<SandboxCommand>,
        ) -> Result<(), TransportError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_delivery_is_bounded_by_the_deadline() {
        let (_inbound_tx, inbound_rx) = inbound_channel();
        let ctx = BridgeContext::spawn(
            BridgeConfig::new("model-a"),
            Box::new(StallingTransport),
            inbound_rx,
        );

        let result = ctx
            .request(|id| SandboxCommand::StatusCheck { requestid: id })
            .await;
        assert!(matches!(result, Err(BridgeError::Timeout)));
        assert_eq!(ctx.pending_requests(), 0);
    }

    #[tokio::test]
    async fn lifecycle_events_drive_the_model_state() {
        let (ctx, inbound, _) = context();
        assert_eq!(ctx.model().phase(), ModelPhase::Loading);

        inbound
            .send(Envelope::new("model-a", HostEvent::ModelReady))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(ctx.model().phase(), ModelPhase::Ready);

        inbound
            .send(Envelope::new("model-a", HostEvent::ModelFailed))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(ctx.model().phase(), ModelPhase::Failed);
    }

    #[tokio::test]
    async fn delivered_commands_carry_the_model_id() {
        let (ctx, _inbound, sent) = context();
        ctx.notify(SandboxCommand::Init).await.unwrap();
        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].model, "model-a");
    }
}
