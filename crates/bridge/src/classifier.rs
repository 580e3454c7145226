// crates/bridge/src/classifier.rs
//! Block-facing classifier API.
//!
//! This is what extension block handlers call. Every operation degrades
//! gracefully: a dead service yields the `Unknown` placeholder, a spammed
//! train block is debounced, and nothing here ever returns an error to a
//! running block program.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, Weak};

use tokio::time::Instant;
use tracing::{debug, warn};

use blockml_types::{Classification, ClassifyInput, HostEvent, ModelPhase, SandboxCommand, StatusCode};

use crate::context::{BridgeContext, LifecycleEvent, Recognition};
use crate::error::BridgeError;
use crate::idle::IdleTracker;
use crate::poller::StatusPoller;
use crate::transport::TransportError;

/// What happened to a training example the block submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    Stored,
    /// The project already holds the maximum allowed amount of training
    /// data; the block should tell the user rather than retry.
    LimitReached,
    Failed,
}

pub struct Classifier {
    ctx: Arc<BridgeContext>,
    poller: Arc<StatusPoller>,
    idle: Arc<IdleTracker>,
    listening: AtomicBool,
    train_in_flight: AtomicBool,
    last_train: RwLock<Option<Instant>>,
    last_recognized: RwLock<Option<Recognition>>,
}

impl Classifier {
    /// Assemble the facade, announce the extension to the host, and start
    /// the background watchers (auto-train on `ModelInit`, recognition
    /// tracking).
    pub fn spawn(
        ctx: Arc<BridgeContext>,
        poller: Arc<StatusPoller>,
        idle: Arc<IdleTracker>,
    ) -> Arc<Self> {
        let classifier = Arc::new(Self {
            ctx,
            poller,
            idle,
            listening: AtomicBool::new(false),
            train_in_flight: AtomicBool::new(false),
            last_train: RwLock::new(None),
            last_recognized: RwLock::new(None),
        });

        classifier.watch_lifecycle();
        classifier.watch_recognitions();

        let announce = Arc::clone(&classifier);
        tokio::spawn(async move {
            if let Err(e) = announce.ctx.notify(SandboxCommand::Init).await {
                warn!(error = %e, "failed to announce extension to host");
            }
        });

        classifier
    }

    /// Classify an input, consulting the result cache first.
    ///
    /// Within the throttle window the cached result is returned without any
    /// live call. After it, a live call goes out carrying the cached
    /// `classifierTimestamp`; a `NotModified` answer reuses the cached
    /// result and just refreshes its fetch time. Random results (no trained
    /// model) are returned but never cached, and a random result while the
    /// model claims to be ready forces a status recheck.
    pub async fn classify(&self, input: ClassifyInput) -> Classification {
        let input = self.normalize(input);
        let key = input.cache_key();
        if key.is_empty() {
            debug!("refusing to classify empty input");
            return Classification::unknown();
        }

        let cached = self.ctx.cache().lookup(&key);
        if let Some(entry) = &cached {
            if self.ctx.cache().is_fresh(entry) {
                return entry.result.clone();
            }
        }
        let last_modified = cached
            .as_ref()
            .and_then(|entry| entry.result.classifier_timestamp);

        let response = self
            .ctx
            .request(|id| SandboxCommand::Classify {
                requestid: id,
                input: input.clone(),
                last_modified,
            })
            .await;

        match response {
            Ok(HostEvent::NotModified { .. }) => match self.ctx.cache().refresh(&key) {
                Some(entry) => entry.result,
                // A not-modified answer with nothing cached should not
                // happen; treat it like a failed call.
                None => {
                    warn!(key, "service said not-modified but nothing is cached");
                    Classification::unknown()
                }
            },
            Ok(HostEvent::ClassifyResponse { results, .. }) => {
                let result = results
                    .into_iter()
                    .next()
                    .unwrap_or_else(Classification::unknown);
                if result.random {
                    debug!("randomly selected result returned by service");
                    if self.ctx.model().phase() == ModelPhase::Ready {
                        // A random answer from a supposedly ready model is
                        // an inconsistency; re-check before trusting Ready
                        // again.
                        warn!("random result while model reported ready");
                        self.poller.force_recheck();
                    }
                } else {
                    self.ctx.cache().store(&key, result.clone());
                }
                result
            }
            Ok(other) => {
                warn!(?other, "unexpected response to classify");
                Classification::unknown()
            }
            Err(BridgeError::Transport(e)) => {
                warn!(error = %e, "classify failed at the transport");
                self.poller.record_unreachable();
                Classification::unknown()
            }
            Err(e) => {
                warn!(error = %e, "classify failed");
                Classification::unknown()
            }
        }
    }

    /// Send a prompt to a language model. Returns `None` when the host
    /// cannot answer; prompt responses are never cached.
    pub async fn prompt(&self, text: impl Into<String>, context: Vec<String>) -> Option<String> {
        let response = self
            .ctx
            .request(|id| SandboxCommand::Prompt {
                requestid: id,
                text: text.into(),
                context,
            })
            .await;
        match response {
            Ok(HostEvent::PromptResponse { text, .. }) => Some(text),
            Ok(other) => {
                warn!(?other, "unexpected response to prompt");
                None
            }
            Err(e) => {
                warn!(error = %e, "prompt failed");
                None
            }
        }
    }

    /// Submit a training example.
    pub async fn add_training(&self, input: ClassifyInput, label: impl Into<String>) -> StoreOutcome {
        let input = self.normalize(input);
        let outcome = self
            .ctx
            .notify(SandboxCommand::Store {
                input,
                label: label.into(),
            })
            .await;
        match outcome {
            Ok(()) => StoreOutcome::Stored,
            Err(TransportError::TrainingLimit) => StoreOutcome::LimitReached,
            Err(e) => {
                warn!(error = %e, "failed to store training example");
                StoreOutcome::Failed
            }
        }
    }

    /// Ask the host to train a new model. Debounced: requests within a
    /// minute of the previous one, or while one is still being submitted,
    /// are dropped. Returns whether a request actually went out.
    pub async fn train_new_model(&self) -> bool {
        if self.trained_recently() {
            debug!("ignoring train request - new model requested very recently");
            return false;
        }
        if self.train_in_flight.swap(true, Ordering::SeqCst) {
            debug!("ignoring train request - one is already being submitted");
            return false;
        }

        match self.last_train.write() {
            Ok(mut guard) => *guard = Some(Instant::now()),
            Err(e) => tracing::error!("RwLock poisoned recording train time: {e}"),
        }
        self.ctx.model().retrain();

        let sent = self.ctx.notify(SandboxCommand::Train).await;
        self.train_in_flight.store(false, Ordering::SeqCst);
        match sent {
            Ok(()) => {
                // Watch the training run so blocks see Ready/Failed.
                self.poller.ensure_polling();
                true
            }
            Err(e) => {
                warn!(error = %e, "failed to submit train request");
                self.poller.record_unreachable();
                false
            }
        }
    }

    /// Current lifecycle phase, as the event-driven transports report it.
    pub fn model_phase(&self) -> ModelPhase {
        self.ctx.model().phase()
    }

    /// Legacy status block: compare against the polled service status,
    /// re-fetching it only when the poller's adaptive window says so.
    pub async fn is_status(&self, phase: ModelPhase) -> bool {
        let status = self.poller.status().await;
        match phase {
            ModelPhase::Ready => status.status == StatusCode::Ok,
            ModelPhase::Training | ModelPhase::Loading => status.status == StatusCode::Warning,
            ModelPhase::Failed => status.status == StatusCode::Error,
        }
    }

    /// Start streaming sound-recognition events. Only works once the model
    /// is ready; returns whether listening actually started.
    pub async fn listen(&self) -> bool {
        if self.model_phase() != ModelPhase::Ready {
            debug!("cannot listen before the model is ready");
            return false;
        }
        if self.listening.swap(true, Ordering::SeqCst) {
            return true;
        }
        match self.ctx.notify(SandboxCommand::Listen).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "failed to start listening");
                self.listening.store(false, Ordering::SeqCst);
                false
            }
        }
    }

    /// Stop streaming sound-recognition events.
    pub async fn stop_listen(&self) {
        if !self.listening.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.ctx.notify(SandboxCommand::StopListen).await {
            warn!(error = %e, "failed to stop listening");
        }
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    /// Hat-block query: did we just hear this label? Consumes the stored
    /// recognition so the block fires once per sound.
    pub fn heard(&self, label: &str) -> bool {
        if !self.is_listening() || self.model_phase() != ModelPhase::Ready {
            return false;
        }
        match self.last_recognized.write() {
            Ok(mut guard) => {
                if guard.as_ref().is_some_and(|r| r.label == label) {
                    *guard = None;
                    true
                } else {
                    false
                }
            }
            Err(e) => {
                tracing::error!("RwLock poisoned reading recognition: {e}");
                false
            }
        }
    }

    /// Raw recognition stream, for hosts that want every event.
    pub fn subscribe_recognized(&self) -> tokio::sync::broadcast::Receiver<Recognition> {
        self.ctx.subscribe_recognized()
    }

    pub fn idle(&self) -> &Arc<IdleTracker> {
        &self.idle
    }

    fn trained_recently(&self) -> bool {
        match self.last_train.read() {
            Ok(guard) => guard
                .map(|at| at.elapsed() < self.ctx.config().retrain_debounce)
                .unwrap_or(false),
            Err(e) => {
                tracing::error!("RwLock poisoned reading train time: {e}");
                false
            }
        }
    }

    /// Text inputs are cleaned before they leave the sandbox: newlines and
    /// tabs collapse to spaces, and overlong text is cut at the configured
    /// limit.
    fn normalize(&self, input: ClassifyInput) -> ClassifyInput {
        match input {
            ClassifyInput::Text(text) => {
                ClassifyInput::Text(clean_up_text(&text, self.ctx.config().max_text_length))
            }
            other => other,
        }
    }

    /// Auto-train: a `ModelInit` event means the host is ready for a train
    /// request, so one is fired automatically rather than waiting for a
    /// train block to run.
    fn watch_lifecycle(self: &Arc<Self>) {
        let mut lifecycle = self.ctx.subscribe_lifecycle();
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Ok(event) = lifecycle.recv().await {
                let Some(classifier) = weak.upgrade() else {
                    return;
                };
                if event == LifecycleEvent::ModelInit {
                    debug!("host ready to train, auto-training");
                    classifier.train_new_model().await;
                }
            }
        });
    }

    fn watch_recognitions(self: &Arc<Self>) {
        let mut recognized = self.ctx.subscribe_recognized();
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                match recognized.recv().await {
                    Ok(recognition) => {
                        let Some(classifier) = weak.upgrade() else {
                            return;
                        };
                        match classifier.last_recognized.write() {
                            Ok(mut guard) => *guard = Some(recognition),
                            Err(e) => {
                                tracing::error!("RwLock poisoned storing recognition: {e}")
                            }
                        };
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        debug!(skipped = n, "recognition stream lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                }
            }
        });
    }
}

fn clean_up_text(text: &str, max_length: usize) -> String {
    let collapsed: String = text
        .replace("\r\n", " ")
        .chars()
        .map(|c| if c == '\n' || c == '\r' || c == '\t' { ' ' } else { c })
        .collect();
    collapsed.trim().chars().take(max_length).collect()
}
