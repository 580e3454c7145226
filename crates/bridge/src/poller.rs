// crates/bridge/src/poller.rs
//! Adaptive status polling for one classifier.
//!
//! Many sandboxes can sit open in browser tabs for hours, so this is a
//! backpressure mechanism as much as a convenience: polling continues only
//! while there is a genuine problem *and* the user is present. A healthy
//! status stops the loop (staleness is caught by the next classify call),
//! and fifteen minutes of inactivity suspends it until the user returns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use blockml_types::{ClassifierStatus, HostEvent, ModelPhase, SandboxCommand, StatusCode};

use crate::context::BridgeContext;
use crate::idle::IdleTracker;

pub struct StatusPoller {
    ctx: Arc<BridgeContext>,
    idle: Arc<IdleTracker>,
    status: RwLock<ClassifierStatus>,
    last_check: RwLock<Option<Instant>>,
    /// Re-entrancy guard: at most one status request in flight.
    checking: AtomicBool,
    /// Whether a poll loop is currently running.
    polling: AtomicBool,
    stopped: AtomicBool,
}

impl StatusPoller {
    pub fn new(ctx: Arc<BridgeContext>, idle: Arc<IdleTracker>) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            idle,
            status: RwLock::new(ClassifierStatus {
                status: StatusCode::Warning,
                msg: "Getting status".to_string(),
            }),
            last_check: RwLock::new(None),
            checking: AtomicBool::new(false),
            polling: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        })
    }

    /// The last status we saw, without touching the service.
    pub fn current(&self) -> ClassifierStatus {
        match self.status.read() {
            Ok(guard) => guard.clone(),
            Err(e) => {
                tracing::error!("RwLock poisoned reading classifier status: {e}");
                ClassifierStatus::unreachable()
            }
        }
    }

    /// Status for a block query, re-fetching only when the cached value has
    /// outlived the interval its own health grade allows.
    pub async fn status(&self) -> ClassifierStatus {
        if self.checking.load(Ordering::Relaxed) {
            return self.current();
        }
        let status = self.current();
        let stale = match self.last_checked() {
            Some(at) => at.elapsed() > self.interval_for(&status),
            None => true,
        };
        if stale {
            self.check_now().await
        } else {
            status
        }
    }

    /// Fetch the status once, updating the cached value and the model
    /// state. Concurrent callers coalesce onto the in-flight check.
    pub async fn check_now(&self) -> ClassifierStatus {
        if self.checking.swap(true, Ordering::SeqCst) {
            return self.current();
        }

        let response = self
            .ctx
            .request(|id| SandboxCommand::StatusCheck { requestid: id })
            .await;

        let status = match response {
            Ok(HostEvent::StatusResponse { status, .. }) => status,
            Ok(other) => {
                warn!(?other, "unexpected response to status check");
                ClassifierStatus::unreachable()
            }
            Err(e) => {
                warn!(error = %e, "status check failed");
                ClassifierStatus::unreachable()
            }
        };

        self.record(status.clone());
        self.checking.store(false, Ordering::SeqCst);
        status
    }

    /// Record a transport failure observed elsewhere (a classify call that
    /// could not reach the service) and keep polling until it clears.
    pub fn record_unreachable(self: &Arc<Self>) {
        self.record(ClassifierStatus::unreachable());
        self.ensure_polling();
    }

    /// Out-of-band recheck, used when a random result arrives while the
    /// model claims to be ready. One check runs immediately; polling
    /// continues only if it confirms a problem.
    pub fn force_recheck(self: &Arc<Self>) {
        debug!("forcing out-of-band status recheck");
        self.ensure_polling();
    }

    /// Start the poll loop if it is not already running.
    pub fn ensure_polling(self: &Arc<Self>) {
        if self.stopped.load(Ordering::SeqCst) || self.polling.swap(true, Ordering::SeqCst) {
            return;
        }
        let poller = Arc::clone(self);
        tokio::spawn(async move {
            poller.run().await;
            poller.polling.store(false, Ordering::SeqCst);
        });
    }

    /// Permanently stop this poller (sandbox teardown).
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    async fn run(&self) {
        let mut activity = self.idle.subscribe();
        while !self.stopped.load(Ordering::SeqCst) {
            let status = self.check_now().await;

            if status.is_ok() {
                // Healthy: no need to keep asking. If the model breaks
                // later, the next classify call notices and rechecks.
                debug!("status healthy, poller going quiet");
                break;
            }

            if !self.idle.user_is_active() {
                debug!("user idle, suspending status polling");
                loop {
                    match activity.recv().await {
                        Ok(()) | Err(RecvError::Lagged(_)) => {
                            if self.idle.user_is_active() {
                                break;
                            }
                        }
                        Err(RecvError::Closed) => return,
                    }
                }
                // User came back; re-check straight away.
                continue;
            }

            sleep(self.interval_for(&status)).await;
        }
    }

    fn interval_for(&self, status: &ClassifierStatus) -> Duration {
        let intervals = self.ctx.config().poll_intervals;
        match status.status {
            StatusCode::Ok => intervals.ok,
            StatusCode::Warning => intervals.warning,
            StatusCode::Error => intervals.error,
        }
    }

    fn last_checked(&self) -> Option<Instant> {
        match self.last_check.read() {
            Ok(guard) => *guard,
            Err(e) => {
                tracing::error!("RwLock poisoned reading last status check: {e}");
                None
            }
        }
    }

    fn record(&self, status: ClassifierStatus) {
        // Mirror the service status onto the model lifecycle. A warning
        // while Ready means the service is retraining; a Failed model only
        // recovers through an explicit retrain, so an Ok status does not
        // resurrect it here.
        let model = self.ctx.model();
        match status.status {
            StatusCode::Ok => {
                model.transition(ModelPhase::Ready);
            }
            StatusCode::Warning => {
                if model.phase() == ModelPhase::Ready {
                    model.retrain();
                } else {
                    model.transition(ModelPhase::Training);
                }
            }
            StatusCode::Error => model.fail(status.msg.clone()),
        }

        match self.status.write() {
            Ok(mut guard) => *guard = status,
            Err(e) => tracing::error!("RwLock poisoned writing classifier status: {e}"),
        }
        match self.last_check.write() {
            Ok(mut guard) => *guard = Some(Instant::now()),
            Err(e) => tracing::error!("RwLock poisoned writing last status check: {e}"),
        }
    }
}
