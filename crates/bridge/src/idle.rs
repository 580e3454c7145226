// crates/bridge/src/idle.rs
//! User-activity tracking for poll throttling.
//!
//! The status poller must never keep hammering a shared backend after the
//! user has walked away, and must resume promptly when they come back. The
//! tracker records the instant of the last activity event; where those
//! events come from is the host's business, injected via [`ActivitySource`]
//! so the tracker works without a DOM.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::debug;

/// A stream of user-interaction events (mouse, keyboard, touch, scroll —
/// whatever the host considers activity). Yields `None` when the host side
/// shuts down.
#[async_trait]
pub trait ActivitySource: Send + 'static {
    async fn next_activity(&mut self) -> Option<()>;
}

/// An [`ActivitySource`] fed through an mpsc channel. Hosts forward their
/// interaction events into the sender half; tests drive it directly.
pub struct ChannelActivitySource {
    rx: mpsc::UnboundedReceiver<()>,
}

impl ChannelActivitySource {
    pub fn new() -> (mpsc::UnboundedSender<()>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }
}

#[async_trait]
impl ActivitySource for ChannelActivitySource {
    async fn next_activity(&mut self) -> Option<()> {
        self.rx.recv().await
    }
}

/// Records when the user was last active.
pub struct IdleTracker {
    last_activity: RwLock<Instant>,
    threshold: Duration,
    activity_tx: broadcast::Sender<()>,
}

impl IdleTracker {
    pub fn new(threshold: Duration) -> Self {
        let (activity_tx, _) = broadcast::channel(16);
        Self {
            last_activity: RwLock::new(Instant::now()),
            threshold,
            activity_tx,
        }
    }

    /// Note an activity event and wake anyone waiting on one.
    pub fn record_activity(&self) {
        match self.last_activity.write() {
            Ok(mut guard) => *guard = Instant::now(),
            Err(e) => tracing::error!("RwLock poisoned recording activity: {e}"),
        }
        // No subscribers is fine.
        let _ = self.activity_tx.send(());
    }

    /// How long the user has been idle.
    pub fn idle_for(&self) -> Duration {
        match self.last_activity.read() {
            Ok(guard) => guard.elapsed(),
            Err(e) => {
                tracing::error!("RwLock poisoned reading last activity: {e}");
                Duration::ZERO
            }
        }
    }

    /// True while the user has been active within the idle threshold.
    pub fn user_is_active(&self) -> bool {
        self.idle_for() < self.threshold
    }

    /// Subscribe to activity events (used by the poller to resume after an
    /// idle suspension).
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.activity_tx.subscribe()
    }

    /// Drain an [`ActivitySource`] into this tracker on a background task.
    pub fn attach(self: &Arc<Self>, mut source: impl ActivitySource) {
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            while source.next_activity().await.is_some() {
                tracker.record_activity();
            }
            debug!("activity source closed");
        });
    }
}
