// crates/bridge/src/config.rs
//! Tunable windows and identifiers for one loaded classifier.

use std::time::Duration;

/// How often the status poller re-checks the service, by reported health.
///
/// A healthy model barely needs watching, a training model needs frequent
/// checks so blocks notice when it becomes usable, and a broken model is
/// unlikely to fix itself so aggressive polling would only load the backend.
#[derive(Debug, Clone, Copy)]
pub struct PollIntervals {
    pub ok: Duration,
    pub warning: Duration,
    pub error: Duration,
}

impl Default for PollIntervals {
    fn default() -> Self {
        Self {
            ok: Duration::from_secs(2 * 60),
            warning: Duration::from_secs(20),
            error: Duration::from_secs(5 * 60),
        }
    }
}

/// Configuration for one bridge instance.
///
/// One `BridgeConfig` (and one [`BridgeContext`]) exists per loaded
/// classifier, so two models loaded in the same session never share request
/// ids or caches.
///
/// [`BridgeContext`]: crate::context::BridgeContext
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Model (project) identifier; inbound messages for other models are
    /// ignored.
    pub model_id: String,

    /// Minimum interval between live classify calls for the same cache key.
    pub throttle_window: Duration,

    /// How long a request may stay unanswered before its pending entry is
    /// reclaimed. `None` preserves the legacy never-expire behavior.
    pub request_deadline: Option<Duration>,

    /// User inactivity beyond this suspends status polling.
    pub idle_threshold: Duration,

    /// Ignore train requests issued within this window of the previous one.
    pub retrain_debounce: Duration,

    pub poll_intervals: PollIntervals,

    /// Maximum characters of text sent to a text classifier.
    pub max_text_length: usize,
}

impl BridgeConfig {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            throttle_window: Duration::from_secs(10),
            request_deadline: Some(Duration::from_secs(30)),
            idle_threshold: Duration::from_secs(15 * 60),
            retrain_debounce: Duration::from_secs(60),
            poll_intervals: PollIntervals::default(),
            max_text_length: 2000,
        }
    }
}
