// crates/bridge/src/model_state.rs
//! Lifecycle state for one loaded model.
//!
//! Block handlers read this constantly (every status block tick), so the
//! phase lives in an atomic and only the error message needs a lock.
//! Transitions are validated: the lifecycle only moves forward, except for
//! the explicit retrain path out of `Ready`/`Failed`.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use blockml_types::ModelPhase;

/// A point-in-time copy of the model state.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSnapshot {
    pub phase: ModelPhase,
    pub progress: u8,
    pub error: Option<String>,
    pub updated: DateTime<Utc>,
}

pub struct ModelState {
    phase: AtomicU8,
    progress: AtomicU8,
    error: RwLock<Option<String>>,
    updated: RwLock<DateTime<Utc>>,
}

/// The forward transitions the lifecycle allows. `Ready -> Failed` covers
/// the inconsistency path (a random result arriving while we believed the
/// model was usable); `Failed` is otherwise left only by an explicit
/// retrain, which goes through [`ModelState::retrain`] instead.
fn valid_transition(from: ModelPhase, to: ModelPhase) -> bool {
    use ModelPhase::*;
    matches!(
        (from, to),
        (Loading, Training)
            | (Loading, Ready)
            | (Loading, Failed)
            | (Training, Ready)
            | (Training, Failed)
            | (Ready, Failed)
    )
}

impl ModelState {
    pub fn new() -> Self {
        Self {
            phase: AtomicU8::new(ModelPhase::Loading as u8),
            progress: AtomicU8::new(0),
            error: RwLock::new(None),
            updated: RwLock::new(Utc::now()),
        }
    }

    pub fn phase(&self) -> ModelPhase {
        ModelPhase::from_u8(self.phase.load(Ordering::Relaxed))
    }

    /// Attempt a lifecycle transition. Invalid transitions are ignored with
    /// a warning; the sandbox must keep running whatever the host sends.
    pub fn transition(&self, to: ModelPhase) -> bool {
        let from = self.phase();
        if from == to {
            return true;
        }
        if !valid_transition(from, to) {
            warn!(from = from.as_str(), to = to.as_str(), "ignoring invalid model transition");
            return false;
        }
        self.phase.store(to as u8, Ordering::Relaxed);
        self.touch();
        debug!(from = from.as_str(), to = to.as_str(), "model transition");
        true
    }

    /// Explicit retrain/reload: restarts the lifecycle at `Training` from
    /// any phase, clearing a previous failure.
    pub fn retrain(&self) {
        let from = self.phase();
        self.phase.store(ModelPhase::Training as u8, Ordering::Relaxed);
        self.set_progress(0);
        match self.error.write() {
            Ok(mut guard) => *guard = None,
            Err(e) => tracing::error!("RwLock poisoned clearing model error: {e}"),
        }
        self.touch();
        debug!(from = from.as_str(), "model retraining");
    }

    /// Record a failure with a reason. Valid from any phase; a repeat
    /// failure just replaces the reason.
    pub fn fail(&self, reason: impl Into<String>) {
        self.phase.store(ModelPhase::Failed as u8, Ordering::Relaxed);
        match self.error.write() {
            Ok(mut guard) => *guard = Some(reason.into()),
            Err(e) => tracing::error!("RwLock poisoned writing model error: {e}"),
        }
        self.touch();
    }

    pub fn progress(&self) -> u8 {
        self.progress.load(Ordering::Relaxed)
    }

    pub fn set_progress(&self, pct: u8) {
        self.progress.store(pct.min(100), Ordering::Relaxed);
        self.touch();
    }

    pub fn snapshot(&self) -> ModelSnapshot {
        ModelSnapshot {
            phase: self.phase(),
            progress: self.progress(),
            error: match self.error.read() {
                Ok(guard) => guard.clone(),
                Err(e) => {
                    tracing::error!("RwLock poisoned reading model error: {e}");
                    None
                }
            },
            updated: match self.updated.read() {
                Ok(guard) => *guard,
                Err(e) => {
                    tracing::error!("RwLock poisoned reading model timestamp: {e}");
                    Utc::now()
                }
            },
        }
    }

    fn touch(&self) {
        match self.updated.write() {
            Ok(mut guard) => *guard = Utc::now(),
            Err(e) => tracing::error!("RwLock poisoned touching model timestamp: {e}"),
        }
    }
}

impl Default for ModelState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_moves_forward() {
        let state = ModelState::new();
        assert_eq!(state.phase(), ModelPhase::Loading);

        assert!(state.transition(ModelPhase::Training));
        assert!(state.transition(ModelPhase::Ready));
        assert_eq!(state.phase(), ModelPhase::Ready);
    }

    #[test]
    fn ready_does_not_regress_to_training_without_retrain() {
        let state = ModelState::new();
        state.transition(ModelPhase::Training);
        state.transition(ModelPhase::Ready);

        assert!(!state.transition(ModelPhase::Training));
        assert_eq!(state.phase(), ModelPhase::Ready);

        state.retrain();
        assert_eq!(state.phase(), ModelPhase::Training);
    }

    #[test]
    fn failed_is_terminal_until_retrain() {
        let state = ModelState::new();
        state.transition(ModelPhase::Training);
        state.fail("training exploded");

        assert!(!state.transition(ModelPhase::Ready));
        assert_eq!(state.phase(), ModelPhase::Failed);
        assert_eq!(state.snapshot().error.as_deref(), Some("training exploded"));

        state.retrain();
        assert_eq!(state.phase(), ModelPhase::Training);
        assert!(state.snapshot().error.is_none());
    }

    #[test]
    fn ready_can_fail_on_inconsistency() {
        let state = ModelState::new();
        state.transition(ModelPhase::Ready);
        state.fail("random result while ready");
        assert_eq!(state.phase(), ModelPhase::Failed);
    }

    #[test]
    fn progress_is_clamped() {
        let state = ModelState::new();
        state.set_progress(250);
        assert_eq!(state.progress(), 100);
    }
}
