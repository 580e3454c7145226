// crates/bridge/src/error.rs
use thiserror::Error;

use crate::transport::TransportError;

/// Errors surfaced by the bridge itself.
///
/// These never reach block programs directly: the [`Classifier`] facade
/// converts every failure into a placeholder result, because a broken model
/// must not crash a running block program.
///
/// [`Classifier`]: crate::classifier::Classifier
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("no response within the request deadline")]
    Timeout,

    #[error("bridge is shutting down")]
    Closed,

    #[error(transparent)]
    Transport(#[from] TransportError),
}
