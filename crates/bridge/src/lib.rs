// crates/bridge/src/lib.rs
//! Core of the blockml classifier bridge.
//!
//! Block extensions run in a sandbox with no network access and no shared
//! memory with the hosting page, so every classify/train/status operation
//! crosses a message boundary and comes back asynchronously. This crate
//! owns that bridging: request/response correlation ([`BridgeContext`]),
//! result caching with throttling and conditional revalidation
//! ([`ResultCache`]), adaptive status polling gated on user presence
//! ([`StatusPoller`], [`IdleTracker`]), the per-model lifecycle state
//! machine ([`ModelState`]), and the block-facing [`Classifier`] facade.
//!
//! Concrete transports (the postMessage-style channel adapter and the
//! legacy HTTP adapter) live in `blockml-transport` and plug in through the
//! [`Transport`] trait.

pub mod cache;
pub mod classifier;
pub mod config;
pub mod context;
pub mod error;
pub mod idle;
pub mod model_state;
pub mod poller;
pub mod transport;

pub use cache::{CacheEntry, ResultCache};
pub use classifier::{Classifier, StoreOutcome};
pub use config::{BridgeConfig, PollIntervals};
pub use context::{BridgeContext, LifecycleEvent, Recognition};
pub use error::BridgeError;
pub use idle::{ActivitySource, ChannelActivitySource, IdleTracker};
pub use model_state::{ModelSnapshot, ModelState};
pub use poller::StatusPoller;
pub use transport::{inbound_channel, InboundReceiver, InboundSender, Transport, TransportError};
