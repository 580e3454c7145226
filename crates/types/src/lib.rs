// crates/types/src/lib.rs
//! Wire protocol types for the blockml classifier bridge.
//!
//! Both transports (the channel adapter standing in for postMessage, and the
//! HTTP adapter for the legacy classifier endpoints) exchange the same
//! command/event unions defined here. Payloads are tagged unions rather than
//! duck-typed objects: an inbound message either deserializes to a known
//! command or it is foreign traffic to be ignored.

pub mod commands;
pub mod results;
pub mod status;

pub use commands::{Envelope, HostEvent, SandboxCommand};
pub use results::{ClassifyInput, Classification};
pub use status::{ClassifierStatus, ModelPhase, StatusCode};
