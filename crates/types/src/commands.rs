// crates/types/src/commands.rs
//! The command/event unions exchanged across the sandbox boundary.
//!
//! Every message is wrapped in an [`Envelope`] carrying the model id it
//! belongs to. Both transports share one channel per sandbox, so dispatch
//! filters on the model id *and* the command tag; a message for another
//! model (or another protocol entirely) is dropped, never an error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::results::{ClassifyInput, Classification};
use crate::status::ClassifierStatus;

/// Errors raised while decoding wire messages.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Wrapper tagging a command or event with the model it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    /// Model (project) identifier this message is scoped to.
    pub model: String,
    #[serde(flatten)]
    pub body: T,
}

impl<T: Serialize> Envelope<T> {
    pub fn new(model: impl Into<String>, body: T) -> Self {
        Self {
            model: model.into(),
            body,
        }
    }

    pub fn to_json(&self) -> Result<String, WireError> {
        Ok(serde_json::to_string(self)?)
    }
}

impl<T: for<'de> Deserialize<'de>> Envelope<T> {
    pub fn from_json(raw: &str) -> Result<Self, WireError> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Commands the sandbox sends to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", content = "data", rename_all = "lowercase")]
pub enum SandboxCommand {
    /// Announce that the extension has loaded and wants model state.
    Init,
    /// Ask the host to train a new model from the stored examples.
    Train,
    /// Classify an input; the response is correlated by `requestid`.
    Classify {
        requestid: u64,
        input: ClassifyInput,
        /// Conditional-revalidation token: the `classifierTimestamp` of the
        /// cached result, if any. The host answers `NotModified` when the
        /// model has not been retrained since.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_modified: Option<DateTime<Utc>>,
    },
    /// Send a prompt to a language model; correlated by `requestid`.
    Prompt {
        requestid: u64,
        text: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        context: Vec<String>,
    },
    /// Add a training example.
    Store { input: ClassifyInput, label: String },
    /// Poll the classifier service status; correlated by `requestid`.
    StatusCheck { requestid: u64 },
    /// Start streaming sound-recognition events.
    Listen,
    /// Stop streaming sound-recognition events.
    StopListen,
}

/// Events the host sends back into the sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", content = "data", rename_all = "lowercase")]
pub enum HostEvent {
    /// The host is ready to accept a train request for this model.
    ModelInit,
    /// Training finished; the model can be used.
    ModelReady,
    /// Training or loading failed.
    ModelFailed,
    /// Results for an earlier `Classify` command.
    ClassifyResponse {
        requestid: u64,
        results: Vec<Classification>,
    },
    /// The model has not changed since the supplied `last_modified` token;
    /// the sandbox should reuse its cached result.
    NotModified { requestid: u64 },
    /// Completion text for an earlier `Prompt` command.
    PromptResponse { requestid: u64, text: String },
    /// Service status for an earlier `StatusCheck` command.
    StatusResponse {
        requestid: u64,
        status: ClassifierStatus,
    },
    /// A sound was recognized while listening. Not correlated: these are
    /// broadcast to whoever is subscribed.
    Recognized { label: String, confidence: f64 },
}

impl HostEvent {
    /// The correlation id this event answers, if it answers one at all.
    pub fn requestid(&self) -> Option<u64> {
        match self {
            Self::ClassifyResponse { requestid, .. }
            | Self::NotModified { requestid }
            | Self::PromptResponse { requestid, .. }
            | Self::StatusResponse { requestid, .. } => Some(*requestid),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn classify_command_wire_shape() {
        let envelope = Envelope::new(
            "model-123",
            SandboxCommand::Classify {
                requestid: 4,
                input: ClassifyInput::Numbers(vec![3.0, 7.0]),
                last_modified: None,
            },
        );
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["model"], "model-123");
        assert_eq!(json["command"], "classify");
        assert_eq!(json["data"]["requestid"], 4);
    }

    #[test]
    fn events_report_their_correlation_id() {
        let event = HostEvent::ClassifyResponse {
            requestid: 9,
            results: vec![],
        };
        assert_eq!(event.requestid(), Some(9));
        assert_eq!(HostEvent::ModelReady.requestid(), None);
    }

    #[test]
    fn envelope_round_trips() {
        let envelope = Envelope::new("m", HostEvent::NotModified { requestid: 17 });
        let raw = envelope.to_json().unwrap();
        let back: Envelope<HostEvent> = Envelope::from_json(&raw).unwrap();
        assert_eq!(back, envelope);
    }

    #[test]
    fn foreign_command_fails_to_decode_cleanly() {
        let raw = r#"{"model":"m","command":"teleport","data":{}}"#;
        assert!(Envelope::<HostEvent>::from_json(raw).is_err());
    }
}
