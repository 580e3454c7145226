// crates/types/src/status.rs
//! Classifier service status and model lifecycle phases.

use serde::{Deserialize, Serialize};

/// Numeric status reported by the legacy status endpoint.
///
/// The wire format is a bare integer: 0 = error, 1 = training/warning,
/// 2 = fully healthy. Anything other than `Ok` means the model needs
/// watching and keeps the status poller running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum StatusCode {
    Error,
    Warning,
    Ok,
}

impl TryFrom<u8> for StatusCode {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, String> {
        match v {
            0 => Ok(Self::Error),
            1 => Ok(Self::Warning),
            2 => Ok(Self::Ok),
            other => Err(format!("unknown status code {other}")),
        }
    }
}

impl From<StatusCode> for u8 {
    fn from(code: StatusCode) -> u8 {
        match code {
            StatusCode::Error => 0,
            StatusCode::Warning => 1,
            StatusCode::Ok => 2,
        }
    }
}

/// Status payload from the classifier service: `{"status": 0|1|2, "msg": …}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifierStatus {
    pub status: StatusCode,
    pub msg: String,
}

impl ClassifierStatus {
    pub fn ok() -> Self {
        Self {
            status: StatusCode::Ok,
            msg: "ready".to_string(),
        }
    }

    pub fn training() -> Self {
        Self {
            status: StatusCode::Warning,
            msg: "Model training".to_string(),
        }
    }

    /// The status recorded when the service cannot be reached at all.
    pub fn unreachable() -> Self {
        Self {
            status: StatusCode::Error,
            msg: "Unable to communicate with machine learning service".to_string(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == StatusCode::Ok
    }
}

/// Lifecycle phase of one loaded model, as seen by the sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ModelPhase {
    Loading = 0,
    Training = 1,
    Ready = 2,
    Failed = 3,
}

impl ModelPhase {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Loading,
            1 => Self::Training,
            2 => Self::Ready,
            _ => Self::Failed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Loading => "loading",
            Self::Training => "training",
            Self::Ready => "ready",
            Self::Failed => "failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_round_trip_as_integers() {
        let status: ClassifierStatus =
            serde_json::from_str(r#"{"status":2,"msg":"ready"}"#).unwrap();
        assert_eq!(status.status, StatusCode::Ok);

        let json = serde_json::to_string(&ClassifierStatus::unreachable()).unwrap();
        assert!(json.contains(r#""status":0"#));
    }

    #[test]
    fn unknown_status_code_is_rejected() {
        let parsed = serde_json::from_str::<ClassifierStatus>(r#"{"status":9,"msg":"?"}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn phase_round_trips_through_u8() {
        for phase in [
            ModelPhase::Loading,
            ModelPhase::Training,
            ModelPhase::Ready,
            ModelPhase::Failed,
        ] {
            assert_eq!(ModelPhase::from_u8(phase as u8), phase);
        }
    }
}
