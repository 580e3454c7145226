// crates/types/src/results.rs
//! Classification inputs and results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The data a block hands to the classifier.
///
/// The variants cover the classifier families the bridge serves: numeric
/// tuples, free text, and opaque image data (already encoded by the host
/// helpers before it reaches the bridge). Sound classifiers do not classify
/// on demand; they use the listen/recognized event flow instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassifyInput {
    Numbers(Vec<f64>),
    Text(String),
    /// Base64-encoded image payload.
    Image(String),
}

impl ClassifyInput {
    /// Canonical cache key for this input.
    ///
    /// Numeric tuples join with a single space (`[3, 7]` -> `"3 7"`), text
    /// and image data are used verbatim. Two inputs with the same key are
    /// the same input as far as the result cache is concerned.
    pub fn cache_key(&self) -> String {
        match self {
            Self::Numbers(values) => values
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join(" "),
            Self::Text(text) => text.clone(),
            Self::Image(data) => data.clone(),
        }
    }
}

/// A single classification returned by the model service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub class_name: String,
    /// Percentage confidence, 0.0 ..= 100.0.
    pub confidence: f64,
    /// Server-side timestamp of the model that produced this answer.
    /// Used as the conditional-revalidation token on the next call.
    #[serde(rename = "classifierTimestamp")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classifier_timestamp: Option<DateTime<Utc>>,
    /// True when the service had no trained model and picked a label at
    /// random. Random results are never cached.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub random: bool,
}

impl Classification {
    /// The placeholder returned to blocks when classification fails.
    ///
    /// Block programs must never crash because the classifier is broken, so
    /// transport failures degrade to this value rather than an error.
    pub fn unknown() -> Self {
        Self {
            class_name: "Unknown".to_string(),
            confidence: 0.0,
            classifier_timestamp: Some(Utc::now()),
            random: false,
        }
    }
}
