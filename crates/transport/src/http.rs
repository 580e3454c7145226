// crates/transport/src/http.rs
//! Legacy HTTP transport: the classifier endpoints served to the older
//! extension host.
//!
//! The URLs arrive templated into the extension at generation time, so the
//! adapter is parameterized by an [`EndpointConfig`] rather than knowing any
//! hostnames. Conditional revalidation rides on `If-Modified-Since`
//! carrying the client-remembered classifier timestamp; a 304 from the
//! service means "reuse what you cached". Every request identifies its
//! origin via `X-User-Agent`.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::StatusCode;
use tracing::{debug, warn};
use url::Url;

use blockml_bridge::{InboundSender, Transport, TransportError};
use blockml_types::{
    Classification, ClassifierStatus, ClassifyInput, Envelope, HostEvent, SandboxCommand,
};

const LIMIT_ERROR: &str = "Project already has maximum allowed amount of training data";

/// Where the classifier service lives for one model.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub status_url: Url,
    pub classify_url: Url,
    pub store_url: Url,
    pub model_url: Url,
    /// `X-User-Agent` value identifying the originating extension.
    pub user_agent: String,
}

pub struct HttpTransport {
    client: reqwest::Client,
    endpoints: EndpointConfig,
    inbound: InboundSender,
}

impl HttpTransport {
    pub fn new(endpoints: EndpointConfig, inbound: InboundSender) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoints,
            inbound,
        }
    }

    fn push(&self, model: String, event: HostEvent) {
        if self.inbound.send(Envelope::new(model, event)).is_err() {
            debug!("bridge inbound channel closed");
        }
    }

    async fn classify(
        &self,
        model: String,
        requestid: u64,
        input: ClassifyInput,
        last_modified: Option<chrono::DateTime<Utc>>,
    ) -> Result<(), TransportError> {
        let mut url = self.endpoints.classify_url.clone();
        {
            let mut query = url.query_pairs_mut();
            match &input {
                ClassifyInput::Numbers(values) => {
                    for value in values {
                        query.append_pair("data", &value.to_string());
                    }
                }
                ClassifyInput::Text(text) => {
                    query.append_pair("data", text);
                }
                ClassifyInput::Image(data) => {
                    query.append_pair("data", data);
                }
            }
        }

        // The service compares against the timestamp the client remembers,
        // not a true HTTP validator; with nothing cached we send "now".
        let token = last_modified.unwrap_or_else(Utc::now);

        let response = self
            .client
            .get(url)
            .header("Accept", "application/json")
            .header("X-User-Agent", &self.endpoints.user_agent)
            .header("If-Modified-Since", token.to_rfc3339())
            .send()
            .await
            .map_err(|e| TransportError::Unreachable(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_MODIFIED => {
                self.push(model, HostEvent::NotModified { requestid });
            }
            StatusCode::OK => {
                let results: Vec<Classification> = response
                    .json()
                    .await
                    .map_err(|e| TransportError::Unreachable(e.to_string()))?;
                let results = if results.is_empty() {
                    // The service answered but could not classify.
                    vec![Classification::unknown()]
                } else {
                    results
                };
                self.push(model, HostEvent::ClassifyResponse { requestid, results });
            }
            status => {
                // Surfaced as a transport error so the status layer learns
                // the service is failing; the facade supplies the Unknown
                // placeholder to the block.
                warn!(%status, "classify endpoint returned an error");
                return Err(TransportError::Unreachable(format!(
                    "classify endpoint returned {status}"
                )));
            }
        }
        Ok(())
    }

    async fn status_check(&self, model: String, requestid: u64) -> Result<(), TransportError> {
        let response = self
            .client
            .get(self.endpoints.status_url.clone())
            .header("Accept", "application/json")
            .header("X-User-Agent", &self.endpoints.user_agent)
            .send()
            .await
            .map_err(|e| TransportError::Unreachable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(TransportError::Unreachable(format!(
                "status endpoint returned {}",
                response.status()
            )));
        }

        let status: ClassifierStatus = response
            .json()
            .await
            .map_err(|e| TransportError::Unreachable(e.to_string()))?;
        self.push(model, HostEvent::StatusResponse { requestid, status });
        Ok(())
    }

    async fn store(&self, input: ClassifyInput, label: String) -> Result<(), TransportError> {
        let data = match &input {
            ClassifyInput::Numbers(values) => serde_json::json!(values),
            ClassifyInput::Text(text) => serde_json::json!(text),
            ClassifyInput::Image(data) => serde_json::json!(data),
        };
        let response = self
            .client
            .post(self.endpoints.store_url.clone())
            .header("Accept", "application/json")
            .header("X-User-Agent", &self.endpoints.user_agent)
            .json(&serde_json::json!({ "data": data, "label": label }))
            .send()
            .await
            .map_err(|e| TransportError::Unreachable(e.to_string()))?;

        if response.status() == StatusCode::OK {
            return Ok(());
        }

        #[derive(serde::Deserialize)]
        struct StoreError {
            error: String,
        }
        match response.json::<StoreError>().await {
            Ok(body) if body.error == LIMIT_ERROR => Err(TransportError::TrainingLimit),
            Ok(body) => Err(TransportError::Unreachable(body.error)),
            Err(e) => Err(TransportError::Unreachable(e.to_string())),
        }
    }

    async fn train(&self) -> Result<(), TransportError> {
        let response = self
            .client
            .post(self.endpoints.model_url.clone())
            .header("Accept", "application/json")
            .header("X-User-Agent", &self.endpoints.user_agent)
            .send()
            .await
            .map_err(|e| TransportError::Unreachable(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(TransportError::Unreachable(format!(
                "train endpoint returned {}",
                response.status()
            )))
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn deliver(&self, envelope: Envelope<SandboxCommand>) -> Result<(), TransportError> {
        let model = envelope.model;
        match envelope.body {
            SandboxCommand::Classify {
                requestid,
                input,
                last_modified,
            } => self.classify(model, requestid, input, last_modified).await,
            SandboxCommand::StatusCheck { requestid } => {
                self.status_check(model, requestid).await
            }
            SandboxCommand::Store { input, label } => self.store(input, label).await,
            SandboxCommand::Train => self.train().await,
            // The legacy surface has no registration step; status polling
            // covers what `init` does on the message transport.
            SandboxCommand::Init => Ok(()),
            SandboxCommand::Prompt { .. }
            | SandboxCommand::Listen
            | SandboxCommand::StopListen => Err(TransportError::Unsupported),
        }
    }
}
