//! Local signing agent contract and loopback HTTP client
//!
//! The agent runs on the signer's machine and holds the signing key. It is
//! only ever addressed on a loopback interface. Before any signing call the
//! client probes the configured endpoints and remembers the first one that
//! answers.

use std::sync::Mutex;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use signing_types::{Placement, SignedArtifact, SignerIdentity, SigningRequest};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{is_loopback_url, AgentConfig};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AgentError {
    #[error("No signing agent answered (tried {})", tried.join(", "))]
    Unavailable { tried: Vec<String> },

    #[error("{0}")]
    Rejected(String),

    #[error("Agent connection failed: {0}")]
    Transport(String),

    #[error("Unexpected agent response: {0}")]
    Decode(String),

    #[error("Agent endpoint {0} is not a loopback address")]
    NotLoopback(String),
}

impl AgentError {
    /// Text to show the user; agent-reported errors pass through verbatim
    pub fn agent_message(&self) -> String {
        match self {
            AgentError::Rejected(message) => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Endpoint that answered the liveness probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    pub endpoint: String,
    pub path: String,
}

/// Agent answer to a single request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentOutcome {
    /// Signed document returned inline
    Signed(SignedArtifact),
    /// Accepted; the agent completes with the backend itself
    Accepted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentItemOutcome {
    Signed(SignedArtifact),
    Accepted,
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentItemResult {
    pub request_id: String,
    pub outcome: AgentItemOutcome,
}

#[async_trait]
pub trait SigningAgent: Send + Sync {
    /// Liveness check; bounded by the configured probe timeout
    async fn probe(&self) -> Result<ProbeReport, AgentError>;

    async fn sign(&self, request: &SigningRequest) -> Result<AgentOutcome, AgentError>;

    /// Sign many requests in one call. One result per request, in order.
    async fn sign_batch(
        &self,
        requests: &[SigningRequest],
    ) -> Result<Vec<AgentItemResult>, AgentError>;
}

#[derive(Debug, Serialize)]
struct SignItem<'a> {
    request_id: &'a str,
    token: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    document_base64: Option<String>,
    placement: &'a Placement,
    signer: &'a SignerIdentity,
}

impl<'a> From<&'a SigningRequest> for SignItem<'a> {
    fn from(request: &'a SigningRequest) -> Self {
        Self {
            request_id: &request.request_id,
            token: &request.token,
            document_base64: request.payload.as_ref().map(|p| STANDARD.encode(p)),
            placement: &request.placement,
            signer: &request.signer,
        }
    }
}

#[derive(Debug, Serialize)]
struct SignBatchBody<'a> {
    items: Vec<SignItem<'a>>,
}

/// Response envelope; errors may arrive with a 200 status
#[derive(Debug, Deserialize)]
struct SignResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    signed_document_base64: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BatchItemResponse {
    request_id: String,
    #[serde(default)]
    success: bool,
    #[serde(default)]
    signed_document_base64: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SignBatchResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    results: Vec<BatchItemResponse>,
    #[serde(default)]
    error: Option<String>,
}

fn decode_artifact(encoded: &str) -> Result<SignedArtifact, AgentError> {
    STANDARD
        .decode(encoded)
        .map(SignedArtifact::new)
        .map_err(|e| AgentError::Decode(format!("signed document is not base64: {}", e)))
}

/// Non-blank `error` text, which rejects the call whatever `success` says
fn embedded_error(error: &Option<String>) -> Option<String> {
    error
        .as_deref()
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(str::to_string)
}

fn rejection(error: Option<String>) -> String {
    error
        .filter(|e| !e.trim().is_empty())
        .unwrap_or_else(|| "Signing agent reported an unknown error".to_string())
}

pub struct LocalAgentClient {
    probe_client: Client,
    client: Client,
    base_urls: Vec<String>,
    probe_paths: Vec<String>,
    token: Option<String>,
    active: Mutex<Option<String>>,
}

impl LocalAgentClient {
    pub fn new(config: &AgentConfig) -> Result<Self, AgentError> {
        let mut base_urls = Vec::with_capacity(config.base_urls.len());
        for url in &config.base_urls {
            if !is_loopback_url(url) {
                return Err(AgentError::NotLoopback(url.clone()));
            }
            base_urls.push(url.trim_end_matches('/').to_string());
        }

        let probe_client = Client::builder()
            .timeout(config.probe_timeout())
            .build()
            .map_err(|e| AgentError::Transport(e.to_string()))?;
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| AgentError::Transport(e.to_string()))?;

        Ok(Self {
            probe_client,
            client,
            base_urls,
            probe_paths: config.probe_paths.clone(),
            token: config.token.clone(),
            active: Mutex::new(None),
        })
    }

    /// Endpoint chosen by the last successful probe
    pub fn active_endpoint(&self) -> Option<String> {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn set_active(&self, endpoint: Option<String>) {
        *self
            .active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = endpoint;
    }

    async fn endpoint(&self) -> Result<String, AgentError> {
        match self.active_endpoint() {
            Some(endpoint) => Ok(endpoint),
            None => self.probe().await.map(|report| report.endpoint),
        }
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn post_json<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<String, AgentError> {
        let endpoint = self.endpoint().await?;
        let url = format!("{}{}", endpoint, path);
        debug!("POST {}", url);

        let response = match self.authorize(self.client.post(&url)).json(body).send().await {
            Ok(response) => response,
            Err(e) => {
                // Agent may have restarted on the other port
                self.set_active(None);
                return Err(AgentError::Transport(e.to_string()));
            }
        };

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| AgentError::Transport(e.to_string()))?;

        if !status.is_success() {
            let message = serde_json::from_str::<SignResponse>(&text)
                .ok()
                .and_then(|r| r.error)
                .unwrap_or_else(|| format!("agent returned {}", status));
            return Err(AgentError::Rejected(message));
        }
        Ok(text)
    }
}

#[async_trait]
impl SigningAgent for LocalAgentClient {
    async fn probe(&self) -> Result<ProbeReport, AgentError> {
        let mut tried = Vec::new();

        for base in &self.base_urls {
            for path in &self.probe_paths {
                let url = format!("{}{}", base, path);
                match self.probe_client.get(&url).send().await {
                    Ok(response) if response.status().is_success() => {
                        info!("Signing agent answered at {}", url);
                        self.set_active(Some(base.clone()));
                        return Ok(ProbeReport {
                            endpoint: base.clone(),
                            path: path.clone(),
                        });
                    }
                    Ok(response) => debug!("Probe {} returned {}", url, response.status()),
                    Err(e) => debug!("Probe {} failed: {}", url, e),
                }
                tried.push(url);
            }
        }

        warn!("No signing agent answered on {} endpoint(s)", tried.len());
        self.set_active(None);
        Err(AgentError::Unavailable { tried })
    }

    async fn sign(&self, request: &SigningRequest) -> Result<AgentOutcome, AgentError> {
        let text = self.post_json("/sign", &SignItem::from(request)).await?;
        let response: SignResponse =
            serde_json::from_str(&text).map_err(|e| AgentError::Decode(e.to_string()))?;

        if let Some(message) = embedded_error(&response.error) {
            return Err(AgentError::Rejected(message));
        }
        if !response.success {
            return Err(AgentError::Rejected(rejection(response.error)));
        }
        match response.signed_document_base64 {
            Some(encoded) => decode_artifact(&encoded).map(AgentOutcome::Signed),
            None => Ok(AgentOutcome::Accepted),
        }
    }

    async fn sign_batch(
        &self,
        requests: &[SigningRequest],
    ) -> Result<Vec<AgentItemResult>, AgentError> {
        let body = SignBatchBody {
            items: requests.iter().map(SignItem::from).collect(),
        };
        let text = self.post_json("/sign/batch", &body).await?;
        let response: SignBatchResponse =
            serde_json::from_str(&text).map_err(|e| AgentError::Decode(e.to_string()))?;

        if response.results.is_empty() {
            if let Some(message) = embedded_error(&response.error) {
                return Err(AgentError::Rejected(message));
            }
            if !response.success {
                return Err(AgentError::Rejected(rejection(response.error)));
            }
        }

        let mut by_id: std::collections::HashMap<String, BatchItemResponse> = response
            .results
            .into_iter()
            .map(|r| (r.request_id.clone(), r))
            .collect();

        Ok(requests
            .iter()
            .map(|request| {
                let outcome = match by_id.remove(&request.request_id) {
                    None => AgentItemOutcome::Rejected(
                        "Signing agent returned no result for this item".to_string(),
                    ),
                    Some(item) => match embedded_error(&item.error) {
                        Some(message) => AgentItemOutcome::Rejected(message),
                        None if !item.success => {
                            AgentItemOutcome::Rejected(rejection(item.error))
                        }
                        None => match item.signed_document_base64 {
                            Some(encoded) => match decode_artifact(&encoded) {
                                Ok(artifact) => AgentItemOutcome::Signed(artifact),
                                Err(e) => AgentItemOutcome::Rejected(e.to_string()),
                            },
                            None => AgentItemOutcome::Accepted,
                        },
                    },
                };
                AgentItemResult {
                    request_id: request.request_id.clone(),
                    outcome,
                }
            })
            .collect())
    }
}
