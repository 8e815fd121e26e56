//! Contract with the backend of record and its HTTP client

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use signing_types::{
    BatchCounts, BatchRequest, Document, DocumentId, DocumentSummary, DocumentType,
    NewSigningRequest, SignatureRecord, SignedArtifact, SigningRequest, StatusReport,
};
use thiserror::Error;
use tracing::debug;

use crate::config::BackendConfig;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("Backend unreachable: {0}")]
    Transport(String),

    #[error("Backend returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Unexpected backend response: {0}")]
    Decode(String),
}

impl BackendError {
    /// The backend understood the request and refused it
    pub fn is_rejection(&self) -> bool {
        matches!(self, BackendError::Status { status, .. } if (400..500).contains(status))
    }

    pub fn message(&self) -> String {
        match self {
            BackendError::Status { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            BackendError::Decode(e.to_string())
        } else {
            BackendError::Transport(e.to_string())
        }
    }
}

/// Operations the signing workflow needs from the backend of record
#[async_trait]
pub trait BackendOfRecord: Send + Sync {
    /// Mint a single-use signing request
    async fn create_signing_request(
        &self,
        draft: &NewSigningRequest,
    ) -> Result<SigningRequest, BackendError>;

    async fn signing_status(&self, request_id: &str) -> Result<StatusReport, BackendError>;

    /// Finalize a request with the agent-produced signed document
    async fn upload_signed(
        &self,
        request_id: &str,
        artifact: &SignedArtifact,
    ) -> Result<(), BackendError>;

    async fn create_batch(&self, drafts: &[NewSigningRequest])
        -> Result<BatchRequest, BackendError>;

    async fn batch_status(&self, batch_id: &str) -> Result<BatchCounts, BackendError>;

    /// Authoritative signature list of a document
    async fn signatures(
        &self,
        document_type: DocumentType,
        document_id: DocumentId,
    ) -> Result<Vec<SignatureRecord>, BackendError>;

    async fn document(
        &self,
        document_type: DocumentType,
        document_id: DocumentId,
    ) -> Result<Document, BackendError>;

    /// Documents of one category and year that are awaiting signature
    async fn awaiting_signature(
        &self,
        document_type: DocumentType,
        year: i32,
    ) -> Result<Vec<DocumentSummary>, BackendError>;
}

/// Error body shape returned by the backend
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreateBatchBody<'a> {
    items: &'a [NewSigningRequest],
}

#[derive(Debug, Deserialize)]
struct CreateBatchResponse {
    batch_id: String,
    items: Vec<SigningRequest>,
}

/// JSON-over-HTTP client for the backend of record
pub struct HttpBackend {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpBackend {
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, BackendError> {
        debug!("GET {}", path);
        let response = self.authorize(self.client.get(self.url(path))).send().await?;
        Self::decode(response).await
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, BackendError> {
        debug!("POST {}", path);
        let response = self
            .authorize(self.client.post(self.url(path)))
            .json(body)
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn check(response: Response) -> Result<Response, BackendError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .ok()
            .and_then(|b| b.error.or(b.message))
            .unwrap_or_else(|| {
                if text.is_empty() {
                    status.to_string()
                } else {
                    text
                }
            });
        Err(BackendError::Status {
            status: status.as_u16(),
            message,
        })
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, BackendError> {
        let response = Self::check(response).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))
    }
}

#[async_trait]
impl BackendOfRecord for HttpBackend {
    async fn create_signing_request(
        &self,
        draft: &NewSigningRequest,
    ) -> Result<SigningRequest, BackendError> {
        self.post("/api/signatures/requests", draft).await
    }

    async fn signing_status(&self, request_id: &str) -> Result<StatusReport, BackendError> {
        self.get(&format!("/api/signatures/requests/{}", request_id))
            .await
    }

    async fn upload_signed(
        &self,
        request_id: &str,
        artifact: &SignedArtifact,
    ) -> Result<(), BackendError> {
        let path = format!("/api/signatures/requests/{}/signed", request_id);
        debug!("POST {} ({} bytes)", path, artifact.bytes.len());
        let response = self
            .authorize(self.client.post(self.url(&path)))
            .json(artifact)
            .send()
            .await?;
        Self::check(response).await.map(|_| ())
    }

    async fn create_batch(
        &self,
        drafts: &[NewSigningRequest],
    ) -> Result<BatchRequest, BackendError> {
        let response: CreateBatchResponse = self
            .post("/api/signatures/batches", &CreateBatchBody { items: drafts })
            .await?;
        if response.items.len() != drafts.len() {
            return Err(BackendError::Decode(format!(
                "batch {} has {} items, expected {}",
                response.batch_id,
                response.items.len(),
                drafts.len()
            )));
        }
        Ok(BatchRequest::new(response.batch_id, response.items))
    }

    async fn batch_status(&self, batch_id: &str) -> Result<BatchCounts, BackendError> {
        self.get(&format!("/api/signatures/batches/{}", batch_id))
            .await
    }

    async fn signatures(
        &self,
        document_type: DocumentType,
        document_id: DocumentId,
    ) -> Result<Vec<SignatureRecord>, BackendError> {
        self.get(&format!(
            "/api/documents/{}/{}/signatures",
            document_type, document_id
        ))
        .await
    }

    async fn document(
        &self,
        document_type: DocumentType,
        document_id: DocumentId,
    ) -> Result<Document, BackendError> {
        self.get(&format!("/api/documents/{}/{}", document_type, document_id))
            .await
    }

    async fn awaiting_signature(
        &self,
        document_type: DocumentType,
        year: i32,
    ) -> Result<Vec<DocumentSummary>, BackendError> {
        self.get(&format!(
            "/api/documents/{}?year={}&status=awaiting_signature",
            document_type, year
        ))
        .await
    }
}
