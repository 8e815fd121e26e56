//! Confirming a signature with the backend after the agent has acted

use std::sync::Arc;

use serde::Serialize;
use signing_types::{
    DocumentId, DocumentType, SignatureRecord, SignatureStatus, SignedArtifact, SignerRole,
    SigningRequest,
};
use tracing::{info, warn};

use crate::backend::{BackendError, BackendOfRecord};
use crate::error::SigningError;
use crate::poll::{poll_until, PollOutcome, PollPolicy};

/// How a signature came to be confirmed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "via", rename_all = "snake_case")]
pub enum Confirmation {
    /// Agent returned the artifact and the backend accepted it
    Uploaded { sha256: String },
    /// Status polling saw `signed`
    Polled { attempts: u32 },
    /// Polling ran out but the signature list shows the role as signed
    FallbackVerified { attempts: u32 },
}

pub struct CompletionReconciler {
    backend: Arc<dyn BackendOfRecord>,
    policy: PollPolicy,
}

impl CompletionReconciler {
    pub fn new(backend: Arc<dyn BackendOfRecord>, policy: PollPolicy) -> Self {
        Self { backend, policy }
    }

    pub async fn upload(
        &self,
        request: &SigningRequest,
        artifact: &SignedArtifact,
    ) -> Result<Confirmation, SigningError> {
        self.backend
            .upload_signed(&request.request_id, artifact)
            .await
            .map_err(|e| SigningError::UploadFailed(e.message()))?;

        info!(
            "Uploaded signed document for request {} ({} bytes)",
            request.request_id,
            artifact.bytes.len()
        );
        Ok(Confirmation::Uploaded {
            sha256: artifact.sha256(),
        })
    }

    /// Poll request status until terminal; on exhaustion fall back to the
    /// signature list before giving up.
    pub async fn await_confirmation(
        &self,
        request: &SigningRequest,
    ) -> Result<Confirmation, SigningError> {
        let outcome = poll_until(
            self.policy,
            |_| self.backend.signing_status(&request.request_id),
            |report| report.status.is_terminal(),
        )
        .await;

        match outcome {
            PollOutcome::Ready { value, attempts } => match value.status {
                SignatureStatus::Signed => {
                    info!(
                        "Request {} confirmed after {} poll(s)",
                        request.request_id, attempts
                    );
                    Ok(Confirmation::Polled { attempts })
                }
                _ => Err(SigningError::AgentSigningError(value.error_message.unwrap_or_else(
                    || "The server marked the signature as failed".to_string(),
                ))),
            },
            PollOutcome::Exhausted { attempts, .. } => {
                warn!(
                    "Request {} still pending after {} poll(s); checking signature list",
                    request.request_id, attempts
                );
                let signed = match self
                    .is_signed(request.document_type, request.document_id, request.signer_role)
                    .await
                {
                    Ok(signed) => signed,
                    Err(e) => {
                        warn!("Fallback verification failed: {}", e);
                        false
                    }
                };
                if signed {
                    Ok(Confirmation::FallbackVerified { attempts })
                } else {
                    Err(SigningError::PollTimeout {
                        request_id: request.request_id.clone(),
                        attempts,
                    })
                }
            }
        }
    }

    /// Whether the authoritative list shows `role` as signed
    pub async fn is_signed(
        &self,
        document_type: DocumentType,
        document_id: DocumentId,
        role: SignerRole,
    ) -> Result<bool, BackendError> {
        Ok(self
            .status_of(document_type, document_id, role)
            .await?
            .is_some_and(|s| s == SignatureStatus::Signed))
    }

    pub async fn status_of(
        &self,
        document_type: DocumentType,
        document_id: DocumentId,
        role: SignerRole,
    ) -> Result<Option<SignatureStatus>, BackendError> {
        let records = self.backend.signatures(document_type, document_id).await?;
        Ok(records
            .iter()
            .find(|r| r.signer_role == role)
            .map(|r| r.status))
    }

    pub async fn refresh(
        &self,
        document_type: DocumentType,
        document_id: DocumentId,
    ) -> Result<Vec<SignatureRecord>, BackendError> {
        self.backend.signatures(document_type, document_id).await
    }
}
