//! Minting single-use signing requests

use std::sync::Arc;

use signing_types::{
    Document, NewSigningRequest, SignatureStatus, SignerRole, SigningRequest,
};
use tracing::{debug, info, warn};

use crate::backend::BackendOfRecord;
use crate::eligibility::Actor;
use crate::error::SigningError;
use crate::mode::{ModePolicy, ProtocolMode};

/// A minted request and the completion mode it will use
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRequest {
    pub request: SigningRequest,
    pub mode: ProtocolMode,
}

pub struct SigningRequestBuilder {
    backend: Arc<dyn BackendOfRecord>,
    modes: ModePolicy,
}

impl SigningRequestBuilder {
    pub fn new(backend: Arc<dyn BackendOfRecord>, modes: ModePolicy) -> Self {
        Self { backend, modes }
    }

    pub fn modes(&self) -> &ModePolicy {
        &self.modes
    }

    /// Re-check the role against the authoritative signature list, then ask
    /// the backend for a request.
    pub async fn prepare(
        &self,
        document: &Document,
        role: SignerRole,
        actor: &Actor,
    ) -> Result<PreparedRequest, SigningError> {
        let records = self
            .backend
            .signatures(document.document_type, document.id)
            .await
            .map_err(SigningError::from_backend)?;

        let current = records
            .iter()
            .find(|r| r.signer_role == role)
            .map(|r| r.status);
        if current != Some(SignatureStatus::Pending) {
            let state = current.map_or_else(|| "not required".to_string(), |s| s.to_string());
            return Err(SigningError::ValidationRejected(format!(
                "{} signature on {} {} is {}",
                role, document.document_type, document.number, state
            )));
        }

        let mut mode = self.modes.resolve(document.document_type, role);
        let draft = NewSigningRequest {
            document_type: document.document_type,
            document_id: document.id,
            signer_role: role,
            include_payload: mode.wants_payload(),
        };

        let mut request = self
            .backend
            .create_signing_request(&draft)
            .await
            .map_err(SigningError::from_backend)?;

        if request.document_id != document.id || request.signer_role != role {
            return Err(SigningError::ValidationRejected(format!(
                "backend issued request {} for {} {} as {}",
                request.request_id, request.document_type, request.document_id, request.signer_role
            )));
        }

        if mode == ProtocolMode::Synchronous && !request.has_payload() {
            warn!(
                "Request {} has no document payload; completing by callback",
                request.request_id
            );
            mode = ProtocolMode::Callback;
        }

        if request.signer.name.trim().is_empty() {
            debug!("Backend left signer blank; using actor {}", actor.id);
            request.signer = actor.identity();
        }

        info!(
            "Prepared request {} for {} {} as {} ({})",
            request.request_id, document.document_type, document.number, role, mode
        );
        Ok(PreparedRequest { request, mode })
    }
}
