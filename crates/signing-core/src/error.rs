//! Error taxonomy for signing attempts and its user-facing projection

use serde::Serialize;
use signing_types::SignerRole;
use thiserror::Error;

use crate::agent::AgentError;
use crate::backend::BackendError;

/// Why a signing attempt did not complete
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SigningError {
    #[error("Signing agent is not reachable: {0}")]
    AgentUnavailable(String),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Request rejected: {0}")]
    ValidationRejected(String),

    #[error("Signing agent reported an error: {0}")]
    AgentSigningError(String),

    #[error("Signed document could not be uploaded: {0}")]
    UploadFailed(String),

    #[error("Signature for request {request_id} not confirmed after {attempts} status checks")]
    PollTimeout { request_id: String, attempts: u32 },

    #[error("No pending signature this user is allowed to sign")]
    NoEligibleSignature,

    #[error("More than one role can sign; choose one of {0:?}")]
    RoleChoiceRequired(Vec<SignerRole>),

    #[error("Another signing operation is already in progress")]
    SigningInProgress,

    #[error("Signing request {0} was already used")]
    RequestAlreadyUsed(String),
}

impl SigningError {
    /// Map a failure to create or query something on the backend
    pub fn from_backend(err: BackendError) -> Self {
        if err.is_rejection() {
            SigningError::ValidationRejected(err.message())
        } else {
            SigningError::BackendUnavailable(err.message())
        }
    }

    pub fn from_agent(err: AgentError) -> Self {
        match err {
            AgentError::Unavailable { tried } => SigningError::AgentUnavailable(tried.join(", ")),
            other => SigningError::AgentSigningError(other.agent_message()),
        }
    }

    /// Refusals happen before any network call and are not faults
    pub fn is_refusal(&self) -> bool {
        matches!(
            self,
            SigningError::NoEligibleSignature
                | SigningError::RoleChoiceRequired(_)
                | SigningError::SigningInProgress
        )
    }

    pub fn notification(&self) -> Notification {
        let (severity, title) = match self {
            SigningError::AgentUnavailable(_) => (Severity::Error, "Signing agent not found"),
            SigningError::BackendUnavailable(_) => (Severity::Error, "Server unavailable"),
            SigningError::ValidationRejected(_) => (Severity::Warning, "Signature not allowed"),
            SigningError::AgentSigningError(_) => (Severity::Error, "Signing failed"),
            SigningError::UploadFailed(_) => (Severity::Error, "Upload failed"),
            SigningError::PollTimeout { .. } => (Severity::Error, "Signature timed out"),
            SigningError::NoEligibleSignature => (Severity::Info, "Nothing to sign"),
            SigningError::RoleChoiceRequired(_) => (Severity::Info, "Choose a role"),
            SigningError::SigningInProgress => (Severity::Warning, "Please wait"),
            SigningError::RequestAlreadyUsed(_) => (Severity::Error, "Signing request expired"),
        };
        Notification {
            severity,
            title: title.to_string(),
            message: self.to_string(),
        }
    }
}

/// Notification severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

/// Message shown to the user when an attempt ends
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub severity: Severity,
    pub title: String,
    pub message: String,
}

impl Notification {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Success,
            title: "Signed".to_string(),
            message: message.into(),
        }
    }

    pub fn warning(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            title: title.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_rejections_become_validation_errors() {
        let err = SigningError::from_backend(BackendError::Status {
            status: 409,
            message: "role already signed".to_string(),
        });
        assert_eq!(
            err,
            SigningError::ValidationRejected("role already signed".to_string())
        );

        let err = SigningError::from_backend(BackendError::Status {
            status: 503,
            message: "maintenance".to_string(),
        });
        assert!(matches!(err, SigningError::BackendUnavailable(_)));

        let err = SigningError::from_backend(BackendError::Transport("refused".to_string()));
        assert!(matches!(err, SigningError::BackendUnavailable(_)));
    }

    #[test]
    fn test_agent_message_is_surfaced_verbatim() {
        let err = SigningError::from_agent(AgentError::Rejected("PIN blocked".to_string()));
        assert_eq!(err, SigningError::AgentSigningError("PIN blocked".to_string()));
        assert!(err.notification().message.contains("PIN blocked"));
    }

    #[test]
    fn test_refusals_are_not_faults() {
        assert!(SigningError::NoEligibleSignature.is_refusal());
        assert!(!SigningError::UploadFailed("x".to_string()).is_refusal());
        assert_eq!(
            SigningError::NoEligibleSignature.notification().severity,
            Severity::Info
        );
    }
}
