//! Official documents and their lifecycle

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::role::{RoleStatusMap, SignerRole};

/// Backend identifier of a document within its type
pub type DocumentId = u64;

/// Category of official document
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Ordinance,
    Decree,
    PerDiem,
}

impl DocumentType {
    pub const ALL: [DocumentType; 3] = [
        DocumentType::Ordinance,
        DocumentType::Decree,
        DocumentType::PerDiem,
    ];

    /// Path segment used by the backend of record
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Ordinance => "ordinance",
            DocumentType::Decree => "decree",
            DocumentType::PerDiem => "per_diem",
        }
    }
}

impl std::fmt::Display for DocumentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DocumentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "ordinance" => Ok(DocumentType::Ordinance),
            "decree" => Ok(DocumentType::Decree),
            "per_diem" | "perdiem" => Ok(DocumentType::PerDiem),
            other => Err(format!("Unknown document type: {}", other)),
        }
    }
}

/// Document lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStatus {
    Draft,
    Pending,
    Reviewed,
    AwaitingSignature,
    Signed,
    Published,
    Cancelled,
}

/// Rejected lifecycle move
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid lifecycle transition: {from} -> {to}")]
pub struct LifecycleError {
    pub from: LifecycleStatus,
    pub to: LifecycleStatus,
}

impl LifecycleStatus {
    /// Forward path, excluding cancellation
    const PATH: [LifecycleStatus; 6] = [
        LifecycleStatus::Draft,
        LifecycleStatus::Pending,
        LifecycleStatus::Reviewed,
        LifecycleStatus::AwaitingSignature,
        LifecycleStatus::Signed,
        LifecycleStatus::Published,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleStatus::Draft => "draft",
            LifecycleStatus::Pending => "pending",
            LifecycleStatus::Reviewed => "reviewed",
            LifecycleStatus::AwaitingSignature => "awaiting_signature",
            LifecycleStatus::Signed => "signed",
            LifecycleStatus::Published => "published",
            LifecycleStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleStatus::Published | LifecycleStatus::Cancelled)
    }

    /// The single forward step allowed from this status
    pub fn next(&self) -> Option<LifecycleStatus> {
        let idx = Self::PATH.iter().position(|s| s == self)?;
        Self::PATH.get(idx + 1).copied()
    }

    pub fn can_transition_to(&self, to: LifecycleStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        to == LifecycleStatus::Cancelled || self.next() == Some(to)
    }
}

impl std::fmt::Display for LifecycleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An official document as seen by the signing workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub number: String,
    pub year: i32,
    pub document_type: DocumentType,
    pub lifecycle_status: LifecycleStatus,
    #[serde(default)]
    pub signatures: RoleStatusMap,
}

impl Document {
    pub fn required_signer_roles(&self) -> Vec<SignerRole> {
        self.signatures.required_roles()
    }

    pub fn is_awaiting_signature(&self) -> bool {
        self.lifecycle_status == LifecycleStatus::AwaitingSignature
    }

    /// Move the document along its lifecycle
    pub fn advance(&mut self, to: LifecycleStatus) -> Result<(), LifecycleError> {
        if !self.lifecycle_status.can_transition_to(to) {
            return Err(LifecycleError {
                from: self.lifecycle_status,
                to,
            });
        }
        self.lifecycle_status = to;
        Ok(())
    }
}

/// Row of the visible document list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub id: DocumentId,
    pub number: String,
    pub year: i32,
    pub document_type: DocumentType,
    pub lifecycle_status: LifecycleStatus,
}

impl From<&Document> for DocumentSummary {
    fn from(doc: &Document) -> Self {
        Self {
            id: doc.id,
            number: doc.number.clone(),
            year: doc.year,
            document_type: doc.document_type,
            lifecycle_status: doc.lifecycle_status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document(status: LifecycleStatus) -> Document {
        Document {
            id: 7,
            number: "12/2026".to_string(),
            year: 2026,
            document_type: DocumentType::Decree,
            lifecycle_status: status,
            signatures: RoleStatusMap::default(),
        }
    }

    #[test]
    fn test_forward_path_is_one_step_at_a_time() {
        let mut doc = document(LifecycleStatus::Draft);
        assert!(doc.advance(LifecycleStatus::Pending).is_ok());
        assert!(doc.advance(LifecycleStatus::Reviewed).is_ok());
        assert!(doc.advance(LifecycleStatus::AwaitingSignature).is_ok());
        assert!(doc.advance(LifecycleStatus::Signed).is_ok());
        assert!(doc.advance(LifecycleStatus::Published).is_ok());
        assert!(doc.advance(LifecycleStatus::Cancelled).is_err());
    }

    #[test]
    fn test_skipping_and_reversing_are_rejected() {
        let mut doc = document(LifecycleStatus::Pending);
        let err = doc.advance(LifecycleStatus::Signed).unwrap_err();
        assert_eq!(err.from, LifecycleStatus::Pending);
        assert!(doc.advance(LifecycleStatus::Draft).is_err());
        assert_eq!(doc.lifecycle_status, LifecycleStatus::Pending);
    }

    #[test]
    fn test_cancel_from_any_non_terminal_state() {
        for status in LifecycleStatus::PATH {
            let mut doc = document(status);
            let res = doc.advance(LifecycleStatus::Cancelled);
            assert_eq!(res.is_ok(), status != LifecycleStatus::Published);
        }
        let mut doc = document(LifecycleStatus::Cancelled);
        assert!(doc.advance(LifecycleStatus::Cancelled).is_err());
    }

    #[test]
    fn test_wire_names() {
        let json = serde_json::to_string(&LifecycleStatus::AwaitingSignature).unwrap();
        assert_eq!(json, "\"awaiting_signature\"");
        let ty: DocumentType = serde_json::from_str("\"per_diem\"").unwrap();
        assert_eq!(ty, DocumentType::PerDiem);
        assert_eq!("per-diem".parse::<DocumentType>().unwrap(), DocumentType::PerDiem);
    }
}
