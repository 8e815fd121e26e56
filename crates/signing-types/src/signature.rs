//! Signature records kept by the backend of record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::document::{DocumentId, DocumentType};
use crate::role::SignerRole;

/// Status of one role's signature on one document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureStatus {
    Pending,
    Signed,
    Error,
}

impl SignatureStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SignatureStatus::Pending)
    }
}

impl std::fmt::Display for SignatureStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignatureStatus::Pending => write!(f, "pending"),
            SignatureStatus::Signed => write!(f, "signed"),
            SignatureStatus::Error => write!(f, "error"),
        }
    }
}

/// Where the visible signature stamp goes, in PDF points
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub page: u32,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Default for Placement {
    fn default() -> Self {
        Self {
            page: 1,
            x: 0.0,
            y: 0.0,
            width: 200.0,
            height: 60.0,
        }
    }
}

/// A status change that would move a record backwards
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Signature {record_id} cannot move from {from} to {to}")]
pub struct TransitionError {
    pub record_id: String,
    pub from: SignatureStatus,
    pub to: SignatureStatus,
}

/// One role's signature slot on a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureRecord {
    pub id: String,
    pub document_id: DocumentId,
    pub document_type: DocumentType,
    pub signer_role: SignerRole,
    pub signer_name: String,
    pub signer_title: String,
    pub status: SignatureStatus,
    #[serde(default)]
    pub signed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub placement: Placement,
}

impl SignatureRecord {
    /// Apply a status change. Only pending -> signed and pending -> error are
    /// accepted; repeating the current terminal status is a no-op.
    pub fn transition(&mut self, to: SignatureStatus) -> Result<(), TransitionError> {
        match (self.status, to) {
            (from, to) if from == to => Ok(()),
            (SignatureStatus::Pending, SignatureStatus::Signed) => {
                self.status = to;
                self.signed_at.get_or_insert_with(Utc::now);
                Ok(())
            }
            (SignatureStatus::Pending, SignatureStatus::Error) => {
                self.status = to;
                Ok(())
            }
            (from, to) => Err(TransitionError {
                record_id: self.id.clone(),
                from,
                to,
            }),
        }
    }

    /// Merge a fresher copy of this record from the backend, keeping the
    /// local status monotonic
    pub fn merge_from(&mut self, fresh: &SignatureRecord) -> Result<(), TransitionError> {
        self.transition(fresh.status)?;
        if fresh.signed_at.is_some() {
            self.signed_at = fresh.signed_at;
        }
        self.signer_name = fresh.signer_name.clone();
        self.signer_title = fresh.signer_title.clone();
        Ok(())
    }
}
