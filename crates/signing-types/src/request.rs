//! Single-use signing requests, batches and backend status reports

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::document::{DocumentId, DocumentType};
use crate::role::SignerRole;
use crate::signature::{Placement, SignatureStatus};

/// Who is signing, as printed on the stamp
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerIdentity {
    pub name: String,
    /// National registry or employee identifier
    pub identifier: String,
}

/// Input to the backend when minting a signing request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSigningRequest {
    pub document_type: DocumentType,
    pub document_id: DocumentId,
    pub signer_role: SignerRole,
    /// Ask the backend to embed the document bytes (synchronous agent mode)
    #[serde(default)]
    pub include_payload: bool,
}

/// A signing request minted by the backend. The token authorizes exactly one
/// completion attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SigningRequest {
    pub request_id: String,
    pub token: String,
    pub document_type: DocumentType,
    pub document_id: DocumentId,
    pub signer_role: SignerRole,
    #[serde(
        default,
        rename = "document_base64",
        with = "base64_bytes",
        skip_serializing_if = "Option::is_none"
    )]
    pub payload: Option<Vec<u8>>,
    #[serde(default)]
    pub placement: Placement,
    pub signer: SignerIdentity,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    used: bool,
}

impl SigningRequest {
    pub fn new(
        request_id: impl Into<String>,
        token: impl Into<String>,
        draft: &NewSigningRequest,
        signer: SignerIdentity,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            token: token.into(),
            document_type: draft.document_type,
            document_id: draft.document_id,
            signer_role: draft.signer_role,
            payload: None,
            placement: Placement::default(),
            signer,
            created_at: Utc::now(),
            used: false,
        }
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_placement(mut self, placement: Placement) -> Self {
        self.placement = placement;
        self
    }

    pub fn has_payload(&self) -> bool {
        self.payload.is_some()
    }

    pub fn is_used(&self) -> bool {
        self.used
    }

    /// Mark the token as spent. Returns false if it already was.
    pub fn mark_used(&mut self) -> bool {
        !std::mem::replace(&mut self.used, true)
    }
}

/// Signed document bytes produced by the agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedArtifact {
    #[serde(rename = "signed_document_base64", with = "base64_bytes::required")]
    pub bytes: Vec<u8>,
}

impl SignedArtifact {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Hex SHA-256 of the signed bytes
    pub fn sha256(&self) -> String {
        hex::encode(Sha256::digest(&self.bytes))
    }
}

/// Backend answer when polling one request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub status: SignatureStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl StatusReport {
    pub fn pending() -> Self {
        Self {
            status: SignatureStatus::Pending,
            error_message: None,
        }
    }

    pub fn signed() -> Self {
        Self {
            status: SignatureStatus::Signed,
            error_message: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: SignatureStatus::Error,
            error_message: Some(message.into()),
        }
    }
}

/// Aggregate counters reported by the batch-status endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCounts {
    pub signed: usize,
    pub pending: usize,
    pub errors: usize,
}

impl BatchCounts {
    pub fn total(&self) -> usize {
        self.signed + self.pending + self.errors
    }

    pub fn is_settled(&self) -> bool {
        self.pending == 0
    }
}

/// Terminal or in-flight outcome of one batch item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchItemOutcome {
    Pending,
    Signed,
    Error { message: String },
}

impl BatchItemOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, BatchItemOutcome::Pending)
    }
}

/// A batch of signing requests executed as one unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRequest {
    pub batch_id: String,
    pub items: Vec<SigningRequest>,
    /// Outcome per request_id
    #[serde(default)]
    pub outcomes: BTreeMap<String, BatchItemOutcome>,
}

impl BatchRequest {
    pub fn new(batch_id: impl Into<String>, items: Vec<SigningRequest>) -> Self {
        let outcomes = items
            .iter()
            .map(|i| (i.request_id.clone(), BatchItemOutcome::Pending))
            .collect();
        Self {
            batch_id: batch_id.into(),
            items,
            outcomes,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn outcome(&self, request_id: &str) -> Option<&BatchItemOutcome> {
        self.outcomes.get(request_id)
    }

    /// Record an item outcome. Terminal outcomes are final.
    pub fn record(&mut self, request_id: &str, outcome: BatchItemOutcome) {
        let slot = self
            .outcomes
            .entry(request_id.to_string())
            .or_insert(BatchItemOutcome::Pending);
        if !slot.is_terminal() {
            *slot = outcome;
        }
    }

    /// Counters derived from per-item outcomes
    pub fn counts(&self) -> BatchCounts {
        let mut counts = BatchCounts::default();
        for item in &self.items {
            match self.outcomes.get(&item.request_id) {
                Some(BatchItemOutcome::Signed) => counts.signed += 1,
                Some(BatchItemOutcome::Error { .. }) => counts.errors += 1,
                Some(BatchItemOutcome::Pending) | None => counts.pending += 1,
            }
        }
        counts
    }

    pub fn is_complete(&self) -> bool {
        self.counts().pending == 0
    }
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => s.serialize_some(&BASE64.encode(bytes)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(d)?;
        encoded
            .map(|e| BASE64.decode(e).map_err(serde::de::Error::custom))
            .transpose()
    }

    pub mod required {
        use super::*;

        pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
            s.serialize_str(&BASE64.encode(bytes))
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
            let encoded = String::deserialize(d)?;
            BASE64.decode(encoded).map_err(serde::de::Error::custom)
        }
    }
}
