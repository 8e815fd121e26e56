//! Domain model for municipal document signing
//!
//! Shared between the signing engine and its front ends: documents and their
//! lifecycle, signer roles, signature records, single-use signing requests,
//! batches, and the tamper-evident audit trail.

pub mod audit;
pub mod document;
pub mod request;
pub mod role;
pub mod signature;

pub use audit::{AuditAction, AuditChain, AuditEvent};
pub use document::{
    Document, DocumentId, DocumentSummary, DocumentType, LifecycleError, LifecycleStatus,
};
pub use request::{
    BatchCounts, BatchItemOutcome, BatchRequest, NewSigningRequest, SignedArtifact,
    SignerIdentity, SigningRequest, StatusReport,
};
pub use role::{RoleStatusMap, SignerBinding, SignerRole};
pub use signature::{Placement, SignatureRecord, SignatureStatus, TransitionError};
