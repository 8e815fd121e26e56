//! Which signer roles an actor may exercise on a document

use serde::{Deserialize, Serialize};
use signing_types::{Document, DocumentId, DocumentType, SignerBinding, SignerIdentity, SignerRole};

use crate::error::SigningError;

/// Most roles a single document can offer
pub const MAX_ROLE_OPTIONS: usize = 2;

/// The signing user, with the (role, document type) pairs they are bound to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub name: String,
    pub identifier: String,
    #[serde(default)]
    pub bindings: Vec<SignerBinding>,
}

impl Actor {
    pub fn new(id: impl Into<String>, name: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            identifier: identifier.into(),
            bindings: Vec::new(),
        }
    }

    pub fn with_binding(mut self, role: SignerRole, document_type: DocumentType) -> Self {
        self.bindings.push(SignerBinding::new(role, document_type));
        self
    }

    pub fn can_sign(&self, role: SignerRole, document_type: DocumentType) -> bool {
        self.bindings
            .iter()
            .any(|b| b.role == role && b.document_type == document_type)
    }

    pub fn identity(&self) -> SignerIdentity {
        SignerIdentity {
            name: self.name.clone(),
            identifier: self.identifier.clone(),
        }
    }
}

/// Roles pending on `document` that `actor` is bound to, in fixed role order
pub fn eligible_roles(document: &Document, actor: &Actor) -> Vec<SignerRole> {
    let pending = document.signatures.pending_roles();
    let mut roles: Vec<SignerRole> = SignerRole::ALL
        .into_iter()
        .filter(|role| pending.contains(role))
        .filter(|role| actor.can_sign(*role, document.document_type))
        .collect();
    roles.dedup();
    roles.truncate(MAX_ROLE_OPTIONS);
    roles
}

/// Result of resolving eligibility on one document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eligibility {
    None,
    Single(SignerRole),
    Choice(Vec<SignerRole>),
}

impl Eligibility {
    pub fn of(document: &Document, actor: &Actor) -> Self {
        Self::from_roles(eligible_roles(document, actor))
    }

    fn from_roles(mut roles: Vec<SignerRole>) -> Self {
        match roles.len() {
            0 => Eligibility::None,
            1 => Eligibility::Single(roles.remove(0)),
            _ => Eligibility::Choice(roles),
        }
    }

    pub fn roles(&self) -> Vec<SignerRole> {
        match self {
            Eligibility::None => Vec::new(),
            Eligibility::Single(role) => vec![*role],
            Eligibility::Choice(roles) => roles.clone(),
        }
    }

    /// Settle on one role. A requested role must be among the eligible ones.
    pub fn select(&self, requested: Option<SignerRole>) -> Result<SignerRole, SigningError> {
        match (self, requested) {
            (Eligibility::None, _) => Err(SigningError::NoEligibleSignature),
            (_, Some(role)) if self.roles().contains(&role) => Ok(role),
            (_, Some(_)) => Err(SigningError::NoEligibleSignature),
            (Eligibility::Single(role), None) => Ok(*role),
            (Eligibility::Choice(roles), None) => Err(SigningError::RoleChoiceRequired(roles.clone())),
        }
    }
}

/// A document left out of a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedDocument {
    pub document_type: DocumentType,
    pub document_id: DocumentId,
    pub number: String,
    pub reason: String,
}

/// Documents a batch will sign under one role
#[derive(Debug, Clone)]
pub struct BatchPlan<'a> {
    pub role: SignerRole,
    pub documents: Vec<&'a Document>,
    pub skipped: Vec<SkippedDocument>,
}

/// Pick the single role for a batch and split documents into signable and skipped
pub fn resolve_batch<'a>(
    documents: &'a [Document],
    actor: &Actor,
    requested: Option<SignerRole>,
) -> Result<BatchPlan<'a>, SigningError> {
    let per_document: Vec<Vec<SignerRole>> =
        documents.iter().map(|d| eligible_roles(d, actor)).collect();

    let candidates: Vec<SignerRole> = SignerRole::ALL
        .into_iter()
        .filter(|role| per_document.iter().any(|roles| roles.contains(role)))
        .collect();

    let role = match requested {
        Some(role) if candidates.contains(&role) => role,
        Some(_) => return Err(SigningError::NoEligibleSignature),
        None => Eligibility::from_roles(candidates).select(None)?,
    };

    let mut plan = BatchPlan {
        role,
        documents: Vec::new(),
        skipped: Vec::new(),
    };
    for (document, roles) in documents.iter().zip(per_document) {
        if roles.contains(&role) {
            plan.documents.push(document);
        } else {
            plan.skipped.push(SkippedDocument {
                document_type: document.document_type,
                document_id: document.id,
                number: document.number.clone(),
                reason: format!("no pending {} signature for this user", role),
            });
        }
    }
    Ok(plan)
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;
    use signing_types::SignatureStatus;

    fn role_strategy() -> impl Strategy<Value = SignerRole> {
        prop_oneof![Just(SignerRole::Mayor), Just(SignerRole::Secretary)]
    }

    fn type_strategy() -> impl Strategy<Value = DocumentType> {
        prop_oneof![
            Just(DocumentType::Ordinance),
            Just(DocumentType::Decree),
            Just(DocumentType::PerDiem)
        ]
    }

    fn status_strategy() -> impl Strategy<Value = Option<SignatureStatus>> {
        prop_oneof![
            Just(None),
            Just(Some(SignatureStatus::Pending)),
            Just(Some(SignatureStatus::Signed)),
            Just(Some(SignatureStatus::Error))
        ]
    }

    proptest! {
        /// Offered roles are few, pending, bound and unique
        #[test]
        fn eligible_roles_are_pending_and_bound(
            document_type in type_strategy(),
            mayor in status_strategy(),
            secretary in status_strategy(),
            bindings in prop::collection::vec((role_strategy(), type_strategy()), 0..8),
        ) {
            let mut doc = super::tests::document(1, document_type, &[]);
            doc.signatures.mayor = mayor;
            doc.signatures.secretary = secretary;
            let mut actor = Actor::new("u", "n", "i");
            for (role, ty) in bindings {
                actor = actor.with_binding(role, ty);
            }

            let roles = eligible_roles(&doc, &actor);
            prop_assert!(roles.len() <= MAX_ROLE_OPTIONS);
            for role in &roles {
                prop_assert_eq!(doc.signatures.get(*role), Some(SignatureStatus::Pending));
                prop_assert!(actor.can_sign(*role, document_type));
            }
            let mut unique = roles.clone();
            unique.dedup();
            prop_assert_eq!(unique, roles);
        }
    }
}
