//! Signer roles and per-role signature status

use serde::{Deserialize, Serialize};

use crate::document::DocumentType;
use crate::signature::SignatureStatus;

/// A party whose signature a document may require
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignerRole {
    /// Chief executive of the municipality
    Mayor,
    /// Head of the issuing department
    Secretary,
}

impl SignerRole {
    /// Every supported role, in presentation order
    pub const ALL: [SignerRole; 2] = [SignerRole::Mayor, SignerRole::Secretary];

    pub fn as_str(&self) -> &'static str {
        match self {
            SignerRole::Mayor => "mayor",
            SignerRole::Secretary => "secretary",
        }
    }

    /// Title printed under the signature
    pub fn title(&self) -> &'static str {
        match self {
            SignerRole::Mayor => "Mayor",
            SignerRole::Secretary => "Municipal Secretary",
        }
    }
}

impl std::fmt::Display for SignerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SignerRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mayor" => Ok(SignerRole::Mayor),
            "secretary" => Ok(SignerRole::Secretary),
            other => Err(format!("Unknown signer role: {}", other)),
        }
    }
}

/// Signature status per role; `None` means the role is not required
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleStatusMap {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mayor: Option<SignatureStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secretary: Option<SignatureStatus>,
}

impl RoleStatusMap {
    /// Map where every listed role is required and still pending
    pub fn pending_for(roles: &[SignerRole]) -> Self {
        let mut map = Self::default();
        for role in roles {
            map.set(*role, SignatureStatus::Pending);
        }
        map
    }

    pub fn get(&self, role: SignerRole) -> Option<SignatureStatus> {
        match role {
            SignerRole::Mayor => self.mayor,
            SignerRole::Secretary => self.secretary,
        }
    }

    pub fn set(&mut self, role: SignerRole, status: SignatureStatus) {
        match role {
            SignerRole::Mayor => self.mayor = Some(status),
            SignerRole::Secretary => self.secretary = Some(status),
        }
    }

    /// Roles that must sign this document
    pub fn required_roles(&self) -> Vec<SignerRole> {
        SignerRole::ALL
            .into_iter()
            .filter(|r| self.get(*r).is_some())
            .collect()
    }

    /// Required roles whose signature is still outstanding
    pub fn pending_roles(&self) -> Vec<SignerRole> {
        SignerRole::ALL
            .into_iter()
            .filter(|r| self.get(*r) == Some(SignatureStatus::Pending))
            .collect()
    }

    pub fn is_fully_signed(&self) -> bool {
        let required = self.required_roles();
        !required.is_empty()
            && required
                .iter()
                .all(|r| self.get(*r) == Some(SignatureStatus::Signed))
    }
}

/// Authorization for an actor to sign one document type as one role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignerBinding {
    pub role: SignerRole,
    pub document_type: DocumentType,
}

impl SignerBinding {
    pub fn new(role: SignerRole, document_type: DocumentType) -> Self {
        Self {
            role,
            document_type,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trips_through_str() {
        for role in SignerRole::ALL {
            assert_eq!(role.as_str().parse::<SignerRole>().unwrap(), role);
        }
        assert!("treasurer".parse::<SignerRole>().is_err());
    }

    #[test]
    fn test_pending_roles_skip_signed_and_unrequired() {
        let mut map = RoleStatusMap::pending_for(&[SignerRole::Mayor, SignerRole::Secretary]);
        map.set(SignerRole::Mayor, SignatureStatus::Signed);

        assert_eq!(map.pending_roles(), vec![SignerRole::Secretary]);
        assert!(!map.is_fully_signed());

        map.set(SignerRole::Secretary, SignatureStatus::Signed);
        assert!(map.is_fully_signed());
    }

    #[test]
    fn test_empty_map_is_not_fully_signed() {
        let map = RoleStatusMap::default();
        assert!(map.required_roles().is_empty());
        assert!(!map.is_fully_signed());
    }

    #[test]
    fn test_map_serializes_only_required_roles() {
        let map = RoleStatusMap::pending_for(&[SignerRole::Secretary]);
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"secretary":"pending"}"#);
    }
}
