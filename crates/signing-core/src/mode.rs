//! Agent completion modes and how they are chosen
//!
//! The signing agent completes a request in one of two ways:
//!
//! - **Synchronous**: the request carries the document bytes and the agent
//!   answers with the signed document inline; the caller uploads it.
//! - **Callback**: the request carries only the request id and token; the agent
//!   acknowledges, signs out of band, and the caller polls the backend.
//!
//! Which one applies is a property of the (document type, signer role) pair.

use serde::{Deserialize, Serialize};
use signing_types::{DocumentType, SignerRole};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolMode {
    Synchronous,
    Callback,
}

impl ProtocolMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolMode::Synchronous => "synchronous",
            ProtocolMode::Callback => "callback",
        }
    }

    /// Whether the backend should embed the document in the signing request
    pub fn wants_payload(&self) -> bool {
        matches!(self, ProtocolMode::Synchronous)
    }
}

impl std::fmt::Display for ProtocolMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mode for one exact (document type, role) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeOverride {
    pub document_type: DocumentType,
    pub role: SignerRole,
    pub mode: ProtocolMode,
}

/// Lookup table resolving the completion mode
///
/// Precedence: exact override, then per-role setting, then `default`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModePolicy {
    #[serde(default = "default_mode")]
    pub default: ProtocolMode,
    #[serde(default = "default_mayor_mode")]
    pub mayor: Option<ProtocolMode>,
    #[serde(default)]
    pub secretary: Option<ProtocolMode>,
    #[serde(default)]
    pub overrides: Vec<ModeOverride>,
}

fn default_mode() -> ProtocolMode {
    ProtocolMode::Callback
}

fn default_mayor_mode() -> Option<ProtocolMode> {
    Some(ProtocolMode::Synchronous)
}

impl Default for ModePolicy {
    fn default() -> Self {
        Self {
            default: default_mode(),
            mayor: default_mayor_mode(),
            secretary: None,
            overrides: Vec::new(),
        }
    }
}

impl ModePolicy {
    /// Same mode for every pair
    pub fn uniform(mode: ProtocolMode) -> Self {
        Self {
            default: mode,
            mayor: None,
            secretary: None,
            overrides: Vec::new(),
        }
    }

    pub fn with_override(
        mut self,
        document_type: DocumentType,
        role: SignerRole,
        mode: ProtocolMode,
    ) -> Self {
        self.overrides.push(ModeOverride {
            document_type,
            role,
            mode,
        });
        self
    }

    pub fn resolve(&self, document_type: DocumentType, role: SignerRole) -> ProtocolMode {
        if let Some(o) = self
            .overrides
            .iter()
            .find(|o| o.document_type == document_type && o.role == role)
        {
            return o.mode;
        }
        let by_role = match role {
            SignerRole::Mayor => self.mayor,
            SignerRole::Secretary => self.secretary,
        };
        by_role.unwrap_or(self.default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table() {
        let policy = ModePolicy::default();
        assert_eq!(
            policy.resolve(DocumentType::Decree, SignerRole::Mayor),
            ProtocolMode::Synchronous
        );
        assert_eq!(
            policy.resolve(DocumentType::Decree, SignerRole::Secretary),
            ProtocolMode::Callback
        );
    }

    #[test]
    fn test_override_wins_over_role() {
        let policy = ModePolicy::default().with_override(
            DocumentType::PerDiem,
            SignerRole::Mayor,
            ProtocolMode::Callback,
        );
        assert_eq!(
            policy.resolve(DocumentType::PerDiem, SignerRole::Mayor),
            ProtocolMode::Callback
        );
        assert_eq!(
            policy.resolve(DocumentType::Ordinance, SignerRole::Mayor),
            ProtocolMode::Synchronous
        );
    }

    #[test]
    fn test_uniform_policy() {
        let policy = ModePolicy::uniform(ProtocolMode::Synchronous);
        for ty in DocumentType::ALL {
            for role in SignerRole::ALL {
                assert_eq!(policy.resolve(ty, role), ProtocolMode::Synchronous);
            }
        }
    }
}
