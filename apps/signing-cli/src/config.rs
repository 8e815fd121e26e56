//! CLI configuration: engine settings plus the signing actor

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use signing_core::{Actor, SigningConfig};

/// Contents of the config file
///
/// Engine sections (`[backend]`, `[agent]`, `[polling]`, `[modes]`,
/// `[selection]`) sit at the top level next to `[actor]`.
#[derive(Debug, Default, Deserialize)]
pub struct CliConfig {
    #[serde(flatten)]
    pub signing: SigningConfig,
    #[serde(default)]
    pub actor: Option<Actor>,
}

impl CliConfig {
    pub fn from_toml(s: &str) -> Result<Self> {
        toml::from_str(s).context("Failed to parse configuration")
    }

    /// Explicit path, else the default location if it exists, else defaults.
    /// Environment overrides are applied last.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map(Path::to_path_buf).or_else(default_path);
        let mut config = match path {
            Some(path) if path.exists() => {
                let content = fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                Self::from_toml(&content)
                    .with_context(|| format!("Invalid configuration in {}", path.display()))?
            }
            _ => Self::default(),
        };

        config.signing.apply_env();
        config.signing.validate()?;
        Ok(config)
    }

    pub fn actor(&self) -> Result<&Actor> {
        self.actor
            .as_ref()
            .context("No [actor] section in configuration")
    }
}

fn default_path() -> Option<PathBuf> {
    let path = dirs::config_dir()?.join("municipal-signing").join("config.toml");
    path.exists().then_some(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use signing_core::ProtocolMode;
    use signing_types::{DocumentType, SignerRole};

    #[test]
    fn test_parses_actor_and_engine_sections() {
        let config = CliConfig::from_toml(
            r#"
            [backend]
            base_url = "https://prefeitura.example/api"

            [polling]
            single_attempts = 30

            [modes]
            default = "callback"
            mayor = "callback"

            [actor]
            id = "u-42"
            name = "Carlos Prado"
            identifier = "123.456.789-00"

            [[actor.bindings]]
            role = "mayor"
            document_type = "ordinance"

            [[actor.bindings]]
            role = "mayor"
            document_type = "per_diem"
            "#,
        )
        .unwrap();

        assert_eq!(config.signing.backend.base_url, "https://prefeitura.example/api");
        assert_eq!(config.signing.polling.single_attempts, 30);
        assert_eq!(config.signing.polling.batch_attempts, 120);
        assert_eq!(
            config.signing.modes.resolve(DocumentType::Ordinance, SignerRole::Mayor),
            ProtocolMode::Callback
        );

        let actor = config.actor().unwrap();
        assert_eq!(actor.id, "u-42");
        assert!(actor.can_sign(SignerRole::Mayor, DocumentType::PerDiem));
        assert!(!actor.can_sign(SignerRole::Secretary, DocumentType::Ordinance));
    }

    #[test]
    fn test_missing_actor_is_an_error() {
        let config = CliConfig::from_toml("").unwrap();
        assert!(config.actor().is_err());
        assert_eq!(config.signing, SigningConfig::default());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "[agent]\nbase_urls = [\"http://localhost:9000\"]\n",
        )
        .unwrap();

        let config = CliConfig::load(Some(&path)).unwrap();
        assert!(!config.signing.agent.base_urls.is_empty());
    }

    #[test]
    fn test_load_rejects_remote_agent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[agent]\nbase_urls = [\"http://192.168.0.10:8282\"]\n").unwrap();

        assert!(CliConfig::load(Some(&path)).is_err());
    }
}
