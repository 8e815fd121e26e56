//! Engine configuration
//!
//! Loaded from defaults, then an optional TOML file, then environment
//! overrides. Timeouts and poll bounds are fixed for the lifetime of an
//! orchestrator; individual calls cannot change them.

use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::mode::ModePolicy;
use crate::poll::PollPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse TOML configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SigningConfig {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub modes: ModePolicy,
    #[serde(default)]
    pub selection: SelectionConfig,
}

/// Backend of record connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_backend_url")]
    pub base_url: String,
    /// Session bearer token
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_backend_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_backend_url() -> String {
    "http://127.0.0.1:3001".to_string()
}

fn default_backend_timeout_secs() -> u64 {
    30
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_backend_url(),
            token: None,
            timeout_secs: default_backend_timeout_secs(),
        }
    }
}

/// Local signing agent connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Candidate agent addresses, all on loopback
    #[serde(default = "default_agent_urls")]
    pub base_urls: Vec<String>,
    /// Paths tried by the liveness probe
    #[serde(default = "default_probe_paths")]
    pub probe_paths: Vec<String>,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// Signing can wait on a PIN prompt, so this is generous
    #[serde(default = "default_agent_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub token: Option<String>,
}

fn default_agent_urls() -> Vec<String> {
    vec![
        "http://127.0.0.1:8282".to_string(),
        "http://127.0.0.1:8283".to_string(),
    ]
}

fn default_probe_paths() -> Vec<String> {
    vec!["/status".to_string(), "/health".to_string()]
}

fn default_probe_timeout_ms() -> u64 {
    3_000
}

fn default_agent_request_timeout_secs() -> u64 {
    120
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            base_urls: default_agent_urls(),
            probe_paths: default_probe_paths(),
            probe_timeout_ms: default_probe_timeout_ms(),
            request_timeout_secs: default_agent_request_timeout_secs(),
            token: None,
        }
    }
}

impl AgentConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Status polling bounds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_single_attempts")]
    pub single_attempts: u32,
    #[serde(default = "default_batch_attempts")]
    pub batch_attempts: u32,
    /// Consecutive unchanged batch polls, with errors present, that end the wait
    #[serde(default = "default_batch_stall_ticks")]
    pub batch_stall_ticks: u32,
}

fn default_interval_ms() -> u64 {
    1_000
}

fn default_single_attempts() -> u32 {
    60
}

fn default_batch_attempts() -> u32 {
    120
}

fn default_batch_stall_ticks() -> u32 {
    10
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            single_attempts: default_single_attempts(),
            batch_attempts: default_batch_attempts(),
            batch_stall_ticks: default_batch_stall_ticks(),
        }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn single(&self) -> PollPolicy {
        PollPolicy::new(self.interval(), self.single_attempts)
    }

    pub fn batch(&self) -> PollPolicy {
        PollPolicy::new(self.interval(), self.batch_attempts)
    }
}

/// Where selections are persisted
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectionConfig {
    #[serde(default)]
    pub store_path: Option<PathBuf>,
}

impl SelectionConfig {
    /// Configured path, or `<data dir>/municipal-signing/selection.json`
    pub fn resolved_path(&self) -> PathBuf {
        self.store_path.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("municipal-signing")
                .join("selection.json")
        })
    }
}

impl SigningConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `SIGNING_*` environment variables
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("SIGNING_BACKEND_URL") {
            self.backend.base_url = url;
        }
        if let Some(token) = lookup("SIGNING_BACKEND_TOKEN") {
            self.backend.token = Some(token);
        }
        if let Some(urls) = lookup("SIGNING_AGENT_URLS") {
            self.agent.base_urls = urls
                .split(',')
                .map(|u| u.trim().to_string())
                .filter(|u| !u.is_empty())
                .collect();
        }
        if let Some(token) = lookup("SIGNING_AGENT_TOKEN") {
            self.agent.token = Some(token);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.base_urls.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one agent URL is required".to_string(),
            ));
        }
        for url in &self.agent.base_urls {
            if !is_loopback_url(url) {
                return Err(ConfigError::Invalid(format!(
                    "agent URL must point at loopback: {}",
                    url
                )));
            }
        }
        if self.agent.probe_paths.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one probe path is required".to_string(),
            ));
        }
        if self.polling.single_attempts == 0 || self.polling.batch_attempts == 0 {
            return Err(ConfigError::Invalid(
                "poll attempt bounds must be positive".to_string(),
            ));
        }
        if self.polling.interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "poll interval must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// True if `url` parses and its host is `localhost` or a loopback address
pub fn is_loopback_url(url: &str) -> bool {
    let Ok(parsed) = reqwest::Url::parse(url) else {
        return false;
    };
    match parsed.host_str() {
        Some("localhost") => true,
        Some(host) => host
            .trim_start_matches('[')
            .trim_end_matches(']')
            .parse::<IpAddr>()
            .map(|ip| ip.is_loopback())
            .unwrap_or(false),
        None => false,
    }
}
