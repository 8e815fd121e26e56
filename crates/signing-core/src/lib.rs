//! Signature orchestration for municipal documents
//!
//! Private-key operations are delegated to a signing agent running on the
//! signer's machine; the backend of record owns documents and signatures.
//! This crate drives one attempt at a time between the two:
//!
//! 1. resolve which role the actor may sign as ([`eligibility`])
//! 2. probe the local agent ([`agent`])
//! 3. mint a single-use request, or a batch of them ([`request`], [`batch`])
//! 4. hand it to the agent, then upload or poll until confirmed ([`reconcile`])
//!
//! Progress is published as a phase state machine ([`progress`]) and every
//! attempt ends in a [`Completion`] the caller acknowledges.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use signing_core::{HttpBackend, LocalAgentClient, SigningConfig, SigningOrchestrator};
//!
//! # async fn run(document: signing_types::Document, actor: signing_core::Actor) -> anyhow::Result<()> {
//! let config = SigningConfig::default();
//! let orchestrator = SigningOrchestrator::new(
//!     Arc::new(HttpBackend::new(&config.backend)?),
//!     Arc::new(LocalAgentClient::new(&config.agent)?),
//!     &config,
//! );
//! let completion = orchestrator.sign_document(&document, &actor, None).await;
//! println!("{}", completion.notification.message);
//! let outcome = completion.acknowledge()?;
//! println!("signed as {}", outcome.role);
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod backend;
pub mod batch;
pub mod config;
pub mod eligibility;
pub mod error;
pub mod mode;
pub mod orchestrator;
pub mod poll;
pub mod progress;
pub mod reconcile;
pub mod request;
pub mod selection;

pub use agent::{AgentError, AgentItemOutcome, AgentItemResult, AgentOutcome, LocalAgentClient, ProbeReport, SigningAgent};
pub use backend::{BackendError, BackendOfRecord, HttpBackend};
pub use batch::{BatchItemReport, BatchSummary};
pub use config::{ConfigError, SigningConfig};
pub use eligibility::{eligible_roles, resolve_batch, Actor, Eligibility, SkippedDocument};
pub use error::{Notification, Severity, SigningError};
pub use mode::{ModePolicy, ProtocolMode};
pub use orchestrator::{Completion, SigningOrchestrator, SingleOutcome};
pub use poll::{poll_until, PollOutcome, PollPolicy};
pub use progress::{Phase, ProgressSnapshot, ProgressTracker};
pub use reconcile::{CompletionReconciler, Confirmation};
pub use request::{PreparedRequest, SigningRequestBuilder};
pub use selection::{
    FileSelectionStore, MemorySelectionStore, ScopeKey, SelectionManager, SelectionSet,
    SelectionStore, SelectionStoreError,
};
