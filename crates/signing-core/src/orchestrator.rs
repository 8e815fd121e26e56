//! Entry point for signing attempts
//!
//! [`SigningOrchestrator`] owns the busy flag, the progress tracker and the
//! audit trail. Every attempt returns a [`Completion`]; the busy flag stays
//! taken and the progress display stays on its final phase until the caller
//! acknowledges it.

use std::sync::{Arc, Mutex};

use futures::future::join_all;
use signing_types::{
    AuditAction, AuditChain, Document, DocumentId, DocumentType, SignatureRecord, SignerRole,
};
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tracing::{error, info, instrument, warn};

use crate::agent::{AgentOutcome, SigningAgent};
use crate::backend::BackendOfRecord;
use crate::batch::BatchSummary;
use crate::config::{PollingConfig, SigningConfig};
use crate::eligibility::{resolve_batch, Actor, Eligibility, SkippedDocument};
use crate::error::{Notification, SigningError};
use crate::mode::{ModePolicy, ProtocolMode};
use crate::progress::{Phase, ProgressSnapshot, ProgressTracker};
use crate::reconcile::{CompletionReconciler, Confirmation};
use crate::request::SigningRequestBuilder;
use crate::selection::SelectionSet;

/// Keeps the busy flag and the final progress phase until dropped
#[derive(Debug)]
pub(crate) struct AttemptHold {
    progress: Arc<ProgressTracker>,
    _permit: OwnedSemaphorePermit,
}

impl Drop for AttemptHold {
    fn drop(&mut self) {
        if let Err(e) = self.progress.acknowledge() {
            warn!("{}", e);
        }
    }
}

/// Final state of one attempt, waiting to be acknowledged
#[derive(Debug)]
#[must_use = "the busy flag is held until the completion is acknowledged"]
pub struct Completion<T> {
    pub result: Result<T, SigningError>,
    pub notification: Notification,
    hold: Option<AttemptHold>,
}

impl<T> Completion<T> {
    fn refused(err: SigningError) -> Self {
        info!("Signing refused: {}", err);
        Self {
            notification: err.notification(),
            result: Err(err),
            hold: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    /// Whether this attempt still holds the busy flag
    pub fn is_holding(&self) -> bool {
        self.hold.is_some()
    }

    /// Release the busy flag, reset progress to idle and hand back the result
    pub fn acknowledge(self) -> Result<T, SigningError> {
        drop(self.hold);
        self.result
    }
}

/// Result of a successful single-document signature
#[derive(Debug, Clone, PartialEq)]
pub struct SingleOutcome {
    pub document_type: DocumentType,
    pub document_id: DocumentId,
    pub role: SignerRole,
    pub request_id: String,
    pub mode: ProtocolMode,
    pub confirmation: Confirmation,
    /// Signature list as the backend reports it after confirmation
    pub signatures: Vec<SignatureRecord>,
}

pub struct SigningOrchestrator {
    pub(crate) backend: Arc<dyn BackendOfRecord>,
    pub(crate) agent: Arc<dyn SigningAgent>,
    pub(crate) builder: SigningRequestBuilder,
    pub(crate) reconciler: CompletionReconciler,
    pub(crate) polling: PollingConfig,
    busy: Arc<Semaphore>,
    pub(crate) progress: Arc<ProgressTracker>,
    audit: Mutex<AuditChain>,
}

impl SigningOrchestrator {
    pub fn new(
        backend: Arc<dyn BackendOfRecord>,
        agent: Arc<dyn SigningAgent>,
        config: &SigningConfig,
    ) -> Self {
        Self::with_parts(backend, agent, config.modes.clone(), config.polling.clone())
    }

    pub fn with_parts(
        backend: Arc<dyn BackendOfRecord>,
        agent: Arc<dyn SigningAgent>,
        modes: ModePolicy,
        polling: PollingConfig,
    ) -> Self {
        Self {
            builder: SigningRequestBuilder::new(backend.clone(), modes),
            reconciler: CompletionReconciler::new(backend.clone(), polling.single()),
            backend,
            agent,
            polling,
            busy: Arc::new(Semaphore::new(1)),
            progress: Arc::new(ProgressTracker::new()),
            audit: Mutex::new(AuditChain::new()),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.available_permits() == 0
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<ProgressSnapshot> {
        self.progress.subscribe()
    }

    pub fn progress(&self) -> ProgressSnapshot {
        self.progress.current()
    }

    /// Copy of the audit trail so far
    pub fn audit_trail(&self) -> AuditChain {
        self.audit.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Hand over the events recorded so far and start a fresh chain
    pub fn take_audit_trail(&self) -> AuditChain {
        let mut chain = self.audit.lock().unwrap_or_else(|p| p.into_inner());
        std::mem::replace(&mut *chain, AuditChain::new())
    }

    pub(crate) fn record(&self, action: AuditAction, actor: &Actor, subject: &str) {
        let mut chain = self.audit.lock().unwrap_or_else(|p| p.into_inner());
        chain.append(action, &actor.id, subject, None);
    }

    pub(crate) fn enter(&self, phase: Phase) {
        if let Err(e) = self.progress.advance(phase) {
            error!("{}", e);
        }
    }

    fn try_hold(&self) -> Result<AttemptHold, SigningError> {
        let permit = self
            .busy
            .clone()
            .try_acquire_owned()
            .map_err(|_| SigningError::SigningInProgress)?;
        Ok(AttemptHold {
            progress: self.progress.clone(),
            _permit: permit,
        })
    }

    /// Close an attempt: set the final phase, log a failure to the audit
    /// trail and build the completion.
    pub(crate) fn finish<T>(
        &self,
        hold: AttemptHold,
        actor: &Actor,
        subject: &str,
        result: Result<T, SigningError>,
        on_success: impl FnOnce(&T) -> Notification,
    ) -> Completion<T> {
        let notification = match &result {
            Ok(value) => {
                self.enter(Phase::Completed);
                on_success(value)
            }
            Err(err) => {
                error!("Signing {} failed: {}", subject, err);
                if let Err(e) = self.progress.fail(err.to_string()) {
                    error!("{}", e);
                }
                self.record(
                    AuditAction::Failed {
                        reason: err.to_string(),
                    },
                    actor,
                    subject,
                );
                err.notification()
            }
        };
        Completion {
            result,
            notification,
            hold: Some(hold),
        }
    }

    /// Sign one document as `role`, or as the only role the actor can use
    #[instrument(skip(self, document, actor), fields(document = %document.number, kind = %document.document_type))]
    pub async fn sign_document(
        &self,
        document: &Document,
        actor: &Actor,
        role: Option<SignerRole>,
    ) -> Completion<SingleOutcome> {
        let role = match Eligibility::of(document, actor).select(role) {
            Ok(role) => role,
            Err(err) => return Completion::refused(err),
        };
        let hold = match self.try_hold() {
            Ok(hold) => hold,
            Err(err) => return Completion::refused(err),
        };

        let subject = format!("{}/{}", document.document_type, document.id);
        let result = self.run_single(document, role, actor, &subject).await;
        self.finish(hold, actor, &subject, result, |outcome| {
            Notification::success(format!(
                "{} {} signed as {}",
                outcome.document_type,
                document.number,
                outcome.role.title()
            ))
        })
    }

    async fn run_single(
        &self,
        document: &Document,
        role: SignerRole,
        actor: &Actor,
        subject: &str,
    ) -> Result<SingleOutcome, SigningError> {
        self.enter(Phase::Probing);
        let probed = self.agent.probe().await;
        self.record(
            AuditAction::AgentProbed {
                reachable: probed.is_ok(),
            },
            actor,
            subject,
        );
        let probe = probed.map_err(SigningError::from_agent)?;
        info!("Signing agent ready at {}", probe.endpoint);

        self.enter(Phase::Preparing);
        let prepared = self.builder.prepare(document, role, actor).await?;
        let mut request = prepared.request;
        let mode = prepared.mode;
        self.record(
            AuditAction::RequestCreated {
                request_id: request.request_id.clone(),
                role,
            },
            actor,
            subject,
        );

        self.enter(Phase::Dispatching);
        if !request.mark_used() {
            return Err(SigningError::RequestAlreadyUsed(request.request_id));
        }
        let outcome = self
            .agent
            .sign(&request)
            .await
            .map_err(SigningError::from_agent)?;
        self.record(
            AuditAction::AgentDispatched {
                request_id: request.request_id.clone(),
                mode: mode.to_string(),
            },
            actor,
            subject,
        );

        self.enter(Phase::Reconciling);
        let confirmation = match (outcome, mode) {
            (AgentOutcome::Signed(artifact), _) => {
                let confirmation = self.reconciler.upload(&request, &artifact).await?;
                self.record(
                    AuditAction::ArtifactUploaded {
                        request_id: request.request_id.clone(),
                        sha256: artifact.sha256(),
                    },
                    actor,
                    subject,
                );
                confirmation
            }
            (AgentOutcome::Accepted, ProtocolMode::Synchronous) => {
                return Err(SigningError::AgentSigningError(
                    "Signing agent acknowledged without returning the signed document"
                        .to_string(),
                ));
            }
            (AgentOutcome::Accepted, ProtocolMode::Callback) => {
                self.reconciler.await_confirmation(&request).await?
            }
        };
        self.record(
            AuditAction::SignatureConfirmed {
                request_id: request.request_id.clone(),
            },
            actor,
            subject,
        );

        let signatures = match self
            .reconciler
            .refresh(document.document_type, document.id)
            .await
        {
            Ok(records) => records,
            Err(e) => {
                warn!("Could not refresh signatures for {}: {}", subject, e);
                Vec::new()
            }
        };

        Ok(SingleOutcome {
            document_type: document.document_type,
            document_id: document.id,
            role,
            request_id: request.request_id,
            mode,
            confirmation,
            signatures,
        })
    }

    /// Sign many documents under one role in a single agent call
    #[instrument(skip(self, documents, actor), fields(count = documents.len()))]
    pub async fn sign_batch(
        &self,
        documents: &[Document],
        actor: &Actor,
        role: Option<SignerRole>,
    ) -> Completion<BatchSummary> {
        self.sign_batch_with_skipped(documents, Vec::new(), actor, role)
            .await
    }

    /// Load the selected documents from the backend and sign them as a batch
    #[instrument(skip(self, selection, actor), fields(scope = %selection.scope, count = selection.len()))]
    pub async fn sign_selection(
        &self,
        selection: &SelectionSet,
        actor: &Actor,
        role: Option<SignerRole>,
    ) -> Completion<BatchSummary> {
        if selection.is_empty() {
            return Completion::refused(SigningError::NoEligibleSignature);
        }
        if self.is_busy() {
            return Completion::refused(SigningError::SigningInProgress);
        }

        let category = selection.scope.category;
        let fetched = join_all(
            selection
                .ids
                .iter()
                .map(|id| async move { (*id, self.backend.document(category, *id).await) }),
        )
        .await;

        let mut documents = Vec::with_capacity(fetched.len());
        let mut skipped = Vec::new();
        for (id, result) in fetched {
            match result {
                Ok(document) => documents.push(document),
                Err(e) => {
                    warn!("Could not load {} {}: {}", category, id, e);
                    skipped.push(SkippedDocument {
                        document_type: category,
                        document_id: id,
                        number: id.to_string(),
                        reason: e.message(),
                    });
                }
            }
        }

        self.sign_batch_with_skipped(&documents, skipped, actor, role)
            .await
    }

    async fn sign_batch_with_skipped(
        &self,
        documents: &[Document],
        mut skipped: Vec<SkippedDocument>,
        actor: &Actor,
        role: Option<SignerRole>,
    ) -> Completion<BatchSummary> {
        let plan = match resolve_batch(documents, actor, role) {
            Ok(plan) => plan,
            Err(err) => return Completion::refused(err),
        };
        let hold = match self.try_hold() {
            Ok(hold) => hold,
            Err(err) => return Completion::refused(err),
        };

        let subject = format!("batch/{}", plan.role);
        skipped.extend(plan.skipped.iter().cloned());
        let result = self
            .run_batch(&plan.documents, plan.role, skipped, actor, &subject)
            .await;
        self.finish(hold, actor, &subject, result, BatchSummary::notification)
    }
}
