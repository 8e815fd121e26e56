//! Batch signing: one probe, one backend batch, one agent call, then
//! aggregate polling and a per-item status refresh.

use futures::future::join_all;
use serde::Serialize;
use signing_types::{
    AuditAction, BatchCounts, BatchItemOutcome, BatchRequest, Document, DocumentId, DocumentType,
    NewSigningRequest, SignatureStatus, SignerRole,
};
use tracing::{debug, info, warn};

use crate::agent::AgentItemOutcome;
use crate::eligibility::{Actor, SkippedDocument};
use crate::error::{Notification, Severity, SigningError};
use crate::orchestrator::SigningOrchestrator;
use crate::poll::{poll_until, PollOutcome};
use crate::progress::Phase;

const NOT_CONFIRMED: &str = "Signature not confirmed before the status check limit";

/// Final state of one batch item
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchItemReport {
    pub document_type: DocumentType,
    pub document_id: DocumentId,
    pub number: String,
    pub request_id: String,
    pub status: SignatureStatus,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub batch_id: String,
    pub role: SignerRole,
    pub items: Vec<BatchItemReport>,
    pub skipped: Vec<SkippedDocument>,
    pub signed: usize,
    pub pending: usize,
    pub errors: usize,
    /// Aggregate polling hit its bound
    pub timed_out: bool,
    /// Polling stopped because error counts stopped moving
    pub stalled: bool,
}

impl BatchSummary {
    pub fn total(&self) -> usize {
        self.items.len()
    }

    pub fn is_full_success(&self) -> bool {
        self.errors == 0 && self.pending == 0 && self.signed == self.total()
    }

    pub fn notification(&self) -> Notification {
        let mut message = format!("{} of {} signed", self.signed, self.total());
        if self.errors > 0 {
            message.push_str(&format!(", {} failed", self.errors));
        }
        if !self.skipped.is_empty() {
            message.push_str(&format!(", {} skipped", self.skipped.len()));
        }
        if self.errors == 0 {
            Notification::success(message)
        } else if self.signed == 0 {
            Notification {
                severity: Severity::Error,
                title: "Batch failed".to_string(),
                message,
            }
        } else {
            Notification::warning("Batch partially signed", message)
        }
    }
}

/// Stops aggregate polling when errors are present and nothing has moved
/// for `limit` consecutive ticks
#[derive(Debug)]
pub struct StallDetector {
    limit: u32,
    last: Option<BatchCounts>,
    unchanged: u32,
    stalled: bool,
}

impl StallDetector {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            last: None,
            unchanged: 0,
            stalled: false,
        }
    }

    pub fn observe(&mut self, counts: &BatchCounts) -> bool {
        if self.last.as_ref() == Some(counts) {
            self.unchanged += 1;
        } else {
            self.unchanged = 0;
            self.last = Some(*counts);
        }
        self.stalled = counts.errors > 0 && self.limit > 0 && self.unchanged >= self.limit;
        self.stalled
    }

    pub fn is_stalled(&self) -> bool {
        self.stalled
    }
}

pub fn batch_drafts(documents: &[&Document], role: SignerRole) -> Vec<NewSigningRequest> {
    documents
        .iter()
        .map(|d| NewSigningRequest {
            document_type: d.document_type,
            document_id: d.id,
            signer_role: role,
            include_payload: false,
        })
        .collect()
}

impl SigningOrchestrator {
    pub(crate) async fn run_batch(
        &self,
        documents: &[&Document],
        role: SignerRole,
        skipped: Vec<SkippedDocument>,
        actor: &Actor,
        subject: &str,
    ) -> Result<BatchSummary, SigningError> {
        self.enter(Phase::Probing);
        let probed = self.agent.probe().await;
        self.record(
            AuditAction::AgentProbed {
                reachable: probed.is_ok(),
            },
            actor,
            subject,
        );
        probed.map_err(SigningError::from_agent)?;

        self.enter(Phase::Preparing);
        let mut batch = self
            .backend
            .create_batch(&batch_drafts(documents, role))
            .await
            .map_err(SigningError::from_backend)?;
        info!("Created batch {} with {} item(s)", batch.batch_id, batch.len());
        self.record(
            AuditAction::BatchCreated {
                batch_id: batch.batch_id.clone(),
                items: batch.len(),
            },
            actor,
            subject,
        );

        self.enter(Phase::Dispatching);
        self.dispatch_batch(&mut batch).await?;

        self.enter(Phase::Reconciling);
        let (timed_out, stalled) = self.poll_batch(&batch).await;
        self.refresh_items(&mut batch, role).await;

        let summary = summarize(&mut batch, documents, role, skipped, timed_out, stalled);
        info!(
            "Batch {} finished: {} signed, {} failed",
            summary.batch_id, summary.signed, summary.errors
        );
        self.progress.set_detail(format!(
            "{} of {} signed",
            summary.signed,
            summary.total()
        ));
        self.record(
            AuditAction::BatchCompleted {
                batch_id: summary.batch_id.clone(),
                signed: summary.signed,
                errors: summary.errors,
            },
            actor,
            subject,
        );
        Ok(summary)
    }

    /// One agent call for every item; inline artifacts are uploaded here
    async fn dispatch_batch(&self, batch: &mut BatchRequest) -> Result<(), SigningError> {
        let mut dispatch = Vec::with_capacity(batch.len());
        let mut reused = Vec::new();
        for item in batch.items.iter_mut() {
            if item.mark_used() {
                dispatch.push(item.clone());
            } else {
                reused.push(item.request_id.clone());
            }
        }
        for request_id in reused {
            batch.record(
                &request_id,
                BatchItemOutcome::Error {
                    message: SigningError::RequestAlreadyUsed(request_id.clone()).to_string(),
                },
            );
        }
        if dispatch.is_empty() {
            return Ok(());
        }

        let results = self
            .agent
            .sign_batch(&dispatch)
            .await
            .map_err(SigningError::from_agent)?;

        for result in results {
            let outcome = match result.outcome {
                AgentItemOutcome::Accepted => continue,
                AgentItemOutcome::Rejected(message) => {
                    warn!("Agent rejected {}: {}", result.request_id, message);
                    BatchItemOutcome::Error { message }
                }
                AgentItemOutcome::Signed(artifact) => {
                    match self
                        .backend
                        .upload_signed(&result.request_id, &artifact)
                        .await
                    {
                        Ok(()) => BatchItemOutcome::Signed,
                        Err(e) => BatchItemOutcome::Error {
                            message: SigningError::UploadFailed(e.message()).to_string(),
                        },
                    }
                }
            };
            batch.record(&result.request_id, outcome);
        }
        Ok(())
    }

    /// Poll aggregate counts. Returns (timed_out, stalled).
    async fn poll_batch(&self, batch: &BatchRequest) -> (bool, bool) {
        if batch.counts().pending == 0 {
            return (false, false);
        }

        let total = batch.len();
        let mut stall = StallDetector::new(self.polling.batch_stall_ticks);
        let outcome = poll_until(
            self.polling.batch(),
            |_| self.backend.batch_status(&batch.batch_id),
            |counts| {
                self.progress
                    .set_detail(format!("{} of {} signed", counts.signed, total));
                counts.pending == 0 || stall.observe(counts)
            },
        )
        .await;

        match outcome {
            PollOutcome::Ready { attempts, .. } => {
                let stalled = stall.is_stalled();
                if stalled {
                    warn!(
                        "Batch {} stalled with errors after {} poll(s)",
                        batch.batch_id, attempts
                    );
                } else {
                    debug!("Batch {} settled after {} poll(s)", batch.batch_id, attempts);
                }
                (false, stalled)
            }
            PollOutcome::Exhausted { attempts, .. } => {
                warn!(
                    "Batch {} still pending after {} poll(s)",
                    batch.batch_id, attempts
                );
                (true, false)
            }
        }
    }

    /// Read every item's signature from the authoritative list, concurrently
    async fn refresh_items(&self, batch: &mut BatchRequest, role: SignerRole) {
        let lookups = join_all(batch.items.iter().map(|item| async move {
            let status = self
                .reconciler
                .status_of(item.document_type, item.document_id, role)
                .await;
            (item.request_id.clone(), status)
        }))
        .await;

        for (request_id, status) in lookups {
            match status {
                Ok(Some(SignatureStatus::Signed)) => {
                    batch.record(&request_id, BatchItemOutcome::Signed)
                }
                Ok(Some(SignatureStatus::Error)) => batch.record(
                    &request_id,
                    BatchItemOutcome::Error {
                        message: "The server marked the signature as failed".to_string(),
                    },
                ),
                Ok(_) => {}
                Err(e) => warn!("Could not refresh {}: {}", request_id, e),
            }
        }
    }
}

/// Close out the batch: anything still pending becomes an error
fn summarize(
    batch: &mut BatchRequest,
    documents: &[&Document],
    role: SignerRole,
    skipped: Vec<SkippedDocument>,
    timed_out: bool,
    stalled: bool,
) -> BatchSummary {
    let still_pending: Vec<String> = batch
        .items
        .iter()
        .filter(|item| matches!(batch.outcome(&item.request_id), Some(BatchItemOutcome::Pending)))
        .map(|item| item.request_id.clone())
        .collect();
    for request_id in still_pending {
        batch.record(
            &request_id,
            BatchItemOutcome::Error {
                message: NOT_CONFIRMED.to_string(),
            },
        );
    }

    let items: Vec<BatchItemReport> = batch
        .items
        .iter()
        .map(|item| {
            let number = documents
                .iter()
                .find(|d| d.id == item.document_id && d.document_type == item.document_type)
                .map(|d| d.number.clone())
                .unwrap_or_else(|| item.document_id.to_string());
            let (status, message) = match batch.outcome(&item.request_id) {
                Some(BatchItemOutcome::Signed) => (SignatureStatus::Signed, None),
                Some(BatchItemOutcome::Error { message }) => {
                    (SignatureStatus::Error, Some(message.clone()))
                }
                Some(BatchItemOutcome::Pending) | None => (SignatureStatus::Pending, None),
            };
            BatchItemReport {
                document_type: item.document_type,
                document_id: item.document_id,
                number,
                request_id: item.request_id.clone(),
                status,
                message,
            }
        })
        .collect();

    let counts = batch.counts();
    BatchSummary {
        batch_id: batch.batch_id.clone(),
        role,
        items,
        skipped,
        signed: counts.signed,
        pending: counts.pending,
        errors: counts.errors,
        timed_out,
        stalled,
    }
}
