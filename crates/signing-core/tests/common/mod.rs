//! In-memory backend and agent doubles shared by the integration tests

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use signing_core::{
    Actor, AgentError, AgentItemOutcome, AgentItemResult, AgentOutcome, BackendError,
    BackendOfRecord, ModePolicy, ProbeReport, SigningAgent, SigningOrchestrator,
};
use signing_core::config::PollingConfig;
use signing_types::{
    BatchCounts, BatchRequest, Document, DocumentId, DocumentSummary, DocumentType,
    LifecycleStatus, NewSigningRequest, Placement, RoleStatusMap, SignatureRecord,
    SignatureStatus, SignedArtifact, SignerIdentity, SignerRole, SigningRequest, StatusReport,
};

pub const SIGNED_PDF: &[u8] = b"%PDF-1.7 signed";

pub fn document(id: DocumentId, document_type: DocumentType, pending: &[SignerRole]) -> Document {
    Document {
        id,
        number: format!("{:03}/2026", id),
        year: 2026,
        document_type,
        lifecycle_status: LifecycleStatus::AwaitingSignature,
        signatures: RoleStatusMap::pending_for(pending),
    }
}

pub fn mayor() -> Actor {
    Actor::new("u-mayor", "Carlos Prado", "123")
        .with_binding(SignerRole::Mayor, DocumentType::Ordinance)
        .with_binding(SignerRole::Mayor, DocumentType::Decree)
}

pub fn secretary() -> Actor {
    Actor::new("u-sec", "Joana Lima", "77")
        .with_binding(SignerRole::Secretary, DocumentType::Decree)
}

type Key = (DocumentType, DocumentId);

#[derive(Default)]
struct BackendState {
    documents: HashMap<Key, Document>,
    signatures: HashMap<Key, Vec<SignatureRecord>>,
    requests: HashMap<String, (Key, SignerRole)>,
    status_script: VecDeque<StatusReport>,
    batch_script: VecDeque<BatchCounts>,
    batches: HashMap<String, Vec<String>>,
    uploads: Vec<(String, SignedArtifact)>,
    fail_create: Option<BackendError>,
    fail_upload: Option<BackendError>,
    omit_payload: bool,
    auto_sign_after: Option<u32>,
    polls: u32,
    next_id: u32,
}

impl BackendState {
    fn set_status(&mut self, request_id: &str, status: SignatureStatus) {
        if let Some((key, role)) = self.requests.get(request_id).cloned() {
            if let Some(record) = self
                .signatures
                .get_mut(&key)
                .and_then(|records| records.iter_mut().find(|r| r.signer_role == role))
            {
                let _ = record.transition(status);
            }
        }
    }

    fn status_of(&self, request_id: &str) -> Option<SignatureStatus> {
        let (key, role) = self.requests.get(request_id)?;
        self.signatures
            .get(key)?
            .iter()
            .find(|r| r.signer_role == *role)
            .map(|r| r.status)
    }

    fn tick(&mut self) {
        self.polls += 1;
        if self.auto_sign_after == Some(self.polls) {
            let ids: Vec<String> = self.requests.keys().cloned().collect();
            for id in ids {
                self.set_status(&id, SignatureStatus::Signed);
            }
        }
    }
}

/// Backend of record kept in memory, with a call log
#[derive(Default)]
pub struct FakeBackend {
    state: Mutex<BackendState>,
    calls: Mutex<Vec<&'static str>>,
}

impl FakeBackend {
    pub fn with_documents(documents: &[Document]) -> Arc<Self> {
        let backend = Self::default();
        {
            let mut state = backend.state.lock().unwrap();
            for doc in documents {
                let key = (doc.document_type, doc.id);
                let records = doc
                    .signatures
                    .required_roles()
                    .into_iter()
                    .map(|role| SignatureRecord {
                        id: format!("{}-{}-{}", doc.document_type, doc.id, role),
                        document_id: doc.id,
                        document_type: doc.document_type,
                        signer_role: role,
                        signer_name: String::new(),
                        signer_title: role.title().to_string(),
                        status: doc.signatures.get(role).unwrap_or(SignatureStatus::Pending),
                        signed_at: None,
                        placement: Placement::default(),
                    })
                    .collect();
                state.signatures.insert(key, records);
                state.documents.insert(key, doc.clone());
            }
        }
        Arc::new(backend)
    }

    fn log(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| **c == call).count()
    }

    pub fn uploads(&self) -> Vec<(String, SignedArtifact)> {
        self.state.lock().unwrap().uploads.clone()
    }

    pub fn script_status(&self, reports: impl IntoIterator<Item = StatusReport>) {
        self.state.lock().unwrap().status_script.extend(reports);
    }

    pub fn script_batch(&self, counts: impl IntoIterator<Item = BatchCounts>) {
        self.state.lock().unwrap().batch_script.extend(counts);
    }

    pub fn fail_create(&self, err: BackendError) {
        self.state.lock().unwrap().fail_create = Some(err);
    }

    pub fn fail_upload(&self, err: BackendError) {
        self.state.lock().unwrap().fail_upload = Some(err);
    }

    /// Requests come back without the document even when asked for it
    pub fn omit_payload(&self) {
        self.state.lock().unwrap().omit_payload = true;
    }

    /// Mark every issued request signed on the `n`th status poll
    pub fn auto_sign_after(&self, n: u32) {
        self.state.lock().unwrap().auto_sign_after = Some(n);
    }

    pub fn set_signature(&self, key: Key, role: SignerRole, status: SignatureStatus) {
        let mut state = self.state.lock().unwrap();
        if let Some(record) = state
            .signatures
            .get_mut(&key)
            .and_then(|records| records.iter_mut().find(|r| r.signer_role == role))
        {
            record.status = status;
        }
    }

    pub fn signature(&self, key: Key, role: SignerRole) -> Option<SignatureStatus> {
        let state = self.state.lock().unwrap();
        state
            .signatures
            .get(&key)?
            .iter()
            .find(|r| r.signer_role == role)
            .map(|r| r.status)
    }

    /// Status sequence seen by one record, for monotonicity checks
    pub fn record(&self, key: Key, role: SignerRole) -> Option<SignatureRecord> {
        let state = self.state.lock().unwrap();
        state
            .signatures
            .get(&key)?
            .iter()
            .find(|r| r.signer_role == role)
            .cloned()
    }

    fn mint(state: &mut BackendState, draft: &NewSigningRequest) -> SigningRequest {
        state.next_id += 1;
        let id = state.next_id;
        let signer = SignerIdentity {
            name: "Signer on file".to_string(),
            identifier: format!("S{}", id),
        };
        let mut request = SigningRequest::new(format!("R{}", id), format!("T{}", id), draft, signer);
        if draft.include_payload && !state.omit_payload {
            request = request.with_payload(b"%PDF-1.7 original".to_vec());
        }
        state.requests.insert(
            request.request_id.clone(),
            ((draft.document_type, draft.document_id), draft.signer_role),
        );
        request
    }
}

#[async_trait]
impl BackendOfRecord for FakeBackend {
    async fn create_signing_request(
        &self,
        draft: &NewSigningRequest,
    ) -> Result<SigningRequest, BackendError> {
        self.log("create_signing_request");
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.fail_create.clone() {
            return Err(err);
        }
        Ok(Self::mint(&mut state, draft))
    }

    async fn signing_status(&self, request_id: &str) -> Result<StatusReport, BackendError> {
        self.log("signing_status");
        let mut state = self.state.lock().unwrap();
        state.tick();
        if let Some(report) = state.status_script.pop_front() {
            if report.status == SignatureStatus::Signed {
                state.set_status(request_id, SignatureStatus::Signed);
            }
            return Ok(report);
        }
        Ok(match state.status_of(request_id) {
            Some(SignatureStatus::Signed) => StatusReport::signed(),
            Some(SignatureStatus::Error) => StatusReport::error("rejected by server"),
            _ => StatusReport::pending(),
        })
    }

    async fn upload_signed(
        &self,
        request_id: &str,
        artifact: &SignedArtifact,
    ) -> Result<(), BackendError> {
        self.log("upload_signed");
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.fail_upload.clone() {
            return Err(err);
        }
        state.uploads.push((request_id.to_string(), artifact.clone()));
        state.set_status(request_id, SignatureStatus::Signed);
        Ok(())
    }

    async fn create_batch(
        &self,
        drafts: &[NewSigningRequest],
    ) -> Result<BatchRequest, BackendError> {
        self.log("create_batch");
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.fail_create.clone() {
            return Err(err);
        }
        let items: Vec<SigningRequest> = drafts.iter().map(|d| Self::mint(&mut state, d)).collect();
        let batch_id = format!("B{}", state.batches.len() + 1);
        state.batches.insert(
            batch_id.clone(),
            items.iter().map(|i| i.request_id.clone()).collect(),
        );
        Ok(BatchRequest::new(batch_id, items))
    }

    async fn batch_status(&self, batch_id: &str) -> Result<BatchCounts, BackendError> {
        self.log("batch_status");
        let mut state = self.state.lock().unwrap();
        state.tick();
        if let Some(counts) = state.batch_script.pop_front() {
            return Ok(counts);
        }
        let ids = state.batches.get(batch_id).cloned().unwrap_or_default();
        let mut counts = BatchCounts::default();
        for id in ids {
            match state.status_of(&id) {
                Some(SignatureStatus::Signed) => counts.signed += 1,
                Some(SignatureStatus::Error) => counts.errors += 1,
                _ => counts.pending += 1,
            }
        }
        Ok(counts)
    }

    async fn signatures(
        &self,
        document_type: DocumentType,
        document_id: DocumentId,
    ) -> Result<Vec<SignatureRecord>, BackendError> {
        self.log("signatures");
        let state = self.state.lock().unwrap();
        state
            .signatures
            .get(&(document_type, document_id))
            .cloned()
            .ok_or_else(|| BackendError::Status {
                status: 404,
                message: "document not found".to_string(),
            })
    }

    async fn document(
        &self,
        document_type: DocumentType,
        document_id: DocumentId,
    ) -> Result<Document, BackendError> {
        self.log("document");
        let state = self.state.lock().unwrap();
        state
            .documents
            .get(&(document_type, document_id))
            .cloned()
            .ok_or_else(|| BackendError::Status {
                status: 404,
                message: "document not found".to_string(),
            })
    }

    async fn awaiting_signature(
        &self,
        document_type: DocumentType,
        year: i32,
    ) -> Result<Vec<DocumentSummary>, BackendError> {
        self.log("awaiting_signature");
        let state = self.state.lock().unwrap();
        let mut list: Vec<DocumentSummary> = state
            .documents
            .values()
            .filter(|d| d.document_type == document_type && d.year == year)
            .filter(|d| d.is_awaiting_signature())
            .map(DocumentSummary::from)
            .collect();
        list.sort_by_key(|d| d.id);
        Ok(list)
    }
}

/// Scripted signing agent
pub struct FakeAgent {
    reachable: bool,
    probe_delay: Option<Duration>,
    single: Mutex<VecDeque<Result<AgentOutcome, AgentError>>>,
    batch: Mutex<Option<Result<Vec<AgentItemOutcome>, AgentError>>>,
    calls: Mutex<Vec<&'static str>>,
    seen: Mutex<Vec<SigningRequest>>,
}

impl FakeAgent {
    fn build(reachable: bool) -> Self {
        Self {
            reachable,
            probe_delay: None,
            single: Mutex::new(VecDeque::new()),
            batch: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn online() -> Self {
        Self::build(true)
    }

    pub fn offline() -> Self {
        Self::build(false)
    }

    pub fn with_probe_delay(mut self, delay: Duration) -> Self {
        self.probe_delay = Some(delay);
        self
    }

    pub fn then_sign(self, outcome: Result<AgentOutcome, AgentError>) -> Self {
        self.single.lock().unwrap().push_back(outcome);
        self
    }

    pub fn then_sign_batch(self, outcome: Result<Vec<AgentItemOutcome>, AgentError>) -> Self {
        *self.batch.lock().unwrap() = Some(outcome);
        self
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub fn seen(&self) -> Vec<SigningRequest> {
        self.seen.lock().unwrap().clone()
    }

    fn log(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }
}

pub fn signed_artifact() -> SignedArtifact {
    SignedArtifact::new(SIGNED_PDF.to_vec())
}

#[async_trait]
impl SigningAgent for FakeAgent {
    async fn probe(&self) -> Result<ProbeReport, AgentError> {
        self.log("probe");
        if let Some(delay) = self.probe_delay {
            tokio::time::sleep(delay).await;
        }
        if self.reachable {
            Ok(ProbeReport {
                endpoint: "http://127.0.0.1:8282".to_string(),
                path: "/status".to_string(),
            })
        } else {
            Err(AgentError::Unavailable {
                tried: vec![
                    "http://127.0.0.1:8282/status".to_string(),
                    "http://127.0.0.1:8282/health".to_string(),
                ],
            })
        }
    }

    async fn sign(&self, request: &SigningRequest) -> Result<AgentOutcome, AgentError> {
        self.log("sign");
        self.seen.lock().unwrap().push(request.clone());
        self.single
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(AgentOutcome::Accepted))
    }

    async fn sign_batch(
        &self,
        requests: &[SigningRequest],
    ) -> Result<Vec<AgentItemResult>, AgentError> {
        self.log("sign_batch");
        self.seen.lock().unwrap().extend(requests.iter().cloned());
        let scripted = self.batch.lock().unwrap().take();
        let outcomes = match scripted {
            Some(Ok(outcomes)) => outcomes,
            Some(Err(e)) => return Err(e),
            None => vec![AgentItemOutcome::Accepted; requests.len()],
        };
        Ok(requests
            .iter()
            .zip(outcomes.into_iter().chain(std::iter::repeat(AgentItemOutcome::Accepted)))
            .map(|(request, outcome)| AgentItemResult {
                request_id: request.request_id.clone(),
                outcome,
            })
            .collect())
    }
}

pub fn orchestrator(backend: Arc<FakeBackend>, agent: Arc<FakeAgent>) -> SigningOrchestrator {
    SigningOrchestrator::with_parts(backend, agent, ModePolicy::default(), PollingConfig::default())
}
