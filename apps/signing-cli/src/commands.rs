//! Subcommand implementations

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use signing_core::{
    BackendOfRecord, Completion, Eligibility, FileSelectionStore, HttpBackend, LocalAgentClient,
    Notification, ScopeKey, SelectionManager, SelectionSet, Severity, SigningAgent,
    SigningOrchestrator,
};
use signing_types::{DocumentId, DocumentType, SignerRole};
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::CliConfig;

fn backend(config: &CliConfig) -> Result<Arc<HttpBackend>> {
    Ok(Arc::new(
        HttpBackend::new(&config.signing.backend).context("Failed to build backend client")?,
    ))
}

fn agent(config: &CliConfig) -> Result<Arc<LocalAgentClient>> {
    Ok(Arc::new(
        LocalAgentClient::new(&config.signing.agent).context("Failed to build agent client")?,
    ))
}

fn orchestrator(config: &CliConfig) -> Result<SigningOrchestrator> {
    Ok(SigningOrchestrator::new(
        backend(config)?,
        agent(config)?,
        &config.signing,
    ))
}

/// Print phase changes to stderr until the attempt returns to idle
fn watch_progress(orchestrator: &SigningOrchestrator) -> JoinHandle<()> {
    let mut rx = orchestrator.subscribe_progress();
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let snapshot = rx.borrow().clone();
            if snapshot.text.is_empty() {
                break;
            }
            match &snapshot.detail {
                Some(detail) => eprintln!(
                    "[{}/{}] {} ({})",
                    snapshot.step, snapshot.total_steps, snapshot.text, detail
                ),
                None => eprintln!("[{}/{}] {}", snapshot.step, snapshot.total_steps, snapshot.text),
            }
        }
    })
}

fn print_notification(notification: &Notification) {
    let tag = match notification.severity {
        Severity::Info => "info",
        Severity::Success => "ok",
        Severity::Warning => "warning",
        Severity::Error => "error",
    };
    println!("[{}] {}: {}", tag, notification.title, notification.message);
}

fn conclude<T>(completion: Completion<T>, watcher: JoinHandle<()>) -> Result<T> {
    print_notification(&completion.notification);
    let result = completion.acknowledge();
    watcher.abort();
    Ok(result?)
}

pub async fn probe(config: &CliConfig) -> Result<()> {
    let report = agent(config)?.probe().await?;
    println!("Signing agent reachable at {}{}", report.endpoint, report.path);
    Ok(())
}

pub async fn list(config: &CliConfig, document_type: DocumentType, year: i32) -> Result<()> {
    let documents = backend(config)?
        .awaiting_signature(document_type, year)
        .await?;
    if documents.is_empty() {
        println!("No {} documents awaiting signature in {}", document_type, year);
    }
    for doc in documents {
        println!("{:>6}  {}  {}", doc.id, doc.number, doc.lifecycle_status);
    }
    Ok(())
}

pub async fn eligible(config: &CliConfig, document_type: DocumentType, id: DocumentId) -> Result<()> {
    let actor = config.actor()?;
    let document = backend(config)?.document(document_type, id).await?;
    match Eligibility::of(&document, actor) {
        Eligibility::None => println!("{} may not sign {} {}", actor.name, document_type, document.number),
        eligibility => {
            for role in eligibility.roles() {
                println!("{}", role);
            }
        }
    }
    Ok(())
}

pub async fn sign(
    config: &CliConfig,
    document_type: DocumentType,
    id: DocumentId,
    role: Option<SignerRole>,
) -> Result<()> {
    let actor = config.actor()?;
    let orchestrator = orchestrator(config)?;
    let document = backend(config)?.document(document_type, id).await?;

    let watcher = watch_progress(&orchestrator);
    let completion = orchestrator.sign_document(&document, actor, role).await;
    let outcome = conclude(completion, watcher)?;

    info!(
        "Signed {} {} as {} via {}",
        document_type, document.number, outcome.role, outcome.mode
    );
    Ok(())
}

pub async fn select(
    config: &CliConfig,
    document_type: DocumentType,
    year: i32,
    toggle: &[DocumentId],
    all: bool,
    clear: bool,
) -> Result<()> {
    let visible = backend(config)?
        .awaiting_signature(document_type, year)
        .await?;
    let store = FileSelectionStore::new(config.signing.selection.resolved_path());
    let mut manager = SelectionManager::open(
        store,
        ScopeKey::new(document_type, year),
        visible.iter().map(|d| d.id),
    )?;

    if clear {
        manager.clear()?;
    }
    for id in toggle {
        if !manager.visible().contains(id) {
            bail!("Document {} is not awaiting signature in {} {}", id, document_type, year);
        }
        manager.toggle(*id)?;
    }
    if all {
        manager.toggle_all()?;
    }

    let selected = manager.selected_ids();
    println!(
        "{} of {} selected in {}",
        selected.len(),
        manager.visible().len(),
        manager.scope()
    );
    for doc in visible.iter().filter(|d| selected.contains(&d.id)) {
        println!("{:>6}  {}", doc.id, doc.number);
    }
    Ok(())
}

pub async fn batch(
    config: &CliConfig,
    document_type: DocumentType,
    year: i32,
    ids: &[DocumentId],
    role: Option<SignerRole>,
) -> Result<()> {
    let actor = config.actor()?;
    let backend = backend(config)?;
    let orchestrator = orchestrator(config)?;

    let visible = backend.awaiting_signature(document_type, year).await?;
    let store = FileSelectionStore::new(config.signing.selection.resolved_path());
    let scope = ScopeKey::new(document_type, year);
    let mut manager = SelectionManager::open(store, scope, visible.iter().map(|d| d.id))?;

    let selection = if ids.is_empty() {
        manager.selection().clone()
    } else {
        SelectionSet {
            scope,
            ids: ids.iter().copied().collect(),
        }
    };
    if selection.is_empty() {
        bail!("Nothing selected in {}; use `select` or pass --ids", scope);
    }

    let watcher = watch_progress(&orchestrator);
    let completion = orchestrator.sign_selection(&selection, actor, role).await;
    let summary = conclude(completion, watcher)?;

    for item in &summary.items {
        match &item.message {
            Some(message) => println!("{:>6}  {}  {}  {}", item.document_id, item.number, item.status, message),
            None => println!("{:>6}  {}  {}", item.document_id, item.number, item.status),
        }
    }
    for skipped in &summary.skipped {
        println!("{:>6}  {}  skipped  {}", skipped.document_id, skipped.number, skipped.reason);
    }

    let remaining = backend.awaiting_signature(document_type, year).await?;
    let pruned = manager.refresh(remaining.iter().map(|d| d.id))?;
    info!("Selection refreshed, {} signed document(s) dropped", pruned);

    if summary.signed == 0 && summary.errors > 0 {
        bail!("No document in the batch was signed");
    }
    Ok(())
}
