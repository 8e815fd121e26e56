//! Municipal signing CLI
//!
//! Drives the signing engine from a terminal:
//!
//! - `probe`: check that the local signing agent answers
//! - `list`: documents awaiting signature for a category and year
//! - `eligible`: roles the configured actor may sign a document as
//! - `sign`: sign one document
//! - `select`: manage the saved multi-selection for a category and year
//! - `batch`: sign the saved selection (or explicit ids) in one run

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use signing_types::{DocumentId, DocumentType, SignerRole};
use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;
mod config;

use config::CliConfig;

#[derive(Parser, Debug)]
#[command(name = "signing-cli")]
#[command(about = "Sign municipal documents through the local signing agent")]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check whether the local signing agent is reachable
    Probe,

    /// List documents awaiting signature
    List {
        #[arg(short = 't', long = "type")]
        document_type: DocumentType,
        #[arg(short, long)]
        year: i32,
    },

    /// Show which roles the actor may sign a document as
    Eligible {
        #[arg(short = 't', long = "type")]
        document_type: DocumentType,
        #[arg(long)]
        id: DocumentId,
    },

    /// Sign one document
    Sign {
        #[arg(short = 't', long = "type")]
        document_type: DocumentType,
        #[arg(long)]
        id: DocumentId,
        /// Required when the actor can sign as more than one role
        #[arg(short, long)]
        role: Option<SignerRole>,
    },

    /// Manage the saved selection for a category and year
    Select {
        #[arg(short = 't', long = "type")]
        document_type: DocumentType,
        #[arg(short, long)]
        year: i32,
        /// Toggle these ids
        #[arg(long, value_delimiter = ',')]
        toggle: Vec<DocumentId>,
        /// Select every visible document, or clear if all are selected
        #[arg(long)]
        all: bool,
        /// Clear the selection
        #[arg(long, conflicts_with_all = ["toggle", "all"])]
        clear: bool,
    },

    /// Sign several documents in one run
    Batch {
        #[arg(short = 't', long = "type")]
        document_type: DocumentType,
        #[arg(short, long)]
        year: i32,
        /// Sign these ids instead of the saved selection
        #[arg(long, value_delimiter = ',')]
        ids: Vec<DocumentId>,
        #[arg(short, long)]
        role: Option<SignerRole>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tracing_subscriber::registry()
        .with(
            EnvFilter::from_default_env()
                .add_directive(format!("signing_core={}", log_level).parse()?)
                .add_directive(format!("signing_cli={}", log_level).parse()?),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = CliConfig::load(args.config.as_deref())?;

    match args.command {
        Command::Probe => commands::probe(&config).await,
        Command::List {
            document_type,
            year,
        } => commands::list(&config, document_type, year).await,
        Command::Eligible { document_type, id } => {
            commands::eligible(&config, document_type, id).await
        }
        Command::Sign {
            document_type,
            id,
            role,
        } => commands::sign(&config, document_type, id, role).await,
        Command::Select {
            document_type,
            year,
            toggle,
            all,
            clear,
        } => commands::select(&config, document_type, year, &toggle, all, clear).await,
        Command::Batch {
            document_type,
            year,
            ids,
            role,
        } => commands::batch(&config, document_type, year, &ids, role).await,
    }
}
