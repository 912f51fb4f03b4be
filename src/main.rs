//! # Groundwork CLI (`gw`)
//!
//! The `gw` binary is the primary interface for Groundwork. It provides
//! commands for database initialization, document ingestion and
//! lifecycle management, grounded question answering, and starting the
//! HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! gw --config ./config/gw.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `gw init` | Create the SQLite database and both index tiers |
//! | `gw upload <file>` | Store, register, and ingest a PDF |
//! | `gw list` | Show the registry: status, chunk counts, summaries |
//! | `gw toggle <id> --enabled <bool>` | Include/exclude a document from search |
//! | `gw delete <id>` | Remove a document everywhere |
//! | `gw process <id>` | Run the ingestion worker for a registered document |
//! | `gw ask "<question>"` | Stream a grounded answer to the terminal |
//! | `gw serve` | Start the HTTP API |

use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use groundwork::config::load_config;
use groundwork::llm::{LanguageModel, OllamaModel};
use groundwork::models::Segment;
use groundwork::{chat, db, ingest, lifecycle, migrate, server};

/// Groundwork — a local-first grounded-answer engine over a private PDF
/// collection.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/gw.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "gw",
    about = "Groundwork — grounded answers from your private PDF collection",
    version,
    long_about = "Groundwork ingests PDF documents, builds a two-tier vector index \
    (per-document summaries plus fine-grained passages), and answers questions with a \
    streamed, source-attributed reply split into a thought phase and a final answer."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/gw.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the index database.
    ///
    /// Creates the SQLite file and both vector tiers. Idempotent.
    Init,

    /// Upload and ingest a PDF document.
    ///
    /// The document is validated, stored, and registered as `processing`;
    /// the pipeline then runs to completion in this process and the final
    /// status is read back from the registry.
    Upload {
        /// Path to the PDF file. The file name becomes the document id.
        file: PathBuf,

        /// Replace an existing document with the same id.
        #[arg(long)]
        force: bool,
    },

    /// List registered documents and their lifecycle state.
    List,

    /// Include or exclude a document from search.
    Toggle {
        /// Document id (the uploaded file name).
        id: String,

        /// New visibility value.
        #[arg(long, action = clap::ArgAction::Set)]
        enabled: bool,
    },

    /// Delete a document from the indices, file store, and registry.
    Delete {
        /// Document id (the uploaded file name).
        id: String,
    },

    /// Run the ingestion worker for an already-registered document.
    ///
    /// Useful when uploads are accepted by the server and processed out
    /// of band; the worker communicates through the registry only.
    Process {
        /// Document id (the uploaded file name).
        id: String,
    },

    /// Ask a question and stream the answer to the terminal.
    Ask {
        /// The question.
        question: String,

        /// Skip retrieval and answer from general knowledge only.
        #[arg(long)]
        no_context: bool,
    },

    /// Start the HTTP API server.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "groundwork=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&config).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("ok");
        }

        Commands::Upload { file, force } => {
            let filename = file
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| anyhow::anyhow!("invalid file name: {}", file.display()))?
                .to_string();
            let bytes = std::fs::read(&file)?;

            let pool = db::connect(&config).await?;
            migrate::run_migrations(&pool).await?;
            ingest::upload_document(&config, &pool, &filename, &bytes, force).await?;
            println!("accepted {} ({} bytes), processing...", filename, bytes.len());

            let model = OllamaModel::from_config(&config.llm)?;
            ingest::process_document(&config, &pool, &model, &filename).await;
            print_status(&config, &filename);
            pool.close().await;
        }

        Commands::List => {
            let docs = lifecycle::list_documents(&config);
            if docs.is_empty() {
                println!("No documents registered.");
            }
            for (id, entry) in docs {
                let flag = if entry.enabled { "enabled" } else { "disabled" };
                println!("{} — {} ({}, {} chunks)", id, entry.status, flag, entry.chunk_count);
                if let Some(summary) = &entry.summary {
                    println!("    {}", summary.replace('\n', " "));
                }
                if let Some(error) = &entry.error {
                    println!("    error: {}", error);
                }
            }
        }

        Commands::Toggle { id, enabled } => {
            lifecycle::toggle_document(&config, &id, enabled)?;
            println!("{} {}", id, if enabled { "enabled" } else { "disabled" });
        }

        Commands::Delete { id } => {
            let pool = db::connect(&config).await?;
            migrate::run_migrations(&pool).await?;
            lifecycle::delete_document(&config, &pool, &id).await?;
            println!("{} deleted", id);
            pool.close().await;
        }

        Commands::Process { id } => {
            let pool = db::connect(&config).await?;
            migrate::run_migrations(&pool).await?;
            let model = OllamaModel::from_config(&config.llm)?;
            ingest::process_document(&config, &pool, &model, &id).await;
            print_status(&config, &id);
            pool.close().await;
        }

        Commands::Ask { question, no_context } => {
            let pool = db::connect(&config).await?;
            migrate::run_migrations(&pool).await?;
            let model: Arc<dyn LanguageModel> = Arc::new(OllamaModel::from_config(&config.llm)?);

            let stream = chat::answer_stream(
                Arc::new(config.clone()),
                pool.clone(),
                model,
                question,
                !no_context,
            );
            futures_util::pin_mut!(stream);

            let mut answering = false;
            while let Some(segment) = stream.next().await {
                match segment {
                    Segment::Thought(text) => {
                        eprint!("{}", text);
                        let _ = std::io::stderr().flush();
                    }
                    Segment::FinalAnswer(text) => {
                        if !answering {
                            answering = true;
                            eprintln!("---");
                        }
                        print!("{}", text);
                        let _ = std::io::stdout().flush();
                    }
                    Segment::Sources(sources) => {
                        println!();
                        if !sources.is_empty() {
                            println!("sources: {}", sources.join(", "));
                        }
                    }
                    Segment::Done => {}
                    Segment::Error(message) => {
                        anyhow::bail!("generation failed: {message}");
                    }
                }
            }
            pool.close().await;
        }

        Commands::Serve => {
            let pool = db::connect(&config).await?;
            migrate::run_migrations(&pool).await?;
            let model: Arc<dyn LanguageModel> = Arc::new(OllamaModel::from_config(&config.llm)?);
            server::run_server(&config, pool, model).await?;
        }
    }

    Ok(())
}

fn print_status(config: &groundwork::config::Config, id: &str) {
    let docs = lifecycle::list_documents(config);
    match docs.get(id) {
        Some(entry) => {
            println!("{} — {} ({} chunks)", id, entry.status, entry.chunk_count);
            if let Some(error) = &entry.error {
                println!("    error: {}", error);
            }
        }
        None => println!("{} is no longer registered", id),
    }
}
