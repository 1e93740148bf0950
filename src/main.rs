//! # docqa CLI
//!
//! The `docqa` binary drives the document Q&A engine from the shell:
//! uploading and processing documents, draining the job queue, asking
//! questions in sessions, and inspecting sessions and long-term memory.
//!
//! ## Usage
//!
//! ```bash
//! docqa --config ./config/docqa.toml --owner alice <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docqa init` | Create the SQLite database, run migrations, create the blob directory |
//! | `docqa upload <file>` | Store a file as a `pending` document and enqueue processing |
//! | `docqa process <id>` | Chunk and embed a pending document now |
//! | `docqa documents list\|show\|delete` | Manage documents |
//! | `docqa jobs run\|status` | Drain or inspect the background job queue |
//! | `docqa ask "<question>"` | Ask a question, optionally within a session |
//! | `docqa sessions list\|show` | Inspect sessions and transcripts |
//! | `docqa memories list\|add` | Inspect or add long-term memories |
//!
//! Logs are written to stderr; `RUST_LOG` overrides `--log-level`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use docqa::app::App;
use docqa::commands::{self, AskArgs};
use docqa::config;

/// docqa: retrieval-augmented question answering over your documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/docqa.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "docqa",
    about = "docqa: conversational question answering over uploaded documents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docqa.toml")]
    config: PathBuf,

    /// Owner every command acts on behalf of.
    #[arg(long, global = true, env = "DOCQA_OWNER", default_value = "local")]
    owner: String,

    /// Log level for docqa targets (overrides `[logging] level`).
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema and blob directory.
    ///
    /// Idempotent; running it multiple times is safe.
    Init,

    /// Upload a file as a new document.
    Upload {
        /// Path of the file to upload.
        path: PathBuf,

        /// Document title (defaults to the filename).
        #[arg(long)]
        title: Option<String>,

        /// Content type (guessed from the extension when omitted).
        #[arg(long)]
        mime: Option<String>,

        /// Process the document immediately instead of leaving it queued.
        #[arg(long)]
        process: bool,
    },

    /// Chunk, embed and store a pending document.
    Process {
        /// Document id.
        id: String,
    },

    /// Manage documents.
    Documents {
        #[command(subcommand)]
        action: DocumentsAction,
    },

    /// Work the background job queue.
    Jobs {
        #[command(subcommand)]
        action: JobsAction,
    },

    /// Ask a question over processed documents.
    Ask {
        /// The question.
        question: String,

        /// Continue an existing session.
        #[arg(long)]
        session: Option<String>,

        /// Restrict retrieval to these document ids (repeatable).
        #[arg(long = "document")]
        documents: Vec<String>,

        /// Ignore the session's conversation history.
        #[arg(long)]
        no_history: bool,

        /// Overall deadline for the turn, in seconds.
        #[arg(long)]
        timeout: Option<u64>,

        /// Print the full response as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Inspect Q&A sessions.
    Sessions {
        #[command(subcommand)]
        action: SessionsAction,
    },

    /// Inspect or add long-term memories.
    Memories {
        #[command(subcommand)]
        action: MemoriesAction,
    },
}

#[derive(Subcommand)]
enum DocumentsAction {
    /// List documents, newest first.
    List,
    /// Show one document with its status and chunk count.
    Show { id: String },
    /// Delete a document, its chunks and its blob.
    Delete { id: String },
}

#[derive(Subcommand)]
enum JobsAction {
    /// Run pending jobs until the queue is empty.
    Run {
        /// Stop after this many jobs.
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Show job counts by status.
    Status,
}

#[derive(Subcommand)]
enum SessionsAction {
    /// List sessions, newest first.
    List,
    /// Print a session transcript and its query log.
    Show {
        id: String,

        /// Maximum messages to print.
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum MemoriesAction {
    /// List memories, optionally for one session.
    List {
        #[arg(long)]
        session: Option<String>,
    },
    /// Store a manual note as a memory.
    Add {
        /// Note text.
        content: String,

        /// Session the note belongs to.
        #[arg(long)]
        session: String,

        #[arg(long, default_value_t = 3)]
        importance: i32,
    },
}

fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("docqa={log_level},docqa_core={log_level},warn"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| cfg.logging.level.clone());
    init_tracing(&level);

    if let Commands::Init = cli.command {
        return commands::run_init(&cfg).await;
    }

    let app = App::open(cfg).await?;
    let owner = cli.owner.as_str();

    match cli.command {
        Commands::Init => {}
        Commands::Upload {
            path,
            title,
            mime,
            process,
        } => {
            commands::run_upload(&app, owner, &path, title, mime, process).await?;
        }
        Commands::Process { id } => {
            commands::run_process(&app, owner, &id).await?;
        }
        Commands::Documents { action } => match action {
            DocumentsAction::List => commands::run_documents_list(&app, owner).await?,
            DocumentsAction::Show { id } => commands::run_documents_show(&app, owner, &id).await?,
            DocumentsAction::Delete { id } => {
                commands::run_documents_delete(&app, owner, &id).await?
            }
        },
        Commands::Jobs { action } => match action {
            JobsAction::Run { limit } => commands::run_jobs(&app, limit).await?,
            JobsAction::Status => commands::run_jobs_status(&app).await?,
        },
        Commands::Ask {
            question,
            session,
            documents,
            no_history,
            timeout,
            json,
        } => {
            commands::run_ask(
                &app,
                owner,
                AskArgs {
                    question,
                    session,
                    documents,
                    no_history,
                    timeout_secs: timeout,
                    json,
                },
            )
            .await?;
        }
        Commands::Sessions { action } => match action {
            SessionsAction::List => commands::run_sessions_list(&app, owner).await?,
            SessionsAction::Show { id, limit } => {
                commands::run_sessions_show(&app, owner, &id, limit).await?
            }
        },
        Commands::Memories { action } => match action {
            MemoriesAction::List { session } => {
                commands::run_memories_list(&app, owner, session.as_deref()).await?
            }
            MemoriesAction::Add {
                content,
                session,
                importance,
            } => commands::run_memories_add(&app, owner, &session, &content, importance).await?,
        },
    }

    app.pool.close().await;
    Ok(())
}
