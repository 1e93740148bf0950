//! CLI command implementations.
//!
//! Each `run_*` function performs one `docqa` subcommand against an opened
//! [`App`] and prints human-readable output to stdout (or JSON where a
//! `--json` flag exists). Logs go to stderr.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::path::Path;

use docqa_core::ask::AskRequest;
use docqa_core::ingest::{ProcessOutcome, UploadRequest};
use docqa_core::models::Document;

use crate::app::App;
use crate::config::Config;
use crate::extract::mime_from_filename;
use crate::{db, migrate};

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Create the database, run migrations and make the blob directory.
pub async fn run_init(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::run_migrations(&pool).await?;
    pool.close().await;
    std::fs::create_dir_all(&config.storage.root).with_context(|| {
        format!(
            "Failed to create storage root {}",
            config.storage.root.display()
        )
    })?;
    println!("Database initialized successfully.");
    Ok(())
}

pub async fn run_upload(
    app: &App,
    owner: &str,
    path: &Path,
    title: Option<String>,
    mime_type: Option<String>,
    process_now: bool,
) -> Result<()> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    let mime_type = mime_type.unwrap_or_else(|| mime_from_filename(&filename).to_string());

    let doc = app
        .ingest
        .upload(UploadRequest {
            owner_id: owner.to_string(),
            title,
            filename,
            mime_type,
            bytes,
        })
        .await?;
    println!("Uploaded {} ({})", doc.id, doc.title);

    if process_now {
        report_process(app, owner, &doc.id).await?;
    }
    Ok(())
}

pub async fn run_process(app: &App, owner: &str, id: &str) -> Result<()> {
    report_process(app, owner, id).await
}

async fn report_process(app: &App, owner: &str, id: &str) -> Result<()> {
    match app.ingest.process_document(owner, id).await? {
        ProcessOutcome::Processed { chunks } => {
            println!("Processed {}: {} chunks", id, chunks)
        }
        ProcessOutcome::AlreadyProcessed => println!("{} is already processed", id),
    }
    Ok(())
}

fn print_document_line(doc: &Document) {
    println!(
        "{}  {:<10}  {}  {}",
        doc.id,
        doc.status.as_str(),
        format_ts(doc.created_at),
        doc.title
    );
}

pub async fn run_documents_list(app: &App, owner: &str) -> Result<()> {
    let docs = app.ingest.list_documents(owner).await?;
    if docs.is_empty() {
        println!("No documents.");
        return Ok(());
    }
    for doc in &docs {
        print_document_line(doc);
    }
    Ok(())
}

pub async fn run_documents_show(app: &App, owner: &str, id: &str) -> Result<()> {
    let details = app.ingest.get_document(owner, id).await?;
    let doc = &details.document;

    println!("--- Document ---");
    println!("id:         {}", doc.id);
    println!("title:      {}", doc.title);
    println!("source:     {}", doc.source.as_str());
    println!("status:     {}", doc.status.as_str());
    if let Some(reason) = &doc.failure_reason {
        println!("reason:     {}", reason);
    }
    if let Some(file) = &doc.file {
        println!("file:       {} ({} bytes, {})", file.key, file.size, file.mime_type);
        println!("etag:       {}", file.etag);
    }
    println!("chunks:     {}", details.chunk_count);
    println!("created_at: {}", format_ts(doc.created_at));
    println!("updated_at: {}", format_ts(doc.updated_at));
    Ok(())
}

pub async fn run_documents_delete(app: &App, owner: &str, id: &str) -> Result<()> {
    app.ingest.delete_document(owner, id).await?;
    println!("Deleted {}", id);
    Ok(())
}

pub async fn run_jobs(app: &App, limit: Option<usize>) -> Result<()> {
    let stats = app.job_runner().run_pending(limit).await?;
    let counts = app.queue.counts().await?;
    println!(
        "Ran jobs: {} done, {} requeued, {} failed ({} still pending)",
        stats.done, stats.requeued, stats.failed, counts.pending
    );
    Ok(())
}

pub async fn run_jobs_status(app: &App) -> Result<()> {
    let counts = app.queue.counts().await?;
    println!("pending: {}", counts.pending);
    println!("running: {}", counts.running);
    println!("done:    {}", counts.done);
    println!("failed:  {}", counts.failed);
    Ok(())
}

pub struct AskArgs {
    pub question: String,
    pub session: Option<String>,
    pub documents: Vec<String>,
    pub no_history: bool,
    pub timeout_secs: Option<u64>,
    pub json: bool,
}

pub async fn run_ask(app: &App, owner: &str, args: AskArgs) -> Result<()> {
    let mut request = AskRequest::new(owner, args.question).with_history(!args.no_history);
    if let Some(session) = args.session {
        request = request.in_session(session);
    }
    if !args.documents.is_empty() {
        request = request.with_documents(args.documents);
    }
    if let Some(secs) = args.timeout_secs {
        request = request.with_timeout(std::time::Duration::from_secs(secs));
    }

    let response = app.ask.ask(request).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    println!("{}", response.answer);
    println!();
    if !response.sources.is_empty() {
        println!("Sources:");
        for (i, source) in response.sources.iter().enumerate() {
            println!(
                "  {}. [{:.3}] doc {} chunk {}",
                i + 1,
                source.score,
                source.document_id,
                source.chunk_index
            );
        }
    }
    if !response.memories.is_empty() {
        println!("Memories:");
        for hit in &response.memories {
            println!("  [{:.3}] {}", hit.score, hit.memory.content.replace('\n', " / "));
        }
    }
    println!(
        "session: {}  history tokens: {}  latency: {}ms{}",
        response.session_id,
        response.used_history_tokens,
        response.latency_ms,
        if response.fallback { "  (fallback)" } else { "" }
    );
    Ok(())
}

pub async fn run_sessions_list(app: &App, owner: &str) -> Result<()> {
    let sessions = app.ask.list_sessions(owner).await?;
    if sessions.is_empty() {
        println!("No sessions.");
        return Ok(());
    }
    for session in &sessions {
        println!("{}  {}", session.id, format_ts(session.created_at));
    }
    Ok(())
}

pub async fn run_sessions_show(app: &App, owner: &str, id: &str, limit: usize) -> Result<()> {
    let messages = app.ask.session_transcript(owner, id, limit).await?;
    println!("--- Session {} ({} messages) ---", id, messages.len());
    for message in &messages {
        println!("[{}] {}: {}", format_ts(message.created_at), message.role, message.content);
    }

    let queries = app.ask.session_queries(owner, id).await?;
    if !queries.is_empty() {
        println!();
        println!("--- Queries ({}) ---", queries.len());
        for log in &queries {
            println!(
                "{}  {}ms  {} sources  {}",
                format_ts(log.created_at),
                log.latency_ms,
                log.sources.len(),
                log.query_text
            );
        }
    }
    Ok(())
}

pub async fn run_memories_list(app: &App, owner: &str, session: Option<&str>) -> Result<()> {
    let memories = app.memory.list(owner, session).await?;
    if memories.is_empty() {
        println!("No memories.");
        return Ok(());
    }
    for memory in &memories {
        println!(
            "{}  {:<8}  importance {}  session {}",
            memory.id,
            memory.source.as_str(),
            memory.importance,
            memory.session_id
        );
        println!("    {}", memory.content.replace('\n', "\n    "));
    }
    Ok(())
}

pub async fn run_memories_add(
    app: &App,
    owner: &str,
    session: &str,
    content: &str,
    importance: i32,
) -> Result<()> {
    let stored = app.memory.remember(owner, session, content, importance).await?;
    println!("Stored memory {}", stored.id);
    Ok(())
}
