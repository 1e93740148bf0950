//! The ask turn.
//!
//! One call to [`AskOrchestrator::ask`] walks these steps:
//!
//! ```text
//! resolve-session → load-history → embed-query → retrieve → build-prompt
//!     → answer → persist-side-effects → respond
//! ```
//!
//! Steps up to and including retrieval are hard: they run under the request
//! [`Deadline`] and their errors reach the caller. From the prompt onwards
//! nothing fails the turn. A model error, an empty reply or an expired
//! deadline produce a deterministic fallback answer, and every write-back
//! (query log, transcript, turn memory, prune, summary trigger) is a
//! separately time-boxed [`best_effort`] step.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::deadline::{best_effort, Deadline};
use crate::embedding::EmbeddingGateway;
use crate::error::{CoreError, ErrorKind, Result};
use crate::history::{build_semantic_query, HistoryManager, RecentHistory};
use crate::llm::{ChatMessage, LanguageModel};
use crate::memory::MemoryManager;
use crate::models::{
    ChunkSource, ConversationMessage, QaSession, QueryLog, RetrievedChunk, RetrievedMemory,
};
use crate::retrieval::Retriever;
use crate::store::{QueryLogRepository, SessionRepository};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant that answers questions \
using the provided document excerpts and conversation memories. Cite documents as \
\"Doc <id> chunk <index>\". If the context does not contain the answer, say so plainly.";

/// Answer returned when there is nothing to ground a reply in.
pub const NO_CONTEXT_ANSWER: &str = "No relevant context available to answer this question yet. \
Upload documents or rephrase the question and try again.";

/// History recall settings for the ask turn.
#[derive(Debug, Clone)]
pub struct HistorySettings {
    pub enabled: bool,
    pub max_tokens: usize,
    pub max_messages: usize,
    pub digest_entries: usize,
    pub digest_chars: usize,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_tokens: 1500,
            max_messages: 20,
            digest_entries: 4,
            digest_chars: 600,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AskConfig {
    pub chunk_top_k: usize,
    pub memory_top_k: usize,
    pub history: HistorySettings,
    /// Default request timeout for the hard steps and the model call.
    pub timeout: Option<Duration>,
    /// Time box for each best-effort write-back step.
    pub best_effort_timeout: Duration,
    pub system_prompt: String,
}

impl Default for AskConfig {
    fn default() -> Self {
        Self {
            chunk_top_k: 5,
            memory_top_k: 5,
            history: HistorySettings::default(),
            timeout: None,
            best_effort_timeout: Duration::from_millis(2000),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

/// One question.
#[derive(Debug, Clone, Default)]
pub struct AskRequest {
    pub owner_id: String,
    /// Continue this session; a new one is created when absent.
    pub session_id: Option<String>,
    pub query: String,
    /// Only retrieve chunks of these documents.
    pub document_ids: Option<Vec<String>>,
    /// Overrides [`HistorySettings::enabled`] for this turn.
    pub include_history: Option<bool>,
    /// Overrides [`AskConfig::timeout`] for this turn.
    pub timeout: Option<Duration>,
    pub cancel: Option<CancellationToken>,
}

impl AskRequest {
    pub fn new(owner_id: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            query: query.into(),
            ..Self::default()
        }
    }

    pub fn in_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_documents(mut self, document_ids: Vec<String>) -> Self {
        self.document_ids = Some(document_ids);
        self
    }

    pub fn with_history(mut self, include: bool) -> Self {
        self.include_history = Some(include);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AskResponse {
    pub session_id: String,
    pub answer: String,
    pub sources: Vec<ChunkSource>,
    pub memories: Vec<RetrievedMemory>,
    pub used_history_tokens: usize,
    pub latency_ms: u64,
    /// Whether `answer` is the fallback rather than model output.
    pub fallback: bool,
}

/// Collaborators of the ask turn, wired once at process start.
#[derive(Clone)]
pub struct AskComponents {
    pub sessions: Arc<dyn SessionRepository>,
    pub query_logs: Arc<dyn QueryLogRepository>,
    pub history: HistoryManager,
    pub memory: MemoryManager,
    pub retriever: Retriever,
    pub gateway: EmbeddingGateway,
    pub llm: Arc<dyn LanguageModel>,
}

pub struct AskOrchestrator {
    parts: AskComponents,
    config: AskConfig,
}

/// Deterministic answer used when the model is unavailable.
pub fn fallback_answer(chunks: usize, memories: usize) -> String {
    let total = chunks + memories;
    if total == 0 {
        return NO_CONTEXT_ANSWER.to_string();
    }
    format!(
        "The language model is unavailable right now, but {} relevant context item{} \
         ({} document excerpt{}, {} memor{}) matched your question. Review the cited sources below.",
        total,
        if total == 1 { "" } else { "s" },
        chunks,
        if chunks == 1 { "" } else { "s" },
        memories,
        if memories == 1 { "y" } else { "ies" },
    )
}

/// Assemble the chat prompt.
///
/// Order: system instruction, context block, prior turns (oldest first),
/// then the literal question.
pub fn build_prompt(
    system_prompt: &str,
    chunks: &[RetrievedChunk],
    memories: &[RetrievedMemory],
    history: &[ConversationMessage],
    question: &str,
) -> Vec<ChatMessage> {
    let mut context = String::from("Context:\n");
    if chunks.is_empty() && memories.is_empty() {
        context.push_str("(no relevant documents or memories found)\n");
    }
    for hit in chunks {
        context.push_str(&format!(
            "Doc {} chunk {}: {}\n",
            hit.chunk.document_id, hit.chunk.chunk_index, hit.chunk.content
        ));
    }
    if !memories.is_empty() {
        context.push_str("\nMemories:\n");
        for hit in memories {
            context.push_str(&format!("- {}\n", hit.memory.content));
        }
    }

    let mut prompt = Vec::with_capacity(history.len() + 3);
    prompt.push(ChatMessage::system(system_prompt));
    prompt.push(ChatMessage::system(context.trim_end()));
    prompt.extend(
        history
            .iter()
            .map(|m| ChatMessage::new(m.role, m.content.clone())),
    );
    prompt.push(ChatMessage::user(question));
    prompt
}

impl AskOrchestrator {
    pub fn new(parts: AskComponents, config: AskConfig) -> Self {
        Self { parts, config }
    }

    pub fn config(&self) -> &AskConfig {
        &self.config
    }

    /// Answer one question. Errors only for validation, session
    /// resolution, embedding and chunk retrieval failures.
    pub async fn ask(&self, request: AskRequest) -> Result<AskResponse> {
        let started = Instant::now();

        let question = request.query.trim();
        if question.is_empty() {
            return Err(CoreError::InvalidInput("query is empty".to_string()));
        }
        let owner_id = request.owner_id.trim();
        if owner_id.is_empty() {
            return Err(CoreError::Unauthorized);
        }
        let deadline = Deadline::new(
            request.timeout.or(self.config.timeout),
            request.cancel.clone(),
        );

        let session_id = deadline
            .run(
                "resolve-session",
                self.resolve_session(owner_id, request.session_id.as_deref()),
            )
            .await?;

        let include_history = request
            .include_history
            .unwrap_or(self.config.history.enabled);
        let history = if include_history {
            deadline
                .run(
                    "load-history",
                    self.parts.history.list_recent(
                        owner_id,
                        &session_id,
                        self.config.history.max_tokens,
                        self.config.history.max_messages,
                    ),
                )
                .await?
        } else {
            RecentHistory::default()
        };
        let prior_messages = if self.parts.memory.config().summary_every_n_turns.unwrap_or(0) > 0 {
            best_effort(
                "count-history",
                self.config.best_effort_timeout,
                self.parts.history.count(owner_id, &session_id),
            )
            .await
        } else {
            None
        };

        let semantic_query = build_semantic_query(
            question,
            &history.messages,
            self.config.history.digest_entries,
            self.config.history.digest_chars,
        );
        let embedding = deadline
            .run("embed-query", self.parts.gateway.embed_one(&semantic_query))
            .await?;

        let chunks = deadline
            .run(
                "retrieve-chunks",
                self.parts.retriever.search_chunks(
                    owner_id,
                    &embedding,
                    request.document_ids.as_deref(),
                    self.config.chunk_top_k,
                ),
            )
            .await?;
        let memory_scope = self.parts.memory.scope(&session_id);
        let memories = match deadline
            .run(
                "retrieve-memories",
                self.parts.memory.search(
                    owner_id,
                    memory_scope,
                    &embedding,
                    self.config.memory_top_k,
                ),
            )
            .await
        {
            Ok(memories) => memories,
            Err(e) if matches!(e.kind(), ErrorKind::Timeout | ErrorKind::Cancelled) => {
                return Err(e)
            }
            Err(e) => {
                tracing::warn!(owner_id, session_id = %session_id, error = %e, "memory search failed; continuing without memories");
                Vec::new()
            }
        };

        let prompt = build_prompt(
            &self.config.system_prompt,
            &chunks,
            &memories,
            &history.messages,
            question,
        );
        let (answer, fallback) = match deadline.run("answer", self.parts.llm.chat(&prompt)).await {
            Ok(text) if !text.trim().is_empty() => (text.trim().to_string(), false),
            Ok(_) => {
                tracing::warn!(session_id = %session_id, "model returned an empty answer; using fallback");
                (fallback_answer(chunks.len(), memories.len()), true)
            }
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "model call failed; using fallback");
                (fallback_answer(chunks.len(), memories.len()), true)
            }
        };
        let sources: Vec<ChunkSource> = chunks.iter().map(RetrievedChunk::to_source).collect();
        let answered_ms = started.elapsed().as_millis() as i64;

        self.persist_side_effects(
            owner_id,
            &session_id,
            question,
            &answer,
            &sources,
            answered_ms,
            prior_messages,
        )
        .await;

        let latency_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            owner_id,
            session_id = %session_id,
            sources = sources.len(),
            memories = memories.len(),
            history_tokens = history.used_tokens,
            fallback,
            latency_ms,
            "ask turn complete"
        );
        Ok(AskResponse {
            session_id,
            answer,
            sources,
            memories,
            used_history_tokens: history.used_tokens,
            latency_ms,
            fallback,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn persist_side_effects(
        &self,
        owner_id: &str,
        session_id: &str,
        question: &str,
        answer: &str,
        sources: &[ChunkSource],
        latency_ms: i64,
        prior_messages: Option<usize>,
    ) {
        let limit = self.config.best_effort_timeout;

        let log = QueryLog {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            owner_id: owner_id.to_string(),
            query_text: question.to_string(),
            response_text: answer.to_string(),
            latency_ms,
            sources: sources.to_vec(),
            created_at: Utc::now(),
        };
        best_effort("query-log", limit, self.parts.query_logs.record_query(&log)).await;

        best_effort(
            "append-history",
            limit,
            self.parts
                .history
                .append_turn(owner_id, session_id, question, answer),
        )
        .await;

        if self.parts.memory.is_enabled() {
            best_effort(
                "turn-memory",
                limit,
                self.parts
                    .memory
                    .record_turn(owner_id, session_id, question, answer),
            )
            .await;
            best_effort(
                "prune-memory",
                limit,
                self.parts.memory.prune_configured(owner_id, session_id),
            )
            .await;
        }

        if let Some(prior) = prior_messages {
            // The pair just appended counts towards the turn total.
            let turn_count = prior + 2;
            best_effort(
                "summary-trigger",
                limit,
                self.parts
                    .memory
                    .maybe_schedule_summary(owner_id, session_id, turn_count),
            )
            .await;
        }
    }

    async fn resolve_session(&self, owner_id: &str, session_id: Option<&str>) -> Result<String> {
        match session_id.map(str::trim).filter(|s| !s.is_empty()) {
            Some(id) => self
                .parts
                .sessions
                .get_session(owner_id, id)
                .await?
                .map(|s| s.id)
                .ok_or_else(|| CoreError::not_found("session", id)),
            None => {
                let session = QaSession {
                    id: Uuid::new_v4().to_string(),
                    owner_id: owner_id.to_string(),
                    created_at: Utc::now(),
                };
                self.parts.sessions.create_session(&session).await?;
                tracing::info!(owner_id, session_id = %session.id, "session created");
                Ok(session.id)
            }
        }
    }

    /// The owner's sessions, newest first.
    pub async fn list_sessions(&self, owner_id: &str) -> Result<Vec<QaSession>> {
        if owner_id.trim().is_empty() {
            return Err(CoreError::Unauthorized);
        }
        self.parts.sessions.list_sessions(owner_id).await
    }

    /// Up to `limit` most recent transcript messages, oldest first.
    pub async fn session_transcript(
        &self,
        owner_id: &str,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationMessage>> {
        if owner_id.trim().is_empty() {
            return Err(CoreError::Unauthorized);
        }
        self.parts
            .sessions
            .get_session(owner_id, session_id)
            .await?
            .ok_or_else(|| CoreError::not_found("session", session_id))?;
        self.parts
            .history
            .transcript(owner_id, session_id, limit)
            .await
    }

    /// Query log entries of a session, oldest first.
    pub async fn session_queries(&self, owner_id: &str, session_id: &str) -> Result<Vec<QueryLog>> {
        if owner_id.trim().is_empty() {
            return Err(CoreError::Unauthorized);
        }
        self.parts.query_logs.list_queries(owner_id, session_id).await
    }
}
