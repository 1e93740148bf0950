//! Long-term memory: deduplicated upsert, similarity recall, pruning and
//! the periodic summarization trigger.
//!
//! Memory is advisory. The ask orchestrator runs every write here as a
//! best-effort step, so a failing memory backend degrades recall but never
//! fails a turn.
//!
//! Pruning keeps the `limit` best records of a scope ranked by
//! importance (desc), then recency (desc), then id (asc).

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::embedding::EmbeddingGateway;
use crate::error::{CoreError, Result};
use crate::models::{MemoryRecord, MemorySource, RetrievedMemory};
use crate::queue::{Job, JobQueue};
use crate::retrieval::rank_memories;
use crate::store::MemoryStore;

/// Memory subsystem settings.
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    pub enabled: bool,
    /// Search, and prune, across all of an owner's sessions.
    pub cross_session: bool,
    /// Records kept per prune scope. `None` disables pruning.
    pub prune_limit: Option<usize>,
    /// Enqueue a session summary every N turns. `None` or 0 disables it.
    pub summary_every_n_turns: Option<usize>,
    pub turn_importance: i32,
    pub summary_importance: i32,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cross_session: false,
            prune_limit: None,
            summary_every_n_turns: None,
            turn_importance: 1,
            summary_importance: 5,
        }
    }
}

/// Content stored for a `qa_turn` memory.
pub fn turn_memory_content(question: &str, answer: &str) -> String {
    format!("Q: {}\nA: {}", question.trim(), answer.trim())
}

#[derive(Clone)]
pub struct MemoryManager {
    store: Arc<dyn MemoryStore>,
    gateway: EmbeddingGateway,
    queue: Arc<dyn JobQueue>,
    config: MemoryConfig,
}

impl MemoryManager {
    pub fn new(
        store: Arc<dyn MemoryStore>,
        gateway: EmbeddingGateway,
        queue: Arc<dyn JobQueue>,
        config: MemoryConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            queue,
            config,
        }
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Session scope for search and prune, `None` when memories are shared
    /// across the owner's sessions.
    pub fn scope<'a>(&self, session_id: &'a str) -> Option<&'a str> {
        if self.config.cross_session {
            None
        } else {
            Some(session_id)
        }
    }

    pub async fn upsert(&self, record: &MemoryRecord) -> Result<MemoryRecord> {
        self.store.upsert_memory(record).await
    }

    /// Top-`k` memories. Empty when disabled, `k == 0` or `embedding` empty.
    pub async fn search(
        &self,
        owner_id: &str,
        session_id: Option<&str>,
        embedding: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievedMemory>> {
        if !self.config.enabled || k == 0 || embedding.is_empty() {
            return Ok(Vec::new());
        }
        let hits = self
            .store
            .search_memories(owner_id, session_id, embedding, k)
            .await?;
        Ok(rank_memories(hits, k))
    }

    pub async fn list(&self, owner_id: &str, session_id: Option<&str>) -> Result<Vec<MemoryRecord>> {
        self.store.list_memories(owner_id, session_id).await
    }

    /// Keep the `limit` highest-ranked records of the scope, delete the rest.
    ///
    /// A `None` session prunes across all of the owner's sessions. Returns
    /// how many records were removed.
    pub async fn prune(&self, owner_id: &str, session_id: Option<&str>, limit: usize) -> Result<usize> {
        let mut records = self.store.list_memories(owner_id, session_id).await?;
        if records.len() <= limit {
            return Ok(0);
        }
        records.sort_by(|a, b| {
            b.importance
                .cmp(&a.importance)
                .then_with(|| b.created_at.cmp(&a.created_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        let doomed: Vec<String> = records.split_off(limit).into_iter().map(|m| m.id).collect();
        let removed = self.store.delete_memories(owner_id, &doomed).await?;
        tracing::info!(owner_id, session_id, removed, limit, "pruned memories");
        Ok(removed)
    }

    /// Prune the scope of `session_id` when a limit is configured.
    pub async fn prune_configured(&self, owner_id: &str, session_id: &str) -> Result<usize> {
        match self.config.prune_limit {
            Some(limit) => self.prune(owner_id, self.scope(session_id), limit).await,
            None => Ok(0),
        }
    }

    /// Embed and upsert a memory of the given source.
    pub async fn store_note(
        &self,
        owner_id: &str,
        session_id: &str,
        source: MemorySource,
        content: &str,
        importance: i32,
    ) -> Result<MemoryRecord> {
        let embedding = self.gateway.embed_one(content).await?;
        let record = MemoryRecord {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            owner_id: owner_id.to_string(),
            source,
            content: content.to_string(),
            embedding: Some(embedding),
            importance,
            created_at: Utc::now(),
        };
        let stored = self.upsert(&record).await?;
        tracing::debug!(
            owner_id,
            session_id,
            memory_id = %stored.id,
            source = source.as_str(),
            "memory upserted"
        );
        Ok(stored)
    }

    /// Persist the Q/A pair of a finished turn. `None` when disabled.
    pub async fn record_turn(
        &self,
        owner_id: &str,
        session_id: &str,
        question: &str,
        answer: &str,
    ) -> Result<Option<MemoryRecord>> {
        if !self.config.enabled {
            return Ok(None);
        }
        let content = turn_memory_content(question, answer);
        self.store_note(
            owner_id,
            session_id,
            MemorySource::QaTurn,
            &content,
            self.config.turn_importance,
        )
        .await
        .map(Some)
    }

    /// Store a user-authored note as a `manual` memory.
    pub async fn remember(
        &self,
        owner_id: &str,
        session_id: &str,
        content: &str,
        importance: i32,
    ) -> Result<MemoryRecord> {
        if owner_id.is_empty() {
            return Err(CoreError::Unauthorized);
        }
        let content = content.trim();
        if content.is_empty() {
            return Err(CoreError::InvalidInput("memory content is empty".to_string()));
        }
        self.store_note(owner_id, session_id, MemorySource::Manual, content, importance)
            .await
    }

    /// Whether a turn count lands on the summarization cadence.
    pub fn summary_due(&self, turn_count: usize) -> bool {
        match self.config.summary_every_n_turns {
            Some(n) if n > 0 && self.config.enabled => turn_count > 0 && turn_count % n == 0,
            _ => false,
        }
    }

    /// Enqueue a session summary if `turn_count` is due. Returns whether a
    /// job was enqueued.
    pub async fn maybe_schedule_summary(
        &self,
        owner_id: &str,
        session_id: &str,
        turn_count: usize,
    ) -> Result<bool> {
        if !self.summary_due(turn_count) {
            return Ok(false);
        }
        self.queue
            .enqueue(Job::SummarizeSession {
                owner_id: owner_id.to_string(),
                session_id: session_id.to_string(),
            })
            .await?;
        tracing::info!(owner_id, session_id, turn_count, "session summary scheduled");
        Ok(true)
    }
}
