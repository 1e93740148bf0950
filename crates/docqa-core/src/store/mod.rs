//! Persistence contracts for docqa.
//!
//! Each collaborator is its own trait so backends can be mixed (for
//! example SQLite for documents and an external vector store for memories).
//! Every operation that touches owned data takes an `owner_id` and must
//! refuse to read or mutate another owner's rows: lookups return `None`,
//! mutations affect nothing.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.
//!
//! | Trait | Purpose |
//! |-------|---------|
//! | [`DocumentRepository`] | Document rows and their status state machine |
//! | [`ChunkRepository`] | Chunk persistence and nearest-neighbour chunk search |
//! | [`SessionRepository`] | Q&A sessions |
//! | [`MessageLog`] | Append-only per-session transcript |
//! | [`QueryLogRepository`] | Write-once turn audit records |
//! | [`MemoryStore`] | Long-term memories with similarity search |

pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{
    ConversationMessage, Document, DocumentChunk, DocumentStatus, MemoryRecord, QaSession,
    QueryLog, RetrievedChunk, RetrievedMemory, StoredObject,
};

/// Restricts which chunks a similarity search may return.
#[derive(Debug, Clone, Default)]
pub struct ChunkFilter {
    /// Only chunks of these documents.
    pub document_ids: Option<Vec<String>>,
    /// Only chunks of documents in one of these statuses.
    pub statuses: Option<Vec<DocumentStatus>>,
}

impl ChunkFilter {
    pub fn allows_document(&self, document_id: &str) -> bool {
        self.document_ids
            .as_ref()
            .map_or(true, |ids| ids.iter().any(|id| id == document_id))
    }

    pub fn allows_status(&self, status: DocumentStatus) -> bool {
        self.statuses
            .as_ref()
            .map_or(true, |statuses| statuses.contains(&status))
    }
}

#[async_trait]
pub trait DocumentRepository: Send + Sync {
    async fn create_document(&self, doc: &Document) -> Result<()>;

    async fn get_document(&self, owner_id: &str, id: &str) -> Result<Option<Document>>;

    /// Newest first.
    async fn list_documents(&self, owner_id: &str) -> Result<Vec<Document>>;

    /// Compare-and-set status change.
    ///
    /// Moves the document from `from` to `to` and records `failure_reason`.
    /// Returns `false` without writing if the current status is not `from`.
    /// A pair the state machine forbids (see
    /// [`DocumentStatus::can_transition_to`]) is `invalid_input`.
    async fn update_status(
        &self,
        owner_id: &str,
        id: &str,
        from: DocumentStatus,
        to: DocumentStatus,
        failure_reason: Option<&str>,
    ) -> Result<bool>;

    /// Record blob metadata after the object store accepted the upload.
    async fn set_file(&self, owner_id: &str, id: &str, file: &StoredObject) -> Result<()>;

    /// Returns whether a row was deleted.
    async fn delete_document(&self, owner_id: &str, id: &str) -> Result<bool>;
}

#[async_trait]
pub trait ChunkRepository: Send + Sync {
    /// Replace every chunk of `document_id` with `chunks`.
    ///
    /// `not_found` if the document does not belong to `owner_id`.
    async fn replace_chunks(
        &self,
        owner_id: &str,
        document_id: &str,
        chunks: &[DocumentChunk],
    ) -> Result<()>;

    /// Chunks ordered by `chunk_index`. Empty for another owner's document.
    async fn list_chunks(&self, owner_id: &str, document_id: &str) -> Result<Vec<DocumentChunk>>;

    async fn count_chunks(&self, owner_id: &str, document_id: &str) -> Result<usize>;

    async fn delete_chunks(&self, owner_id: &str, document_id: &str) -> Result<()>;

    /// Nearest-neighbour search over the owner's chunks.
    ///
    /// Returns at most `k` results sorted by descending score.
    async fn search_similar(
        &self,
        owner_id: &str,
        query: &[f32],
        filter: &ChunkFilter,
        k: usize,
    ) -> Result<Vec<RetrievedChunk>>;
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn create_session(&self, session: &QaSession) -> Result<()>;

    async fn get_session(&self, owner_id: &str, id: &str) -> Result<Option<QaSession>>;

    /// Newest first.
    async fn list_sessions(&self, owner_id: &str) -> Result<Vec<QaSession>>;
}

#[async_trait]
pub trait MessageLog: Send + Sync {
    async fn append_message(&self, message: &ConversationMessage) -> Result<()>;

    /// Up to `limit` messages, newest first.
    async fn recent_messages(
        &self,
        owner_id: &str,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationMessage>>;

    async fn count_messages(&self, owner_id: &str, session_id: &str) -> Result<usize>;
}

#[async_trait]
pub trait QueryLogRepository: Send + Sync {
    async fn record_query(&self, log: &QueryLog) -> Result<()>;

    /// Oldest first.
    async fn list_queries(&self, owner_id: &str, session_id: &str) -> Result<Vec<QueryLog>>;
}

#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Insert or update keyed on `(owner_id, session_id, source, content)`.
    ///
    /// On conflict the existing row keeps its id and takes the new
    /// embedding, importance and timestamp. Returns the stored record.
    async fn upsert_memory(&self, record: &MemoryRecord) -> Result<MemoryRecord>;

    /// Nearest-neighbour search over the owner's memories, optionally
    /// restricted to one session. At most `k` results, descending score.
    async fn search_memories(
        &self,
        owner_id: &str,
        session_id: Option<&str>,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievedMemory>>;

    async fn list_memories(
        &self,
        owner_id: &str,
        session_id: Option<&str>,
    ) -> Result<Vec<MemoryRecord>>;

    /// Returns how many rows were removed.
    async fn delete_memories(&self, owner_id: &str, ids: &[String]) -> Result<usize>;
}
