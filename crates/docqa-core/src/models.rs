//! Core data models for docqa.
//!
//! These types represent the documents, chunks, sessions, transcript
//! messages, long-term memories and query logs that flow through the
//! ingestion and ask pipelines. Timestamps are `DateTime<Utc>`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a document came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentSource {
    Upload,
    Url,
}

impl DocumentSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentSource::Upload => "upload",
            DocumentSource::Url => "url",
        }
    }

    pub fn from_str_value(s: &str) -> Self {
        match s {
            "url" => DocumentSource::Url,
            _ => DocumentSource::Upload,
        }
    }
}

/// Processing status of a document.
///
/// Transitions are monotone: `pending → processing → processed | failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Processed,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Processed => "processed",
            DocumentStatus::Failed => "failed",
        }
    }

    pub fn from_str_value(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DocumentStatus::Pending),
            "processing" => Some(DocumentStatus::Processing),
            "processed" => Some(DocumentStatus::Processed),
            "failed" => Some(DocumentStatus::Failed),
            _ => None,
        }
    }

    /// Whether moving from `self` to `next` respects the state machine.
    pub fn can_transition_to(&self, next: DocumentStatus) -> bool {
        matches!(
            (self, next),
            (DocumentStatus::Pending, DocumentStatus::Processing)
                | (DocumentStatus::Pending, DocumentStatus::Failed)
                | (DocumentStatus::Processing, DocumentStatus::Processed)
                | (DocumentStatus::Processing, DocumentStatus::Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DocumentStatus::Processed | DocumentStatus::Failed)
    }
}

/// Blob metadata recorded after the object store accepted an upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObject {
    pub key: String,
    pub size: u64,
    pub mime_type: String,
    pub etag: String,
}

/// An uploaded document and its processing state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    pub source: DocumentSource,
    pub status: DocumentStatus,
    pub failure_reason: Option<String>,
    /// Set once the blob is in object storage.
    pub file: Option<StoredObject>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A token-bounded slice of a processed document, with its embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub id: String,
    pub document_id: String,
    /// 0-based, dense per document.
    pub chunk_index: i64,
    pub content: String,
    pub token_count: i64,
    #[serde(skip)]
    pub embedding: Vec<f32>,
}

/// A conversation grouping turns for one owner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaSession {
    pub id: String,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
}

/// Author of a transcript message or chat prompt entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }

    pub fn from_str_value(s: &str) -> Self {
        match s {
            "assistant" => Role::Assistant,
            "system" => Role::System,
            _ => Role::User,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the append-only per-session transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub id: String,
    pub session_id: String,
    pub owner_id: String,
    pub role: Role,
    pub content: String,
    pub token_count: i64,
    pub created_at: DateTime<Utc>,
}

/// How a memory record was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemorySource {
    QaTurn,
    Summary,
    Manual,
}

impl MemorySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemorySource::QaTurn => "qa_turn",
            MemorySource::Summary => "summary",
            MemorySource::Manual => "manual",
        }
    }

    pub fn from_str_value(s: &str) -> Self {
        match s {
            "summary" => MemorySource::Summary,
            "manual" => MemorySource::Manual,
            _ => MemorySource::QaTurn,
        }
    }
}

/// A durable, embeddable note retained beyond the raw transcript.
///
/// At most one record exists per `(owner_id, session_id, source, content)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: String,
    pub session_id: String,
    pub owner_id: String,
    pub source: MemorySource,
    pub content: String,
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
    /// Higher survives pruning longer.
    pub importance: i32,
    pub created_at: DateTime<Utc>,
}

/// A chunk citation attached to an answer and its query log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkSource {
    pub document_id: String,
    pub chunk_id: String,
    pub chunk_index: i64,
    pub score: f64,
    pub content: String,
}

/// Write-once audit record of a turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryLog {
    pub id: String,
    pub session_id: String,
    pub owner_id: String,
    pub query_text: String,
    pub response_text: String,
    pub latency_ms: i64,
    pub sources: Vec<ChunkSource>,
    pub created_at: DateTime<Utc>,
}

/// A chunk returned by similarity search. Higher `score` is more relevant.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub chunk: DocumentChunk,
    pub score: f64,
}

/// A memory returned by similarity search. Higher `score` is more relevant.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedMemory {
    pub memory: MemoryRecord,
    pub score: f64,
}

impl RetrievedChunk {
    pub fn to_source(&self) -> ChunkSource {
        ChunkSource {
            document_id: self.chunk.document_id.clone(),
            chunk_id: self.chunk.id.clone(),
            chunk_index: self.chunk.chunk_index,
            score: self.score,
            content: self.chunk.content.clone(),
        }
    }
}
