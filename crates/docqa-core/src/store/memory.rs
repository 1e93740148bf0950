//! In-memory implementation of every persistence trait, for tests and dev.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock`. Similarity search is
//! brute-force cosine over all stored vectors. Concurrent callers are safe;
//! writes to the same session are not serialized beyond the lock itself.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;

use crate::embedding::cosine_similarity;
use crate::error::{CoreError, Result};
use crate::models::{
    ConversationMessage, Document, DocumentChunk, DocumentStatus, MemoryRecord, QaSession,
    QueryLog, RetrievedChunk, RetrievedMemory, StoredObject,
};
use crate::retrieval::{rank_chunks, rank_memories};

use super::{
    ChunkFilter, ChunkRepository, DocumentRepository, MemoryStore, MessageLog,
    QueryLogRepository, SessionRepository,
};

/// In-memory store for testing and single-process development.
#[derive(Default)]
pub struct InMemoryStore {
    docs: RwLock<HashMap<String, Document>>,
    chunks: RwLock<HashMap<String, Vec<DocumentChunk>>>,
    sessions: RwLock<HashMap<String, QaSession>>,
    messages: RwLock<Vec<ConversationMessage>>,
    queries: RwLock<Vec<QueryLog>>,
    memories: RwLock<Vec<MemoryRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn owns_document(&self, owner_id: &str, document_id: &str) -> Result<bool> {
        Ok(read(&self.docs)?
            .get(document_id)
            .is_some_and(|d| d.owner_id == owner_id))
    }
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read()
        .map_err(|_| CoreError::storage("in-memory store lock poisoned"))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write()
        .map_err(|_| CoreError::storage("in-memory store lock poisoned"))
}

fn illegal_transition(from: DocumentStatus, to: DocumentStatus) -> CoreError {
    CoreError::InvalidInput(format!(
        "document status cannot change from {} to {}",
        from.as_str(),
        to.as_str()
    ))
}

#[async_trait]
impl DocumentRepository for InMemoryStore {
    async fn create_document(&self, doc: &Document) -> Result<()> {
        write(&self.docs)?.insert(doc.id.clone(), doc.clone());
        Ok(())
    }

    async fn get_document(&self, owner_id: &str, id: &str) -> Result<Option<Document>> {
        Ok(read(&self.docs)?
            .get(id)
            .filter(|d| d.owner_id == owner_id)
            .cloned())
    }

    async fn list_documents(&self, owner_id: &str) -> Result<Vec<Document>> {
        let mut docs: Vec<Document> = read(&self.docs)?
            .values()
            .filter(|d| d.owner_id == owner_id)
            .cloned()
            .collect();
        docs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(docs)
    }

    async fn update_status(
        &self,
        owner_id: &str,
        id: &str,
        from: DocumentStatus,
        to: DocumentStatus,
        failure_reason: Option<&str>,
    ) -> Result<bool> {
        if !from.can_transition_to(to) {
            return Err(illegal_transition(from, to));
        }
        let mut docs = write(&self.docs)?;
        match docs.get_mut(id) {
            Some(doc) if doc.owner_id == owner_id && doc.status == from => {
                doc.status = to;
                doc.failure_reason = failure_reason.map(str::to_string);
                doc.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_file(&self, owner_id: &str, id: &str, file: &StoredObject) -> Result<()> {
        let mut docs = write(&self.docs)?;
        match docs.get_mut(id) {
            Some(doc) if doc.owner_id == owner_id => {
                doc.file = Some(file.clone());
                doc.updated_at = Utc::now();
                Ok(())
            }
            _ => Err(CoreError::not_found("document", id)),
        }
    }

    async fn delete_document(&self, owner_id: &str, id: &str) -> Result<bool> {
        let mut docs = write(&self.docs)?;
        let owned = docs.get(id).is_some_and(|d| d.owner_id == owner_id);
        if owned {
            docs.remove(id);
        }
        Ok(owned)
    }
}

#[async_trait]
impl ChunkRepository for InMemoryStore {
    async fn replace_chunks(
        &self,
        owner_id: &str,
        document_id: &str,
        chunks: &[DocumentChunk],
    ) -> Result<()> {
        if !self.owns_document(owner_id, document_id)? {
            return Err(CoreError::not_found("document", document_id));
        }
        write(&self.chunks)?.insert(document_id.to_string(), chunks.to_vec());
        Ok(())
    }

    async fn list_chunks(&self, owner_id: &str, document_id: &str) -> Result<Vec<DocumentChunk>> {
        if !self.owns_document(owner_id, document_id)? {
            return Ok(Vec::new());
        }
        let mut chunks = read(&self.chunks)?
            .get(document_id)
            .cloned()
            .unwrap_or_default();
        chunks.sort_by_key(|c| c.chunk_index);
        Ok(chunks)
    }

    async fn count_chunks(&self, owner_id: &str, document_id: &str) -> Result<usize> {
        if !self.owns_document(owner_id, document_id)? {
            return Ok(0);
        }
        Ok(read(&self.chunks)?.get(document_id).map_or(0, Vec::len))
    }

    async fn delete_chunks(&self, owner_id: &str, document_id: &str) -> Result<()> {
        if self.owns_document(owner_id, document_id)? {
            write(&self.chunks)?.remove(document_id);
        }
        Ok(())
    }

    async fn search_similar(
        &self,
        owner_id: &str,
        query: &[f32],
        filter: &ChunkFilter,
        k: usize,
    ) -> Result<Vec<RetrievedChunk>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let docs = read(&self.docs)?;
        let chunks = read(&self.chunks)?;
        let candidates: Vec<RetrievedChunk> = chunks
            .iter()
            .filter(|(doc_id, _)| {
                docs.get(doc_id.as_str()).is_some_and(|d| {
                    d.owner_id == owner_id
                        && filter.allows_status(d.status)
                        && filter.allows_document(&d.id)
                })
            })
            .flat_map(|(_, doc_chunks)| doc_chunks.iter())
            .map(|chunk| RetrievedChunk {
                score: cosine_similarity(query, &chunk.embedding) as f64,
                chunk: chunk.clone(),
            })
            .collect();
        Ok(rank_chunks(candidates, k))
    }
}

#[async_trait]
impl SessionRepository for InMemoryStore {
    async fn create_session(&self, session: &QaSession) -> Result<()> {
        write(&self.sessions)?.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn get_session(&self, owner_id: &str, id: &str) -> Result<Option<QaSession>> {
        Ok(read(&self.sessions)?
            .get(id)
            .filter(|s| s.owner_id == owner_id)
            .cloned())
    }

    async fn list_sessions(&self, owner_id: &str) -> Result<Vec<QaSession>> {
        let mut sessions: Vec<QaSession> = read(&self.sessions)?
            .values()
            .filter(|s| s.owner_id == owner_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(sessions)
    }
}

#[async_trait]
impl MessageLog for InMemoryStore {
    async fn append_message(&self, message: &ConversationMessage) -> Result<()> {
        write(&self.messages)?.push(message.clone());
        Ok(())
    }

    async fn recent_messages(
        &self,
        owner_id: &str,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationMessage>> {
        Ok(read(&self.messages)?
            .iter()
            .rev()
            .filter(|m| m.owner_id == owner_id && m.session_id == session_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn count_messages(&self, owner_id: &str, session_id: &str) -> Result<usize> {
        Ok(read(&self.messages)?
            .iter()
            .filter(|m| m.owner_id == owner_id && m.session_id == session_id)
            .count())
    }
}

#[async_trait]
impl QueryLogRepository for InMemoryStore {
    async fn record_query(&self, log: &QueryLog) -> Result<()> {
        write(&self.queries)?.push(log.clone());
        Ok(())
    }

    async fn list_queries(&self, owner_id: &str, session_id: &str) -> Result<Vec<QueryLog>> {
        Ok(read(&self.queries)?
            .iter()
            .filter(|q| q.owner_id == owner_id && q.session_id == session_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn upsert_memory(&self, record: &MemoryRecord) -> Result<MemoryRecord> {
        let mut memories = write(&self.memories)?;
        let existing = memories.iter_mut().find(|m| {
            m.owner_id == record.owner_id
                && m.session_id == record.session_id
                && m.source == record.source
                && m.content == record.content
        });
        match existing {
            Some(m) => {
                m.embedding = record.embedding.clone();
                m.importance = record.importance;
                m.created_at = record.created_at;
                Ok(m.clone())
            }
            None => {
                memories.push(record.clone());
                Ok(record.clone())
            }
        }
    }

    async fn search_memories(
        &self,
        owner_id: &str,
        session_id: Option<&str>,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievedMemory>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let candidates: Vec<RetrievedMemory> = read(&self.memories)?
            .iter()
            .filter(|m| m.owner_id == owner_id)
            .filter(|m| session_id.map_or(true, |s| m.session_id == s))
            .filter_map(|m| {
                let embedding = m.embedding.as_ref()?;
                Some(RetrievedMemory {
                    score: cosine_similarity(query, embedding) as f64,
                    memory: m.clone(),
                })
            })
            .collect();
        Ok(rank_memories(candidates, k))
    }

    async fn list_memories(
        &self,
        owner_id: &str,
        session_id: Option<&str>,
    ) -> Result<Vec<MemoryRecord>> {
        Ok(read(&self.memories)?
            .iter()
            .filter(|m| m.owner_id == owner_id)
            .filter(|m| session_id.map_or(true, |s| m.session_id == s))
            .cloned()
            .collect())
    }

    async fn delete_memories(&self, owner_id: &str, ids: &[String]) -> Result<usize> {
        let mut memories = write(&self.memories)?;
        let before = memories.len();
        memories.retain(|m| !(m.owner_id == owner_id && ids.contains(&m.id)));
        Ok(before - memories.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocumentSource, MemorySource, Role};
    use chrono::Duration;

    fn doc(id: &str, owner: &str, status: DocumentStatus) -> Document {
        let now = Utc::now();
        Document {
            id: id.to_string(),
            owner_id: owner.to_string(),
            title: id.to_string(),
            source: DocumentSource::Upload,
            status,
            failure_reason: None,
            file: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn chunk(id: &str, doc_id: &str, index: i64, embedding: Vec<f32>) -> DocumentChunk {
        DocumentChunk {
            id: id.to_string(),
            document_id: doc_id.to_string(),
            chunk_index: index,
            content: format!("content of {}", id),
            token_count: 3,
            embedding,
        }
    }

    fn memory(id: &str, content: &str, embedding: Vec<f32>) -> MemoryRecord {
        MemoryRecord {
            id: id.to_string(),
            session_id: "s1".to_string(),
            owner_id: "u1".to_string(),
            source: MemorySource::QaTurn,
            content: content.to_string(),
            embedding: Some(embedding),
            importance: 1,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn documents_are_owner_scoped() {
        let store = InMemoryStore::new();
        store.create_document(&doc("d1", "alice", DocumentStatus::Pending)).await.unwrap();
        assert!(store.get_document("alice", "d1").await.unwrap().is_some());
        assert!(store.get_document("bob", "d1").await.unwrap().is_none());
        assert!(!store.delete_document("bob", "d1").await.unwrap());
        assert!(store.list_documents("bob").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_status_is_compare_and_set() {
        let store = InMemoryStore::new();
        store.create_document(&doc("d1", "u1", DocumentStatus::Pending)).await.unwrap();
        let moved = store
            .update_status("u1", "d1", DocumentStatus::Pending, DocumentStatus::Processing, None)
            .await
            .unwrap();
        assert!(moved);
        let again = store
            .update_status("u1", "d1", DocumentStatus::Pending, DocumentStatus::Processing, None)
            .await
            .unwrap();
        assert!(!again);
    }

    #[tokio::test]
    async fn update_status_rejects_backward_moves() {
        let store = InMemoryStore::new();
        store.create_document(&doc("d1", "u1", DocumentStatus::Processed)).await.unwrap();
        let err = store
            .update_status("u1", "d1", DocumentStatus::Processed, DocumentStatus::Pending, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind().as_str(), "invalid_input");
        let stored = store.get_document("u1", "d1").await.unwrap().unwrap();
        assert_eq!(stored.status, DocumentStatus::Processed);
    }

    #[tokio::test]
    async fn chunk_access_is_owner_scoped() {
        let store = InMemoryStore::new();
        store.create_document(&doc("d1", "alice", DocumentStatus::Processing)).await.unwrap();
        store
            .replace_chunks("alice", "d1", &[chunk("c1", "d1", 0, vec![1.0])])
            .await
            .unwrap();

        let err = store
            .replace_chunks("bob", "d1", &[chunk("x", "d1", 0, vec![1.0])])
            .await
            .unwrap_err();
        assert_eq!(err.kind().as_str(), "not_found");
        assert!(store.list_chunks("bob", "d1").await.unwrap().is_empty());
        assert_eq!(store.count_chunks("bob", "d1").await.unwrap(), 0);

        store.delete_chunks("bob", "d1").await.unwrap();
        let kept = store.list_chunks("alice", "d1").await.unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, "c1");
    }

    #[tokio::test]
    async fn chunk_search_respects_owner_status_and_filter() {
        let store = InMemoryStore::new();
        store.create_document(&doc("d1", "u1", DocumentStatus::Processed)).await.unwrap();
        store.create_document(&doc("d2", "u1", DocumentStatus::Failed)).await.unwrap();
        store.create_document(&doc("d3", "u2", DocumentStatus::Processed)).await.unwrap();
        store.create_document(&doc("d4", "u1", DocumentStatus::Processed)).await.unwrap();
        store.replace_chunks("u1", "d1", &[chunk("c1", "d1", 0, vec![1.0, 0.0])]).await.unwrap();
        store.replace_chunks("u1", "d2", &[chunk("c2", "d2", 0, vec![1.0, 0.0])]).await.unwrap();
        store.replace_chunks("u2", "d3", &[chunk("c3", "d3", 0, vec![1.0, 0.0])]).await.unwrap();
        store.replace_chunks("u1", "d4", &[chunk("c4", "d4", 0, vec![0.0, 1.0])]).await.unwrap();

        let filter = ChunkFilter {
            document_ids: None,
            statuses: Some(vec![DocumentStatus::Processed]),
        };
        let hits = store.search_similar("u1", &[1.0, 0.0], &filter, 10).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c4"]);

        let only_d4 = ChunkFilter {
            document_ids: Some(vec!["d4".to_string()]),
            statuses: Some(vec![DocumentStatus::Processed]),
        };
        let hits = store.search_similar("u1", &[1.0, 0.0], &only_d4, 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.id, "c4");
    }

    #[tokio::test]
    async fn chunk_search_caps_and_orders() {
        let store = InMemoryStore::new();
        store.create_document(&doc("d1", "u1", DocumentStatus::Processed)).await.unwrap();
        let chunks: Vec<DocumentChunk> = (0..6)
            .map(|i| chunk(&format!("c{}", i), "d1", i, vec![1.0, i as f32]))
            .collect();
        store.replace_chunks("u1", "d1", &chunks).await.unwrap();
        let hits = store
            .search_similar("u1", &[1.0, 0.0], &ChunkFilter::default(), 3)
            .await
            .unwrap();
        assert_eq!(hits.len(), 3);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
        assert_eq!(hits[0].chunk.id, "c0");
    }

    #[tokio::test]
    async fn recent_messages_newest_first() {
        let store = InMemoryStore::new();
        let base = Utc::now();
        for i in 0..5 {
            store
                .append_message(&ConversationMessage {
                    id: format!("m{}", i),
                    session_id: "s1".to_string(),
                    owner_id: "u1".to_string(),
                    role: Role::User,
                    content: format!("message {}", i),
                    token_count: 2,
                    created_at: base + Duration::seconds(i),
                })
                .await
                .unwrap();
        }
        let recent = store.recent_messages("u1", "s1", 2).await.unwrap();
        assert_eq!(recent[0].id, "m4");
        assert_eq!(recent[1].id, "m3");
        assert_eq!(store.count_messages("u1", "s1").await.unwrap(), 5);
        assert_eq!(store.count_messages("u2", "s1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn upsert_memory_dedups_on_tuple() {
        let store = InMemoryStore::new();
        store.upsert_memory(&memory("m1", "same", vec![1.0, 0.0])).await.unwrap();
        let stored = store.upsert_memory(&memory("m2", "same", vec![0.0, 1.0])).await.unwrap();
        assert_eq!(stored.id, "m1");
        let all = store.list_memories("u1", None).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].embedding, Some(vec![0.0, 1.0]));

        let mut other_source = memory("m3", "same", vec![1.0, 1.0]);
        other_source.source = MemorySource::Summary;
        store.upsert_memory(&other_source).await.unwrap();
        assert_eq!(store.list_memories("u1", Some("s1")).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn memory_search_skips_unembedded_records() {
        let store = InMemoryStore::new();
        store.upsert_memory(&memory("m1", "a", vec![1.0, 0.0])).await.unwrap();
        let mut bare = memory("m2", "b", vec![]);
        bare.embedding = None;
        store.upsert_memory(&bare).await.unwrap();
        let hits = store.search_memories("u1", Some("s1"), &[1.0, 0.0], 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(store.search_memories("u1", Some("other"), &[1.0, 0.0], 5).await.unwrap().is_empty());
    }
}
