//! Similarity retrieval and result ranking.
//!
//! Nearest-neighbour search itself is delegated to the store. For chunks
//! this layer scopes the search (owner, optional document filter,
//! `processed` documents only), caps it to `top_k` and enforces one
//! deterministic order, shared with memory search:
//!
//! 1. Score, descending.
//! 2. Id, ascending, for equal scores.
//!
//! Stores are expected to return results already in this order; re-ranking
//! here is a stable no-op for well-behaved backends and guarantees
//! non-increasing scores for the rest.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::error::Result;
use crate::models::{DocumentStatus, RetrievedChunk, RetrievedMemory};
use crate::store::{ChunkFilter, ChunkRepository};

fn by_score_then_id(a_score: f64, a_id: &str, b_score: f64, b_id: &str) -> Ordering {
    b_score
        .partial_cmp(&a_score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a_id.cmp(b_id))
}

/// Sort chunks by (score desc, id asc) and keep the first `k`.
pub fn rank_chunks(mut chunks: Vec<RetrievedChunk>, k: usize) -> Vec<RetrievedChunk> {
    chunks.sort_by(|a, b| by_score_then_id(a.score, &a.chunk.id, b.score, &b.chunk.id));
    chunks.truncate(k);
    chunks
}

/// Sort memories by (score desc, id asc) and keep the first `k`.
pub fn rank_memories(mut memories: Vec<RetrievedMemory>, k: usize) -> Vec<RetrievedMemory> {
    memories.sort_by(|a, b| by_score_then_id(a.score, &a.memory.id, b.score, &b.memory.id));
    memories.truncate(k);
    memories
}

/// Owner-scoped chunk search. Memory search lives in
/// [`MemoryManager::search`](crate::memory::MemoryManager::search).
#[derive(Clone)]
pub struct Retriever {
    chunks: Arc<dyn ChunkRepository>,
}

impl Retriever {
    pub fn new(chunks: Arc<dyn ChunkRepository>) -> Self {
        Self { chunks }
    }

    /// Top-`k` chunks of the owner's `processed` documents.
    ///
    /// `document_ids`, when given, further restricts the candidate set.
    pub async fn search_chunks(
        &self,
        owner_id: &str,
        query: &[f32],
        document_ids: Option<&[String]>,
        k: usize,
    ) -> Result<Vec<RetrievedChunk>> {
        if k == 0 || query.is_empty() {
            return Ok(Vec::new());
        }
        let filter = ChunkFilter {
            document_ids: document_ids.map(<[String]>::to_vec),
            statuses: Some(vec![DocumentStatus::Processed]),
        };
        let hits = self
            .chunks
            .search_similar(owner_id, query, &filter, k)
            .await?;
        Ok(rank_chunks(hits, k))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocumentChunk;

    fn hit(id: &str, score: f64) -> RetrievedChunk {
        RetrievedChunk {
            chunk: DocumentChunk {
                id: id.to_string(),
                document_id: "d".to_string(),
                chunk_index: 0,
                content: String::new(),
                token_count: 0,
                embedding: Vec::new(),
            },
            score,
        }
    }

    #[test]
    fn ties_break_by_id_ascending() {
        let ranked = rank_chunks(vec![hit("b", 0.5), hit("a", 0.5), hit("c", 0.9)], 10);
        let ids: Vec<&str> = ranked.iter().map(|h| h.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn rank_truncates_to_k() {
        let ranked = rank_chunks(vec![hit("a", 0.1), hit("b", 0.2), hit("c", 0.3)], 2);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].chunk.id, "c");
        assert!(rank_chunks(vec![hit("a", 0.1)], 0).is_empty());
    }
}
