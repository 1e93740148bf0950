//! Behavioural properties checked over a spread of inputs.

mod common;

use std::sync::Arc;

use chrono::{Duration, Utc};
use docqa_core::chunk::{Chunker, ChunkerConfig};
use docqa_core::embedding::EmbeddingGateway;
use docqa_core::history::HistoryManager;
use docqa_core::memory::{MemoryConfig, MemoryManager};
use docqa_core::models::{
    Document, DocumentChunk, DocumentSource, DocumentStatus, MemoryRecord, MemorySource, Role,
};
use docqa_core::queue::RecordingQueue;
use docqa_core::retrieval::Retriever;
use docqa_core::store::memory::InMemoryStore;
use docqa_core::store::{ChunkRepository, DocumentRepository, MemoryStore};

fn sample_text() -> String {
    let mut text = String::new();
    for line in 0..30 {
        for word in 0..(line % 7 + 1) {
            text.push_str(&format!("w{}_{} ", line, word));
        }
        text.push('\n');
        if line % 5 == 0 {
            text.push('\n');
        }
    }
    text
}

/// Rebuild the word stream from chunks by skipping each chunk's overlap head.
fn reassemble(chunks: &[docqa_core::chunk::TextChunk]) -> Vec<String> {
    let mut words: Vec<String> = Vec::new();
    for chunk in chunks {
        let chunk_words: Vec<&str> = chunk.content.split_whitespace().collect();
        let mut skip = 0;
        for k in (1..=chunk_words.len().min(words.len())).rev() {
            if words[words.len() - k..] == chunk_words[..k] {
                skip = k;
                break;
            }
        }
        words.extend(chunk_words[skip..].iter().map(|w| w.to_string()));
    }
    words
}

#[test]
fn chunks_cover_the_token_stream_within_budget() {
    let text = sample_text();
    let original: Vec<String> = text.split_whitespace().map(str::to_string).collect();
    for (max, overlap) in [(2, 0), (3, 1), (5, 0), (8, 3), (20, 5), (500, 50)] {
        let chunker = Chunker::new(ChunkerConfig {
            max_tokens: max,
            overlap_tokens: overlap,
        });
        let chunks = chunker.chunk(&text);
        assert!(!chunks.is_empty());
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
            assert!(chunk.token_count <= max, "max={} chunk={:?}", max, chunk);
            assert!(!chunk.content.trim().is_empty());
        }
        assert_eq!(reassemble(&chunks), original, "max={} overlap={}", max, overlap);
    }
}

#[test]
fn chunking_is_deterministic() {
    let chunker = Chunker::new(ChunkerConfig {
        max_tokens: 7,
        overlap_tokens: 2,
    });
    assert_eq!(chunker.chunk(&sample_text()), chunker.chunk(&sample_text()));
    assert!(chunker.chunk("").is_empty());
}

#[tokio::test]
async fn history_window_respects_every_budget() {
    let store = Arc::new(InMemoryStore::new());
    let history = HistoryManager::new(store);
    let contents = [
        "short",
        "a somewhat longer message with several words in it",
        "mid length reply here",
        "ok",
        "another message that is fairly verbose and rambling on",
        "final",
    ];
    for (i, content) in contents.iter().enumerate() {
        let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
        let msg = history.new_message("u1", "s1", role, content);
        history.append(&msg).await.unwrap();
    }

    for budget in 0..40 {
        let window = history.list_recent("u1", "s1", budget, 100).await.unwrap();
        let spent: usize = window.messages.iter().map(|m| history.message_cost(m)).sum();
        assert!(spent <= budget);
        assert_eq!(spent, window.used_tokens);
        assert!(window
            .messages
            .windows(2)
            .all(|w| w[0].created_at <= w[1].created_at));
        if let Some(last) = window.messages.last() {
            assert_eq!(last.content, "final");
        }
    }
}

fn memory_manager(store: Arc<InMemoryStore>) -> MemoryManager {
    MemoryManager::new(
        store,
        EmbeddingGateway::new(Arc::new(common::WordHashEmbedder), 8),
        Arc::new(RecordingQueue::new()),
        MemoryConfig::default(),
    )
}

fn record(id: &str, session: &str, importance: i32, age_secs: i64, embedding: Vec<f32>) -> MemoryRecord {
    MemoryRecord {
        id: id.to_string(),
        session_id: session.to_string(),
        owner_id: "u1".to_string(),
        source: MemorySource::QaTurn,
        content: format!("content {}", id),
        embedding: Some(embedding),
        importance,
        created_at: Utc::now() - Duration::seconds(age_secs),
    }
}

#[tokio::test]
async fn upsert_keeps_one_record_with_latest_embedding() {
    let store = Arc::new(InMemoryStore::new());
    let memory = memory_manager(store.clone());
    let mut first = record("m1", "s1", 1, 0, vec![1.0, 0.0]);
    first.content = "same content".into();
    let mut second = record("m2", "s1", 3, 0, vec![0.0, 1.0]);
    second.content = "same content".into();

    memory.upsert(&first).await.unwrap();
    memory.upsert(&second).await.unwrap();

    let all = memory.list("u1", Some("s1")).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].embedding, Some(vec![0.0, 1.0]));
    assert_eq!(all[0].importance, 3);
}

#[tokio::test]
async fn prune_survivors_are_the_top_n() {
    for limit in 0..8 {
        let store = Arc::new(InMemoryStore::new());
        let memory = memory_manager(store.clone());
        let mut all = Vec::new();
        for i in 0..7i64 {
            let r = record(&format!("m{}", i), "s1", (i % 3) as i32, i * 10, vec![1.0, 0.0]);
            store.upsert_memory(&r).await.unwrap();
            all.push(r);
        }
        memory.prune("u1", Some("s1"), limit).await.unwrap();

        all.sort_by(|a, b| {
            b.importance
                .cmp(&a.importance)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        let mut expected: Vec<String> = all.iter().take(limit).map(|m| m.id.clone()).collect();
        expected.sort();
        let mut left: Vec<String> = memory
            .list("u1", Some("s1"))
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        left.sort();
        assert_eq!(left, expected, "limit={}", limit);
    }
}

#[tokio::test]
async fn prune_without_session_spans_all_sessions() {
    let store = Arc::new(InMemoryStore::new());
    let memory = memory_manager(store.clone());
    store.upsert_memory(&record("a", "s1", 1, 0, vec![1.0])).await.unwrap();
    store.upsert_memory(&record("b", "s2", 2, 0, vec![1.0])).await.unwrap();
    store.upsert_memory(&record("c", "s3", 3, 0, vec![1.0])).await.unwrap();
    assert_eq!(memory.prune("u1", None, 1).await.unwrap(), 2);
    let left = memory.list("u1", None).await.unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].id, "c");
}

#[tokio::test]
async fn retrieval_is_capped_and_non_increasing() {
    let store = Arc::new(InMemoryStore::new());
    let now = Utc::now();
    store
        .create_document(&Document {
            id: "d1".into(),
            owner_id: "u1".into(),
            title: "d1".into(),
            source: DocumentSource::Upload,
            status: DocumentStatus::Processed,
            failure_reason: None,
            file: None,
            created_at: now,
            updated_at: now,
        })
        .await
        .unwrap();
    let chunks: Vec<DocumentChunk> = (0..12)
        .map(|i| DocumentChunk {
            id: format!("c{:02}", i),
            document_id: "d1".into(),
            chunk_index: i,
            content: format!("chunk {}", i),
            token_count: 2,
            embedding: vec![1.0, (i % 4) as f32],
        })
        .collect();
    store.replace_chunks("u1", "d1", &chunks).await.unwrap();
    for i in 0..12 {
        store
            .upsert_memory(&record(&format!("m{:02}", i), "s1", 1, 0, vec![1.0, (i % 3) as f32]))
            .await
            .unwrap();
    }

    let retriever = Retriever::new(store.clone());
    let memory = memory_manager(store.clone());
    for k in 0..15 {
        let hits = retriever.search_chunks("u1", &[1.0, 0.5], None, k).await.unwrap();
        assert!(hits.len() <= k);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
        assert!(hits
            .windows(2)
            .all(|w| w[0].score > w[1].score || w[0].chunk.id < w[1].chunk.id));

        let recalled = memory.search("u1", Some("s1"), &[1.0, 0.5], k).await.unwrap();
        assert!(recalled.len() <= k);
        assert!(recalled.windows(2).all(|w| w[0].score >= w[1].score));
    }
}
