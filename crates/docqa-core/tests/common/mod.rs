//! Shared fakes for the core integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use docqa_core::ask::{AskComponents, AskConfig, AskOrchestrator};
use docqa_core::chunk::{Chunker, ChunkerConfig};
use docqa_core::embedding::{Embedder, EmbeddingGateway};
use docqa_core::error::{CoreError, Result};
use docqa_core::history::HistoryManager;
use docqa_core::ingest::{IngestConfig, IngestionPipeline, UploadRequest};
use docqa_core::llm::{ChatMessage, LanguageModel};
use docqa_core::memory::{MemoryConfig, MemoryManager};
use docqa_core::models::Document;
use docqa_core::queue::RecordingQueue;
use docqa_core::retrieval::Retriever;
use docqa_core::storage::InMemoryObjectStorage;
use docqa_core::store::memory::InMemoryStore;
use docqa_core::summary::Summarizer;

pub const DIMS: usize = 64;

/// Bag-of-words embedder: each lowercase word bumps one hashed bucket.
pub struct WordHashEmbedder;

pub fn word_vector(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMS];
    for word in text.split_whitespace() {
        let word: String = word
            .chars()
            .filter(|c| c.is_alphanumeric())
            .flat_map(char::to_lowercase)
            .collect();
        if word.is_empty() {
            continue;
        }
        let digest = Sha256::digest(word.as_bytes());
        v[digest[0] as usize % DIMS] += 1.0;
    }
    if v.iter().all(|x| *x == 0.0) {
        v[0] = 1.0;
    }
    v
}

#[async_trait]
impl Embedder for WordHashEmbedder {
    fn model_name(&self) -> &str {
        "word-hash"
    }
    fn dims(&self) -> usize {
        DIMS
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| word_vector(t)).collect())
    }
}

/// Embedder that always fails.
pub struct BrokenEmbedder;

#[async_trait]
impl Embedder for BrokenEmbedder {
    fn model_name(&self) -> &str {
        "broken"
    }
    fn dims(&self) -> usize {
        DIMS
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(CoreError::Embedding("upstream returned 503".to_string()))
    }
}

/// Language model that replays scripted replies and records prompts.
///
/// Once the script is exhausted it answers `"scripted answer"`.
#[derive(Default)]
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<Result<String>>>,
    prompts: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedLlm {
    pub fn push_reply(&self, reply: Result<String>) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub fn prompts(&self) -> Vec<Vec<ChatMessage>> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedLlm {
    fn model_name(&self) -> &str {
        "scripted"
    }
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
        self.prompts.lock().unwrap().push(messages.to_vec());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("scripted answer".to_string()))
    }
}

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub blobs: Arc<InMemoryObjectStorage>,
    pub queue: Arc<RecordingQueue>,
    pub llm: Arc<ScriptedLlm>,
    pub history: HistoryManager,
    pub memory: MemoryManager,
    pub ingest: IngestionPipeline,
    pub asker: AskOrchestrator,
    pub summarizer: Summarizer,
}

pub struct HarnessOptions {
    pub chunking: ChunkerConfig,
    pub ingest: IngestConfig,
    pub memory: MemoryConfig,
    pub ask: AskConfig,
    pub embedder: Arc<dyn Embedder>,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            chunking: ChunkerConfig {
                max_tokens: 40,
                overlap_tokens: 5,
            },
            ingest: IngestConfig {
                max_upload_bytes: Some(64 * 1024),
            },
            memory: MemoryConfig::default(),
            ask: AskConfig::default(),
            embedder: Arc::new(WordHashEmbedder),
        }
    }
}

pub fn harness(options: HarnessOptions) -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let blobs = Arc::new(InMemoryObjectStorage::new());
    let queue = Arc::new(RecordingQueue::new());
    let llm = Arc::new(ScriptedLlm::default());
    let gateway = EmbeddingGateway::new(options.embedder, 8);

    let history = HistoryManager::new(store.clone());
    let memory = MemoryManager::new(store.clone(), gateway.clone(), queue.clone(), options.memory);
    let ingest = IngestionPipeline::new(
        store.clone(),
        store.clone(),
        blobs.clone(),
        queue.clone(),
        gateway.clone(),
        Chunker::new(options.chunking),
        options.ingest,
    );
    let asker = AskOrchestrator::new(
        AskComponents {
            sessions: store.clone(),
            query_logs: store.clone(),
            history: history.clone(),
            memory: memory.clone(),
            retriever: Retriever::new(store.clone()),
            gateway,
            llm: llm.clone(),
        },
        options.ask,
    );
    let summarizer = Summarizer::new(history.clone(), memory.clone(), llm.clone(), 2000);

    Harness {
        store,
        blobs,
        queue,
        llm,
        history,
        memory,
        ingest,
        asker,
        summarizer,
    }
}

pub fn text_upload(owner: &str, filename: &str, text: &str) -> UploadRequest {
    UploadRequest {
        owner_id: owner.to_string(),
        title: None,
        filename: filename.to_string(),
        mime_type: "text/plain".to_string(),
        bytes: text.as_bytes().to_vec(),
    }
}

/// Upload, drain the queued job, and process the document.
pub async fn ingest_text(h: &Harness, owner: &str, filename: &str, text: &str) -> Document {
    let doc = h.ingest.upload(text_upload(owner, filename, text)).await.unwrap();
    h.queue.drain();
    h.ingest.process_document(owner, &doc.id).await.unwrap();
    doc
}
