//! Wiring of the core components over the SQLite, filesystem and HTTP
//! adapters.

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use std::sync::Arc;

use docqa_core::ask::{AskComponents, AskOrchestrator};
use docqa_core::chunk::Chunker;
use docqa_core::embedding::{Embedder, EmbeddingGateway};
use docqa_core::history::HistoryManager;
use docqa_core::ingest::IngestionPipeline;
use docqa_core::llm::LanguageModel;
use docqa_core::memory::MemoryManager;
use docqa_core::retrieval::Retriever;
use docqa_core::summary::Summarizer;

use crate::blob::FsObjectStorage;
use crate::config::Config;
use crate::embedding::create_embedder;
use crate::extract::DocumentExtractor;
use crate::jobs::{JobRunner, SqliteJobQueue};
use crate::llm::create_model;
use crate::sqlite_store::SqliteStore;
use crate::{db, migrate};

/// Every long-lived component of a running docqa process.
pub struct App {
    pub config: Config,
    pub pool: SqlitePool,
    pub store: Arc<SqliteStore>,
    pub queue: SqliteJobQueue,
    pub ingest: Arc<IngestionPipeline>,
    pub memory: MemoryManager,
    pub summarizer: Arc<Summarizer>,
    pub ask: AskOrchestrator,
}

impl App {
    /// Open the database (migrating it), and build providers from config.
    pub async fn open(config: Config) -> Result<Self> {
        let pool = db::connect(&config).await?;
        migrate::run_migrations(&pool)
            .await
            .context("Failed to run migrations")?;
        let embedder = create_embedder(&config.embedding)?;
        let llm = create_model(&config.llm)?;
        Ok(Self::assemble(config, pool, embedder, llm))
    }

    /// Build the component graph over an already-migrated pool.
    pub fn assemble(
        config: Config,
        pool: SqlitePool,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn LanguageModel>,
    ) -> Self {
        let store = Arc::new(SqliteStore::new(pool.clone()));
        let queue = SqliteJobQueue::new(pool.clone());
        let queue_handle = Arc::new(queue.clone());
        let gateway = EmbeddingGateway::new(embedder, config.embedding.batch_size);
        let storage = Arc::new(FsObjectStorage::new(config.storage.root.clone()));

        let ingest = Arc::new(
            IngestionPipeline::new(
                store.clone(),
                store.clone(),
                storage,
                queue_handle.clone(),
                gateway.clone(),
                Chunker::new(config.chunker_config()),
                config.ingest_config(),
            )
            .with_extractor(Arc::new(DocumentExtractor::new())),
        );

        let history = HistoryManager::new(store.clone());
        let memory = MemoryManager::new(
            store.clone(),
            gateway.clone(),
            queue_handle,
            config.memory_config(),
        );
        let summarizer = Arc::new(Summarizer::new(
            history.clone(),
            memory.clone(),
            llm.clone(),
            config.memory.summary_history_tokens,
        ));
        let ask = AskOrchestrator::new(
            AskComponents {
                sessions: store.clone(),
                query_logs: store.clone(),
                history,
                memory: memory.clone(),
                retriever: Retriever::new(store.clone()),
                gateway,
                llm,
            },
            config.ask_config(),
        );

        tracing::debug!(
            db = %config.db.path.display(),
            storage = %config.storage.root.display(),
            "components wired"
        );

        Self {
            config,
            pool,
            store,
            queue,
            ingest,
            memory,
            summarizer,
            ask,
        }
    }

    pub fn job_runner(&self) -> JobRunner {
        JobRunner::new(
            self.queue.clone(),
            self.ingest.clone(),
            self.summarizer.clone(),
        )
    }
}
