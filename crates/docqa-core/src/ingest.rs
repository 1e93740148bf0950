//! Document ingestion: upload, then asynchronous processing.
//!
//! ```text
//! upload ──► pending ──► processing ──► processed
//!                │             │
//!                └──► failed ◄─┘
//! ```
//!
//! `upload` validates the blob, creates the document in `pending`, hands the
//! bytes to object storage and enqueues a `process_document` job.
//! `process_document` fetches the blob, extracts text, chunks it, embeds
//! every chunk in batched calls and persists the chunks. Any failure after
//! the document entered `processing` marks it `failed` with a short reason.
//! There is no retry here; redelivery is up to the job queue.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::chunk::Chunker;
use crate::deadline::Deadline;
use crate::embedding::EmbeddingGateway;
use crate::error::{CoreError, Result};
use crate::extract::{PlainTextExtractor, TextExtractor};
use crate::models::{Document, DocumentChunk, DocumentSource, DocumentStatus};
use crate::queue::{Job, JobQueue};
use crate::storage::{object_key, ObjectStorage};
use crate::store::{ChunkRepository, DocumentRepository};

/// Failure reason recorded when a document yields no chunks.
pub const NO_CONTENT_REASON: &str = "no content to process";

/// Longest failure reason stored on a document, in characters.
const MAX_REASON_CHARS: usize = 200;

#[derive(Debug, Clone, Default)]
pub struct IngestConfig {
    /// Uploads larger than this are rejected. `None` means unlimited.
    pub max_upload_bytes: Option<u64>,
}

/// A file handed to [`IngestionPipeline::upload`].
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub owner_id: String,
    /// Defaults to the filename.
    pub title: Option<String>,
    pub filename: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// Result of [`IngestionPipeline::process_document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Processed { chunks: usize },
    /// The document was already `processed`; nothing was written.
    AlreadyProcessed,
}

/// A document together with its stored chunk count.
#[derive(Debug, Clone)]
pub struct DocumentDetails {
    pub document: Document,
    pub chunk_count: usize,
}

pub struct IngestionPipeline {
    documents: Arc<dyn DocumentRepository>,
    chunks: Arc<dyn ChunkRepository>,
    storage: Arc<dyn ObjectStorage>,
    queue: Arc<dyn JobQueue>,
    gateway: EmbeddingGateway,
    chunker: Chunker,
    extractor: Arc<dyn TextExtractor>,
    config: IngestConfig,
}

fn require_owner(owner_id: &str) -> Result<()> {
    if owner_id.trim().is_empty() {
        Err(CoreError::Unauthorized)
    } else {
        Ok(())
    }
}

/// Short human-readable reason stored on a failed document.
fn failure_reason(err: &CoreError) -> String {
    let text = match err {
        CoreError::InvalidInput(msg) => msg.clone(),
        other => other.to_string(),
    };
    text.chars().take(MAX_REASON_CHARS).collect()
}

impl IngestionPipeline {
    pub fn new(
        documents: Arc<dyn DocumentRepository>,
        chunks: Arc<dyn ChunkRepository>,
        storage: Arc<dyn ObjectStorage>,
        queue: Arc<dyn JobQueue>,
        gateway: EmbeddingGateway,
        chunker: Chunker,
        config: IngestConfig,
    ) -> Self {
        Self {
            documents,
            chunks,
            storage,
            queue,
            gateway,
            chunker,
            extractor: Arc::new(PlainTextExtractor),
            config,
        }
    }

    /// Replace the UTF-8 extractor, e.g. with one that also reads PDF.
    pub fn with_extractor(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Validate and store an upload, then enqueue its processing.
    ///
    /// Returns the created document in `pending`. Enqueue failures are
    /// logged only; the document stays `pending` and can be processed later.
    pub async fn upload(&self, request: UploadRequest) -> Result<Document> {
        require_owner(&request.owner_id)?;
        if request.bytes.is_empty() {
            return Err(CoreError::InvalidInput("file is empty".to_string()));
        }
        if let Some(max) = self.config.max_upload_bytes {
            if request.bytes.len() as u64 > max {
                return Err(CoreError::InvalidInput(format!(
                    "file is {} bytes, limit is {} bytes",
                    request.bytes.len(),
                    max
                )));
            }
        }

        let now = Utc::now();
        let title = request
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| request.filename.clone());
        let mut doc = Document {
            id: Uuid::new_v4().to_string(),
            owner_id: request.owner_id.clone(),
            title,
            source: DocumentSource::Upload,
            status: DocumentStatus::Pending,
            failure_reason: None,
            file: None,
            created_at: now,
            updated_at: now,
        };
        self.documents.create_document(&doc).await?;

        let key = object_key(&doc.owner_id, &doc.id, &request.filename);
        let stored = match self.storage.put(&key, request.bytes, &request.mime_type).await {
            Ok(stored) => stored,
            Err(e) => {
                self.fail_document(&doc.owner_id, &doc.id, DocumentStatus::Pending, &e)
                    .await;
                return Err(e);
            }
        };
        if let Err(e) = self.documents.set_file(&doc.owner_id, &doc.id, &stored).await {
            self.fail_document(&doc.owner_id, &doc.id, DocumentStatus::Pending, &e)
                .await;
            return Err(e);
        }
        doc.file = Some(stored);

        tracing::info!(
            owner_id = %doc.owner_id,
            document_id = %doc.id,
            bytes = doc.file.as_ref().map_or(0, |f| f.size),
            "document uploaded"
        );

        let job = Job::ProcessDocument {
            owner_id: doc.owner_id.clone(),
            document_id: doc.id.clone(),
        };
        if let Err(e) = self.queue.enqueue(job).await {
            tracing::warn!(
                document_id = %doc.id,
                error = %e,
                "failed to enqueue processing; document stays pending"
            );
        }
        Ok(doc)
    }

    /// Process a document with no deadline.
    pub async fn process_document(&self, owner_id: &str, document_id: &str) -> Result<ProcessOutcome> {
        self.process_document_within(owner_id, document_id, &Deadline::unbounded())
            .await
    }

    /// Chunk, embed and persist a `pending` document.
    ///
    /// Idempotent for `processed` documents. A document currently in
    /// `processing` or already `failed` is rejected.
    pub async fn process_document_within(
        &self,
        owner_id: &str,
        document_id: &str,
        deadline: &Deadline,
    ) -> Result<ProcessOutcome> {
        require_owner(owner_id)?;
        let doc = self
            .documents
            .get_document(owner_id, document_id)
            .await?
            .ok_or_else(|| CoreError::not_found("document", document_id))?;

        match doc.status {
            DocumentStatus::Processed => return Ok(ProcessOutcome::AlreadyProcessed),
            DocumentStatus::Processing => {
                return Err(CoreError::InvalidInput(
                    "document is already being processed".to_string(),
                ))
            }
            DocumentStatus::Failed => {
                return Err(CoreError::InvalidInput(format!(
                    "document failed earlier: {}",
                    doc.failure_reason.as_deref().unwrap_or("unknown reason")
                )))
            }
            DocumentStatus::Pending => {}
        }

        let claimed = self
            .documents
            .update_status(
                owner_id,
                document_id,
                DocumentStatus::Pending,
                DocumentStatus::Processing,
                None,
            )
            .await?;
        if !claimed {
            // Another worker moved it first.
            let current = self.documents.get_document(owner_id, document_id).await?;
            return match current.map(|d| d.status) {
                Some(DocumentStatus::Processed) => Ok(ProcessOutcome::AlreadyProcessed),
                _ => Err(CoreError::InvalidInput(
                    "document is already being processed".to_string(),
                )),
            };
        }
        tracing::info!(owner_id, document_id, "document processing");

        match self.run_processing(&doc, deadline).await {
            Ok(chunk_count) => {
                tracing::info!(owner_id, document_id, chunks = chunk_count, "document processed");
                Ok(ProcessOutcome::Processed {
                    chunks: chunk_count,
                })
            }
            Err(e) => {
                self.discard_chunks(owner_id, document_id).await;
                self.fail_document(owner_id, document_id, DocumentStatus::Processing, &e)
                    .await;
                Err(e)
            }
        }
    }

    /// Every step between `processing` and `processed`, the final status
    /// change included.
    async fn run_processing(&self, doc: &Document, deadline: &Deadline) -> Result<usize> {
        let chunk_count = self.build_chunks(doc, deadline).await?;
        let finished = self
            .documents
            .update_status(
                &doc.owner_id,
                &doc.id,
                DocumentStatus::Processing,
                DocumentStatus::Processed,
                None,
            )
            .await?;
        if !finished {
            return Err(CoreError::storage(
                "document status changed while it was being processed",
            ));
        }
        Ok(chunk_count)
    }

    async fn build_chunks(&self, doc: &Document, deadline: &Deadline) -> Result<usize> {
        let file = doc
            .file
            .as_ref()
            .ok_or_else(|| CoreError::storage("document has no stored file"))?;
        let bytes = deadline.run("fetch-blob", self.storage.get(&file.key)).await?;
        let text = self.extractor.extract(&bytes, &file.mime_type)?;

        let pieces = self.chunker.chunk(&text);
        if pieces.is_empty() {
            return Err(CoreError::InvalidInput(NO_CONTENT_REASON.to_string()));
        }

        let texts: Vec<String> = pieces.iter().map(|c| c.content.clone()).collect();
        let vectors = deadline
            .run("embed-chunks", self.gateway.embed_all(&texts))
            .await?;

        let chunks: Vec<DocumentChunk> = pieces
            .into_iter()
            .zip(vectors)
            .map(|(piece, embedding)| DocumentChunk {
                id: Uuid::new_v4().to_string(),
                document_id: doc.id.clone(),
                chunk_index: piece.index as i64,
                content: piece.content,
                token_count: piece.token_count as i64,
                embedding,
            })
            .collect();
        deadline
            .run(
                "persist-chunks",
                self.chunks.replace_chunks(&doc.owner_id, &doc.id, &chunks),
            )
            .await?;
        Ok(chunks.len())
    }

    /// A failed document keeps no chunks.
    async fn discard_chunks(&self, owner_id: &str, document_id: &str) {
        if let Err(e) = self.chunks.delete_chunks(owner_id, document_id).await {
            tracing::warn!(document_id, error = %e, "could not clear chunks of failed document");
        }
    }

    async fn fail_document(&self, owner_id: &str, document_id: &str, from: DocumentStatus, err: &CoreError) {
        let reason = failure_reason(err);
        tracing::error!(owner_id, document_id, reason = %reason, "document failed");
        let marked = self
            .documents
            .update_status(owner_id, document_id, from, DocumentStatus::Failed, Some(&reason))
            .await;
        match marked {
            Ok(true) => {}
            Ok(false) => tracing::warn!(document_id, "document left its status before it could be failed"),
            Err(e) => tracing::warn!(document_id, error = %e, "could not record document failure"),
        }
    }

    pub async fn list_documents(&self, owner_id: &str) -> Result<Vec<Document>> {
        require_owner(owner_id)?;
        self.documents.list_documents(owner_id).await
    }

    pub async fn get_document(&self, owner_id: &str, document_id: &str) -> Result<DocumentDetails> {
        require_owner(owner_id)?;
        let document = self
            .documents
            .get_document(owner_id, document_id)
            .await?
            .ok_or_else(|| CoreError::not_found("document", document_id))?;
        let chunk_count = self.chunks.count_chunks(owner_id, document_id).await?;
        Ok(DocumentDetails {
            document,
            chunk_count,
        })
    }

    /// Remove chunks, then the blob (best-effort), then the document row.
    pub async fn delete_document(&self, owner_id: &str, document_id: &str) -> Result<()> {
        require_owner(owner_id)?;
        let doc = self
            .documents
            .get_document(owner_id, document_id)
            .await?
            .ok_or_else(|| CoreError::not_found("document", document_id))?;

        self.chunks.delete_chunks(owner_id, document_id).await?;
        if let Some(file) = &doc.file {
            if let Err(e) = self.storage.delete(&file.key).await {
                tracing::warn!(document_id, key = %file.key, error = %e, "blob delete failed");
            }
        }
        if !self.documents.delete_document(owner_id, document_id).await? {
            return Err(CoreError::not_found("document", document_id));
        }
        tracing::info!(owner_id, document_id, "document deleted");
        Ok(())
    }
}
