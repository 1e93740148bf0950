//! SQLite-backed implementation of the docqa persistence traits.
//!
//! One [`SqliteStore`] implements every repository over a shared
//! [`SqlitePool`]. Vectors are stored as little-endian f32 BLOBs and
//! similarity search is brute-force cosine over the owner's rows, which is
//! fine for single-node deployments of modest size.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use docqa_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use docqa_core::error::{CoreError, Result};
use docqa_core::models::{
    ChunkSource, ConversationMessage, Document, DocumentChunk, DocumentSource, DocumentStatus,
    MemoryRecord, MemorySource, QaSession, QueryLog, RetrievedChunk, RetrievedMemory, Role,
    StoredObject,
};
use docqa_core::retrieval::{rank_chunks, rank_memories};
use docqa_core::store::{
    ChunkFilter, ChunkRepository, DocumentRepository, MemoryStore, MessageLog,
    QueryLogRepository, SessionRepository,
};

/// SQLite implementation of every repository trait.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn db_err(what: &'static str) -> impl FnOnce(sqlx::Error) -> CoreError {
    move |e| CoreError::storage_with(what, e)
}

fn to_ms(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_ms(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn document_from_row(row: &SqliteRow) -> Result<Document> {
    let status: String = row.get("status");
    let status = DocumentStatus::from_str_value(&status)
        .ok_or_else(|| CoreError::storage(format!("unknown document status '{}'", status)))?;
    let file_key: Option<String> = row.get("file_key");
    let file = file_key.map(|key| StoredObject {
        key,
        size: row.get::<Option<i64>, _>("file_size").unwrap_or(0) as u64,
        mime_type: row.get::<Option<String>, _>("file_mime").unwrap_or_default(),
        etag: row.get::<Option<String>, _>("file_etag").unwrap_or_default(),
    });
    Ok(Document {
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        title: row.get("title"),
        source: DocumentSource::from_str_value(row.get("source")),
        status,
        failure_reason: row.get("failure_reason"),
        file,
        created_at: from_ms(row.get("created_at")),
        updated_at: from_ms(row.get("updated_at")),
    })
}

fn chunk_from_row(row: &SqliteRow) -> DocumentChunk {
    let blob: Vec<u8> = row.get("embedding");
    DocumentChunk {
        id: row.get("id"),
        document_id: row.get("document_id"),
        chunk_index: row.get("chunk_index"),
        content: row.get("content"),
        token_count: row.get("token_count"),
        embedding: blob_to_vec(&blob),
    }
}

fn message_from_row(row: &SqliteRow) -> ConversationMessage {
    ConversationMessage {
        id: row.get("id"),
        session_id: row.get("session_id"),
        owner_id: row.get("owner_id"),
        role: Role::from_str_value(row.get("role")),
        content: row.get("content"),
        token_count: row.get("token_count"),
        created_at: from_ms(row.get("created_at")),
    }
}

fn memory_from_row(row: &SqliteRow) -> MemoryRecord {
    let blob: Option<Vec<u8>> = row.get("embedding");
    MemoryRecord {
        id: row.get("id"),
        session_id: row.get("session_id"),
        owner_id: row.get("owner_id"),
        source: MemorySource::from_str_value(row.get("source")),
        content: row.get("content"),
        embedding: blob.map(|b| blob_to_vec(&b)),
        importance: row.get::<i64, _>("importance") as i32,
        created_at: from_ms(row.get("created_at")),
    }
}

const DOCUMENT_COLUMNS: &str = "id, owner_id, title, source, status, failure_reason, \
     file_key, file_size, file_mime, file_etag, created_at, updated_at";

const MEMORY_COLUMNS: &str =
    "id, owner_id, session_id, source, content, embedding, importance, created_at";

#[async_trait]
impl DocumentRepository for SqliteStore {
    async fn create_document(&self, doc: &Document) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (id, owner_id, title, source, status, failure_reason,
                                   file_key, file_size, file_mime, file_etag,
                                   created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.owner_id)
        .bind(&doc.title)
        .bind(doc.source.as_str())
        .bind(doc.status.as_str())
        .bind(&doc.failure_reason)
        .bind(doc.file.as_ref().map(|f| f.key.clone()))
        .bind(doc.file.as_ref().map(|f| f.size as i64))
        .bind(doc.file.as_ref().map(|f| f.mime_type.clone()))
        .bind(doc.file.as_ref().map(|f| f.etag.clone()))
        .bind(to_ms(doc.created_at))
        .bind(to_ms(doc.updated_at))
        .execute(&self.pool)
        .await
        .map_err(db_err("insert document"))?;
        Ok(())
    }

    async fn get_document(&self, owner_id: &str, id: &str) -> Result<Option<Document>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM documents WHERE id = ? AND owner_id = ?",
            DOCUMENT_COLUMNS
        ))
        .bind(id)
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("load document"))?;
        row.as_ref().map(document_from_row).transpose()
    }

    async fn list_documents(&self, owner_id: &str) -> Result<Vec<Document>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM documents WHERE owner_id = ? ORDER BY created_at DESC, id ASC",
            DOCUMENT_COLUMNS
        ))
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("list documents"))?;
        rows.iter().map(document_from_row).collect()
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
            return Err(CoreError::InvalidInput(format!(
                "document status cannot change from {} to {}",
                from.as_str(),
                to.as_str()
            )));
        }
        let result = sqlx::query(
            r#"
            UPDATE documents
            SET status = ?, failure_reason = ?, updated_at = ?
            WHERE id = ? AND owner_id = ? AND status = ?
            "#,
        )
        .bind(to.as_str())
        .bind(failure_reason)
        .bind(to_ms(Utc::now()))
        .bind(id)
        .bind(owner_id)
        .bind(from.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_err("update document status"))?;
        Ok(result.rows_affected() == 1)
    }

    async fn set_file(&self, owner_id: &str, id: &str, file: &StoredObject) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE documents
            SET file_key = ?, file_size = ?, file_mime = ?, file_etag = ?, updated_at = ?
            WHERE id = ? AND owner_id = ?
            "#,
        )
        .bind(&file.key)
        .bind(file.size as i64)
        .bind(&file.mime_type)
        .bind(&file.etag)
        .bind(to_ms(Utc::now()))
        .bind(id)
        .bind(owner_id)
        .execute(&self.pool)
        .await
        .map_err(db_err("record document file"))?;
        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("document", id));
        }
        Ok(())
    }

    async fn delete_document(&self, owner_id: &str, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE id = ? AND owner_id = ?")
            .bind(id)
            .bind(owner_id)
            .execute(&self.pool)
            .await
            .map_err(db_err("delete document"))?;
        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl ChunkRepository for SqliteStore {
    async fn replace_chunks(
        &self,
        owner_id: &str,
        document_id: &str,
        chunks: &[DocumentChunk],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_err("begin transaction"))?;

        let owned: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM documents WHERE id = ? AND owner_id = ?")
                .bind(document_id)
                .bind(owner_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_err("check document owner"))?;
        if owned.is_none() {
            return Err(CoreError::not_found("document", document_id));
        }

        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err("clear chunks"))?;

        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT INTO chunks (id, document_id, chunk_index, content, token_count, embedding)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(document_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.content)
            .bind(chunk.token_count)
            .bind(vec_to_blob(&chunk.embedding))
            .execute(&mut *tx)
            .await
            .map_err(db_err("insert chunk"))?;
        }

        tx.commit().await.map_err(db_err("commit chunks"))?;
        Ok(())
    }

    async fn list_chunks(&self, owner_id: &str, document_id: &str) -> Result<Vec<DocumentChunk>> {
        let rows = sqlx::query(
            "SELECT c.id, c.document_id, c.chunk_index, c.content, c.token_count, c.embedding \
             FROM chunks c JOIN documents d ON d.id = c.document_id \
             WHERE c.document_id = ? AND d.owner_id = ? ORDER BY c.chunk_index ASC",
        )
        .bind(document_id)
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("list chunks"))?;
        Ok(rows.iter().map(chunk_from_row).collect())
    }

    async fn count_chunks(&self, owner_id: &str, document_id: &str) -> Result<usize> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM chunks c JOIN documents d ON d.id = c.document_id \
             WHERE c.document_id = ? AND d.owner_id = ?",
        )
        .bind(document_id)
        .bind(owner_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err("count chunks"))?;
        Ok(count as usize)
    }

    async fn delete_chunks(&self, owner_id: &str, document_id: &str) -> Result<()> {
        sqlx::query(
            "DELETE FROM chunks WHERE document_id = ? \
             AND document_id IN (SELECT id FROM documents WHERE owner_id = ?)",
        )
        .bind(document_id)
        .bind(owner_id)
        .execute(&self.pool)
        .await
        .map_err(db_err("delete chunks"))?;
        Ok(())
    }

    async fn search_similar(
        &self,
        owner_id: &str,
        query: &[f32],
        filter: &ChunkFilter,
        k: usize,
    ) -> Result<Vec<RetrievedChunk>> {
        if k == 0
            || filter.statuses.as_ref().is_some_and(Vec::is_empty)
            || filter.document_ids.as_ref().is_some_and(Vec::is_empty)
        {
            return Ok(Vec::new());
        }

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT c.id, c.document_id, c.chunk_index, c.content, c.token_count, c.embedding \
             FROM chunks c JOIN documents d ON d.id = c.document_id WHERE d.owner_id = ",
        );
        qb.push_bind(owner_id);
        if let Some(statuses) = &filter.statuses {
            qb.push(" AND d.status IN (");
            let mut list = qb.separated(", ");
            for status in statuses {
                list.push_bind(status.as_str());
            }
            qb.push(")");
        }
        if let Some(ids) = &filter.document_ids {
            qb.push(" AND d.id IN (");
            let mut list = qb.separated(", ");
            for id in ids {
                list.push_bind(id.as_str());
            }
            qb.push(")");
        }

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(db_err("search chunks"))?;

        let candidates: Vec<RetrievedChunk> = rows
            .iter()
            .map(chunk_from_row)
            .map(|chunk| RetrievedChunk {
                score: cosine_similarity(query, &chunk.embedding) as f64,
                chunk,
            })
            .collect();
        Ok(rank_chunks(candidates, k))
    }
}

#[async_trait]
impl SessionRepository for SqliteStore {
    async fn create_session(&self, session: &QaSession) -> Result<()> {
        sqlx::query("INSERT INTO sessions (id, owner_id, created_at) VALUES (?, ?, ?)")
            .bind(&session.id)
            .bind(&session.owner_id)
            .bind(to_ms(session.created_at))
            .execute(&self.pool)
            .await
            .map_err(db_err("insert session"))?;
        Ok(())
    }

    async fn get_session(&self, owner_id: &str, id: &str) -> Result<Option<QaSession>> {
        let row = sqlx::query("SELECT id, owner_id, created_at FROM sessions WHERE id = ? AND owner_id = ?")
            .bind(id)
            .bind(owner_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err("load session"))?;
        Ok(row.map(|r| QaSession {
            id: r.get("id"),
            owner_id: r.get("owner_id"),
            created_at: from_ms(r.get("created_at")),
        }))
    }

    async fn list_sessions(&self, owner_id: &str) -> Result<Vec<QaSession>> {
        let rows = sqlx::query(
            "SELECT id, owner_id, created_at FROM sessions WHERE owner_id = ? \
             ORDER BY created_at DESC, id ASC",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("list sessions"))?;
        Ok(rows
            .iter()
            .map(|r| QaSession {
                id: r.get("id"),
                owner_id: r.get("owner_id"),
                created_at: from_ms(r.get("created_at")),
            })
            .collect())
    }
}

#[async_trait]
impl MessageLog for SqliteStore {
    async fn append_message(&self, message: &ConversationMessage) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO messages (id, session_id, owner_id, role, content, token_count, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&message.id)
        .bind(&message.session_id)
        .bind(&message.owner_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(message.token_count)
        .bind(to_ms(message.created_at))
        .execute(&self.pool)
        .await
        .map_err(db_err("append message"))?;
        Ok(())
    }

    async fn recent_messages(
        &self,
        owner_id: &str,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationMessage>> {
        let rows = sqlx::query(
            r#"
            SELECT id, session_id, owner_id, role, content, token_count, created_at
            FROM messages
            WHERE owner_id = ? AND session_id = ?
            ORDER BY seq DESC
            LIMIT ?
            "#,
        )
        .bind(owner_id)
        .bind(session_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("load recent messages"))?;
        Ok(rows.iter().map(message_from_row).collect())
    }

    async fn count_messages(&self, owner_id: &str, session_id: &str) -> Result<usize> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM messages WHERE owner_id = ? AND session_id = ?",
        )
        .bind(owner_id)
        .bind(session_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err("count messages"))?;
        Ok(count as usize)
    }
}

#[async_trait]
impl QueryLogRepository for SqliteStore {
    async fn record_query(&self, log: &QueryLog) -> Result<()> {
        let sources_json = serde_json::to_string(&log.sources)
            .map_err(|e| CoreError::storage_with("encode query sources", e))?;
        sqlx::query(
            r#"
            INSERT INTO query_logs (id, session_id, owner_id, query_text, response_text,
                                    latency_ms, sources_json, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&log.id)
        .bind(&log.session_id)
        .bind(&log.owner_id)
        .bind(&log.query_text)
        .bind(&log.response_text)
        .bind(log.latency_ms)
        .bind(sources_json)
        .bind(to_ms(log.created_at))
        .execute(&self.pool)
        .await
        .map_err(db_err("insert query log"))?;
        Ok(())
    }

    async fn list_queries(&self, owner_id: &str, session_id: &str) -> Result<Vec<QueryLog>> {
        let rows = sqlx::query(
            r#"
            SELECT id, session_id, owner_id, query_text, response_text, latency_ms,
                   sources_json, created_at
            FROM query_logs
            WHERE owner_id = ? AND session_id = ?
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .bind(owner_id)
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("list query logs"))?;

        rows.iter()
            .map(|r| {
                let sources_json: String = r.get("sources_json");
                let sources: Vec<ChunkSource> = serde_json::from_str(&sources_json)
                    .map_err(|e| CoreError::storage_with("decode query sources", e))?;
                Ok(QueryLog {
                    id: r.get("id"),
                    session_id: r.get("session_id"),
                    owner_id: r.get("owner_id"),
                    query_text: r.get("query_text"),
                    response_text: r.get("response_text"),
                    latency_ms: r.get("latency_ms"),
                    sources,
                    created_at: from_ms(r.get("created_at")),
                })
            })
            .collect()
    }
}

#[async_trait]
impl MemoryStore for SqliteStore {
    async fn upsert_memory(&self, record: &MemoryRecord) -> Result<MemoryRecord> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO memories ({cols})
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(owner_id, session_id, source, content) DO UPDATE SET
                embedding = excluded.embedding,
                importance = excluded.importance,
                created_at = excluded.created_at
            RETURNING {cols}
            "#,
            cols = MEMORY_COLUMNS
        ))
        .bind(&record.id)
        .bind(&record.owner_id)
        .bind(&record.session_id)
        .bind(record.source.as_str())
        .bind(&record.content)
        .bind(record.embedding.as_deref().map(vec_to_blob))
        .bind(record.importance as i64)
        .bind(to_ms(record.created_at))
        .fetch_one(&self.pool)
        .await
        .map_err(db_err("upsert memory"))?;
        Ok(memory_from_row(&row))
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
        let candidates: Vec<RetrievedMemory> = self
            .list_memories(owner_id, session_id)
            .await?
            .into_iter()
            .filter_map(|memory| {
                let score = cosine_similarity(query, memory.embedding.as_deref()?) as f64;
                Some(RetrievedMemory { memory, score })
            })
            .collect();
        Ok(rank_memories(candidates, k))
    }

    async fn list_memories(
        &self,
        owner_id: &str,
        session_id: Option<&str>,
    ) -> Result<Vec<MemoryRecord>> {
        let rows = match session_id {
            Some(session) => sqlx::query(&format!(
                "SELECT {} FROM memories WHERE owner_id = ? AND session_id = ? \
                 ORDER BY created_at DESC, id ASC",
                MEMORY_COLUMNS
            ))
            .bind(owner_id)
            .bind(session)
            .fetch_all(&self.pool)
            .await,
            None => sqlx::query(&format!(
                "SELECT {} FROM memories WHERE owner_id = ? ORDER BY created_at DESC, id ASC",
                MEMORY_COLUMNS
            ))
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await,
        }
        .map_err(db_err("list memories"))?;
        Ok(rows.iter().map(memory_from_row).collect())
    }

    async fn delete_memories(&self, owner_id: &str, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("DELETE FROM memories WHERE owner_id = ");
        qb.push_bind(owner_id);
        qb.push(" AND id IN (");
        let mut list = qb.separated(", ");
        for id in ids {
            list.push_bind(id.as_str());
        }
        qb.push(")");
        let result = qb
            .build()
            .execute(&self.pool)
            .await
            .map_err(db_err("delete memories"))?;
        Ok(result.rows_affected() as usize)
    }
}
