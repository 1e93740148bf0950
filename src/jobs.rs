//! SQLite-backed job queue and the worker that drains it.
//!
//! Jobs move `pending → running → done | failed`. A failed attempt goes
//! back to `pending` until `max_attempts` is reached; errors that cannot
//! succeed on retry (bad input, missing rows, malformed payloads) fail the
//! job immediately. Retries live here and nowhere in the core.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use std::sync::Arc;

use docqa_core::error::{CoreError, ErrorKind};
use docqa_core::ingest::{IngestionPipeline, ProcessOutcome};
use docqa_core::queue::{Job, JobQueue};
use docqa_core::summary::Summarizer;

pub const DEFAULT_MAX_ATTEMPTS: i64 = 3;

/// A job claimed by [`SqliteJobQueue::dequeue`].
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub id: i64,
    pub name: String,
    pub payload: String,
    pub attempts: i64,
    pub max_attempts: i64,
}

/// What [`SqliteJobQueue::fail`] did with the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    Requeued,
    Failed,
}

/// Job counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobCounts {
    pub pending: i64,
    pub running: i64,
    pub done: i64,
    pub failed: i64,
}

#[derive(Clone)]
pub struct SqliteJobQueue {
    pool: SqlitePool,
    max_attempts: i64,
}

impl SqliteJobQueue {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: i64) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub async fn push(&self, job: &Job) -> Result<i64> {
        let payload = job.to_payload()?;
        let now = Utc::now().timestamp_millis();
        let result = sqlx::query(
            r#"
            INSERT INTO jobs (name, payload, status, attempts, max_attempts, created_at, updated_at)
            VALUES (?, ?, 'pending', 0, ?, ?, ?)
            "#,
        )
        .bind(job.name())
        .bind(payload)
        .bind(self.max_attempts)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Claim the oldest pending job, marking it `running`.
    pub async fn dequeue(&self) -> Result<Option<QueuedJob>> {
        let row = sqlx::query(
            r#"
            UPDATE jobs SET status = 'running', updated_at = ?
            WHERE id = (
                SELECT id FROM jobs WHERE status = 'pending' ORDER BY id ASC LIMIT 1
            )
            RETURNING id, name, payload, attempts, max_attempts
            "#,
        )
        .bind(Utc::now().timestamp_millis())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| QueuedJob {
            id: r.get("id"),
            name: r.get("name"),
            payload: r.get("payload"),
            attempts: r.get("attempts"),
            max_attempts: r.get("max_attempts"),
        }))
    }

    pub async fn complete(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE jobs SET status = 'done', last_error = NULL, updated_at = ? WHERE id = ?")
            .bind(Utc::now().timestamp_millis())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Record a failed attempt. Requeues while attempts remain.
    pub async fn fail(&self, id: i64, error: &str) -> Result<FailOutcome> {
        let row = sqlx::query("SELECT attempts, max_attempts FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        let attempts: i64 = row.get::<i64, _>("attempts") + 1;
        let max_attempts: i64 = row.get("max_attempts");

        let outcome = if attempts >= max_attempts {
            FailOutcome::Failed
        } else {
            FailOutcome::Requeued
        };
        let status = match outcome {
            FailOutcome::Failed => "failed",
            FailOutcome::Requeued => "pending",
        };
        sqlx::query(
            "UPDATE jobs SET status = ?, attempts = ?, last_error = ?, updated_at = ? WHERE id = ?",
        )
        .bind(status)
        .bind(attempts)
        .bind(error)
        .bind(Utc::now().timestamp_millis())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(outcome)
    }

    /// Fail a job without further attempts.
    pub async fn fail_permanently(&self, id: i64, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE jobs SET status = 'failed', attempts = attempts + 1, last_error = ?, \
             updated_at = ? WHERE id = ?",
        )
        .bind(error)
        .bind(Utc::now().timestamp_millis())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn counts(&self) -> Result<JobCounts> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM jobs GROUP BY status")
            .fetch_all(&self.pool)
            .await?;
        let mut counts = JobCounts::default();
        for row in rows {
            let status: String = row.get("status");
            let n: i64 = row.get("n");
            match status.as_str() {
                "pending" => counts.pending = n,
                "running" => counts.running = n,
                "done" => counts.done = n,
                "failed" => counts.failed = n,
                _ => {}
            }
        }
        Ok(counts)
    }
}

#[async_trait]
impl JobQueue for SqliteJobQueue {
    async fn enqueue(&self, job: Job) -> docqa_core::Result<()> {
        let id = self
            .push(&job)
            .await
            .map_err(|e| CoreError::storage(format!("enqueue {}: {:#}", job.name(), e)))?;
        tracing::debug!(job_id = id, job = job.name(), "job enqueued");
        Ok(())
    }
}

/// Whether another attempt could succeed.
fn is_retryable(err: &CoreError) -> bool {
    !matches!(
        err.kind(),
        ErrorKind::InvalidInput | ErrorKind::NotFound | ErrorKind::Unauthorized | ErrorKind::Config
    )
}

/// Totals from [`JobRunner::run_pending`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub done: usize,
    pub requeued: usize,
    pub failed: usize,
}

/// Drains the queue, dispatching each job to the ingestion pipeline or the
/// summarizer.
pub struct JobRunner {
    queue: SqliteJobQueue,
    ingest: Arc<IngestionPipeline>,
    summarizer: Arc<Summarizer>,
}

impl JobRunner {
    pub fn new(
        queue: SqliteJobQueue,
        ingest: Arc<IngestionPipeline>,
        summarizer: Arc<Summarizer>,
    ) -> Self {
        Self {
            queue,
            ingest,
            summarizer,
        }
    }

    async fn dispatch(&self, job: &Job) -> docqa_core::Result<()> {
        match job {
            Job::ProcessDocument {
                owner_id,
                document_id,
            } => match self.ingest.process_document(owner_id, document_id).await? {
                ProcessOutcome::Processed { chunks } => {
                    tracing::info!(document_id = %document_id, chunks, "process job done");
                }
                ProcessOutcome::AlreadyProcessed => {
                    tracing::debug!(document_id = %document_id, "document already processed");
                }
            },
            Job::SummarizeSession {
                owner_id,
                session_id,
            } => {
                let summary = self
                    .summarizer
                    .summarize_session(owner_id, session_id)
                    .await?;
                tracing::info!(
                    session_id = %session_id,
                    stored = summary.is_some(),
                    "summarize job done"
                );
            }
        }
        Ok(())
    }

    /// Whether a failed job should get another attempt. A document that
    /// the pipeline already marked failed cannot be reprocessed, so its job
    /// is done retrying whatever the error kind.
    async fn should_retry(&self, job: &Job, err: &CoreError) -> bool {
        if !is_retryable(err) {
            return false;
        }
        let Job::ProcessDocument {
            owner_id,
            document_id,
        } = job
        else {
            return true;
        };
        match self.ingest.get_document(owner_id, document_id).await {
            Ok(details) => !details.document.status.is_terminal(),
            Err(lookup) => {
                tracing::warn!(document_id = %document_id, error = %lookup, "could not read document status after failure");
                true
            }
        }
    }

    /// Run at most `limit` jobs (all pending ones when `None`).
    pub async fn run_pending(&self, limit: Option<usize>) -> Result<RunStats> {
        let mut stats = RunStats::default();
        while limit.map_or(true, |max| stats.done + stats.requeued + stats.failed < max) {
            let Some(queued) = self.queue.dequeue().await? else {
                break;
            };

            let job = match Job::from_payload(&queued.payload) {
                Ok(job) => job,
                Err(e) => {
                    tracing::error!(job_id = queued.id, error = %e, "dropping malformed job");
                    self.queue.fail_permanently(queued.id, &e.to_string()).await?;
                    stats.failed += 1;
                    continue;
                }
            };

            let result = self.dispatch(&job).await;
            let retry = match &result {
                Ok(()) => false,
                Err(e) => self.should_retry(&job, e).await,
            };
            match result {
                Ok(()) => {
                    self.queue.complete(queued.id).await?;
                    stats.done += 1;
                }
                Err(e) if retry => {
                    let outcome = self.queue.fail(queued.id, &e.to_string()).await?;
                    tracing::warn!(
                        job_id = queued.id,
                        job = %queued.name,
                        attempt = queued.attempts + 1,
                        max_attempts = queued.max_attempts,
                        error = %e,
                        "job attempt failed"
                    );
                    match outcome {
                        FailOutcome::Requeued => stats.requeued += 1,
                        FailOutcome::Failed => stats.failed += 1,
                    }
                }
                Err(e) => {
                    tracing::error!(job_id = queued.id, job = %queued.name, error = %e, "job failed");
                    self.queue.fail_permanently(queued.id, &e.to_string()).await?;
                    stats.failed += 1;
                }
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_path;
    use crate::migrate::run_migrations;

    async fn queue() -> (SqliteJobQueue, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let pool = connect_path(&tmp.path().join("jobs.sqlite")).await.unwrap();
        run_migrations(&pool).await.unwrap();
        (SqliteJobQueue::new(pool), tmp)
    }

    fn process(doc: &str) -> Job {
        Job::ProcessDocument {
            owner_id: "alice".to_string(),
            document_id: doc.to_string(),
        }
    }

    #[tokio::test]
    async fn dequeue_is_fifo_and_claims() {
        let (q, _tmp) = queue().await;
        q.enqueue(process("d1")).await.unwrap();
        q.enqueue(process("d2")).await.unwrap();

        let first = q.dequeue().await.unwrap().unwrap();
        assert_eq!(Job::from_payload(&first.payload).unwrap(), process("d1"));
        assert_eq!(first.name, "process_document");
        let second = q.dequeue().await.unwrap().unwrap();
        assert_eq!(Job::from_payload(&second.payload).unwrap(), process("d2"));
        assert!(q.dequeue().await.unwrap().is_none());

        let counts = q.counts().await.unwrap();
        assert_eq!(counts.running, 2);
        assert_eq!(counts.pending, 0);
    }

    #[tokio::test]
    async fn fail_requeues_until_max_attempts() {
        let (q, _tmp) = queue().await;
        let q = q.with_max_attempts(2);
        q.enqueue(process("d1")).await.unwrap();

        let job = q.dequeue().await.unwrap().unwrap();
        assert_eq!(q.fail(job.id, "boom").await.unwrap(), FailOutcome::Requeued);

        let job = q.dequeue().await.unwrap().unwrap();
        assert_eq!(job.attempts, 1);
        assert_eq!(q.fail(job.id, "boom again").await.unwrap(), FailOutcome::Failed);
        assert!(q.dequeue().await.unwrap().is_none());

        let counts = q.counts().await.unwrap();
        assert_eq!(counts.failed, 1);
    }

    #[tokio::test]
    async fn complete_marks_done() {
        let (q, _tmp) = queue().await;
        q.enqueue(process("d1")).await.unwrap();
        let job = q.dequeue().await.unwrap().unwrap();
        q.complete(job.id).await.unwrap();
        assert_eq!(
            q.counts().await.unwrap(),
            JobCounts {
                done: 1,
                ..Default::default()
            }
        );
    }

    #[test]
    fn retry_policy_by_kind() {
        assert!(is_retryable(&CoreError::storage("locked")));
        assert!(is_retryable(&CoreError::Embedding("503".into())));
        assert!(!is_retryable(&CoreError::InvalidInput("bad".into())));
        assert!(!is_retryable(&CoreError::not_found("document", "x")));
    }
}
