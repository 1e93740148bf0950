//! Job queue collaborator contract.
//!
//! The core only enqueues; delivery, retry and execution belong to the
//! queue implementation and whatever worker drains it. Enqueue failures are
//! logged by callers and never fail the enclosing request.

use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

pub const JOB_PROCESS_DOCUMENT: &str = "process_document";
pub const JOB_SUMMARIZE_SESSION: &str = "summarize_session";

/// Background work the core can request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "job", rename_all = "snake_case")]
pub enum Job {
    ProcessDocument {
        owner_id: String,
        document_id: String,
    },
    SummarizeSession {
        owner_id: String,
        session_id: String,
    },
}

impl Job {
    pub fn name(&self) -> &'static str {
        match self {
            Job::ProcessDocument { .. } => JOB_PROCESS_DOCUMENT,
            Job::SummarizeSession { .. } => JOB_SUMMARIZE_SESSION,
        }
    }

    /// JSON payload as stored by queue implementations.
    pub fn to_payload(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| CoreError::storage_with("serialize job payload", e))
    }

    pub fn from_payload(payload: &str) -> Result<Self> {
        serde_json::from_str(payload)
            .map_err(|e| CoreError::InvalidInput(format!("malformed job payload: {}", e)))
    }
}

/// Fire-and-forget dispatcher.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: Job) -> Result<()>;
}

/// Queue that records jobs in memory. Used in tests and single-process dev
/// setups where a caller drains it explicitly.
#[derive(Default)]
pub struct RecordingQueue {
    jobs: Mutex<Vec<Job>>,
}

impl RecordingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything enqueued so far.
    pub fn jobs(&self) -> Vec<Job> {
        self.jobs.lock().map(|j| j.clone()).unwrap_or_default()
    }

    /// Remove and return all recorded jobs.
    pub fn drain(&self) -> Vec<Job> {
        self.jobs
            .lock()
            .map(|mut j| std::mem::take(&mut *j))
            .unwrap_or_default()
    }
}

#[async_trait]
impl JobQueue for RecordingQueue {
    async fn enqueue(&self, job: Job) -> Result<()> {
        self.jobs
            .lock()
            .map_err(|_| CoreError::storage("job queue lock poisoned"))?
            .push(job);
        Ok(())
    }
}
