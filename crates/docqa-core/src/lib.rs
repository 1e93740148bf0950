//! # docqa core
//!
//! Retrieval-augmented conversational question answering over uploaded
//! documents: chunking, the embedding gateway, similarity retrieval,
//! bounded conversation history, long-term memory, the ingestion pipeline
//! and the ask orchestrator.
//!
//! Every external system (persistence, object storage, embedding and chat
//! backends, the job queue) is a trait. The crate ships in-memory
//! implementations for tests and development; the `docqa` application
//! wires SQLite, filesystem and HTTP implementations. This crate contains no
//! sqlx, HTTP client or filesystem I/O.

pub mod ask;
pub mod chunk;
pub mod deadline;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod history;
pub mod ingest;
pub mod llm;
pub mod memory;
pub mod models;
pub mod queue;
pub mod retrieval;
pub mod storage;
pub mod store;
pub mod summary;
pub mod tokenize;

pub use error::{CoreError, ErrorKind, Result};
