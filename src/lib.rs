//! # docqa
//!
//! Conversational question answering over uploaded documents.
//!
//! The engine itself lives in the `docqa-core` crate; this package wires it
//! to concrete backends and exposes the `docqa` CLI:
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌──────────────────┐
//! │  upload  │──▶│  jobs (SQL)  │──▶│ chunk + embed    │──┐
//! └──────────┘   └──────────────┘   └──────────────────┘  │
//!                                                          ▼
//! ┌──────────┐   ┌──────────────────────────────┐   ┌──────────┐
//! │   ask    │──▶│ history + retrieval + memory │◀──│  SQLite  │
//! └──────────┘   └──────────────┬───────────────┘   └──────────┘
//!                               ▼
//!                         chat model / fallback
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`db`] | SQLite pool |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite implementation of the core repositories |
//! | [`blob`] | Filesystem object storage |
//! | [`embedding`] | Embedding backends (OpenAI-compatible, hash, disabled) |
//! | [`llm`] | Chat backends (OpenAI-compatible, disabled) |
//! | [`retry`] | HTTP retry with exponential backoff |
//! | [`extract`] | PDF and DOCX text extraction |
//! | [`jobs`] | SQLite job queue and worker |
//! | [`app`] | Component wiring |
//! | [`commands`] | CLI command implementations |

pub mod app;
pub mod blob;
pub mod commands;
pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod jobs;
pub mod llm;
pub mod migrate;
pub mod retry;
pub mod sqlite_store;
