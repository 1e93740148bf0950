use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use docqa_core::ask::{AskConfig, HistorySettings, DEFAULT_SYSTEM_PROMPT};
use docqa_core::chunk::ChunkerConfig;
use docqa_core::ingest::IngestConfig;
use docqa_core::memory::MemoryConfig;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub ingest: IngestSection,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub memory: MemorySection,
    #[serde(default)]
    pub ask: AskSection,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Directory the filesystem object store writes blobs under.
    pub root: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    pub max_tokens: usize,
    #[serde(default = "default_overlap")]
    pub overlap_tokens: usize,
}

fn default_overlap() -> usize {
    0
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct IngestSection {
    #[serde(default)]
    pub max_upload_bytes: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub chunk_top_k: usize,
    #[serde(default = "default_top_k")]
    pub memory_top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            chunk_top_k: default_top_k(),
            memory_top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct HistoryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_history_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_history_messages")]
    pub max_messages: usize,
    #[serde(default = "default_digest_entries")]
    pub digest_entries: usize,
    #[serde(default = "default_digest_chars")]
    pub digest_chars: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_tokens: default_history_tokens(),
            max_messages: default_history_messages(),
            digest_entries: default_digest_entries(),
            digest_chars: default_digest_chars(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_history_tokens() -> usize {
    1500
}
fn default_history_messages() -> usize {
    20
}
fn default_digest_entries() -> usize {
    4
}
fn default_digest_chars() -> usize {
    600
}

#[derive(Debug, Deserialize, Clone)]
pub struct MemorySection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub cross_session: bool,
    #[serde(default)]
    pub prune_limit: Option<usize>,
    #[serde(default)]
    pub summary_every_n_turns: Option<usize>,
    #[serde(default = "default_turn_importance")]
    pub turn_importance: i32,
    #[serde(default = "default_summary_importance")]
    pub summary_importance: i32,
    #[serde(default = "default_summary_history_tokens")]
    pub summary_history_tokens: usize,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            enabled: true,
            cross_session: false,
            prune_limit: None,
            summary_every_n_turns: None,
            turn_importance: default_turn_importance(),
            summary_importance: default_summary_importance(),
            summary_history_tokens: default_summary_history_tokens(),
        }
    }
}

fn default_turn_importance() -> i32 {
    1
}
fn default_summary_importance() -> i32 {
    5
}
fn default_summary_history_tokens() -> usize {
    2000
}

#[derive(Debug, Deserialize, Clone)]
pub struct AskSection {
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default = "default_best_effort_timeout_ms")]
    pub best_effort_timeout_ms: u64,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl Default for AskSection {
    fn default() -> Self {
        Self {
            timeout_secs: None,
            best_effort_timeout_ms: default_best_effort_timeout_ms(),
            system_prompt: None,
        }
    }
}

fn default_best_effort_timeout_ms() -> u64 {
    2000
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            base_url: None,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_llm_retries")]
    pub max_retries: u32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            base_url: None,
            max_retries: default_llm_retries(),
            timeout_secs: default_llm_timeout_secs(),
            temperature: default_temperature(),
        }
    }
}

fn default_llm_retries() -> u32 {
    2
}
fn default_llm_timeout_secs() -> u64 {
    60
}
fn default_temperature() -> f32 {
    0.2
}

impl Config {
    pub fn chunker_config(&self) -> ChunkerConfig {
        ChunkerConfig {
            max_tokens: self.chunking.max_tokens,
            overlap_tokens: self.chunking.overlap_tokens,
        }
    }

    pub fn ingest_config(&self) -> IngestConfig {
        IngestConfig {
            max_upload_bytes: self.ingest.max_upload_bytes,
        }
    }

    pub fn memory_config(&self) -> MemoryConfig {
        MemoryConfig {
            enabled: self.memory.enabled,
            cross_session: self.memory.cross_session,
            prune_limit: self.memory.prune_limit,
            summary_every_n_turns: self.memory.summary_every_n_turns,
            turn_importance: self.memory.turn_importance,
            summary_importance: self.memory.summary_importance,
        }
    }

    pub fn ask_config(&self) -> AskConfig {
        AskConfig {
            chunk_top_k: self.retrieval.chunk_top_k,
            memory_top_k: self.retrieval.memory_top_k,
            history: HistorySettings {
                enabled: self.history.enabled,
                max_tokens: self.history.max_tokens,
                max_messages: self.history.max_messages,
                digest_entries: self.history.digest_entries,
                digest_chars: self.history.digest_chars,
            },
            timeout: self.ask.timeout_secs.map(Duration::from_secs),
            best_effort_timeout: Duration::from_millis(self.ask.best_effort_timeout_ms),
            system_prompt: self
                .ask
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Validate chunking
    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }
    if config.chunking.overlap_tokens >= config.chunking.max_tokens {
        anyhow::bail!("chunking.overlap_tokens must be < chunking.max_tokens");
    }

    // Validate retrieval
    if config.retrieval.chunk_top_k < 1 {
        anyhow::bail!("retrieval.chunk_top_k must be >= 1");
    }
    if config.retrieval.memory_top_k < 1 {
        anyhow::bail!("retrieval.memory_top_k must be >= 1");
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "hash" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or hash.",
            other
        ),
    }
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.provider == "openai" && config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    // Validate llm
    match config.llm.provider.as_str() {
        "disabled" => {}
        "openai" => {
            if config.llm.model.is_none() {
                anyhow::bail!("llm.model must be specified when provider is 'openai'");
            }
        }
        other => anyhow::bail!(
            "Unknown llm provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    Ok(())
}
