//! Out-of-band session summarization.
//!
//! Runs when a `summarize_session` job is drained: condenses the recent
//! transcript into a short factual note and stores it as a `summary`
//! memory. Summaries carry a higher importance than turn memories so they
//! survive pruning longer.

use std::sync::Arc;

use crate::error::{CoreError, Result};
use crate::history::HistoryManager;
use crate::llm::{ChatMessage, LanguageModel};
use crate::memory::MemoryManager;
use crate::models::{MemoryRecord, MemorySource};

/// Hard cap on summary length, in words.
pub const SUMMARY_MAX_WORDS: usize = 120;

/// Upper bound on transcript messages fed to the model.
const SUMMARY_MAX_MESSAGES: usize = 200;

const SUMMARY_PROMPT: &str = r#"You condense conversations into durable notes.

Write a factual summary of the conversation below in at most 120 words.
Keep names, identifiers, user preferences, decisions and open questions.
Drop greetings, small talk and corrected mistakes.
Answer with the summary text only."#;

pub struct Summarizer {
    history: HistoryManager,
    memory: MemoryManager,
    llm: Arc<dyn LanguageModel>,
    history_tokens: usize,
}

impl Summarizer {
    pub fn new(
        history: HistoryManager,
        memory: MemoryManager,
        llm: Arc<dyn LanguageModel>,
        history_tokens: usize,
    ) -> Self {
        Self {
            history,
            memory,
            llm,
            history_tokens,
        }
    }

    /// Summarize a session and upsert the result.
    ///
    /// Returns `None` when memory is disabled or the session has no
    /// transcript within the token budget.
    pub async fn summarize_session(
        &self,
        owner_id: &str,
        session_id: &str,
    ) -> Result<Option<MemoryRecord>> {
        if !self.memory.is_enabled() {
            return Ok(None);
        }
        let window = self
            .history
            .list_recent(owner_id, session_id, self.history_tokens, SUMMARY_MAX_MESSAGES)
            .await?;
        if window.is_empty() {
            tracing::debug!(owner_id, session_id, "nothing to summarize");
            return Ok(None);
        }

        let transcript = window
            .messages
            .iter()
            .map(|m| format!("{}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = [
            ChatMessage::system(SUMMARY_PROMPT),
            ChatMessage::user(format!("Summarize this conversation:\n\n{}", transcript)),
        ];
        let raw = self.llm.chat(&prompt).await?;
        let summary = cap_words(raw.trim(), SUMMARY_MAX_WORDS);
        if summary.is_empty() {
            return Err(CoreError::Llm("model returned an empty summary".to_string()));
        }

        let stored = self
            .memory
            .store_note(
                owner_id,
                session_id,
                MemorySource::Summary,
                &summary,
                self.memory.config().summary_importance,
            )
            .await?;
        tracing::info!(
            owner_id,
            session_id,
            messages = window.messages.len(),
            memory_id = %stored.id,
            "session summary stored"
        );

        if let Err(e) = self.memory.prune_configured(owner_id, session_id).await {
            tracing::warn!(owner_id, session_id, error = %e, "prune after summary failed");
        }
        Ok(Some(stored))
    }
}

fn cap_words(text: &str, max_words: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= max_words {
        text.to_string()
    } else {
        words[..max_words].join(" ")
    }
}
