//! Bounded conversational history.
//!
//! The transcript is append-only and lives behind [`MessageLog`]. Recall is
//! windowed by both a token budget and a message count: messages are scanned
//! newest-first, each one's cost is charged against the budget, and the scan
//! stops at the first message that does not fit. The window is returned in
//! chronological order.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{ConversationMessage, Role};
use crate::store::MessageLog;
use crate::tokenize::{HeuristicTokenizer, Tokenizer};

/// Messages recalled for a turn, oldest first.
#[derive(Debug, Clone, Default)]
pub struct RecentHistory {
    pub messages: Vec<ConversationMessage>,
    /// Sum of the returned messages' token costs.
    pub used_tokens: usize,
}

impl RecentHistory {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Reads and writes a session transcript.
#[derive(Clone)]
pub struct HistoryManager {
    log: Arc<dyn MessageLog>,
    tokenizer: Arc<dyn Tokenizer>,
}

impl HistoryManager {
    pub fn new(log: Arc<dyn MessageLog>) -> Self {
        Self {
            log,
            tokenizer: Arc::new(HeuristicTokenizer),
        }
    }

    /// Measure message cost with an exact tokenizer instead of the heuristic.
    pub fn with_tokenizer(mut self, tokenizer: Arc<dyn Tokenizer>) -> Self {
        self.tokenizer = tokenizer;
        self
    }

    /// Token cost charged against the recall budget.
    ///
    /// Uses the count recorded at append time, recomputing it for rows that
    /// were stored without one.
    pub fn message_cost(&self, message: &ConversationMessage) -> usize {
        if message.token_count > 0 {
            message.token_count as usize
        } else {
            self.tokenizer.count_tokens(&message.content)
        }
    }

    /// Build a transcript entry with its token count filled in.
    pub fn new_message(
        &self,
        owner_id: &str,
        session_id: &str,
        role: Role,
        content: &str,
    ) -> ConversationMessage {
        ConversationMessage {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            owner_id: owner_id.to_string(),
            role,
            content: content.to_string(),
            token_count: self.tokenizer.count_tokens(content) as i64,
            created_at: Utc::now(),
        }
    }

    /// Write one message. Turn callers run this as a best-effort step.
    pub async fn append(&self, message: &ConversationMessage) -> Result<()> {
        self.log.append_message(message).await
    }

    /// Append the question and the answer of one turn, in that order.
    ///
    /// The answer is still attempted when the question fails to persist;
    /// the first error is returned.
    pub async fn append_turn(
        &self,
        owner_id: &str,
        session_id: &str,
        question: &str,
        answer: &str,
    ) -> Result<()> {
        let user = self.new_message(owner_id, session_id, Role::User, question);
        let assistant = self.new_message(owner_id, session_id, Role::Assistant, answer);
        let first = self.append(&user).await;
        let second = self.append(&assistant).await;
        first.and(second)
    }

    /// Most recent messages that fit both `max_tokens` and `max_messages`.
    pub async fn list_recent(
        &self,
        owner_id: &str,
        session_id: &str,
        max_tokens: usize,
        max_messages: usize,
    ) -> Result<RecentHistory> {
        if max_messages == 0 {
            return Ok(RecentHistory::default());
        }
        let newest_first = self
            .log
            .recent_messages(owner_id, session_id, max_messages)
            .await?;

        let mut budget = max_tokens;
        let mut used_tokens = 0;
        let mut messages = Vec::with_capacity(newest_first.len());
        for message in newest_first {
            let cost = self.message_cost(&message);
            if cost > budget {
                break;
            }
            budget -= cost;
            used_tokens += cost;
            messages.push(message);
        }
        messages.reverse();

        tracing::debug!(
            owner_id,
            session_id,
            messages = messages.len(),
            used_tokens,
            "loaded history window"
        );
        Ok(RecentHistory {
            messages,
            used_tokens,
        })
    }

    /// Total messages stored for the session.
    pub async fn count(&self, owner_id: &str, session_id: &str) -> Result<usize> {
        self.log.count_messages(owner_id, session_id).await
    }

    /// Full transcript up to `limit` messages, oldest first.
    pub async fn transcript(
        &self,
        owner_id: &str,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationMessage>> {
        let mut messages = self.log.recent_messages(owner_id, session_id, limit).await?;
        messages.reverse();
        Ok(messages)
    }
}

/// Widen a question with a digest of the latest turns for embedding.
///
/// The digest holds at most `max_entries` lines of `role: content`, newest
/// first, joined by newlines and capped at `max_chars` characters. The
/// result is only ever embedded, never shown to the user.
pub fn build_semantic_query(
    question: &str,
    history: &[ConversationMessage],
    max_entries: usize,
    max_chars: usize,
) -> String {
    let digest = history_digest(history, max_entries, max_chars);
    if digest.is_empty() {
        question.to_string()
    } else {
        format!("{}\n\nRecent conversation:\n{}", question, digest)
    }
}

fn history_digest(history: &[ConversationMessage], max_entries: usize, max_chars: usize) -> String {
    let mut digest = String::new();
    let mut used = 0;
    for message in history.iter().rev().take(max_entries) {
        let body = message.content.split_whitespace().collect::<Vec<_>>().join(" ");
        if body.is_empty() {
            continue;
        }
        let line = format!("{}: {}", message.role, body);
        let line_chars = line.chars().count();
        let separator = usize::from(!digest.is_empty());

        if used + separator + line_chars > max_chars {
            if digest.is_empty() {
                digest.extend(line.chars().take(max_chars));
            }
            break;
        }
        if separator == 1 {
            digest.push('\n');
        }
        digest.push_str(&line);
        used += separator + line_chars;
    }
    digest
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;

    async fn seeded(contents: &[(&str, Role)]) -> HistoryManager {
        let store = Arc::new(InMemoryStore::new());
        let history = HistoryManager::new(store);
        for (content, role) in contents {
            let msg = history.new_message("u1", "s1", *role, content);
            history.append(&msg).await.unwrap();
        }
        history
    }

    fn msg(role: Role, content: &str) -> ConversationMessage {
        ConversationMessage {
            id: Uuid::new_v4().to_string(),
            session_id: "s1".into(),
            owner_id: "u1".into(),
            role,
            content: content.into(),
            token_count: 0,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn window_is_chronological_and_within_budget() {
        let history = seeded(&[
            ("one two three", Role::User),
            ("four five", Role::Assistant),
            ("six", Role::User),
            ("seven eight", Role::Assistant),
        ])
        .await;
        let window = history.list_recent("u1", "s1", 3, 10).await.unwrap();
        let contents: Vec<&str> = window.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["six", "seven eight"]);
        assert_eq!(window.used_tokens, 3);
    }

    #[tokio::test]
    async fn scan_stops_at_first_overflow() {
        let history = seeded(&[
            ("a", Role::User),
            ("b c d e f g h", Role::Assistant),
            ("i", Role::User),
        ])
        .await;
        // The middle message does not fit, so the older short one is not reached.
        let window = history.list_recent("u1", "s1", 3, 10).await.unwrap();
        assert_eq!(window.messages.len(), 1);
        assert_eq!(window.messages[0].content, "i");
    }

    #[tokio::test]
    async fn message_cap_applies() {
        let history = seeded(&[("a", Role::User), ("b", Role::Assistant), ("c", Role::User)]).await;
        let window = history.list_recent("u1", "s1", 100, 2).await.unwrap();
        assert_eq!(window.messages.len(), 2);
        assert_eq!(window.messages[1].content, "c");
        assert!(history.list_recent("u1", "s1", 100, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn append_turn_writes_user_then_assistant() {
        let history = seeded(&[]).await;
        history.append_turn("u1", "s1", "why?", "because").await.unwrap();
        let transcript = history.transcript("u1", "s1", 10).await.unwrap();
        assert_eq!(transcript[0].role, Role::User);
        assert_eq!(transcript[1].role, Role::Assistant);
        assert_eq!(history.count("u1", "s1").await.unwrap(), 2);
    }

    #[test]
    fn semantic_query_without_history_is_the_question() {
        assert_eq!(build_semantic_query("what?", &[], 4, 600), "what?");
    }

    #[test]
    fn digest_is_newest_first_and_bounded() {
        let history = vec![
            msg(Role::User, "first question"),
            msg(Role::Assistant, "first answer"),
            msg(Role::User, "second question"),
        ];
        let query = build_semantic_query("q", &history, 2, 600);
        assert_eq!(
            query,
            "q\n\nRecent conversation:\nuser: second question\nassistant: first answer"
        );

        let tight = build_semantic_query("q", &history, 3, 25);
        assert!(tight.ends_with("user: second question"));
    }

    #[test]
    fn digest_truncates_an_oversized_first_entry() {
        let history = vec![msg(Role::User, &"é".repeat(50))];
        let query = build_semantic_query("q", &history, 4, 10);
        let digest = query.rsplit('\n').next().unwrap();
        assert_eq!(digest.chars().count(), 10);
        assert!(digest.starts_with("user: "));
    }
}
