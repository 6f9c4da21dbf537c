//! UI-agnostic conversation state types
//!
//! This module contains data structures that are shared between different UIs
//! (TUI, one-shot CLI, etc.) and don't depend on any specific UI framework.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Client-generated message identifier
pub type MessageId = Uuid;

/// A chat message in the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub role: ChatRole,
    pub content: String,
    /// Generated SQL attached to an assistant reply
    pub sql: Option<String>,
    /// Rows returned when the service ran the SQL itself
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<QueryResults>,
    pub timestamp: DateTime<Utc>,
}

/// Result set of a query the service executed on the caller's behalf
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryResults {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub row_count: usize,
}

impl QueryResults {
    /// Total rows, trusting whichever of `row_count` and `rows` is larger
    pub fn total_rows(&self) -> usize {
        self.row_count.max(self.rows.len())
    }

    /// Rows rendered as display text, with `NULL` for null cells
    pub fn row_texts(&self) -> impl Iterator<Item = Vec<String>> + '_ {
        self.rows.iter().map(|row| row.iter().map(cell_text).collect())
    }
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// The role of a chat message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>, sql: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            sql,
            results: None,
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ChatRole::User, content, None)
    }

    /// Empty assistant message that a streamed reply is assembled into
    pub fn assistant_placeholder() -> Self {
        Self::new(ChatRole::Assistant, String::new(), None)
    }
}

/// Cumulative state of a message being assembled
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartialMessage {
    pub content: String,
    pub sql: Option<String>,
    /// Only present once the whole reply is known
    pub results: Option<QueryResults>,
}

/// Partial state delivered to the owner of the target message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageUpdate {
    pub id: MessageId,
    pub content: String,
    pub sql: Option<String>,
}

impl MessageUpdate {
    pub fn new(id: MessageId, partial: PartialMessage) -> Self {
        Self {
            id,
            content: partial.content,
            sql: partial.sql,
        }
    }
}

/// Ordered message history owned by a single conversation view
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: ChatMessage) -> MessageId {
        let id = message.id;
        self.messages.push(message);
        id
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn get(&self, id: MessageId) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// Replace the content and SQL of an assistant message.
    ///
    /// User messages are committed on creation and never change, so updates
    /// targeting them (or an unknown id) are ignored and `false` is returned.
    pub fn apply(&mut self, update: MessageUpdate) -> bool {
        match self
            .messages
            .iter_mut()
            .find(|m| m.id == update.id && m.role == ChatRole::Assistant)
        {
            Some(message) => {
                message.content = update.content;
                message.sql = update.sql;
                true
            }
            None => false,
        }
    }

    /// Attach executed query results to an assistant message
    pub fn set_results(&mut self, id: MessageId, results: Option<QueryResults>) -> bool {
        match self
            .messages
            .iter_mut()
            .find(|m| m.id == id && m.role == ChatRole::Assistant)
        {
            Some(message) => {
                message.results = results;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: MessageId) -> Option<ChatMessage> {
        let idx = self.messages.iter().position(|m| m.id == id)?;
        Some(self.messages.remove(idx))
    }

    /// Most recent message that carries SQL
    pub fn latest_sql_message(&self) -> Option<&ChatMessage> {
        self.messages.iter().rev().find(|m| m.sql.is_some())
    }

    /// SQL of the most recent message that carries one
    pub fn latest_sql(&self) -> Option<&str> {
        self.latest_sql_message().and_then(|m| m.sql.as_deref())
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}
