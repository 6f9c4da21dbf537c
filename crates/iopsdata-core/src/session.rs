//! Conversation ownership and single-flight sending.
//!
//! A [`ChatSession`] owns the message list of one conversation view. Only one
//! reply may stream at a time; the in-flight assistant message is the only
//! message updates are allowed to touch.

use std::ops::ControlFlow;

use log::{info, warn};

use crate::assembler::AssemblyOutcome;
use crate::client::ChatClient;
use crate::error::{ChatError, Result};
use crate::sql::extract_sql;
use crate::state::{ChatMessage, Conversation, MessageId, MessageUpdate};

const QUERY_PREVIEW_CHARS: usize = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Info,
    Error,
}

/// User-visible alert handed to whatever UI owns the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub level: NotificationLevel,
    pub title: String,
    pub description: String,
}

impl Notification {
    pub fn chat_failed(error: &ChatError) -> Self {
        Self {
            level: NotificationLevel::Error,
            title: "Chat request failed".to_string(),
            description: error.summary(),
        }
    }

    pub fn settings_not_saved(error: &ChatError) -> Self {
        Self {
            level: NotificationLevel::Error,
            title: "Settings not saved".to_string(),
            description: error.summary(),
        }
    }

    pub fn query_queued(sql: &str) -> Self {
        Self {
            level: NotificationLevel::Info,
            title: "Query queued".to_string(),
            description: sql.chars().take(QUERY_PREVIEW_CHARS).collect(),
        }
    }
}

#[derive(Debug)]
pub struct ChatSession {
    conversation: Conversation,
    in_flight: Option<MessageId>,
    extract_sql: bool,
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatSession {
    pub fn new() -> Self {
        Self {
            conversation: Conversation::new(),
            in_flight: None,
            extract_sql: true,
        }
    }

    /// Derive SQL from the reply text when the service sends none
    pub fn with_sql_extraction(mut self, enabled: bool) -> Self {
        self.extract_sql = enabled;
        self
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn in_flight(&self) -> Option<MessageId> {
        self.in_flight
    }

    /// Record the user's question and an empty assistant placeholder.
    ///
    /// Returns the placeholder id to assemble the reply into. Nothing changes
    /// when the question is blank or a reply is still streaming.
    pub fn begin(&mut self, question: &str) -> Result<MessageId> {
        if self.in_flight.is_some() {
            return Err(ChatError::Busy);
        }
        let question = question.trim();
        if question.is_empty() {
            return Err(ChatError::EmptyQuestion);
        }

        self.conversation.push(ChatMessage::user(question));
        let id = self.conversation.push(ChatMessage::assistant_placeholder());
        self.in_flight = Some(id);
        Ok(id)
    }

    /// Apply a partial update to the in-flight reply; stale updates are dropped.
    pub fn apply(&mut self, update: MessageUpdate) -> bool {
        if self.in_flight != Some(update.id) {
            return false;
        }
        self.conversation.apply(update)
    }

    /// Settle the in-flight reply according to how its assembly ended.
    pub fn finish<N>(&mut self, id: MessageId, outcome: AssemblyOutcome, mut notify: N)
    where
        N: FnMut(Notification),
    {
        if self.in_flight != Some(id) {
            warn!("Ignoring outcome for {}: not in flight", id);
            return;
        }
        self.in_flight = None;

        match outcome {
            AssemblyOutcome::Completed(partial) => {
                let sql = partial.sql.clone().or_else(|| {
                    if self.extract_sql {
                        extract_sql(&partial.content)
                    } else {
                        None
                    }
                });
                self.conversation.apply(MessageUpdate {
                    id,
                    content: partial.content,
                    sql,
                });
                self.conversation.set_results(id, partial.results);
                info!("Reply {} committed", id);
            }
            AssemblyOutcome::Failed(error) => {
                warn!("Reply {} failed: {}", id, error);
                self.conversation.remove(id);
                notify(Notification::chat_failed(&error));
            }
            AssemblyOutcome::Detached => {
                self.conversation.remove(id);
            }
        }
    }

    /// Run one exchange to completion: begin, stream, settle.
    pub async fn send<N>(&mut self, client: &ChatClient, question: &str, notify: N) -> Result<MessageId>
    where
        N: FnMut(Notification),
    {
        let id = self.begin(question)?;
        let conversation = &mut self.conversation;
        let outcome = client
            .ask(question.trim(), id, |update| {
                conversation.apply(update);
                ControlFlow::Continue(())
            })
            .await;
        self.finish(id, outcome, notify);
        Ok(id)
    }

    /// Drop all messages. Refused while a reply is streaming.
    pub fn clear(&mut self) -> Result<()> {
        if self.is_busy() {
            return Err(ChatError::Busy);
        }
        self.conversation.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::{assemble, StreamMode};
    use crate::state::{ChatRole, PartialMessage, QueryResults};
    use futures_util::stream;

    async fn stream_into(
        session: &mut ChatSession,
        id: MessageId,
        chunks: Vec<std::result::Result<Vec<u8>, ChatError>>,
    ) -> AssemblyOutcome {
        assemble(stream::iter(chunks), StreamMode::EventStream, id, |update| {
            session.apply(update);
            ControlFlow::Continue(())
        })
        .await
    }

    #[test]
    fn test_begin_adds_user_and_placeholder() {
        let mut session = ChatSession::new();
        let id = session.begin("  revenue by month  ").unwrap();

        let messages = session.conversation().messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, ChatRole::User);
        assert_eq!(messages[0].content, "revenue by month");
        assert_eq!(messages[1].id, id);
        assert_eq!(messages[1].role, ChatRole::Assistant);
        assert!(messages[1].content.is_empty());
        assert!(session.is_busy());
    }

    #[test]
    fn test_second_send_is_noop_while_streaming() {
        let mut session = ChatSession::new();
        let first = session.begin("first").unwrap();

        assert!(matches!(session.begin("second"), Err(ChatError::Busy)));
        assert_eq!(session.conversation().len(), 2);
        assert_eq!(session.in_flight(), Some(first));

        session.finish(first, AssemblyOutcome::Completed(PartialMessage::default()), |_| {});
        assert!(session.begin("second").is_ok());
        assert_eq!(session.conversation().len(), 4);
    }

    #[test]
    fn test_blank_question_rejected() {
        let mut session = ChatSession::new();
        assert!(matches!(session.begin("   "), Err(ChatError::EmptyQuestion)));
        assert!(session.conversation().is_empty());
        assert!(!session.is_busy());
    }

    #[test]
    fn test_stale_update_ignored() {
        let mut session = ChatSession::new();
        let id = session.begin("q").unwrap();
        session.finish(id, AssemblyOutcome::Completed(PartialMessage::default()), |_| {});

        assert!(!session.apply(MessageUpdate {
            id,
            content: "late".to_string(),
            sql: None,
        }));
        assert_eq!(session.conversation().get(id).unwrap().content, "");
    }

    #[tokio::test]
    async fn test_mid_stream_failure_removes_reply_and_notifies_once() {
        let mut session = ChatSession::new();
        let id = session.begin("orders last week").unwrap();

        let outcome = stream_into(
            &mut session,
            id,
            vec![
                Ok(b"data: {\"message\":\"Partial answer\"}\n\n".to_vec()),
                Err(ChatError::Stream("reset".to_string())),
            ],
        )
        .await;
        assert_eq!(session.conversation().get(id).unwrap().content, "Partial answer");

        let mut notifications = Vec::new();
        session.finish(id, outcome, |n| notifications.push(n));

        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].level, NotificationLevel::Error);
        assert_eq!(notifications[0].title, "Chat request failed");
        assert!(session.conversation().get(id).is_none());
        assert_eq!(session.conversation().len(), 1);
        assert!(!session.is_busy());
    }

    #[tokio::test]
    async fn test_completed_reply_is_committed() {
        let mut session = ChatSession::new();
        let id = session.begin("q").unwrap();

        let outcome = stream_into(
            &mut session,
            id,
            vec![
                Ok(b"data: {\"message\":\"Hel\"}\n\n".to_vec()),
                Ok(b"data: {\"message\":\"lo\",\"sql\":\"SELECT 1\"}\n\n".to_vec()),
            ],
        )
        .await;
        session.finish(id, outcome, |_| panic!("no notification expected"));

        let reply = session.conversation().get(id).unwrap();
        assert_eq!(reply.content, "Hello");
        assert_eq!(reply.sql.as_deref(), Some("SELECT 1"));
        assert_eq!(session.conversation().latest_sql(), Some("SELECT 1"));
    }

    #[test]
    fn test_results_committed_with_reply() {
        let mut session = ChatSession::new();
        let id = session.begin("q").unwrap();
        let results = QueryResults {
            columns: vec!["region".to_string()],
            rows: vec![vec![serde_json::json!("emea")]],
            row_count: 1,
        };
        let outcome = AssemblyOutcome::Completed(PartialMessage {
            content: "Done".to_string(),
            sql: Some("SELECT region FROM sales".to_string()),
            results: Some(results.clone()),
        });

        session.finish(id, outcome, |_| {});

        let latest = session.conversation().latest_sql_message().unwrap();
        assert_eq!(latest.id, id);
        assert_eq!(latest.results.as_ref(), Some(&results));
    }

    #[test]
    fn test_sql_extracted_when_not_declared() {
        let mut session = ChatSession::new();
        let id = session.begin("q").unwrap();
        let outcome = AssemblyOutcome::Completed(PartialMessage {
            content: "Try this:\n```sql\nSELECT * FROM orders\n```".to_string(),
            ..PartialMessage::default()
        });

        session.finish(id, outcome, |_| {});

        let reply = session.conversation().get(id).unwrap();
        assert_eq!(reply.sql.as_deref(), Some("SELECT * FROM orders;"));
    }

    #[test]
    fn test_sql_extraction_can_be_disabled() {
        let mut session = ChatSession::new().with_sql_extraction(false);
        let id = session.begin("q").unwrap();
        let outcome = AssemblyOutcome::Completed(PartialMessage {
            content: "SELECT 1".to_string(),
            ..PartialMessage::default()
        });

        session.finish(id, outcome, |_| {});

        assert_eq!(session.conversation().get(id).unwrap().sql, None);
    }

    #[test]
    fn test_detached_reply_removed_silently() {
        let mut session = ChatSession::new();
        let id = session.begin("q").unwrap();
        session.finish(id, AssemblyOutcome::Detached, |_| panic!("no notification expected"));
        assert!(session.conversation().get(id).is_none());
        assert!(!session.is_busy());
    }

    #[test]
    fn test_clear_refused_while_busy() {
        let mut session = ChatSession::new();
        let id = session.begin("q").unwrap();
        assert!(matches!(session.clear(), Err(ChatError::Busy)));
        session.finish(id, AssemblyOutcome::Detached, |_| {});
        assert!(session.clear().is_ok());
        assert!(session.conversation().is_empty());
    }

    #[test]
    fn test_query_queued_truncates() {
        let sql = format!("SELECT {}", "x, ".repeat(100));
        let notification = Notification::query_queued(&sql);
        assert_eq!(notification.level, NotificationLevel::Info);
        assert_eq!(notification.description.chars().count(), 120);
    }

    #[tokio::test]
    async fn test_send_against_unreachable_service() {
        let addr = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap()
            .local_addr()
            .unwrap();
        let client = ChatClient::new(&format!("http://{}/api/chat", addr));
        let mut session = ChatSession::new();
        let mut notifications = Vec::new();

        let id = session
            .send(&client, "anything", |n| notifications.push(n))
            .await
            .unwrap();

        assert_eq!(notifications.len(), 1);
        assert!(session.conversation().get(id).is_none());
        assert_eq!(session.conversation().len(), 1);
    }
}
