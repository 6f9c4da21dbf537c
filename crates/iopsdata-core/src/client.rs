use std::ops::ControlFlow;

use log::{debug, info};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};

use crate::assembler::{assemble, AssemblyOutcome, StreamMode};
use crate::config::Config;
use crate::error::{ChatError, Result};
use crate::provider::Provider;
use crate::sse::EVENT_STREAM_CONTENT_TYPE;
use crate::state::{MessageId, MessageUpdate, PartialMessage, QueryResults};

const JSON_CONTENT_TYPE: &str = "application/json";

#[derive(Serialize)]
struct ChatRequest<'a> {
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    connection_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    provider: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dialect: Option<&'a str>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    auto_execute: bool,
}

#[derive(Deserialize)]
struct ChatReply {
    message: Option<String>,
    sql: Option<String>,
    /// Present when `auto_execute` was requested and the query ran
    results: Option<QueryResults>,
}

/// How a successful response body is to be read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    EventStream,
    Json,
    PlainText,
}

impl ResponseKind {
    pub fn from_content_type(content_type: Option<&str>) -> Self {
        let content_type = content_type.unwrap_or_default().to_ascii_lowercase();
        if content_type.contains(EVENT_STREAM_CONTENT_TYPE) {
            ResponseKind::EventStream
        } else if content_type.contains(JSON_CONTENT_TYPE) {
            ResponseKind::Json
        } else {
            ResponseKind::PlainText
        }
    }

    /// Assembler mode for streamed kinds; `None` for a single JSON body
    pub fn stream_mode(&self) -> Option<StreamMode> {
        match self {
            ResponseKind::EventStream => Some(StreamMode::EventStream),
            ResponseKind::PlainText => Some(StreamMode::PlainText),
            ResponseKind::Json => None,
        }
    }
}

#[derive(Clone)]
pub struct ChatClient {
    client: Client,
    chat_url: String,
    connection_id: Option<String>,
    provider: Option<Provider>,
    dialect: Option<String>,
    auto_execute: bool,
}

impl ChatClient {
    pub fn new(chat_url: &str) -> Self {
        Self {
            client: Client::new(),
            chat_url: chat_url.to_string(),
            connection_id: None,
            provider: None,
            dialect: None,
            auto_execute: false,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("iopsdata/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(config.connect_timeout())
            .build()?;

        Ok(Self {
            client,
            chat_url: config.chat_url(),
            connection_id: config.connection_id.clone(),
            provider: config.provider(),
            dialect: config.dialect.clone(),
            auto_execute: config.auto_execute.unwrap_or(false),
        })
    }

    pub fn chat_url(&self) -> &str {
        &self.chat_url
    }

    pub fn provider(&self) -> Option<Provider> {
        self.provider
    }

    pub fn set_provider(&mut self, provider: Option<Provider>) {
        self.provider = provider;
    }

    pub fn set_connection_id(&mut self, connection_id: Option<String>) {
        self.connection_id = connection_id;
    }

    pub fn set_auto_execute(&mut self, auto_execute: bool) {
        self.auto_execute = auto_execute;
    }

    /// POST the question and return the response once its status is known
    /// to be successful.
    pub async fn send(&self, question: &str) -> Result<Response> {
        let request = ChatRequest {
            message: question,
            connection_id: self.connection_id.as_deref(),
            provider: self.provider.map(|p| p.as_str()),
            dialect: self.dialect.as_deref(),
            auto_execute: self.auto_execute,
        };

        info!("Sending question to {}", self.chat_url);
        let response = self.client.post(&self.chat_url).json(&request).send().await?;

        if !response.status().is_success() {
            return Err(ChatError::Status(response.status()));
        }
        Ok(response)
    }

    /// Send `question` and assemble the reply into message `target`.
    pub async fn ask<F>(&self, question: &str, target: MessageId, mut on_update: F) -> AssemblyOutcome
    where
        F: FnMut(MessageUpdate) -> ControlFlow<()>,
    {
        let response = match self.send(question).await {
            Ok(response) => response,
            Err(e) => return AssemblyOutcome::Failed(e),
        };

        let kind = ResponseKind::from_content_type(
            response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok()),
        );
        debug!("Reply for {} is {:?}", target, kind);

        match kind.stream_mode() {
            Some(mode) => assemble(response.bytes_stream(), mode, target, on_update).await,
            None => {
                let partial = match read_json_reply(response).await {
                    Ok(partial) => partial,
                    Err(e) => return AssemblyOutcome::Failed(e),
                };
                if on_update(MessageUpdate::new(target, partial.clone())).is_break() {
                    return AssemblyOutcome::Detached;
                }
                AssemblyOutcome::Completed(partial)
            }
        }
    }
}

async fn read_json_reply(response: Response) -> Result<PartialMessage> {
    let body = response.bytes().await?;
    let reply: ChatReply = serde_json::from_slice(&body)?;
    Ok(PartialMessage {
        content: reply.message.unwrap_or_default(),
        sql: reply.sql.filter(|s| !s.is_empty()),
        results: reply.results,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinHandle;
    use uuid::Uuid;

    fn header_end(buf: &[u8]) -> Option<usize> {
        buf.windows(4).position(|w| w == b"\r\n\r\n")
    }

    async fn read_request(socket: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut tmp = [0u8; 1024];
        loop {
            let n = socket.read(&mut tmp).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&tmp[..n]);
            if let Some(end) = header_end(&buf) {
                let head = String::from_utf8_lossy(&buf[..end]).to_lowercase();
                let len = head
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= end + 4 + len {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Serve one canned HTTP response; the handle yields the raw request.
    async fn serve_once(response: String) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = read_request(&mut socket).await;
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            request
        });
        (format!("http://{}/api/chat", addr), handle)
    }

    async fn ask_collect(client: &ChatClient) -> (Vec<MessageUpdate>, AssemblyOutcome) {
        let mut updates = Vec::new();
        let outcome = client
            .ask("top customers by revenue", Uuid::new_v4(), |update| {
                updates.push(update);
                ControlFlow::Continue(())
            })
            .await;
        (updates, outcome)
    }

    #[test]
    fn test_response_kind_from_content_type() {
        assert_eq!(
            ResponseKind::from_content_type(Some("text/event-stream; charset=utf-8")),
            ResponseKind::EventStream
        );
        assert_eq!(
            ResponseKind::from_content_type(Some("Application/JSON")),
            ResponseKind::Json
        );
        assert_eq!(
            ResponseKind::from_content_type(Some("text/plain")),
            ResponseKind::PlainText
        );
        assert_eq!(ResponseKind::from_content_type(None), ResponseKind::PlainText);
        assert_eq!(ResponseKind::Json.stream_mode(), None);
    }

    #[test]
    fn test_request_body_skips_unset_fields() {
        let request = ChatRequest {
            message: "q",
            connection_id: None,
            provider: None,
            dialect: None,
            auto_execute: false,
        };
        assert_eq!(serde_json::to_string(&request).unwrap(), r#"{"message":"q"}"#);
    }

    #[tokio::test]
    async fn test_event_stream_reply() {
        let body = "data: {\"message\":\"Hel\"}\n\ndata: {\"message\":\"lo\",\"sql\":\"SELECT 1\"}\n\n";
        let (url, server) = serve_once(format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        ))
        .await;
        let mut client = ChatClient::new(&url);
        client.set_provider(Some(Provider::Groq));
        client.set_connection_id(Some("warehouse".to_string()));

        let (updates, outcome) = ask_collect(&client).await;

        let last = updates.last().unwrap();
        assert_eq!(last.content, "Hello");
        assert_eq!(last.sql.as_deref(), Some("SELECT 1"));
        assert!(outcome.is_completed());

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /api/chat"));
        assert!(request.contains(r#""message":"top customers by revenue""#));
        assert!(request.contains(r#""provider":"groq""#));
        assert!(request.contains(r#""connection_id":"warehouse""#));
    }

    #[tokio::test]
    async fn test_plain_text_reply() {
        let (url, _server) = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 11\r\n\r\nhello world".to_string(),
        )
        .await;

        let (updates, outcome) = ask_collect(&ChatClient::new(&url)).await;

        assert_eq!(updates.last().unwrap().content, "hello world");
        match outcome {
            AssemblyOutcome::Completed(partial) => assert_eq!(partial.content, "hello world"),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_json_reply_single_update() {
        let body = r#"{"message":"Here you go","sql":"SELECT 2","provider":"groq"}"#;
        let (url, _server) = serve_once(format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        ))
        .await;

        let (updates, outcome) = ask_collect(&ChatClient::new(&url)).await;

        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].content, "Here you go");
        assert_eq!(updates[0].sql.as_deref(), Some("SELECT 2"));
        assert!(outcome.is_completed());
    }

    #[tokio::test]
    async fn test_json_reply_with_executed_results() {
        let body = r#"{"sql":"SELECT region, total FROM sales","provider":"groq","model":"llama","tokens":{"prompt":12},"results":{"columns":["region","total"],"rows":[["emea",42],["apac",null]],"row_count":2}}"#;
        let (url, server) = serve_once(format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        ))
        .await;
        let mut client = ChatClient::new(&url);
        client.set_auto_execute(true);

        let (updates, outcome) = ask_collect(&client).await;

        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].content, "");
        let partial = match outcome {
            AssemblyOutcome::Completed(partial) => partial,
            other => panic!("unexpected outcome: {:?}", other),
        };
        let results = partial.results.unwrap();
        assert_eq!(results.columns, vec!["region", "total"]);
        assert_eq!(results.rows[0], vec![serde_json::json!("emea"), serde_json::json!(42)]);
        assert_eq!(results.rows[1][1], serde_json::Value::Null);
        assert_eq!(results.row_count, 2);

        let request = server.await.unwrap();
        assert!(request.contains(r#""auto_execute":true"#));
    }

    #[tokio::test]
    async fn test_invalid_json_reply_fails() {
        let (url, _server) = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 5\r\n\r\noops!".to_string(),
        )
        .await;

        let (updates, outcome) = ask_collect(&ChatClient::new(&url)).await;

        assert!(updates.is_empty());
        assert!(matches!(outcome, AssemblyOutcome::Failed(ChatError::InvalidBody(_))));
    }

    #[tokio::test]
    async fn test_error_status_fails_before_assembly() {
        let body = "data: {\"message\":\"should not appear\"}\n\n";
        let (url, _server) = serve_once(format!(
            "HTTP/1.1 503 Service Unavailable\r\nContent-Type: text/event-stream\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        ))
        .await;

        let (updates, outcome) = ask_collect(&ChatClient::new(&url)).await;

        assert!(updates.is_empty());
        match outcome {
            AssemblyOutcome::Failed(ChatError::Status(status)) => assert_eq!(status.as_u16(), 503),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_truncated_body_fails() {
        let (url, _server) = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nContent-Length: 400\r\n\r\ndata: {\"message\":\"par\"}\n\n"
                .to_string(),
        )
        .await;

        let (_, outcome) = ask_collect(&ChatClient::new(&url)).await;

        assert!(matches!(outcome, AssemblyOutcome::Failed(ChatError::Http(_))));
    }

    #[tokio::test]
    async fn test_connection_refused() {
        // Bind then drop to get a port nobody listens on
        let addr = TcpListener::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap();
        let client = ChatClient::new(&format!("http://{}/api/chat", addr));

        let (updates, outcome) = ask_collect(&client).await;

        assert!(updates.is_empty());
        assert!(matches!(outcome, AssemblyOutcome::Failed(ChatError::Http(_))));
    }
}
