use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("chat service returned {0}")]
    Status(StatusCode),
    #[error("stream: {0}")]
    Stream(String),
    #[error("invalid response body: {0}")]
    InvalidBody(#[from] serde_json::Error),
    #[error("a reply is already streaming")]
    Busy,
    #[error("question is empty")]
    EmptyQuestion,
    #[error("config: {0}")]
    Config(String),
}

impl ChatError {
    /// Short, user-facing description for notifications
    pub fn summary(&self) -> String {
        match self {
            ChatError::Http(e) if e.is_timeout() => "The chat service timed out".to_string(),
            ChatError::Http(e) if e.is_connect() => "Failed to reach chat service".to_string(),
            ChatError::Http(_) | ChatError::Stream(_) => {
                "Connection to the chat service was interrupted".to_string()
            }
            ChatError::Status(status) => format!("Chat service responded with {}", status),
            ChatError::InvalidBody(_) => "The chat service sent an unreadable reply".to_string(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
