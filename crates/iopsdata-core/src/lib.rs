pub mod assembler;
pub mod client;
pub mod config;
pub mod decoder;
pub mod error;
pub mod provider;
pub mod session;
pub mod sql;
pub mod sse;
pub mod state;

// Re-export main types for convenience
pub use assembler::{assemble, Assembler, AssemblyOutcome, StreamMode};
pub use client::{ChatClient, ResponseKind};
pub use config::Config;
pub use error::ChatError;
pub use provider::Provider;
pub use session::{ChatSession, Notification, NotificationLevel};
pub use sql::extract_sql;
pub use state::{
    ChatMessage, ChatRole, Conversation, MessageId, MessageUpdate, PartialMessage, QueryResults,
};
