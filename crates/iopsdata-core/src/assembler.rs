//! Streamed response assembly.
//!
//! [`Assembler`] is the synchronous state machine: feed it raw chunks and it
//! returns the cumulative message state after every record (event-stream
//! mode) or every chunk (plain-text mode). [`assemble`] drives it from an
//! async byte stream and reports each state through an update callback.

use std::ops::ControlFlow;

use futures_util::{Stream, StreamExt};
use log::{debug, warn};

use crate::decoder::Utf8StreamDecoder;
use crate::error::ChatError;
use crate::sse::{self, RecordBuffer, StreamFrame};
use crate::state::{MessageId, MessageUpdate, PartialMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    /// `data:` framed records carrying JSON or text
    EventStream,
    /// Unframed text; every chunk is a delta
    PlainText,
}

/// How an assembly ended. Every caller must handle each case.
#[derive(Debug)]
pub enum AssemblyOutcome {
    /// The stream ended; this is the committed state
    Completed(PartialMessage),
    /// Reading failed; partial state must not be kept
    Failed(ChatError),
    /// The update callback asked to stop because its owner is gone
    Detached,
}

impl AssemblyOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, AssemblyOutcome::Completed(_))
    }
}

#[derive(Debug)]
pub struct Assembler {
    mode: StreamMode,
    decoder: Utf8StreamDecoder,
    records: RecordBuffer,
    content: String,
    sql: Option<String>,
}

impl Assembler {
    pub fn new(mode: StreamMode) -> Self {
        Self {
            mode,
            decoder: Utf8StreamDecoder::new(),
            records: RecordBuffer::new(),
            content: String::new(),
            sql: None,
        }
    }

    pub fn mode(&self) -> StreamMode {
        self.mode
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn sql(&self) -> Option<&str> {
        self.sql.as_deref()
    }

    pub fn snapshot(&self) -> PartialMessage {
        PartialMessage {
            content: self.content.clone(),
            sql: self.sql.clone(),
            results: None,
        }
    }

    /// Consume one raw chunk and return a snapshot per update boundary.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<PartialMessage> {
        let text = self.decoder.decode(chunk);
        match self.mode {
            StreamMode::PlainText => self.push_text(&text).into_iter().collect(),
            StreamMode::EventStream => self
                .records
                .push(&text)
                .iter()
                .map(|record| {
                    for frame in sse::parse_record(record) {
                        self.apply_frame(frame);
                    }
                    self.snapshot()
                })
                .collect(),
        }
    }

    /// Flush at end of stream. Returns a final snapshot if anything changed.
    pub fn finish(&mut self) -> Option<PartialMessage> {
        let tail = self.decoder.finish();
        match self.mode {
            StreamMode::PlainText => self.push_text(&tail),
            StreamMode::EventStream => {
                self.records.push(&tail);
                let dropped = self.records.take_remainder();
                if !dropped.trim().is_empty() {
                    debug!("Discarding unterminated record ({} bytes)", dropped.len());
                }
                None
            }
        }
    }

    fn push_text(&mut self, text: &str) -> Option<PartialMessage> {
        if text.is_empty() {
            return None;
        }
        self.content.push_str(text);
        Some(self.snapshot())
    }

    fn apply_frame(&mut self, frame: StreamFrame) {
        match frame {
            StreamFrame::Text(text) => self.content.push_str(&text),
            StreamFrame::Payload { message, sql } => {
                if let Some(message) = message {
                    self.content.push_str(&message);
                }
                if sql.is_some() {
                    self.sql = sql;
                }
            }
        }
    }
}

/// Drive an [`Assembler`] from `stream`, reporting each state for `target`.
///
/// `on_update` returns `ControlFlow::Break` once the owner of the target
/// message is gone; assembly stops without issuing further updates.
pub async fn assemble<S, B, E, F>(
    stream: S,
    mode: StreamMode,
    target: MessageId,
    mut on_update: F,
) -> AssemblyOutcome
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Into<ChatError>,
    F: FnMut(MessageUpdate) -> ControlFlow<()>,
{
    let mut stream = std::pin::pin!(stream);
    let mut assembler = Assembler::new(mode);
    let mut chunks: usize = 0;

    while let Some(item) = stream.next().await {
        let chunk = match item {
            Ok(chunk) => chunk,
            Err(e) => {
                let err: ChatError = e.into();
                warn!("Stream for {} failed after {} chunks: {}", target, chunks, err);
                return AssemblyOutcome::Failed(err);
            }
        };
        chunks += 1;

        for partial in assembler.feed(chunk.as_ref()) {
            if on_update(MessageUpdate::new(target, partial)).is_break() {
                debug!("Owner of {} went away, stopping assembly", target);
                return AssemblyOutcome::Detached;
            }
        }
    }

    if let Some(partial) = assembler.finish() {
        if on_update(MessageUpdate::new(target, partial)).is_break() {
            return AssemblyOutcome::Detached;
        }
    }

    debug!(
        "Stream for {} completed: {} chunks, {} chars",
        target,
        chunks,
        assembler.content().chars().count()
    );
    AssemblyOutcome::Completed(assembler.snapshot())
}
