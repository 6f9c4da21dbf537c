//! Event-stream record framing.
//!
//! Records are separated by a blank line. Each record carries `data:` lines
//! whose payload is either a JSON object with optional `message` and `sql`
//! fields or plain text.

use log::warn;
use serde_json::{Map, Value};

pub const EVENT_STREAM_CONTENT_TYPE: &str = "text/event-stream";

const RECORD_SEPARATOR: &str = "\n\n";
const DATA_FIELD: &str = "data:";
const SKIPPED_FIELDS: [&str; 3] = ["event:", "id:", "retry:"];

/// One parsed unit of a record, consumed immediately by the assembler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFrame {
    /// Raw text appended as-is
    Text(String),
    /// Structured payload; empty fields are normalized to `None`
    Payload {
        message: Option<String>,
        sql: Option<String>,
    },
}

/// Accumulates decoded text and yields complete records.
#[derive(Debug, Default)]
pub struct RecordBuffer {
    buf: String,
}

impl RecordBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append decoded text and drain every complete record.
    ///
    /// A trailing partial record stays buffered for the next call.
    pub fn push(&mut self, text: &str) -> Vec<String> {
        self.buf.push_str(text);
        // A lone trailing '\r' is left alone and normalized once its '\n' arrives
        if self.buf.contains("\r\n") {
            self.buf = self.buf.replace("\r\n", "\n");
        }

        let mut records = Vec::new();
        while let Some(pos) = self.buf.find(RECORD_SEPARATOR) {
            records.push(self.buf[..pos].to_string());
            self.buf.drain(..pos + RECORD_SEPARATOR.len());
        }
        records
    }

    /// Text not yet terminated by a record separator
    pub fn remainder(&self) -> &str {
        &self.buf
    }

    pub fn take_remainder(&mut self) -> String {
        std::mem::take(&mut self.buf)
    }
}

/// Payload lines of a record, with field markers stripped and blanks removed
pub fn payload_lines(record: &str) -> impl Iterator<Item = &str> {
    record.split('\n').filter_map(|line| {
        let line = line.trim_start();
        if let Some(data) = line.strip_prefix(DATA_FIELD) {
            return Some(data.trim());
        }
        if line.starts_with(':') || SKIPPED_FIELDS.iter().any(|f| line.starts_with(f)) {
            return None;
        }
        Some(line.trim())
    })
    .filter(|line| !line.is_empty())
}

/// Parse a single payload line, falling back to plain text on anything that
/// is not a JSON object.
///
/// Fields of an object are read independently, so one unusable field does not
/// cost the others.
pub fn parse_line(line: &str) -> StreamFrame {
    if line.starts_with('{') {
        match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(fields)) => {
                return StreamFrame::Payload {
                    message: message_field(&fields),
                    sql: string_field(&fields, "sql"),
                };
            }
            Ok(_) => {}
            Err(e) => warn!("Malformed stream payload, keeping it as text: {}", e),
        }
    }
    StreamFrame::Text(line.to_string())
}

fn string_field(fields: &Map<String, Value>, name: &str) -> Option<String> {
    match fields.get(name) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

/// Text delta of a payload; scalars are rendered, containers and null ignored
fn message_field(fields: &Map<String, Value>) -> Option<String> {
    match fields.get("message")? {
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => string_field(fields, "message"),
    }
}

pub fn parse_record(record: &str) -> Vec<StreamFrame> {
    payload_lines(record).map(parse_line).collect()
}
