//! JSON-record classifier for agents running with a structured output format.

use serde_json::{Map, Value};

use crate::models::output::{OutputKind, ParsedOutput};
use crate::parser::OutputParser;

/// Fields searched, in order, for the human-readable text of a record.
const TEXT_FIELDS: &[&str] = &["result", "content", "message", "text"];

/// Upper bound on an unterminated record kept between chunks.
const MAX_PENDING_BYTES: usize = 1024 * 1024;

/// Decodes newline-delimited JSON records tagged by their `type` field.
///
/// | `type`                   | Classification                         |
/// |--------------------------|----------------------------------------|
/// | `completion` / `result`  | `result`, complete (`error` if `is_error`) |
/// | `error`                  | `error`                                |
/// | *(anything else)*        | `status`                               |
///
/// PTY reads do not line up with records: one chunk may carry several
/// records and a record may span chunks. A trailing partial record is kept
/// until the rest arrives. When a chunk completes several records, the
/// first terminal one is reported, otherwise the last. Chunks that yield no
/// JSON object come back as `raw`, content unchanged.
#[derive(Debug, Default, Clone)]
pub struct StructuredParser {
    pending: String,
}

impl StructuredParser {
    /// Create a parser with no pending record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn decode_pending(&mut self) -> Vec<ParsedOutput> {
        let mut records = Vec::new();
        while let Some(end) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=end).collect();
            if let Some(record) = decode_record(line.trim()) {
                records.push(record);
            }
        }

        // A final record without its newline is accepted once it parses.
        let tail = self.pending.trim();
        if !tail.is_empty() {
            match serde_json::from_str::<Value>(tail) {
                Ok(Value::Object(record)) => {
                    records.push(classify(record));
                    self.pending.clear();
                }
                Err(err) if err.is_eof() && self.pending.len() <= MAX_PENDING_BYTES => {}
                _ => self.pending.clear(),
            }
        }
        records
    }
}

impl OutputParser for StructuredParser {
    fn parse(&mut self, chunk: &str) -> ParsedOutput {
        self.pending.push_str(chunk);
        let mut records = self.decode_pending();

        match records.iter().position(ParsedOutput::is_terminal) {
            Some(idx) => records.swap_remove(idx),
            None => records.pop().unwrap_or_else(|| ParsedOutput::raw(chunk)),
        }
    }
}

fn decode_record(line: &str) -> Option<ParsedOutput> {
    match serde_json::from_str::<Value>(line) {
        Ok(Value::Object(record)) => Some(classify(record)),
        _ => None,
    }
}

fn classify(record: Map<String, Value>) -> ParsedOutput {
    let tag = record.get("type").and_then(Value::as_str).unwrap_or_default();
    let failed = record
        .get("is_error")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let parsed = match tag {
        "completion" | "result" if !failed => ParsedOutput::completed(text_of(&record)),
        "completion" | "result" | "error" => ParsedOutput::new(OutputKind::Error, error_of(&record)),
        _ => ParsedOutput::new(OutputKind::Status, text_of(&record)),
    };

    parsed.with_data(Value::Object(record))
}

fn text_of(record: &Map<String, Value>) -> String {
    TEXT_FIELDS
        .iter()
        .find_map(|field| record.get(*field).and_then(Value::as_str))
        .map(str::to_owned)
        .unwrap_or_default()
}

fn error_of(record: &Map<String, Value>) -> String {
    match record.get("error") {
        Some(Value::String(message)) => message.clone(),
        Some(Value::Object(inner)) => inner
            .get("message")
            .and_then(Value::as_str)
            .map_or_else(|| text_of(record), str::to_owned),
        _ => text_of(record),
    }
}
