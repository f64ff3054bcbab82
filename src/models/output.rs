//! Classified views of raw agent output.

use serde::Serialize;

/// Semantic category assigned to a piece of agent output.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    /// Progress or informational record.
    Status,
    /// Task result; terminal when `is_complete` is set.
    Result,
    /// Agent-reported failure.
    Error,
    /// Agent is asking for input.
    Prompt,
    /// Unclassified text.
    Raw,
}

/// Ephemeral classification result produced by an output parser.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct ParsedOutput {
    /// Classification.
    pub kind: OutputKind,
    /// Chunk or accumulated text; the extracted message for errors.
    pub content: String,
    /// Structured payload when the output decoded as a record.
    pub data: Option<serde_json::Value>,
    /// True only for a terminal result.
    pub is_complete: bool,
}

impl ParsedOutput {
    /// Unclassified text.
    #[must_use]
    pub fn raw(content: impl Into<String>) -> Self {
        Self::new(OutputKind::Raw, content)
    }

    /// Non-terminal record of the given kind.
    #[must_use]
    pub fn new(kind: OutputKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            data: None,
            is_complete: false,
        }
    }

    /// Terminal result.
    #[must_use]
    pub fn completed(content: impl Into<String>) -> Self {
        Self {
            kind: OutputKind::Result,
            content: content.into(),
            data: None,
            is_complete: true,
        }
    }

    /// Attach a structured payload.
    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Whether this output ends a completion wait.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.is_complete || self.kind == OutputKind::Error
    }
}
