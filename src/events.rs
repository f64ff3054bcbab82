//! Events published to the host on the runtime's broadcast channel.

use serde::Serialize;

use crate::models::output::ParsedOutput;
use crate::models::session::SessionState;

/// Lifecycle and output notifications for one session.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum SessionEvent {
    /// Process launched inside its PTY.
    Started {
        /// New session.
        session_id: String,
        /// OS process identifier, if reported.
        pid: Option<u32>,
    },
    /// Raw terminal output.
    Output {
        /// Session that produced the output.
        session_id: String,
        /// Output chunk.
        data: String,
    },
    /// Non-fatal failure on a session's I/O path.
    Error {
        /// Affected session.
        session_id: String,
        /// Error description.
        error: String,
    },
    /// Classifier saw a terminal result.
    Completed {
        /// Session that completed.
        session_id: String,
        /// Result text, when non-empty.
        result: Option<String>,
    },
    /// Session reached its terminal state and left the registry.
    Stopped {
        /// Stopped session.
        session_id: String,
        /// Process exit code, when known.
        exit_code: Option<i32>,
        /// Why the session stopped.
        reason: String,
        /// Final state; always [`SessionState::Stopped`].
        state: SessionState,
    },
    /// Classified view of an [`Output`](Self::Output) chunk.
    ParsedOutput {
        /// Session that produced the output.
        session_id: String,
        /// Classification result.
        output: ParsedOutput,
    },
}

impl SessionEvent {
    /// Session the event belongs to.
    #[must_use]
    pub fn session_id(&self) -> &str {
        match self {
            Self::Started { session_id, .. }
            | Self::Output { session_id, .. }
            | Self::Error { session_id, .. }
            | Self::Completed { session_id, .. }
            | Self::Stopped { session_id, .. }
            | Self::ParsedOutput { session_id, .. } => session_id,
        }
    }

    /// Wire name of the event, as used in the serialized `event` tag.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Started { .. } => "started",
            Self::Output { .. } => "output",
            Self::Error { .. } => "error",
            Self::Completed { .. } => "completed",
            Self::Stopped { .. } => "stopped",
            Self::ParsedOutput { .. } => "parsed-output",
        }
    }
}
