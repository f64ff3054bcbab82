//! Error types shared across the runtime.

use std::fmt::{Display, Formatter};

/// Shared runtime result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Runtime error enumeration covering all session failure modes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Agent configuration or spawn options failed validation.
    Config(String),
    /// Operation referenced a session id that is not registered.
    NotFound(String),
    /// Runtime was shut down; construct a new instance to continue.
    NotInitialized(String),
    /// A completion wait exceeded its time budget.
    Timeout(String),
    /// The agent binary could not be spawned, probed, or signalled.
    Process(String),
    /// A completion wait observed an error output from the agent.
    TaskFailed(String),
    /// A second completion wait was attempted on a session that already has one.
    Conflict(String),
    /// A completion wait was cancelled or its session ended first.
    Cancelled(String),
    /// PTY or file-system I/O failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::NotInitialized(msg) => write!(f, "not initialized: {msg}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::Process(msg) => write!(f, "process: {msg}"),
            Self::TaskFailed(msg) => write!(f, "task failed: {msg}"),
            Self::Conflict(msg) => write!(f, "conflict: {msg}"),
            Self::Cancelled(msg) => write!(f, "cancelled: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
