//! Session model and lifecycle helpers.

use std::collections::VecDeque;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Lifecycle state for a managed agent process.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Process spawned; no readiness output seen yet.
    Starting,
    /// Process has produced output and is working.
    Running,
    /// Last classified output completed a task; waiting for input.
    Idle,
    /// Last classified output reported an error.
    Error,
    /// Process stopped; the session is no longer registered.
    Stopped,
}

/// Fixed-capacity ring of recent raw output chunks.
///
/// Pushing into a full ring drops the oldest chunk.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct OutputRing {
    #[serde(skip)]
    capacity: usize,
    chunks: VecDeque<String>,
}

impl OutputRing {
    /// Create an empty ring holding at most `capacity` chunks.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            chunks: VecDeque::with_capacity(capacity),
        }
    }

    /// Append a chunk, overwriting the oldest when full.
    pub fn push(&mut self, chunk: impl Into<String>) {
        if self.chunks.len() == self.capacity {
            self.chunks.pop_front();
        }
        self.chunks.push_back(chunk.into());
    }

    /// Maximum number of retained chunks.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of retained chunks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Whether no chunk has been retained yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Iterate retained chunks oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.chunks.iter().map(String::as_str)
    }

    /// Copy retained chunks oldest first.
    #[must_use]
    pub fn to_vec(&self) -> Vec<String> {
        self.chunks.iter().cloned().collect()
    }
}

/// Bookkeeping record for one spawned agent process.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Session {
    /// Unique session identifier.
    pub id: String,
    /// Agent the session was spawned for.
    pub agent_id: String,
    /// OS process identifier, when the OS reported one.
    pub pid: Option<u32>,
    /// Directory the process was started in.
    pub working_dir: PathBuf,
    /// Task text the session was started with.
    pub task: String,
    /// Spawn timestamp.
    pub started_at: DateTime<Utc>,
    /// Last input or output timestamp.
    pub last_activity: DateTime<Utc>,
    /// Current lifecycle state.
    pub state: SessionState,
    /// Recent raw output.
    pub output: OutputRing,
    /// Error detail; set only while `state` is [`SessionState::Error`].
    pub error: Option<String>,
}

impl Session {
    /// Construct a session in [`SessionState::Starting`] with a generated id.
    #[must_use]
    pub fn new(
        agent_id: &str,
        pid: Option<u32>,
        working_dir: PathBuf,
        task: String,
        buffer_capacity: usize,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: generate_session_id(agent_id),
            agent_id: agent_id.to_owned(),
            pid,
            working_dir,
            task,
            started_at: now,
            last_activity: now,
            state: SessionState::Starting,
            output: OutputRing::new(buffer_capacity),
            error: None,
        }
    }

    /// Determine whether a lifecycle transition is permitted.
    #[must_use]
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        matches!(
            (self.state, next),
            (SessionState::Starting, SessionState::Running)
                | (
                    SessionState::Running,
                    SessionState::Idle | SessionState::Error
                )
                | (
                    SessionState::Idle | SessionState::Error,
                    SessionState::Running
                )
                | (
                    SessionState::Starting
                        | SessionState::Running
                        | SessionState::Idle
                        | SessionState::Error,
                    SessionState::Stopped
                )
        )
    }

    /// Apply `next` if permitted, keeping `error` in step with the state.
    ///
    /// Returns whether the state changed.
    pub fn transition(&mut self, next: SessionState, error: Option<String>) -> bool {
        if !self.can_transition_to(next) {
            return false;
        }
        self.state = next;
        self.error = if next == SessionState::Error {
            error
        } else {
            None
        };
        true
    }

    /// Mark the session as active now.
    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }
}

/// Build `<agent>-<unix millis>-<8 hex chars>`.
#[must_use]
pub fn generate_session_id(agent_id: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "{agent_id}-{}-{}",
        Utc::now().timestamp_millis(),
        &suffix[..8]
    )
}
