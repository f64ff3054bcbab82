//! Per-spawn options layered over the agent configuration.

use std::path::PathBuf;

use crate::config::{OutputFormat, PermissionMode};

/// Options for a single [`spawn`](crate::orchestrator::spawner::ProcessSpawner::spawn).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpawnOptions {
    /// Task text written to the agent after the settle delay.
    pub task: String,
    /// Resume a previous agent conversation; excludes `continue_last`.
    pub resume_session_id: Option<String>,
    /// Continue the most recent agent conversation; excludes `resume_session_id`.
    pub continue_last: bool,
    /// Overrides the configured permission mode.
    pub permission_mode: Option<PermissionMode>,
    /// Overrides the configured model.
    pub model: Option<String>,
    /// Requests a specific CLI output format.
    pub output_format: Option<OutputFormat>,
    /// Working directory; honoured only when continuing.
    pub working_dir: Option<PathBuf>,
    /// Enable the experimental agent-teams feature for this session.
    pub team_mode: bool,
}

impl SpawnOptions {
    /// Options for a fresh session running `task`.
    #[must_use]
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            ..Self::default()
        }
    }

    /// Whether the agent picks up an existing conversation instead of a new task.
    #[must_use]
    pub fn is_resuming(&self) -> bool {
        self.resume_session_id.is_some() || self.continue_last
    }
}
