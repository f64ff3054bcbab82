//! Agent configuration, runtime tuning, and TOML loading.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{AppError, Result};

/// Runtime discriminator every [`AgentConfig`] must declare.
pub const DESIGNATED_RUNTIME: &str = "claude-code";

/// Default location of the agent CLI binary.
pub const DEFAULT_BINARY_PATH: &str = "/usr/local/bin/claude";

/// Permission mode passed to the agent CLI via `--permission-mode`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    /// Prompt for every privileged action.
    #[default]
    Default,
    /// Auto-accept file edits.
    AcceptEdits,
    /// Skip all permission prompts.
    BypassPermissions,
    /// Planning only; no edits.
    Plan,
}

impl PermissionMode {
    /// Command-line spelling of the mode.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::AcceptEdits => "acceptEdits",
            Self::BypassPermissions => "bypassPermissions",
            Self::Plan => "plan",
        }
    }
}

/// Output format passed to the agent CLI via `--output-format`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    /// Plain terminal text.
    Text,
    /// One JSON document at the end of the run.
    Json,
    /// Newline-delimited JSON records.
    StreamJson,
}

impl OutputFormat {
    /// Command-line spelling of the format.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Json => "json",
            Self::StreamJson => "stream-json",
        }
    }
}

/// Output classification strategy selected at construction.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ParserKind {
    /// Substring and pattern matching over accumulated terminal text.
    #[default]
    Heuristic,
    /// One JSON record per chunk, tagged by a `type` field.
    Structured,
}

/// Host-owned description of one class of agent sessions.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AgentConfig {
    /// Agent identifier; prefixes every generated session id.
    pub id: String,
    /// Human-readable agent name.
    #[serde(default)]
    pub name: String,
    /// Workspace directory sessions start in.
    pub workspace: PathBuf,
    /// Agent CLI binary.
    #[serde(default = "default_binary_path")]
    pub binary_path: PathBuf,
    /// Permission mode used when spawn options do not override it.
    #[serde(default)]
    pub permission_mode: PermissionMode,
    /// Model selector used when spawn options do not override it.
    #[serde(default)]
    pub model: Option<String>,
    /// Environment overrides layered over the inherited environment.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Enable the experimental agent-teams feature for every session.
    #[serde(default)]
    pub team_mode: bool,
    /// Runtime discriminator; must equal [`DESIGNATED_RUNTIME`].
    pub runtime: String,
}

fn default_binary_path() -> PathBuf {
    PathBuf::from(DEFAULT_BINARY_PATH)
}

impl AgentConfig {
    /// Build a configuration with defaults for everything but the identity.
    #[must_use]
    pub fn new(id: impl Into<String>, workspace: impl Into<PathBuf>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            workspace: workspace.into(),
            binary_path: default_binary_path(),
            permission_mode: PermissionMode::default(),
            model: None,
            env: HashMap::new(),
            team_mode: false,
            runtime: DESIGNATED_RUNTIME.to_owned(),
        }
    }

    /// Check the invariants every runtime relies on.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` when the id or workspace is empty, or the
    /// runtime discriminator is not [`DESIGNATED_RUNTIME`].
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(AppError::Config("agent id must not be empty".into()));
        }
        if self.workspace.as_os_str().is_empty() {
            return Err(AppError::Config("agent workspace must not be empty".into()));
        }
        if self.runtime != DESIGNATED_RUNTIME {
            return Err(AppError::Config(format!(
                "unsupported runtime '{}', expected '{DESIGNATED_RUNTIME}'",
                self.runtime
            )));
        }
        Ok(())
    }
}

/// Timing and capacity knobs for the spawner and communicator.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RuntimeSettings {
    /// Delay between spawn and writing the initial task.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// Window between the interrupt byte and forced termination.
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
    /// Number of raw output chunks retained per session.
    #[serde(default = "default_output_buffer_capacity")]
    pub output_buffer_capacity: usize,
    /// Budget for the `--version` availability probe.
    #[serde(default = "default_availability_timeout_ms")]
    pub availability_timeout_ms: u64,
    /// Initial PTY height.
    #[serde(default = "default_pty_rows")]
    pub pty_rows: u16,
    /// Initial PTY width.
    #[serde(default = "default_pty_cols")]
    pub pty_cols: u16,
    /// Output classification strategy.
    #[serde(default)]
    pub parser: ParserKind,
    /// Pattern whose first match moves a session from `starting` to `running`.
    #[serde(default = "default_ready_pattern")]
    pub ready_pattern: String,
    /// Capacity of the broadcast channel carrying session events.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_settle_delay_ms() -> u64 {
    500
}

fn default_grace_period_ms() -> u64 {
    5000
}

fn default_output_buffer_capacity() -> usize {
    100
}

fn default_availability_timeout_ms() -> u64 {
    5000
}

fn default_pty_rows() -> u16 {
    40
}

fn default_pty_cols() -> u16 {
    120
}

fn default_ready_pattern() -> String {
    r"\S".into()
}

fn default_event_capacity() -> usize {
    1024
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay_ms(),
            grace_period_ms: default_grace_period_ms(),
            output_buffer_capacity: default_output_buffer_capacity(),
            availability_timeout_ms: default_availability_timeout_ms(),
            pty_rows: default_pty_rows(),
            pty_cols: default_pty_cols(),
            parser: ParserKind::default(),
            ready_pattern: default_ready_pattern(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl RuntimeSettings {
    /// Settle delay as a [`Duration`].
    #[must_use]
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Grace window as a [`Duration`].
    #[must_use]
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    /// Availability probe budget as a [`Duration`].
    #[must_use]
    pub fn availability_timeout(&self) -> Duration {
        Duration::from_millis(self.availability_timeout_ms)
    }

    /// Reject settings that would make the runtime unusable.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` for zero capacities, a zero-sized PTY, or an
    /// invalid readiness pattern.
    pub fn validate(&self) -> Result<()> {
        if self.output_buffer_capacity == 0 {
            return Err(AppError::Config(
                "output_buffer_capacity must be greater than zero".into(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(AppError::Config(
                "event_capacity must be greater than zero".into(),
            ));
        }
        if self.pty_rows == 0 || self.pty_cols == 0 {
            return Err(AppError::Config("pty size must be non-zero".into()));
        }
        regex::Regex::new(&self.ready_pattern)
            .map_err(|err| AppError::Config(format!("invalid ready_pattern: {err}")))?;
        Ok(())
    }
}

/// Top-level configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// The agent whose sessions this runtime manages.
    pub agent: AgentConfig,
    /// Spawner and communicator tuning.
    #[serde(default)]
    pub runtime: RuntimeSettings,
}

impl Config {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse and validate configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.agent.validate()?;
        config.runtime.validate()?;
        Ok(config)
    }
}
