//! Runtime facade: validation, lifecycle delegation, probing, and teardown.

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::process::Command;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::communicator::Communicator;
use crate::config::{AgentConfig, Config, RuntimeSettings};
use crate::events::SessionEvent;
use crate::models::availability::Availability;
use crate::models::output::ParsedOutput;
use crate::models::session::Session;
use crate::models::spawn::SpawnOptions;
use crate::orchestrator::spawner::ProcessSpawner;
use crate::{AppError, Result};

/// Severity passed to the host logger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Diagnostic detail.
    Debug,
    /// Normal lifecycle progress.
    Info,
    /// Recoverable problem.
    Warn,
    /// Failed operation.
    Error,
}

/// Host logging function: `(level, message, metadata)`.
pub type LogFn = Arc<dyn Fn(LogLevel, &str, &Value) + Send + Sync>;

/// Host callback receiving every session event.
pub type EventFn = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

/// Optional host collaborators.
#[derive(Clone, Default)]
pub struct RuntimeHooks {
    /// Mirror of the runtime's lifecycle log lines.
    pub logger: Option<LogFn>,
    /// Raw event callback.
    pub on_event: Option<EventFn>,
}

impl fmt::Debug for RuntimeHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeHooks")
            .field("logger", &self.logger.is_some())
            .field("on_event", &self.on_event.is_some())
            .finish()
    }
}

/// Single entry point owning one spawner and one communicator.
#[derive(Debug)]
pub struct Runtime {
    agent_id: String,
    spawner: ProcessSpawner,
    communicator: Communicator,
    hooks: RuntimeHooks,
    initialized: AtomicBool,
    forwarder_cancel: CancellationToken,
}

impl Runtime {
    /// Validate `agent` and build a runtime without host hooks.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the agent id or workspace is empty, the
    /// runtime discriminator is wrong, or `settings` are invalid.
    pub fn new(agent: AgentConfig, settings: RuntimeSettings) -> Result<Self> {
        Self::with_hooks(agent, settings, RuntimeHooks::default())
    }

    /// Build a runtime from a loaded [`Config`].
    ///
    /// # Errors
    ///
    /// As [`new`](Self::new).
    pub fn from_config(config: Config) -> Result<Self> {
        Self::new(config.agent, config.runtime)
    }

    /// Validate `agent` and build a runtime reporting to `hooks`.
    ///
    /// # Errors
    ///
    /// As [`new`](Self::new).
    pub fn with_hooks(
        agent: AgentConfig,
        settings: RuntimeSettings,
        hooks: RuntimeHooks,
    ) -> Result<Self> {
        agent.validate()?;
        let agent_id = agent.id.clone();
        let spawner = ProcessSpawner::new(agent, settings)?;
        let communicator = Communicator::new(spawner.clone());
        let forwarder_cancel = CancellationToken::new();

        if let Some(on_event) = hooks.on_event.clone() {
            tokio::spawn(forward_events(
                spawner.subscribe(),
                on_event,
                forwarder_cancel.clone(),
            ));
        }

        let runtime = Self {
            agent_id,
            spawner,
            communicator,
            hooks,
            initialized: AtomicBool::new(true),
            forwarder_cancel,
        };
        runtime.log(LogLevel::Info, "runtime initialized", &Value::Null);
        Ok(runtime)
    }

    /// Whether [`shutdown`](Self::shutdown) has not yet run.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Agent this runtime manages.
    #[must_use]
    pub fn agent(&self) -> &AgentConfig {
        self.spawner.agent()
    }

    /// Subscribe to session events published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.spawner.subscribe()
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Spawn a new session.
    ///
    /// # Errors
    ///
    /// `AppError::NotInitialized` after shutdown; otherwise any error from
    /// [`ProcessSpawner::spawn`].
    pub async fn start_session(&self, options: SpawnOptions) -> Result<Session> {
        self.ensure_initialized()?;
        self.log(
            LogLevel::Info,
            "starting session",
            &json!({
                "resume": options.resume_session_id,
                "continue": options.continue_last,
            }),
        );
        let session = self
            .spawner
            .spawn(options)
            .await
            .map_err(|err| self.failed("failed to start session", None, err))?;
        self.log(
            LogLevel::Info,
            "session started",
            &json!({ "session_id": session.id, "pid": session.pid }),
        );
        Ok(session)
    }

    /// Resume a previous agent conversation by its id.
    ///
    /// # Errors
    ///
    /// As [`start_session`](Self::start_session).
    pub async fn resume_session(&self, resume_session_id: &str) -> Result<Session> {
        self.start_session(SpawnOptions {
            resume_session_id: Some(resume_session_id.to_owned()),
            ..SpawnOptions::default()
        })
        .await
    }

    /// Continue the most recent agent conversation, optionally in `working_dir`.
    ///
    /// # Errors
    ///
    /// As [`start_session`](Self::start_session).
    pub async fn continue_last_session(&self, working_dir: Option<PathBuf>) -> Result<Session> {
        self.start_session(SpawnOptions {
            continue_last: true,
            working_dir,
            ..SpawnOptions::default()
        })
        .await
    }

    /// Stop a session; unknown sessions are a no-op.
    ///
    /// # Errors
    ///
    /// `AppError::NotInitialized` after shutdown.
    pub async fn stop_session(&self, session_id: &str, force: bool) -> Result<()> {
        self.ensure_initialized()?;
        self.log(
            LogLevel::Info,
            "stopping session",
            &json!({ "session_id": session_id, "force": force }),
        );
        self.spawner
            .stop(session_id, force)
            .await
            .map_err(|err| self.failed("failed to stop session", Some(session_id), err))
    }

    /// Force-stop a session and start a fresh one with the same task.
    ///
    /// # Errors
    ///
    /// `AppError::NotInitialized` after shutdown; otherwise any error from
    /// [`ProcessSpawner::restart`].
    pub async fn restart_session(&self, session_id: &str) -> Result<Session> {
        self.ensure_initialized()?;
        self.log(
            LogLevel::Info,
            "restarting session",
            &json!({ "session_id": session_id }),
        );
        self.spawner
            .restart(session_id)
            .await
            .map_err(|err| self.failed("failed to restart session", Some(session_id), err))
    }

    // ── Communication ────────────────────────────────────────────────────────

    /// Send a message line to a session.
    ///
    /// # Errors
    ///
    /// `AppError::NotInitialized`, `AppError::NotFound`, or `AppError::Io`.
    pub async fn send_message(&self, session_id: &str, message: &str) -> Result<()> {
        self.ensure_initialized()?;
        self.communicator.send_message(session_id, message).await
    }

    /// Send a command line to a session.
    ///
    /// # Errors
    ///
    /// `AppError::NotInitialized`, `AppError::NotFound`, or `AppError::Io`.
    pub async fn send_command(&self, session_id: &str, command: &str) -> Result<()> {
        self.ensure_initialized()?;
        self.communicator.send_command(session_id, command).await
    }

    /// Answer a prompt raised by a session.
    ///
    /// # Errors
    ///
    /// `AppError::NotInitialized`, `AppError::NotFound`, or `AppError::Io`.
    pub async fn respond_to_prompt(&self, session_id: &str, response: &str) -> Result<()> {
        self.ensure_initialized()?;
        self.communicator.respond_to_prompt(session_id, response).await
    }

    /// Send the interrupt control byte to a session.
    ///
    /// # Errors
    ///
    /// `AppError::NotInitialized`, `AppError::NotFound`, or `AppError::Io`.
    pub async fn interrupt_session(&self, session_id: &str) -> Result<()> {
        self.ensure_initialized()?;
        self.communicator.interrupt(session_id).await
    }

    /// Wait for the session's next terminal output.
    ///
    /// # Errors
    ///
    /// `AppError::NotInitialized`, or any error from
    /// [`Communicator::wait_for_completion`].
    pub async fn wait_for_completion(
        &self,
        session_id: &str,
        timeout: Duration,
    ) -> Result<ParsedOutput> {
        self.ensure_initialized()?;
        self.communicator
            .wait_for_completion(session_id, timeout)
            .await
    }

    /// [`wait_for_completion`](Self::wait_for_completion) that also ends when
    /// `cancel` fires.
    ///
    /// # Errors
    ///
    /// As [`wait_for_completion`](Self::wait_for_completion), plus
    /// `AppError::Cancelled`.
    pub async fn wait_for_completion_with_cancel(
        &self,
        session_id: &str,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<ParsedOutput> {
        self.ensure_initialized()?;
        self.communicator
            .wait_for_completion_with_cancel(session_id, timeout, cancel)
            .await
    }

    /// Register the session's output handler, replacing any existing one.
    ///
    /// # Errors
    ///
    /// `AppError::NotInitialized` after shutdown, or `AppError::NotFound` if
    /// the session is not registered.
    pub async fn on_output<F>(&self, session_id: &str, handler: F) -> Result<()>
    where
        F: Fn(&ParsedOutput) + Send + Sync + 'static,
    {
        self.ensure_initialized()?;
        self.communicator.on_output(session_id, handler);
        // Checked after registering so a concurrent stop cannot leave it behind.
        if self.spawner.get_session(session_id).await.is_none() {
            self.communicator.off_output(session_id);
            return Err(AppError::NotFound(format!("session '{session_id}'")));
        }
        Ok(())
    }

    /// Remove the session's output handler.
    pub fn off_output(&self, session_id: &str) {
        self.communicator.off_output(session_id);
    }

    /// Resize a session's terminal.
    ///
    /// # Errors
    ///
    /// `AppError::NotInitialized`, `AppError::NotFound`, or `AppError::Io`.
    pub async fn resize_session(&self, session_id: &str, rows: u16, cols: u16) -> Result<()> {
        self.ensure_initialized()?;
        self.spawner.resize(session_id, rows, cols).await
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    /// Snapshot of one session.
    pub async fn get_session(&self, session_id: &str) -> Option<Session> {
        self.spawner.get_session(session_id).await
    }

    /// Snapshots of all sessions, oldest first.
    pub async fn get_all_sessions(&self) -> Vec<Session> {
        self.spawner.get_all_sessions().await
    }

    /// Recent raw output of one session, oldest first.
    ///
    /// # Errors
    ///
    /// `AppError::NotFound` for an unknown session.
    pub async fn recent_output(&self, session_id: &str) -> Result<Vec<String>> {
        self.spawner.recent_output(session_id).await
    }

    /// Run `<binary> --version` within the configured budget.
    ///
    /// Never fails; problems are reported in [`Availability::error`].
    pub async fn check_availability(&self) -> Availability {
        let binary = &self.agent().binary_path;
        let budget = self.spawner.settings().availability_timeout();
        let availability = probe_version(binary, budget).await;
        let level = if availability.available {
            LogLevel::Debug
        } else {
            LogLevel::Warn
        };
        self.log(
            level,
            "availability probe finished",
            &json!({
                "binary": binary.display().to_string(),
                "available": availability.available,
                "version": availability.version,
                "error": availability.error,
            }),
        );
        availability
    }

    /// Stop every session, drop handlers, and mark the runtime unusable.
    ///
    /// Idempotent; later lifecycle calls fail with `AppError::NotInitialized`.
    pub async fn shutdown(&self) {
        if !self.initialized.swap(false, Ordering::AcqRel) {
            debug!(agent_id = self.agent_id, "runtime already shut down");
            return;
        }
        self.log(LogLevel::Info, "shutting down runtime", &Value::Null);
        self.spawner.cleanup().await;
        self.communicator.close();
        self.forwarder_cancel.cancel();
        self.log(LogLevel::Info, "runtime shut down", &Value::Null);
    }

    // ── Helpers ──────────────────────────────────────────────────────────────

    fn ensure_initialized(&self) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(AppError::NotInitialized(format!(
                "runtime for agent '{}' has been shut down",
                self.agent_id
            )))
        }
    }

    fn failed(&self, message: &str, session_id: Option<&str>, err: AppError) -> AppError {
        self.log(
            LogLevel::Error,
            message,
            &json!({ "session_id": session_id, "error": err.to_string() }),
        );
        err
    }

    fn log(&self, level: LogLevel, message: &str, metadata: &Value) {
        let agent_id = self.agent_id.as_str();
        match level {
            LogLevel::Debug => debug!(agent_id, %metadata, "{message}"),
            LogLevel::Info => info!(agent_id, %metadata, "{message}"),
            LogLevel::Warn => warn!(agent_id, %metadata, "{message}"),
            LogLevel::Error => error!(agent_id, %metadata, "{message}"),
        }
        if let Some(logger) = &self.hooks.logger {
            logger(level, message, metadata);
        }
    }
}

/// Deliver every event to the host callback until cancelled.
async fn forward_events(
    mut events: broadcast::Receiver<SessionEvent>,
    on_event: EventFn,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => break,
            recv = events.recv() => match recv {
                Ok(event) => on_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event forwarder fell behind");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
}

/// Run `binary --version`, killing it if it outlives `budget`.
async fn probe_version(binary: &std::path::Path, budget: Duration) -> Availability {
    let mut cmd = Command::new(binary);
    cmd.arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = match tokio::time::timeout(budget, cmd.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(err)) => {
            return Availability::unavailable(format!(
                "failed to run {}: {err}",
                binary.display()
            ));
        }
        Err(_elapsed) => {
            return Availability::unavailable(format!(
                "{} --version did not finish within {}ms",
                binary.display(),
                budget.as_millis()
            ));
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    let first_line = |text: &str| {
        text.lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_owned)
    };

    if output.status.success() {
        Availability::available(first_line(&stdout).unwrap_or_default())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let detail = first_line(&stderr).unwrap_or_else(|| output.status.to_string());
        Availability::unavailable(format!("{} --version failed: {detail}", binary.display()))
    }
}
