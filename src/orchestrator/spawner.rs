//! Agent process spawner and session registry.
//!
//! [`ProcessSpawner`] is the only component that creates or removes registry
//! entries. Every entry pairs a [`Session`] record with the write half of its
//! PTY and the [`ExitSignals`] shared with its reader and exit monitor.
//!
//! PTY callbacks (output, read errors, exits) from all sessions funnel through
//! one `mpsc` channel into a single dispatcher task, which applies them to the
//! registry in arrival order and republishes them as [`SessionEvent`]s.
//!
//! # Stop protocol
//!
//! - `force`: kill immediately, unregister, emit `stopped`.
//! - graceful: write [`INTERRUPT_BYTE`], then race the grace window against
//!   the session's exit token. Only a session still registered when the
//!   window elapses is killed; an early exit cancels the escalation.
//!
//! Natural exit performs the same terminal transition. Whichever path
//! removes the entry emits `stopped`; the other is a no-op.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use regex::Regex;
use tokio::io::AsyncWriteExt;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::{AgentConfig, RuntimeSettings};
use crate::events::SessionEvent;
use crate::models::session::{generate_session_id, Session, SessionState};
use crate::models::spawn::SpawnOptions;
use crate::pty::monitor::{monitor_exit, ExitSignals};
use crate::pty::reader::run_reader;
use crate::pty::{command, PtyEvent};
use crate::{AppError, Result};

/// Control byte a terminal sends for Ctrl-C.
pub const INTERRUPT_BYTE: u8 = 0x03;

/// Buffer between PTY tasks and the dispatcher.
const PTY_EVENT_CAPACITY: usize = 256;

struct SessionEntry {
    session: Session,
    writer: Arc<Mutex<pty_process::OwnedWritePty>>,
    signals: ExitSignals,
}

type Registry = Arc<Mutex<HashMap<String, SessionEntry>>>;

struct SpawnerInner {
    agent: AgentConfig,
    settings: RuntimeSettings,
    registry: Registry,
    events: broadcast::Sender<SessionEvent>,
    pty_tx: mpsc::Sender<PtyEvent>,
}

/// Owns the mapping from session id to PTY process and [`Session`] record.
///
/// Cheap to clone; clones share one registry.
#[derive(Clone)]
pub struct ProcessSpawner {
    inner: Arc<SpawnerInner>,
}

impl fmt::Debug for ProcessSpawner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessSpawner")
            .field("agent_id", &self.inner.agent.id)
            .finish_non_exhaustive()
    }
}

impl ProcessSpawner {
    /// Create a spawner for `agent` and start its dispatcher task.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `agent` or `settings` fail validation.
    pub fn new(agent: AgentConfig, settings: RuntimeSettings) -> Result<Self> {
        agent.validate()?;
        settings.validate()?;
        let ready = Regex::new(&settings.ready_pattern)
            .map_err(|err| AppError::Config(format!("invalid ready_pattern: {err}")))?;

        let (events, _) = broadcast::channel(settings.event_capacity);
        let (pty_tx, pty_rx) = mpsc::channel(PTY_EVENT_CAPACITY);
        let registry = Registry::default();

        tokio::spawn(
            dispatch_pty_events(Arc::clone(&registry), events.clone(), ready, pty_rx)
                .instrument(info_span!("pty_dispatcher", agent_id = %agent.id)),
        );

        Ok(Self {
            inner: Arc::new(SpawnerInner {
                agent,
                settings,
                registry,
                events,
                pty_tx,
            }),
        })
    }

    /// Agent configuration sessions are spawned from.
    #[must_use]
    pub fn agent(&self) -> &AgentConfig {
        &self.inner.agent
    }

    /// Timing and capacity settings.
    #[must_use]
    pub fn settings(&self) -> &RuntimeSettings {
        &self.inner.settings
    }

    /// Subscribe to session events published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Publish an event on the shared channel.
    pub(crate) fn publish(&self, event: SessionEvent) {
        publish(&self.inner.events, event);
    }

    /// Launch the agent in a fresh PTY and register the session.
    ///
    /// Unless resuming or continuing, waits the settle delay and then writes
    /// the task followed by a newline.
    ///
    /// # Errors
    ///
    /// - `AppError::Config` if both resume and continue are requested.
    /// - `AppError::Process` if the PTY or process cannot be started, or the
    ///   process exits before the task is written.
    /// - `AppError::Io` if writing the task fails.
    pub async fn spawn(&self, options: SpawnOptions) -> Result<Session> {
        let inner = &self.inner;
        let plan = command::plan_launch(&inner.agent, &options)?;
        let (pty, child) =
            command::spawn_in_pty(&plan, inner.settings.pty_rows, inner.settings.pty_cols)?;
        let pid = child.id();
        let (read_half, write_half) = pty.into_split();
        let signals = ExitSignals::new();

        let session = {
            let mut registry = inner.registry.lock().await;
            let mut session = Session::new(
                &inner.agent.id,
                pid,
                plan.working_dir.clone(),
                options.task.clone(),
                inner.settings.output_buffer_capacity,
            );
            while registry.contains_key(&session.id) {
                session.id = generate_session_id(&inner.agent.id);
            }
            registry.insert(
                session.id.clone(),
                SessionEntry {
                    session: session.clone(),
                    writer: Arc::new(Mutex::new(write_half)),
                    signals: signals.clone(),
                },
            );
            session
        };

        info!(
            session_id = session.id,
            pid = pid.unwrap_or(0),
            binary = %plan.program.display(),
            cwd = %plan.working_dir.display(),
            "agent session spawned"
        );
        self.publish(SessionEvent::Started {
            session_id: session.id.clone(),
            pid,
        });

        tokio::spawn(run_reader(
            session.id.clone(),
            read_half,
            inner.pty_tx.clone(),
            signals.exited.clone(),
            signals.drained.clone(),
        ));
        // Detached; the monitor reports through `pty_tx`.
        let _monitor = monitor_exit(session.id.clone(), child, inner.pty_tx.clone(), signals);

        if !options.is_resuming() && !options.task.is_empty() {
            tokio::time::sleep(inner.settings.settle_delay()).await;
            let line = format!("{}\n", options.task.trim_end_matches(['\r', '\n']));
            if let Err(err) = self.write(&session.id, &line).await {
                warn!(session_id = session.id, %err, "failed to write initial task");
                // The caller never receives this id.
                if let Err(stop_err) = self.stop(&session.id, true).await {
                    warn!(session_id = session.id, %stop_err, "failed to stop unwritten session");
                }
                return Err(match err {
                    AppError::NotFound(_) => AppError::Process(format!(
                        "session '{}' exited before its task was written",
                        session.id
                    )),
                    other => other,
                });
            }
            debug!(session_id = session.id, "initial task written");
        }

        Ok(self.get_session(&session.id).await.unwrap_or(session))
    }

    /// Write `text` verbatim to the session's terminal.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the session is not registered, or
    /// `AppError::Io` if the write fails.
    pub async fn write(&self, session_id: &str, text: &str) -> Result<()> {
        self.write_bytes(session_id, text.as_bytes()).await
    }

    /// Write raw bytes to the session's terminal and refresh its activity.
    ///
    /// Input to an idle or errored session moves it back to running.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the session is not registered, or
    /// `AppError::Io` if the write fails.
    pub async fn write_bytes(&self, session_id: &str, bytes: &[u8]) -> Result<()> {
        let writer = {
            let mut registry = self.inner.registry.lock().await;
            let entry = registry
                .get_mut(session_id)
                .ok_or_else(|| AppError::NotFound(format!("session '{session_id}'")))?;
            entry.session.touch();
            if matches!(entry.session.state, SessionState::Idle | SessionState::Error) {
                entry.session.transition(SessionState::Running, None);
            }
            Arc::clone(&entry.writer)
        };

        let mut writer = writer.lock().await;
        writer
            .write_all(bytes)
            .await
            .map_err(|err| AppError::Io(format!("write to session '{session_id}' failed: {err}")))?;
        writer
            .flush()
            .await
            .map_err(|err| AppError::Io(format!("flush of session '{session_id}' failed: {err}")))
    }

    /// Stop a session; a session that is not registered is a no-op.
    ///
    /// # Errors
    ///
    /// None at present: interrupt delivery failures are logged and the stop
    /// proceeds to the grace window.
    pub async fn stop(&self, session_id: &str, force: bool) -> Result<()> {
        let signals = {
            let registry = self.inner.registry.lock().await;
            registry.get(session_id).map(|entry| entry.signals.clone())
        };
        let Some(signals) = signals else {
            debug!(session_id, force, "stop: session not registered, nothing to do");
            return Ok(());
        };

        if force {
            signals.kill.cancel();
            self.finalize(session_id, None, "force stopped".to_owned())
                .await;
            return Ok(());
        }

        if let Err(err) = self.write_bytes(session_id, &[INTERRUPT_BYTE]).await {
            warn!(session_id, %err, "stop: failed to deliver interrupt");
        }

        let grace = self.inner.settings.grace_period();
        tokio::select! {
            () = signals.exited.cancelled() => {
                info!(session_id, "agent exited within grace window");
            }
            () = tokio::time::sleep(grace) => {
                if self.is_registered(session_id).await {
                    warn!(session_id, ?grace, "agent ignored interrupt, escalating to kill");
                    signals.kill.cancel();
                    self.finalize(
                        session_id,
                        None,
                        format!(
                            "no exit within {}ms of interrupt; killed",
                            grace.as_millis()
                        ),
                    )
                    .await;
                }
            }
        }

        Ok(())
    }

    /// Force-stop a session and spawn a fresh one with the same task.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the session is not registered, or any
    /// error from [`spawn`](Self::spawn).
    pub async fn restart(&self, session_id: &str) -> Result<Session> {
        let task = self
            .get_session(session_id)
            .await
            .map(|session| session.task)
            .ok_or_else(|| AppError::NotFound(format!("session '{session_id}'")))?;

        self.stop(session_id, true).await?;
        info!(session_id, "restarting agent session");
        self.spawn(SpawnOptions::new(task)).await
    }

    /// Snapshot of one registered session.
    pub async fn get_session(&self, session_id: &str) -> Option<Session> {
        let registry = self.inner.registry.lock().await;
        registry.get(session_id).map(|entry| entry.session.clone())
    }

    /// Snapshots of all registered sessions, oldest first.
    pub async fn get_all_sessions(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = {
            let registry = self.inner.registry.lock().await;
            registry.values().map(|entry| entry.session.clone()).collect()
        };
        sessions.sort_by(|a, b| a.started_at.cmp(&b.started_at).then(a.id.cmp(&b.id)));
        sessions
    }

    /// Recent raw output chunks, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the session is not registered.
    pub async fn recent_output(&self, session_id: &str) -> Result<Vec<String>> {
        let registry = self.inner.registry.lock().await;
        registry
            .get(session_id)
            .map(|entry| entry.session.output.to_vec())
            .ok_or_else(|| AppError::NotFound(format!("session '{session_id}'")))
    }

    /// Resize the session's terminal.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the session is not registered, or
    /// `AppError::Io` if the resize ioctl fails.
    pub async fn resize(&self, session_id: &str, rows: u16, cols: u16) -> Result<()> {
        let writer = {
            let registry = self.inner.registry.lock().await;
            registry
                .get(session_id)
                .map(|entry| Arc::clone(&entry.writer))
                .ok_or_else(|| AppError::NotFound(format!("session '{session_id}'")))?
        };
        let writer = writer.lock().await;
        writer
            .resize(pty_process::Size::new(rows, cols))
            .map_err(|err| AppError::Io(format!("resize of session '{session_id}' failed: {err}")))
    }

    /// Force-stop every registered session concurrently and wait for all.
    pub async fn cleanup(&self) {
        let ids: Vec<String> = {
            let registry = self.inner.registry.lock().await;
            registry.keys().cloned().collect()
        };
        info!(count = ids.len(), "stopping all agent sessions");

        let mut stops = JoinSet::new();
        for session_id in ids {
            let spawner = self.clone();
            stops.spawn(async move {
                let result = spawner.stop(&session_id, true).await;
                (session_id, result)
            });
        }

        while let Some(joined) = stops.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((session_id, Err(err))) => {
                    warn!(session_id, %err, "cleanup: failed to stop session");
                }
                Err(err) => warn!(%err, "cleanup: stop task panicked"),
            }
        }
    }

    /// Record a classifier-driven state change (`idle` or `error`).
    ///
    /// `stopped` is reserved for [`stop`](Self::stop) and process exit.
    pub(crate) async fn mark_state(
        &self,
        session_id: &str,
        next: SessionState,
        error: Option<String>,
    ) -> bool {
        if next == SessionState::Stopped {
            return false;
        }
        let mut registry = self.inner.registry.lock().await;
        registry
            .get_mut(session_id)
            .is_some_and(|entry| entry.session.transition(next, error))
    }

    async fn is_registered(&self, session_id: &str) -> bool {
        self.inner.registry.lock().await.contains_key(session_id)
    }

    async fn finalize(&self, session_id: &str, exit_code: Option<i32>, reason: String) -> bool {
        finalize(
            &self.inner.registry,
            &self.inner.events,
            session_id,
            exit_code,
            reason,
        )
        .await
    }
}

// ── Dispatcher ────────────────────────────────────────────────────────────────

/// Apply PTY callbacks to the registry in arrival order.
///
/// Runs until every sender (spawner and per-session tasks) is dropped.
async fn dispatch_pty_events(
    registry: Registry,
    events: broadcast::Sender<SessionEvent>,
    ready: Regex,
    mut pty_rx: mpsc::Receiver<PtyEvent>,
) {
    while let Some(event) = pty_rx.recv().await {
        match event {
            PtyEvent::Output { session_id, data } => {
                let known = {
                    let mut registry = registry.lock().await;
                    if let Some(entry) = registry.get_mut(&session_id) {
                        record_output(&mut entry.session, &data, &ready);
                        true
                    } else {
                        false
                    }
                };
                if known {
                    publish(&events, SessionEvent::Output { session_id, data });
                } else {
                    debug!(session_id, "dropping output for unregistered session");
                }
            }
            PtyEvent::ReadError { session_id, error } => {
                publish(&events, SessionEvent::Error { session_id, error });
            }
            PtyEvent::Exited {
                session_id,
                exit_code,
                reason,
                exited,
            } => {
                finalize(&registry, &events, &session_id, exit_code, reason).await;
                exited.cancel();
            }
        }
    }
    debug!("pty dispatcher: all senders closed, stopping");
}

fn record_output(session: &mut Session, data: &str, ready: &Regex) {
    session.output.push(data);
    session.touch();
    if session.state == SessionState::Starting && ready.is_match(data) {
        session.transition(SessionState::Running, None);
        debug!(session_id = session.id, "agent session is running");
    }
}

/// Unregister `session_id` and emit `stopped`; false if it was already gone.
async fn finalize(
    registry: &Registry,
    events: &broadcast::Sender<SessionEvent>,
    session_id: &str,
    exit_code: Option<i32>,
    reason: String,
) -> bool {
    let removed = registry.lock().await.remove(session_id);
    let Some(mut entry) = removed else {
        return false;
    };

    entry.session.transition(SessionState::Stopped, None);
    info!(session_id, ?exit_code, reason, "agent session stopped");
    publish(
        events,
        SessionEvent::Stopped {
            session_id: session_id.to_owned(),
            exit_code,
            reason,
            state: entry.session.state,
        },
    );
    true
}

fn publish(events: &broadcast::Sender<SessionEvent>, event: SessionEvent) {
    if events.send(event).is_err() {
        debug!("no session event subscribers");
    }
}
