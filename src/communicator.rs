//! Semantic layer over session byte streams.
//!
//! The [`Communicator`] subscribes to the spawner's events, runs every
//! `output` chunk through the session's [`OutputParser`], publishes the result
//! as `parsed-output`, and routes it to the session's output handler and
//! completion waiter. Outbound text is normalized to end in a newline before
//! it is written to the session's terminal.
//!
//! # Waiters
//!
//! At most one completion wait may be pending per session. A second
//! concurrent [`wait_for_completion`](Communicator::wait_for_completion) on
//! the same session fails fast with [`AppError::Conflict`] instead of
//! silently displacing the first.
//!
//! A terminal output that arrives while no wait is pending is held for the
//! session and handed to the next wait. Sending new input discards it.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument};

use crate::events::SessionEvent;
use crate::models::output::{OutputKind, ParsedOutput};
use crate::models::session::SessionState;
use crate::orchestrator::spawner::{ProcessSpawner, INTERRUPT_BYTE};
use crate::parser::{OutputParser, ParserFactory};
use crate::{AppError, Result};

/// Callback invoked with every classified output of one session.
pub type OutputHandler = Arc<dyn Fn(&ParsedOutput) + Send + Sync>;

struct Waiter {
    id: u64,
    tx: oneshot::Sender<ParsedOutput>,
}

#[derive(Default)]
struct Completions {
    waiters: HashMap<String, Waiter>,
    /// Terminal outputs no wait has taken yet.
    unclaimed: HashMap<String, ParsedOutput>,
}

struct CommInner {
    spawner: ProcessSpawner,
    factory: ParserFactory,
    parsers: Mutex<HashMap<String, Box<dyn OutputParser>>>,
    handlers: Mutex<HashMap<String, OutputHandler>>,
    completions: Mutex<Completions>,
    next_waiter: AtomicU64,
}

/// Classifies session output and implements request/response flows over it.
///
/// Cheap to clone; clones share handlers, waiters, and parsers.
#[derive(Clone)]
pub struct Communicator {
    inner: Arc<CommInner>,
    pump_cancel: CancellationToken,
}

impl fmt::Debug for Communicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Communicator")
            .field("spawner", &self.inner.spawner)
            .finish_non_exhaustive()
    }
}

impl Communicator {
    /// Create a communicator using the parser kind from the spawner's settings.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn new(spawner: ProcessSpawner) -> Self {
        let factory = spawner.settings().parser.factory();
        Self::with_parser_factory(spawner, factory)
    }

    /// Create a communicator that builds per-session parsers with `factory`.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn with_parser_factory(spawner: ProcessSpawner, factory: ParserFactory) -> Self {
        let events = spawner.subscribe();
        let inner = Arc::new(CommInner {
            spawner,
            factory,
            parsers: Mutex::default(),
            handlers: Mutex::default(),
            completions: Mutex::default(),
            next_waiter: AtomicU64::new(1),
        });
        let pump_cancel = CancellationToken::new();

        tokio::spawn(
            pump_events(Arc::downgrade(&inner), events, pump_cancel.clone())
                .instrument(info_span!("communicator")),
        );

        Self { inner, pump_cancel }
    }

    /// Classify one raw chunk for `session_id` and route the result.
    ///
    /// Called by the event pump for every `output` event; exposed so hosts
    /// and tests can replay captured output.
    pub async fn handle_output(&self, session_id: &str, data: &str) -> ParsedOutput {
        self.inner.handle_output(session_id, data).await
    }

    /// Write `message` to the session, adding a trailing newline if missing.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown session, or `AppError::Io`
    /// if the write fails.
    pub async fn send_message(&self, session_id: &str, message: &str) -> Result<()> {
        debug!(session_id, len = message.len(), "sending message");
        self.inner.discard_unclaimed(session_id);
        self.inner
            .spawner
            .write(session_id, &format_outbound(message))
            .await
    }

    /// Write `command` to the session, adding a trailing newline if missing.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown session, or `AppError::Io`
    /// if the write fails.
    pub async fn send_command(&self, session_id: &str, command: &str) -> Result<()> {
        debug!(session_id, command, "sending command");
        self.inner.discard_unclaimed(session_id);
        self.inner
            .spawner
            .write(session_id, &format_outbound(command))
            .await
    }

    /// Answer a `prompt` classification with `response`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown session, or `AppError::Io`
    /// if the write fails.
    pub async fn respond_to_prompt(&self, session_id: &str, response: &str) -> Result<()> {
        debug!(session_id, "responding to prompt");
        self.inner.discard_unclaimed(session_id);
        self.inner
            .spawner
            .write(session_id, &format_outbound(response))
            .await
    }

    /// Write the interrupt control byte to the session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown session, or `AppError::Io`
    /// if the write fails.
    pub async fn interrupt(&self, session_id: &str) -> Result<()> {
        debug!(session_id, "interrupting session");
        self.inner
            .spawner
            .write_bytes(session_id, &[INTERRUPT_BYTE])
            .await
    }

    /// Register the output handler for `session_id`, replacing any existing one.
    pub fn on_output<F>(&self, session_id: &str, handler: F)
    where
        F: Fn(&ParsedOutput) + Send + Sync + 'static,
    {
        let previous = lock(&self.inner.handlers).insert(session_id.to_owned(), Arc::new(handler));
        if previous.is_some() {
            debug!(session_id, "replaced existing output handler");
        }
    }

    /// Remove the output handler for `session_id`, if any.
    pub fn off_output(&self, session_id: &str) {
        lock(&self.inner.handlers).remove(session_id);
    }

    /// Wait for the session's next terminal output.
    ///
    /// Returns at once if one arrived since the last wait or input.
    ///
    /// # Errors
    ///
    /// - `AppError::TaskFailed` carrying the message of an `error` output.
    /// - `AppError::Timeout` if nothing terminal arrives within `timeout`.
    /// - `AppError::Conflict` if another wait is already pending on the session.
    /// - `AppError::Cancelled` if the session stops first.
    pub async fn wait_for_completion(
        &self,
        session_id: &str,
        timeout: Duration,
    ) -> Result<ParsedOutput> {
        self.wait_for_completion_with_cancel(session_id, timeout, CancellationToken::new())
            .await
    }

    /// [`wait_for_completion`](Self::wait_for_completion) that also ends when
    /// `cancel` fires.
    ///
    /// The waiter is deregistered on every exit path, including the returned
    /// future being dropped.
    ///
    /// # Errors
    ///
    /// As [`wait_for_completion`](Self::wait_for_completion), plus
    /// `AppError::Cancelled` when `cancel` fires.
    pub async fn wait_for_completion_with_cancel(
        &self,
        session_id: &str,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<ParsedOutput> {
        let (tx, rx) = oneshot::channel();
        let waiter_id = self.inner.next_waiter.fetch_add(1, Ordering::Relaxed);
        {
            let mut completions = lock(&self.inner.completions);
            if completions
                .waiters
                .get(session_id)
                .is_some_and(|existing| !existing.tx.is_closed())
            {
                return Err(AppError::Conflict(format!(
                    "a completion wait is already pending on session '{session_id}'"
                )));
            }
            if let Some(output) = completions.unclaimed.remove(session_id) {
                debug!(session_id, "taking completion that arrived before the wait");
                return completion_result(output);
            }
            completions
                .waiters
                .insert(session_id.to_owned(), Waiter { id: waiter_id, tx });
        }
        let _guard = WaiterGuard {
            inner: &self.inner,
            session_id,
            waiter_id,
        };

        tokio::select! {
            outcome = rx => match outcome {
                Ok(output) => completion_result(output),
                Err(_) => Err(AppError::Cancelled(format!(
                    "session '{session_id}' stopped before completing"
                ))),
            },
            () = tokio::time::sleep(timeout) => Err(AppError::Timeout(format!(
                "no completion from session '{session_id}' within {}ms",
                timeout.as_millis()
            ))),
            () = cancel.cancelled() => Err(AppError::Cancelled(format!(
                "wait on session '{session_id}' cancelled"
            ))),
        }
    }

    /// Drop all per-session state: parsers, handlers, pending waiters, and
    /// held completions. Pending waits end `Cancelled`.
    pub fn clear_handlers(&self) {
        lock(&self.inner.parsers).clear();
        lock(&self.inner.handlers).clear();
        let mut completions = lock(&self.inner.completions);
        completions.waiters.clear();
        completions.unclaimed.clear();
    }

    /// Number of sessions with a parser, handler, waiter, or held completion.
    #[must_use]
    pub fn tracked_session_count(&self) -> usize {
        let mut ids: HashSet<String> = lock(&self.inner.parsers).keys().cloned().collect();
        ids.extend(lock(&self.inner.handlers).keys().cloned());
        let completions = lock(&self.inner.completions);
        ids.extend(completions.waiters.keys().cloned());
        ids.extend(completions.unclaimed.keys().cloned());
        ids.len()
    }

    /// Stop consuming session events.
    pub fn close(&self) {
        self.clear_handlers();
        self.pump_cancel.cancel();
    }
}

impl CommInner {
    async fn handle_output(&self, session_id: &str, data: &str) -> ParsedOutput {
        let parsed = {
            let mut parsers = lock(&self.parsers);
            parsers
                .entry(session_id.to_owned())
                .or_insert_with(|| (self.factory)())
                .parse(data)
        };

        self.spawner.publish(SessionEvent::ParsedOutput {
            session_id: session_id.to_owned(),
            output: parsed.clone(),
        });

        if parsed.is_complete {
            self.spawner
                .mark_state(session_id, SessionState::Idle, None)
                .await;
            self.spawner.publish(SessionEvent::Completed {
                session_id: session_id.to_owned(),
                result: (!parsed.content.is_empty()).then(|| parsed.content.clone()),
            });
        } else if parsed.kind == OutputKind::Error {
            self.spawner
                .mark_state(session_id, SessionState::Error, Some(parsed.content.clone()))
                .await;
        }

        let handler = lock(&self.handlers).get(session_id).cloned();
        if let Some(handler) = handler {
            handler(&parsed);
        }

        if parsed.is_terminal() {
            let mut completions = lock(&self.completions);
            let undelivered = match completions.waiters.remove(session_id) {
                Some(waiter) => waiter.tx.send(parsed.clone()).err(),
                None => Some(parsed.clone()),
            };
            if let Some(output) = undelivered {
                debug!(session_id, "holding completion for the next wait");
                completions.unclaimed.insert(session_id.to_owned(), output);
            }
        }

        parsed
    }

    fn discard_unclaimed(&self, session_id: &str) {
        lock(&self.completions).unclaimed.remove(session_id);
    }

    /// Drop per-session state once the session has stopped.
    fn forget(&self, session_id: &str) {
        lock(&self.parsers).remove(session_id);
        lock(&self.handlers).remove(session_id);
        let mut completions = lock(&self.completions);
        completions.waiters.remove(session_id);
        completions.unclaimed.remove(session_id);
    }
}

/// Removes its waiter on drop unless a newer one has taken the slot.
struct WaiterGuard<'a> {
    inner: &'a CommInner,
    session_id: &'a str,
    waiter_id: u64,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        let mut completions = lock(&self.inner.completions);
        if completions
            .waiters
            .get(self.session_id)
            .is_some_and(|waiter| waiter.id == self.waiter_id)
        {
            completions.waiters.remove(self.session_id);
        }
    }
}

/// Consume session events until cancelled or the communicator is dropped.
async fn pump_events(
    inner: Weak<CommInner>,
    mut events: broadcast::Receiver<SessionEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;

            () = cancel.cancelled() => break,
            recv = events.recv() => match recv {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "communicator fell behind session events");
                    continue;
                }
                Err(RecvError::Closed) => break,
            },
        };

        let Some(inner) = inner.upgrade() else {
            break;
        };
        match event {
            SessionEvent::Output { session_id, data } => {
                inner.handle_output(&session_id, &data).await;
                // Output can trail the session's `stopped` event.
                if inner.spawner.get_session(&session_id).await.is_none() {
                    inner.forget(&session_id);
                }
            }
            SessionEvent::Stopped { session_id, .. } => inner.forget(&session_id),
            _ => {}
        }
    }
    debug!("communicator event pump stopped");
}

fn completion_result(output: ParsedOutput) -> Result<ParsedOutput> {
    if output.kind == OutputKind::Error {
        Err(AppError::TaskFailed(output.content))
    } else {
        Ok(output)
    }
}

/// Guarantee a trailing line terminator.
#[must_use]
pub fn format_outbound(text: &str) -> String {
    if text.ends_with('\n') {
        text.to_owned()
    } else {
        format!("{text}\n")
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
