//! Exit monitor for a PTY-attached agent process.

use std::time::Duration;

use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::pty::PtyEvent;

/// How long to wait for the reader to flush trailing output after exit.
pub const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Tokens connecting one session's exit monitor to the rest of the runtime.
#[derive(Debug, Clone)]
pub struct ExitSignals {
    /// Cancel to kill the process immediately.
    pub kill: CancellationToken,
    /// Cancelled by the dispatcher once the session has been unregistered.
    pub exited: CancellationToken,
    /// Cancelled by the reader when it stops.
    pub drained: CancellationToken,
}

impl ExitSignals {
    /// Fresh, uncancelled tokens.
    #[must_use]
    pub fn new() -> Self {
        Self {
            kill: CancellationToken::new(),
            exited: CancellationToken::new(),
            drained: CancellationToken::new(),
        }
    }
}

impl Default for ExitSignals {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn a background task that awaits child exit and reports
/// [`PtyEvent::Exited`].
///
/// Cancelling `signals.kill` kills the child first. Either way the task
/// waits up to [`DRAIN_TIMEOUT`] for the reader before reporting, so output
/// written just before exit is dispatched ahead of the exit itself.
#[must_use]
pub fn monitor_exit(
    session_id: String,
    mut child: Child,
    event_tx: mpsc::Sender<PtyEvent>,
    signals: ExitSignals,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let result = tokio::select! {
            result = child.wait() => result,
            () = signals.kill.cancelled() => {
                info!(session_id, "killing agent process");
                if let Err(err) = child.kill().await {
                    warn!(session_id, %err, "failed to kill agent process");
                }
                child.wait().await
            }
        };

        let (exit_code, reason) = match result {
            Ok(status) => {
                let code = status.code();
                let reason = code.map_or_else(
                    || "process terminated by signal".to_owned(),
                    |c| format!("process exited with code {c}"),
                );
                (code, reason)
            }
            Err(err) => {
                warn!(session_id, %err, "error waiting for agent child process");
                (None, format!("wait error: {err}"))
            }
        };

        if tokio::time::timeout(DRAIN_TIMEOUT, signals.drained.cancelled())
            .await
            .is_err()
        {
            debug!(session_id, "pty reader still open after exit; reporting anyway");
        }

        let event = PtyEvent::Exited {
            session_id: session_id.clone(),
            exit_code,
            reason,
            exited: signals.exited.clone(),
        };

        if event_tx.send(event).await.is_err() {
            warn!(
                session_id,
                "dispatcher closed before exit could be delivered"
            );
            signals.exited.cancel();
        }
    })
}
