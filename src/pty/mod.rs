//! Pseudo-terminal process plumbing.
//!
//! Each session owns one PTY pair and two background tasks:
//! - `reader`: drains the PTY master and forwards chunks as [`PtyEvent::Output`].
//! - `monitor`: awaits child exit (or a kill request) and reports
//!   [`PtyEvent::Exited`].
//!
//! Both tasks feed a single `mpsc` channel consumed by the spawner's
//! dispatcher, which is the only place PTY callbacks touch session state.

pub mod command;
pub mod monitor;
pub mod reader;

use tokio_util::sync::CancellationToken;

/// Low-level notification from a session's PTY tasks.
#[derive(Debug)]
pub enum PtyEvent {
    /// The process wrote to its terminal.
    Output {
        /// Session the output belongs to.
        session_id: String,
        /// Chunk decoded as lossy UTF-8.
        data: String,
    },
    /// Reading the PTY master failed for a reason other than hang-up.
    ReadError {
        /// Session whose reader failed.
        session_id: String,
        /// Error description.
        error: String,
    },
    /// The process exited or was killed.
    Exited {
        /// Session whose process exited.
        session_id: String,
        /// Exit code, when the process exited normally.
        exit_code: Option<i32>,
        /// Human-readable reason.
        reason: String,
        /// Cancelled by the dispatcher once the session is unregistered.
        exited: CancellationToken,
    },
}
