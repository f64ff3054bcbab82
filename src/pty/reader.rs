//! PTY reader task.
//!
//! Drains the PTY master and forwards each read as a [`PtyEvent::Output`].
//! Multi-byte UTF-8 sequences split across reads are held back until the
//! rest arrives; genuinely invalid bytes are replaced with U+FFFD.

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::pty::PtyEvent;

/// Bytes requested per read from the PTY master.
pub const READ_CHUNK_BYTES: usize = 4096;

/// `EIO`: what Linux returns from the master once every slave fd has closed.
const EIO: i32 = 5;

/// PTY reader task: reads the master until hang-up, EOF, or cancellation.
///
/// `drained` is cancelled when the task returns, on every path, so the exit
/// monitor can wait for trailing output before reporting the exit.
pub async fn run_reader<R>(
    session_id: String,
    mut pty: R,
    event_tx: mpsc::Sender<PtyEvent>,
    cancel: CancellationToken,
    drained: CancellationToken,
) where
    R: AsyncRead + Unpin + Send,
{
    let _drained = drained.drop_guard();
    let mut buf = vec![0u8; READ_CHUNK_BYTES];
    let mut pending: Vec<u8> = Vec::new();

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(session_id, "pty reader: cancellation received, stopping");
                break;
            }

            read = pty.read(&mut buf) => {
                match read {
                    Ok(0) => {
                        debug!(session_id, "pty reader: EOF detected");
                        break;
                    }
                    Ok(n) => {
                        pending.extend_from_slice(&buf[..n]);
                        let data = take_utf8(&mut pending);
                        if data.is_empty() {
                            continue;
                        }
                        let event = PtyEvent::Output { session_id: session_id.clone(), data };
                        if event_tx.send(event).await.is_err() {
                            debug!(session_id, "pty reader: dispatcher closed, stopping");
                            break;
                        }
                    }
                    Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
                    Err(err) if err.raw_os_error() == Some(EIO) => {
                        debug!(session_id, "pty reader: terminal hung up");
                        break;
                    }
                    Err(err) => {
                        warn!(session_id, error = %err, "pty reader: read failed, stopping");
                        let event = PtyEvent::ReadError {
                            session_id: session_id.clone(),
                            error: err.to_string(),
                        };
                        if event_tx.send(event).await.is_err() {
                            debug!(session_id, "pty reader: dispatcher closed before error delivery");
                        }
                        break;
                    }
                }
            }
        }
    }
}

/// Decode the longest valid prefix of `pending`, keeping an incomplete
/// trailing sequence for the next read.
pub fn take_utf8(pending: &mut Vec<u8>) -> String {
    let mut out = String::new();
    loop {
        match std::str::from_utf8(pending) {
            Ok(text) => {
                out.push_str(text);
                pending.clear();
                return out;
            }
            Err(err) => {
                let valid = err.valid_up_to();
                out.push_str(&String::from_utf8_lossy(&pending[..valid]));
                match err.error_len() {
                    // Truncated sequence at the end; wait for more bytes.
                    None => {
                        pending.drain(..valid);
                        return out;
                    }
                    Some(bad) => {
                        out.push(char::REPLACEMENT_CHARACTER);
                        pending.drain(..valid + bad);
                    }
                }
            }
        }
    }
}
