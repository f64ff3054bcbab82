//! Shared test helpers for runtime-level integration tests.
//!
//! Provides fake agent binaries (small `/bin/sh` scripts), test
//! configuration with short timings, and event-matching helpers so
//! individual test modules can focus on behaviour rather than boilerplate.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use agent_pty_runtime::config::{AgentConfig, RuntimeSettings};
use agent_pty_runtime::events::SessionEvent;
use tokio::sync::broadcast;

/// Prints a readiness line, then answers every input line with a
/// completion marker.
pub const ECHO_AGENT: &str = r#"
echo "agent ready"
while IFS= read -r line; do
  echo "Task completed: $line"
done
"#;

/// Ignores the terminal interrupt and reads forever.
pub const STUBBORN_AGENT: &str = r"
trap '' INT
echo 'agent ready'
while IFS= read -r line; do
  :
done
";

/// Write an executable `/bin/sh` script named `name` into `dir`.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}")).expect("write script");
    let mut perms = std::fs::metadata(&path).expect("script metadata").permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).expect("chmod script");
    path
}

/// Agent configuration for `workspace` launching `binary`.
pub fn agent_config(workspace: &Path, binary: PathBuf) -> AgentConfig {
    let mut agent = AgentConfig::new("test-agent", workspace);
    agent.binary_path = binary;
    agent
}

/// Settings with short delays suitable for tests.
pub fn fast_settings() -> RuntimeSettings {
    RuntimeSettings {
        settle_delay_ms: 50,
        grace_period_ms: 2_000,
        availability_timeout_ms: 2_000,
        ..RuntimeSettings::default()
    }
}

/// Receive events until one satisfies `pred`, failing after `timeout`.
pub async fn next_matching<F>(
    rx: &mut broadcast::Receiver<SessionEvent>,
    timeout: Duration,
    mut pred: F,
) -> SessionEvent
where
    F: FnMut(&SessionEvent) -> bool,
{
    tokio::time::timeout(timeout, async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Poll `check` every 20ms until it returns true, failing after `timeout`.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while !check().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within {timeout:?}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
