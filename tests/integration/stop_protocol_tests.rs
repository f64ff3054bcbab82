//! Graceful and forced stop against fake agents running in a real PTY.

use std::time::{Duration, Instant};

use agent_pty_runtime::config::RuntimeSettings;
use agent_pty_runtime::events::SessionEvent;
use agent_pty_runtime::models::session::SessionState;
use agent_pty_runtime::models::spawn::SpawnOptions;
use agent_pty_runtime::runtime::Runtime;

use super::test_helpers::{
    agent_config, eventually, fast_settings, next_matching, write_script, ECHO_AGENT,
    STUBBORN_AGENT,
};

fn runtime_with(dir: &std::path::Path, script: &str, settings: RuntimeSettings) -> Runtime {
    let binary = write_script(dir, "claude", script);
    Runtime::new(agent_config(dir, binary), settings).expect("runtime")
}

async fn wait_until_running(runtime: &Runtime, session_id: &str) {
    eventually(Duration::from_secs(2), || async move {
        runtime
            .get_session(session_id)
            .await
            .is_some_and(|s| s.state == SessionState::Running)
    })
    .await;
}

async fn next_stopped(
    events: &mut tokio::sync::broadcast::Receiver<SessionEvent>,
) -> (String, Option<i32>, String, SessionState) {
    let event = next_matching(events, Duration::from_secs(3), |event| {
        matches!(event, SessionEvent::Stopped { .. })
    })
    .await;
    let SessionEvent::Stopped {
        session_id,
        exit_code,
        reason,
        state,
    } = event
    else {
        unreachable!("matched above");
    };
    (session_id, exit_code, reason, state)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn graceful_stop_returns_once_agent_exits() {
    let dir = tempfile::tempdir().expect("tempdir");
    let settings = RuntimeSettings {
        grace_period_ms: 5_000,
        ..fast_settings()
    };
    let runtime = runtime_with(dir.path(), ECHO_AGENT, settings);
    let mut events = runtime.subscribe();

    let session = runtime
        .start_session(SpawnOptions::default())
        .await
        .expect("start");
    wait_until_running(&runtime, &session.id).await;

    let started = Instant::now();
    runtime
        .stop_session(&session.id, false)
        .await
        .expect("stop");
    assert!(
        started.elapsed() < Duration::from_secs(4),
        "stop waited out the grace window for an agent that exited"
    );

    let (session_id, _, reason, state) = next_stopped(&mut events).await;
    assert_eq!(session_id, session.id);
    assert_eq!(state, SessionState::Stopped);
    assert!(!reason.is_empty());
    assert!(!reason.contains("killed"), "unexpected escalation: {reason}");
    assert!(runtime.get_session(&session.id).await.is_none());

    runtime.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn graceful_stop_escalates_after_grace_window() {
    let dir = tempfile::tempdir().expect("tempdir");
    let settings = RuntimeSettings {
        grace_period_ms: 300,
        ..fast_settings()
    };
    let runtime = runtime_with(dir.path(), STUBBORN_AGENT, settings);
    let mut events = runtime.subscribe();

    let session = runtime
        .start_session(SpawnOptions::default())
        .await
        .expect("start");
    wait_until_running(&runtime, &session.id).await;

    let started = Instant::now();
    runtime
        .stop_session(&session.id, false)
        .await
        .expect("stop");
    assert!(started.elapsed() >= Duration::from_millis(300));

    let (session_id, _, reason, state) = next_stopped(&mut events).await;
    assert_eq!(session_id, session.id);
    assert_eq!(state, SessionState::Stopped);
    assert!(reason.contains("killed"), "reason: {reason}");
    assert!(runtime.get_session(&session.id).await.is_none());

    runtime.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn force_stop_unregisters_immediately() {
    let dir = tempfile::tempdir().expect("tempdir");
    let runtime = runtime_with(dir.path(), STUBBORN_AGENT, fast_settings());
    let mut events = runtime.subscribe();

    let session = runtime
        .start_session(SpawnOptions::default())
        .await
        .expect("start");

    runtime
        .stop_session(&session.id, true)
        .await
        .expect("force stop");
    assert!(runtime.get_session(&session.id).await.is_none());

    let (session_id, exit_code, reason, state) = next_stopped(&mut events).await;
    assert_eq!(session_id, session.id);
    assert_eq!(exit_code, None);
    assert_eq!(reason, "force stopped");
    assert_eq!(state, SessionState::Stopped);

    // A second stop is a no-op.
    runtime
        .stop_session(&session.id, true)
        .await
        .expect("second stop");

    runtime.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_cancels_pending_wait() {
    let dir = tempfile::tempdir().expect("tempdir");
    let runtime = runtime_with(dir.path(), STUBBORN_AGENT, fast_settings());

    let session = runtime
        .start_session(SpawnOptions::default())
        .await
        .expect("start");

    let (outcome, stopped) = tokio::join!(
        runtime.wait_for_completion(&session.id, Duration::from_secs(5)),
        async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            runtime.stop_session(&session.id, true).await
        },
    );
    stopped.expect("stop");
    assert!(matches!(
        outcome,
        Err(agent_pty_runtime::AppError::Cancelled(_))
    ));

    runtime.shutdown().await;
}
