use agent_pty_runtime::events::SessionEvent;
use agent_pty_runtime::models::output::ParsedOutput;
use agent_pty_runtime::models::session::SessionState;
use serde_json::json;

#[test]
fn events_serialize_with_kebab_case_tag() {
    let event = SessionEvent::ParsedOutput {
        session_id: "builder-1-abcd0123".into(),
        output: ParsedOutput::completed("done"),
    };
    let value = serde_json::to_value(&event).expect("serialize");
    assert_eq!(value["event"], "parsed-output");
    assert_eq!(value["session_id"], "builder-1-abcd0123");
    assert_eq!(value["output"]["kind"], "result");
    assert_eq!(value["output"]["is_complete"], true);
}

#[test]
fn stopped_event_carries_state_and_reason() {
    let event = SessionEvent::Stopped {
        session_id: "s".into(),
        exit_code: Some(0),
        reason: "process exited with code 0".into(),
        state: SessionState::Stopped,
    };
    let value = serde_json::to_value(&event).expect("serialize");
    assert_eq!(
        value,
        json!({
            "event": "stopped",
            "session_id": "s",
            "exit_code": 0,
            "reason": "process exited with code 0",
            "state": "stopped",
        })
    );
}

#[test]
fn name_matches_serialized_tag() {
    let events = [
        SessionEvent::Started {
            session_id: "s".into(),
            pid: Some(42),
        },
        SessionEvent::Output {
            session_id: "s".into(),
            data: "hi".into(),
        },
        SessionEvent::Error {
            session_id: "s".into(),
            error: "eio".into(),
        },
        SessionEvent::Completed {
            session_id: "s".into(),
            result: None,
        },
    ];
    for event in events {
        let value = serde_json::to_value(&event).expect("serialize");
        assert_eq!(value["event"], event.name());
        assert_eq!(event.session_id(), "s");
    }
}
