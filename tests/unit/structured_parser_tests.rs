use agent_pty_runtime::models::output::OutputKind;
use agent_pty_runtime::parser::{OutputParser, StructuredParser};

#[test]
fn non_json_chunk_is_raw_and_unchanged() {
    let mut parser = StructuredParser::new();
    let out = parser.parse("not json at all\r\n");
    assert_eq!(out.kind, OutputKind::Raw);
    assert_eq!(out.content, "not json at all\r\n");
    assert!(out.data.is_none());
}

#[test]
fn json_array_is_raw() {
    let mut parser = StructuredParser::new();
    let out = parser.parse("[1, 2, 3]");
    assert_eq!(out.kind, OutputKind::Raw);
}

#[test]
fn completion_record_is_complete_result() {
    let mut parser = StructuredParser::new();
    let out = parser.parse(r#"{"type":"completion","result":"all tests pass"}"#);
    assert_eq!(out.kind, OutputKind::Result);
    assert_eq!(out.content, "all tests pass");
    assert!(out.is_complete);
    assert_eq!(out.data.as_ref().expect("payload")["type"], "completion");
}

#[test]
fn result_record_is_treated_as_completion() {
    let mut parser = StructuredParser::new();
    let out = parser.parse("{\"type\":\"result\",\"result\":\"ok\"}\n");
    assert!(out.is_complete);
    assert_eq!(out.content, "ok");
}

#[test]
fn result_record_flagged_as_error_is_error() {
    let mut parser = StructuredParser::new();
    let out = parser.parse(r#"{"type":"result","is_error":true,"result":"max turns reached"}"#);
    assert_eq!(out.kind, OutputKind::Error);
    assert_eq!(out.content, "max turns reached");
    assert!(!out.is_complete);
}

#[test]
fn error_record_takes_message_from_error_field() {
    let mut parser = StructuredParser::new();
    let out = parser.parse(r#"{"type":"error","error":"rate limited"}"#);
    assert_eq!(out.kind, OutputKind::Error);
    assert_eq!(out.content, "rate limited");

    let out = parser.parse(r#"{"type":"error","error":{"message":"overloaded"}}"#);
    assert_eq!(out.content, "overloaded");
}

#[test]
fn other_records_are_status() {
    let mut parser = StructuredParser::new();
    let out = parser.parse(r#"{"type":"assistant","message":"Looking at the tests"}"#);
    assert_eq!(out.kind, OutputKind::Status);
    assert_eq!(out.content, "Looking at the tests");
    assert!(!out.is_complete);
    assert!(out.data.is_some());
}

#[test]
fn completion_after_status_in_one_chunk_is_reported() {
    let mut parser = StructuredParser::new();
    let chunk = concat!(
        "{\"type\":\"assistant\",\"message\":\"Running tests\"}\r\n",
        "{\"type\":\"result\",\"result\":\"ok\"}\r\n",
    );
    let out = parser.parse(chunk);
    assert_eq!(out.kind, OutputKind::Result);
    assert_eq!(out.content, "ok");
    assert!(out.is_complete);
}

#[test]
fn last_record_wins_when_none_is_terminal() {
    let mut parser = StructuredParser::new();
    let out = parser.parse(
        "{\"type\":\"assistant\",\"message\":\"first\"}\n{\"type\":\"assistant\",\"message\":\"second\"}\n",
    );
    assert_eq!(out.kind, OutputKind::Status);
    assert_eq!(out.content, "second");
}

#[test]
fn record_split_across_chunks_completes_on_second() {
    let mut parser = StructuredParser::new();
    let first = parser.parse("{\"type\":\"completion\",\"res");
    assert_eq!(first.kind, OutputKind::Raw);
    assert!(!first.is_complete);

    let second = parser.parse("ult\":\"done\"}\n");
    assert!(second.is_complete);
    assert_eq!(second.content, "done");
}

#[test]
fn malformed_line_does_not_hide_following_record() {
    let mut parser = StructuredParser::new();
    let out = parser.parse("warning: slow disk\n{\"type\":\"error\",\"error\":\"quota\"}\n");
    assert_eq!(out.kind, OutputKind::Error);
    assert_eq!(out.content, "quota");

    let out = parser.parse("plain text only\n");
    assert_eq!(out.kind, OutputKind::Raw);
}
