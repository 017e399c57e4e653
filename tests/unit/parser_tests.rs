//! Unit tests for the stream-JSON record parser.
//!
//! Covers:
//! - text deltas and session announcement
//! - tool argument fragments assembled across deltas
//! - malformed tool arguments yield an empty detail
//! - thinking segments carry their elapsed time
//! - blocks left open at end of stream emit nothing
//! - result records: completion metadata and error reporting
//! - unknown and malformed records are skipped

use std::time::{Duration, Instant};

use serde_json::json;

use agent_relay::models::event::DomainEvent;
use agent_relay::stream::parser::{summarize_tool_input, StreamParser, MAX_TOOL_DETAIL_CHARS};

fn block_start(index: usize, block: &serde_json::Value) -> String {
    json!({
        "type": "stream_event",
        "event": { "type": "content_block_start", "index": index, "content_block": block }
    })
    .to_string()
}

fn block_delta(index: usize, delta: &serde_json::Value) -> String {
    json!({
        "type": "stream_event",
        "event": { "type": "content_block_delta", "index": index, "delta": delta }
    })
    .to_string()
}

fn block_stop(index: usize) -> String {
    json!({
        "type": "stream_event",
        "event": { "type": "content_block_stop", "index": index }
    })
    .to_string()
}

// ── Text ─────────────────────────────────────────────────────────────────────

#[test]
fn system_init_records_session_without_events() {
    let mut parser = StreamParser::new();
    let events = parser.parse_line(r#"{"type":"system","subtype":"init","session_id":"sess-1"}"#);

    assert!(events.is_empty());
    assert_eq!(parser.session_token(), Some("sess-1"));
}

#[test]
fn text_deltas_are_emitted_in_order() {
    let mut parser = StreamParser::new();
    let mut events = parser.parse_line(&block_start(0, &json!({"type": "text", "text": ""})));
    events.extend(parser.parse_line(&block_delta(0, &json!({"type": "text_delta", "text": "Hel"}))));
    events.extend(parser.parse_line(&block_delta(0, &json!({"type": "text_delta", "text": "lo"}))));
    events.extend(parser.parse_line(&block_stop(0)));

    assert_eq!(
        events,
        vec![
            DomainEvent::TextDelta("Hel".into()),
            DomainEvent::TextDelta("lo".into()),
        ]
    );
}

#[test]
fn empty_text_delta_is_ignored() {
    let mut parser = StreamParser::new();
    parser.parse_line(&block_start(0, &json!({"type": "text"})));
    let events = parser.parse_line(&block_delta(0, &json!({"type": "text_delta", "text": ""})));
    assert!(events.is_empty());
}

// ── Tools ────────────────────────────────────────────────────────────────────

#[test]
fn tool_arguments_assembled_across_fragments() {
    let mut parser = StreamParser::new();
    let start = parser.parse_line(&block_start(
        1,
        &json!({"type": "tool_use", "id": "toolu_1", "name": "Bash", "input": {}}),
    ));
    assert!(start.is_empty(), "tool call must wait for complete arguments");

    let first = parser.parse_line(&block_delta(
        1,
        &json!({"type": "input_json_delta", "partial_json": "{\"command\": \"ls"}),
    ));
    let second = parser.parse_line(&block_delta(
        1,
        &json!({"type": "input_json_delta", "partial_json": " -la\"}"}),
    ));
    assert!(first.is_empty() && second.is_empty());

    let events = parser.parse_line(&block_stop(1));
    assert_eq!(
        events,
        vec![DomainEvent::ToolInvocation {
            name: "Bash".into(),
            detail: "ls -la".into(),
        }]
    );
}

#[test]
fn tool_with_unparseable_arguments_has_empty_detail() {
    let mut parser = StreamParser::new();
    parser.parse_line(&block_start(0, &json!({"type": "tool_use", "name": "Read", "input": {}})));
    parser.parse_line(&block_delta(
        0,
        &json!({"type": "input_json_delta", "partial_json": "{\"file_path\": "}),
    ));

    let events = parser.parse_line(&block_stop(0));
    assert_eq!(
        events,
        vec![DomainEvent::ToolInvocation {
            name: "Read".into(),
            detail: String::new(),
        }]
    );
}

#[test]
fn tool_without_fragments_uses_initial_input() {
    let mut parser = StreamParser::new();
    parser.parse_line(&block_start(
        2,
        &json!({"type": "tool_use", "name": "Read", "input": {"file_path": "src/lib.rs"}}),
    ));

    let events = parser.parse_line(&block_stop(2));
    assert_eq!(
        events,
        vec![DomainEvent::ToolInvocation {
            name: "Read".into(),
            detail: "src/lib.rs".into(),
        }]
    );
}

#[test]
fn stop_for_other_index_keeps_block_open() {
    let mut parser = StreamParser::new();
    parser.parse_line(&block_start(3, &json!({"type": "tool_use", "name": "Grep", "input": {}})));

    assert!(parser.parse_line(&block_stop(7)).is_empty());
    assert_eq!(parser.parse_line(&block_stop(3)).len(), 1);
}

// ── Thinking ─────────────────────────────────────────────────────────────────

#[test]
fn thinking_segment_reports_elapsed_time() {
    let mut parser = StreamParser::new();
    let opened = Instant::now();

    let start = parser.parse_line_at(&block_start(0, &json!({"type": "thinking"})), opened);
    assert_eq!(start, vec![DomainEvent::ThinkingStart]);

    let delta = parser.parse_line_at(
        &block_delta(0, &json!({"type": "thinking_delta", "thinking": "hmm"})),
        opened + Duration::from_millis(500),
    );
    assert_eq!(delta, vec![DomainEvent::ThinkingDelta("hmm".into())]);

    let done = parser.parse_line_at(&block_stop(0), opened + Duration::from_millis(2300));
    assert_eq!(
        done,
        vec![DomainEvent::ThinkingDone {
            elapsed: Duration::from_millis(2300),
        }]
    );
}

#[test]
fn new_block_closes_the_previous_one() {
    let mut parser = StreamParser::new();
    let opened = Instant::now();
    parser.parse_line_at(&block_start(0, &json!({"type": "thinking"})), opened);

    let events = parser.parse_line_at(
        &block_start(1, &json!({"type": "text"})),
        opened + Duration::from_secs(1),
    );
    assert_eq!(
        events,
        vec![DomainEvent::ThinkingDone {
            elapsed: Duration::from_secs(1),
        }]
    );
}

// ── End of stream ────────────────────────────────────────────────────────────

#[test]
fn unclosed_block_is_discarded_at_finish() {
    let mut parser = StreamParser::new();
    parser.parse_line(&block_start(0, &json!({"type": "tool_use", "name": "Edit", "input": {}})));
    parser.parse_line(&block_delta(
        0,
        &json!({"type": "input_json_delta", "partial_json": "{\"path\": \"a\"}"}),
    ));
    parser.finish();

    assert!(
        parser.parse_line(&block_stop(0)).is_empty(),
        "a stop after finish must not resurrect the block"
    );
}

// ── Results ──────────────────────────────────────────────────────────────────

#[test]
fn result_record_emits_completion_metadata() {
    let mut parser = StreamParser::new();
    let events = parser.parse_line(
        &json!({
            "type": "result",
            "subtype": "success",
            "is_error": false,
            "result": "done",
            "session_id": "sess-2",
            "total_cost_usd": 0.0421,
            "duration_ms": 1500,
            "num_turns": 3
        })
        .to_string(),
    );

    assert_eq!(
        events,
        vec![DomainEvent::Completion {
            session_token: Some("sess-2".into()),
            cost_usd: Some(0.0421),
            elapsed: Some(Duration::from_millis(1500)),
            turns: Some(3),
        }]
    );
    assert_eq!(parser.session_token(), Some("sess-2"));
}

#[test]
fn error_result_emits_error_before_completion() {
    let mut parser = StreamParser::new();
    parser.parse_line(r#"{"type":"system","subtype":"init","session_id":"sess-3"}"#);
    let events = parser.parse_line(
        r#"{"type":"result","subtype":"error_max_turns","is_error":true,"result":"Too many turns"}"#,
    );

    assert_eq!(events.len(), 2);
    assert_eq!(
        events[0],
        DomainEvent::Error {
            message: "Too many turns".into(),
        }
    );
    assert!(matches!(
        &events[1],
        DomainEvent::Completion { session_token: Some(token), .. } if token == "sess-3"
    ));
}

#[test]
fn error_result_without_text_falls_back_to_subtype() {
    let mut parser = StreamParser::new();
    let events =
        parser.parse_line(r#"{"type":"result","subtype":"error_during_execution","is_error":true}"#);

    assert_eq!(
        events[0],
        DomainEvent::Error {
            message: "error_during_execution".into(),
        }
    );
}

// ── Skipped input ────────────────────────────────────────────────────────────

#[test]
fn malformed_and_unknown_lines_are_skipped() {
    let mut parser = StreamParser::new();
    assert!(parser.parse_line("{not json").is_empty());
    assert!(parser.parse_line("").is_empty());
    assert!(parser.parse_line("   ").is_empty());
    assert!(parser.parse_line(r#"{"type":"assistant","message":{}}"#).is_empty());
    assert!(parser
        .parse_line(r#"{"type":"stream_event","event":{"type":"message_start"}}"#)
        .is_empty());
}

// ── Tool detail summaries ────────────────────────────────────────────────────

#[test]
fn summary_prefers_well_known_keys() {
    let input = json!({"description": "list files", "command": "ls"});
    assert_eq!(summarize_tool_input(&input), "ls");
}

#[test]
fn summary_keeps_first_line_only() {
    let input = json!({"command": "cargo build\ncargo test"});
    assert_eq!(summarize_tool_input(&input), "cargo build");
}

#[test]
fn summary_truncates_long_values() {
    let input = json!({"command": "x".repeat(200)});
    let summary = summarize_tool_input(&input);

    assert_eq!(summary.chars().count(), MAX_TOOL_DETAIL_CHARS);
    assert!(summary.ends_with('\u{2026}'));
}

#[test]
fn summary_empty_without_known_keys() {
    assert_eq!(summarize_tool_input(&json!({"todos": []})), "");
    assert_eq!(summarize_tool_input(&json!("bare string")), "");
}
