//! Unit tests for the Slack surface: message extraction, error
//! classification, and `/relay` command routing.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use serde_json::json;
use slack_morphism::prelude::SlackMessageEvent;
use uuid::Uuid;

use agent_relay::config::GlobalConfig;
use agent_relay::models::key::{ConcurrencyKey, ReplyContext};
use agent_relay::models::run::{BridgeStatus, QueueSnapshot, RunSnapshot, StopReason};
use agent_relay::orchestrator::bridge::{Bridge, BridgeConfig};
use agent_relay::orchestrator::queue::QueueEntry;
use agent_relay::render::chat::ChatError;
use agent_relay::slack::client::classify_api_code;
use agent_relay::slack::commands::{format_status, run_command, USAGE};
use agent_relay::slack::events::submission_from_message;

use super::test_helpers::FakeChat;

fn message(value: serde_json::Value) -> SlackMessageEvent {
    serde_json::from_value(value).expect("valid message event")
}

fn test_config() -> (tempfile::TempDir, GlobalConfig) {
    let temp = tempfile::tempdir().expect("tempdir");
    let toml = format!(
        "default_workspace_root = '{}'\nauthorized_user_ids = [\"U1\"]\n",
        temp.path().display()
    );
    let config = GlobalConfig::from_toml_str(&toml).expect("config parses");
    (temp, config)
}

// ── Message extraction ───────────────────────────────────────────────────────

#[test]
fn top_level_message_replies_in_its_own_thread() {
    let event = message(json!({
        "ts": "1700000000.000100",
        "channel": "C1",
        "user": "U1",
        "text": "  fix the tests  "
    }));

    let submission = submission_from_message(&event).expect("submission");
    assert_eq!(submission.user, "U1");
    assert_eq!(submission.text, "fix the tests");
    assert_eq!(
        submission.origin(),
        ReplyContext::thread("C1", "1700000000.000100")
    );
}

#[test]
fn threaded_message_replies_in_parent_thread() {
    let event = message(json!({
        "ts": "1700000000.000200",
        "thread_ts": "1700000000.000100",
        "channel": "C1",
        "user": "U1",
        "text": "and the docs"
    }));

    let submission = submission_from_message(&event).expect("submission");
    assert_eq!(submission.thread, "1700000000.000100");
}

#[test]
fn bot_and_subtyped_messages_are_ignored() {
    let bot = message(json!({
        "ts": "1.0", "channel": "C1", "user": "U1", "bot_id": "B1", "text": "hi"
    }));
    let edited = message(json!({
        "ts": "1.0", "channel": "C1", "user": "U1", "subtype": "message_changed", "text": "hi"
    }));
    let blank = message(json!({
        "ts": "1.0", "channel": "C1", "user": "U1", "text": "   "
    }));

    assert!(submission_from_message(&bot).is_none());
    assert!(submission_from_message(&edited).is_none());
    assert!(submission_from_message(&blank).is_none());
}

#[test]
fn submission_key_uses_channel_workspace() {
    let (_temp, config) = test_config();
    let event = message(json!({
        "ts": "1.0", "channel": "C1", "user": "U1", "text": "go"
    }));
    let submission = submission_from_message(&event).unwrap();

    assert_eq!(
        submission.key(&config),
        ConcurrencyKey::new("U1", config.default_workspace_root())
    );
}

// ── Error classification ─────────────────────────────────────────────────────

#[test]
fn api_codes_map_to_chat_errors() {
    assert!(matches!(
        classify_api_code("invalid_blocks"),
        ChatError::MarkupRejected(_)
    ));
    assert_eq!(classify_api_code("msg_too_long"), ChatError::TooLong);
    assert_eq!(classify_api_code("ratelimited"), ChatError::RateLimited(None));
    assert_eq!(
        classify_api_code("channel_not_found"),
        ChatError::Other("slack api error: channel_not_found".into())
    );
}

// ── Status formatting ────────────────────────────────────────────────────────

#[test]
fn idle_status_is_one_line() {
    assert_eq!(
        format_status(&BridgeStatus::default()),
        "Idle: no runs and nothing queued."
    );
}

#[test]
fn status_lists_runs_and_queues() {
    let key = ConcurrencyKey::new("U1", PathBuf::from("/srv/repo"));
    let status = BridgeStatus {
        runs: vec![RunSnapshot {
            key: key.clone(),
            run_id: Uuid::new_v4(),
            started_at: Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap(),
            stopping: Some(StopReason::User),
        }],
        queues: vec![QueueSnapshot { key, depth: 2 }],
    };

    let text = format_status(&status);
    assert!(text.contains("`U1@/srv/repo` running since 03:04:05 UTC (stopping: user)"));
    assert!(text.contains("`U1@/srv/repo`: 2 queued"));
}

// ── /relay commands ──────────────────────────────────────────────────────────

#[tokio::test]
async fn commands_on_idle_key() {
    let (_temp, config) = test_config();
    let bridge = Arc::new(Bridge::new(FakeChat::new(), BridgeConfig::default()));

    let cases = [
        ("stop", "Nothing is running here."),
        ("drain", "Nothing is queued or running here."),
        ("stopall", "\u{23f9} Stopping 0 run(s)."),
        ("status", "Idle: no runs and nothing queued."),
        ("", USAGE),
        ("bogus", USAGE),
    ];
    for (text, expected) in cases {
        assert_eq!(run_command(&bridge, &config, "U1", "C1", text).await, expected);
    }
}

#[tokio::test]
async fn discard_reports_dropped_submissions() {
    let (_temp, config) = test_config();
    let chat = FakeChat::new();
    let bridge = Arc::new(Bridge::new(Arc::clone(&chat), BridgeConfig::default()));
    let key = ConcurrencyKey::new("U1", config.default_workspace_root());
    for payload in ["a", "b"] {
        bridge.queue().enqueue(QueueEntry {
            key: key.clone(),
            payload: payload.into(),
            origin: ReplyContext::channel("C1"),
        });
    }

    let reply = run_command(&bridge, &config, "U1", "C1", "discard").await;
    assert!(reply.contains("Discarded 2 queued message(s)"));
    assert_eq!(bridge.queue().depth(&key), 0);
}

#[tokio::test]
async fn new_resets_the_session() {
    let (_temp, config) = test_config();
    let bridge = Arc::new(Bridge::new(FakeChat::new(), BridgeConfig::default()));
    let key = ConcurrencyKey::new("U1", config.default_workspace_root());

    let reply = run_command(&bridge, &config, "U1", "C1", "new  please").await;
    assert!(reply.contains("fresh session"));
    assert!(bridge.session_token(&key).is_none());
}
