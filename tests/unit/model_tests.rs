//! Unit tests for domain models and error display.

use std::path::PathBuf;

use agent_relay::models::key::{ConcurrencyKey, ReplyContext};
use agent_relay::models::run::StopReason;
use agent_relay::orchestrator::bridge::queue_indicator_text;
use agent_relay::render::chat::ChatError;
use agent_relay::AppError;

#[test]
fn key_displays_actor_and_workspace() {
    let key = ConcurrencyKey::new("U1", PathBuf::from("/srv/repo"));
    assert_eq!(key.to_string(), "U1@/srv/repo");
    assert_eq!(key.workspace(), PathBuf::from("/srv/repo").as_path());
}

#[test]
fn keys_differ_by_workspace() {
    let a = ConcurrencyKey::new("U1", PathBuf::from("/a"));
    let b = ConcurrencyKey::new("U1", PathBuf::from("/b"));
    assert_ne!(a, b);
}

#[test]
fn reply_context_constructors() {
    assert_eq!(ReplyContext::channel("C1").thread, None);
    assert_eq!(
        ReplyContext::thread("C1", "1.0").thread.as_deref(),
        Some("1.0")
    );
}

#[test]
fn stop_reason_display() {
    assert_eq!(StopReason::User.to_string(), "user");
    assert_eq!(StopReason::Timeout.to_string(), "timeout");
}

#[test]
fn error_display_is_prefixed() {
    assert_eq!(
        AppError::Busy("a run is already live".into()).to_string(),
        "busy: a run is already live"
    );
    assert_eq!(
        AppError::from(ChatError::TooLong).to_string(),
        "chat: message too long"
    );
    assert_eq!(
        AppError::from(std::io::Error::other("disk")).to_string(),
        "io: disk"
    );
}

#[test]
fn chat_error_display() {
    assert_eq!(
        ChatError::RateLimited(Some(std::time::Duration::from_secs(3))).to_string(),
        "rate limited, retry after 3s"
    );
    assert_eq!(
        ChatError::MarkupRejected("invalid_blocks".into()).to_string(),
        "markup rejected: invalid_blocks"
    );
}

#[test]
fn indicator_text_pluralizes() {
    assert!(queue_indicator_text(1).contains("1 message queued"));
    assert!(queue_indicator_text(3).contains("3 messages queued"));
}
