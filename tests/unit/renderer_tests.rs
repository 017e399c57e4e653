//! Unit tests for the adaptive output renderer.
//!
//! Covers:
//! - mode switches open new messages
//! - throttled edits are deferred to the tick and flushed on finalize
//! - long output splits into bounded messages
//! - thinking header transitions and the bare thinking summary
//! - metadata appended in place or posted standalone
//! - stop and timeout notices
//! - rich-to-plain fallback, not-modified, and rate-limit handling

use std::sync::Arc;
use std::time::Duration;

use agent_relay::models::event::DomainEvent;
use agent_relay::models::key::ReplyContext;
use agent_relay::models::run::{RunOutcome, StopReason};
use agent_relay::render::chat::{ChatError, Markup};
use agent_relay::render::renderer::{
    RenderConfig, RenderMode, Renderer, STOPPED_NOTICE, TIMED_OUT_NOTICE,
};

use super::test_helpers::{ChatCall, FakeChat};

fn unthrottled() -> RenderConfig {
    RenderConfig {
        max_message_chars: 3000,
        edit_interval: Duration::ZERO,
        poll_interval: Duration::from_millis(10),
    }
}

fn renderer(chat: &Arc<FakeChat>, config: RenderConfig) -> Renderer<FakeChat> {
    Renderer::new(
        Arc::clone(chat),
        ReplyContext::thread("C1", "1700000000.000100"),
        config,
    )
}

fn text(s: &str) -> DomainEvent {
    DomainEvent::TextDelta(s.to_owned())
}

fn tool(name: &str, detail: &str) -> DomainEvent {
    DomainEvent::ToolInvocation {
        name: name.to_owned(),
        detail: detail.to_owned(),
    }
}

fn completion() -> DomainEvent {
    DomainEvent::Completion {
        session_token: Some("s-1".into()),
        cost_usd: Some(0.0123),
        elapsed: Some(Duration::from_millis(2500)),
        turns: Some(3),
    }
}

const METADATA: &str = "_\u{1f4b0} $0.0123 \u{b7} \u{23f1} 2.5s \u{b7} \u{1f504} 3 turns_";

// ── Modes ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn mode_switch_opens_new_message() {
    let chat = FakeChat::new();
    let mut r = renderer(&chat, unthrottled());
    assert_eq!(r.mode(), RenderMode::Idle);

    r.handle(text("Hello ")).await;
    r.handle(text("world")).await;
    assert_eq!(r.mode(), RenderMode::Text);

    r.handle(tool("Bash", "ls")).await;
    r.handle(tool("Read", "")).await;
    assert_eq!(r.mode(), RenderMode::ToolLog);

    r.handle(text("Done")).await;
    r.finish(&RunOutcome::Completed).await;

    assert_eq!(
        chat.messages(),
        vec![
            "Hello world".to_owned(),
            "\u{1f527} *Bash* `ls`\n\u{1f527} *Read*\n".to_owned(),
            "Done".to_owned(),
        ]
    );
    assert_eq!(r.mode(), RenderMode::Idle);
}

#[tokio::test]
async fn replies_go_to_the_origin_thread() {
    let chat = FakeChat::new();
    let mut r = renderer(&chat, unthrottled());
    r.handle(text("hi")).await;

    match &chat.calls()[0] {
        ChatCall::Create {
            channel, thread, ..
        } => {
            assert_eq!(channel, "C1");
            assert_eq!(thread.as_deref(), Some("1700000000.000100"));
        }
        other => panic!("expected a create, got {other:?}"),
    }
}

// ── Throttling ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn edits_within_interval_are_deferred_until_finalize() {
    let chat = FakeChat::new();
    let config = RenderConfig {
        edit_interval: Duration::from_secs(600),
        ..unthrottled()
    };
    let mut r = renderer(&chat, config);

    r.handle(text("a")).await;
    r.handle(text("b")).await;
    r.handle(text("c")).await;
    assert!(r.has_pending());
    assert_eq!(chat.creates(), vec!["a".to_owned()]);
    assert!(chat.edits().is_empty());

    r.tick().await;
    assert!(chat.edits().is_empty(), "tick must respect the interval");

    r.finish(&RunOutcome::Completed).await;
    assert_eq!(chat.edits(), vec!["abc".to_owned()]);
}

#[tokio::test]
async fn tick_flushes_pending_edit_after_interval() {
    let chat = FakeChat::new();
    let config = RenderConfig {
        edit_interval: Duration::from_millis(50),
        ..unthrottled()
    };
    let mut r = renderer(&chat, config);

    r.handle(text("a")).await;
    r.handle(text("b")).await;
    assert!(r.has_pending());

    tokio::time::sleep(Duration::from_millis(80)).await;
    r.tick().await;

    assert!(!r.has_pending());
    assert_eq!(chat.edits(), vec!["ab".to_owned()]);
}

// ── Splitting ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn long_output_splits_into_bounded_messages() {
    let chat = FakeChat::new();
    let mut r = renderer(&chat, unthrottled());
    let body: String = (0..900).map(|i| format!("line {i:04}\n")).collect();

    for chunk in body.as_bytes().chunks(100) {
        r.handle(text(std::str::from_utf8(chunk).unwrap())).await;
    }
    r.finish(&RunOutcome::Completed).await;

    let messages = chat.messages();
    assert_eq!(messages.len(), 3);
    assert!(messages.iter().all(|m| m.len() <= 3000));
    assert_eq!(messages.concat(), body);
}

#[tokio::test]
async fn thinking_messages_leave_room_for_header() {
    let chat = FakeChat::new();
    let config = RenderConfig {
        max_message_chars: 200,
        ..unthrottled()
    };
    let mut r = renderer(&chat, config);

    r.handle(DomainEvent::ThinkingStart).await;
    r.handle(DomainEvent::ThinkingDelta("t".repeat(400))).await;
    r.handle(DomainEvent::ThinkingDone {
        elapsed: Duration::from_secs(1),
    })
    .await;

    let messages = chat.messages();
    assert!(messages.len() >= 3);
    assert!(messages.iter().all(|m| m.len() <= 200));
}

// ── Thinking ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn thinking_header_updates_when_segment_closes() {
    let chat = FakeChat::new();
    let mut r = renderer(&chat, unthrottled());

    r.handle(DomainEvent::ThinkingStart).await;
    assert_eq!(r.mode(), RenderMode::Thinking);
    r.handle(DomainEvent::ThinkingDelta("pondering".into())).await;
    r.handle(DomainEvent::ThinkingDone {
        elapsed: Duration::from_millis(1200),
    })
    .await;
    assert_eq!(r.mode(), RenderMode::Idle);
    r.handle(text("Answer")).await;

    assert_eq!(
        chat.creates()[0],
        "\u{1f4ad} _Thinking\u{2026}_\npondering"
    );
    assert_eq!(
        chat.messages(),
        vec![
            "\u{1f4ad} _Thought for 1.2s_\npondering".to_owned(),
            "Answer".to_owned(),
        ]
    );
}

#[tokio::test]
async fn empty_thinking_posts_a_summary_line() {
    let chat = FakeChat::new();
    let mut r = renderer(&chat, unthrottled());

    r.handle(DomainEvent::ThinkingStart).await;
    r.handle(DomainEvent::ThinkingDone {
        elapsed: Duration::from_secs(3),
    })
    .await;

    assert_eq!(chat.messages(), vec!["\u{1f4ad} _Thought for 3.0s_".to_owned()]);
}

// ── Metadata and notices ─────────────────────────────────────────────────────

#[tokio::test]
async fn metadata_is_appended_to_last_message() {
    let chat = FakeChat::new();
    let mut r = renderer(&chat, unthrottled());

    r.handle(text("All done")).await;
    r.handle(completion()).await;
    r.finish(&RunOutcome::Completed).await;

    assert_eq!(chat.messages(), vec![format!("All done\n\n{METADATA}")]);
}

#[tokio::test]
async fn metadata_without_content_is_standalone() {
    let chat = FakeChat::new();
    let mut r = renderer(&chat, unthrottled());

    r.handle(completion()).await;
    r.finish(&RunOutcome::Completed).await;

    assert_eq!(chat.messages(), vec![METADATA.to_owned()]);
}

#[tokio::test]
async fn metadata_that_does_not_fit_is_standalone() {
    let chat = FakeChat::new();
    let config = RenderConfig {
        max_message_chars: 100,
        ..unthrottled()
    };
    let mut r = renderer(&chat, config);

    r.handle(text(&"x".repeat(95))).await;
    r.handle(completion()).await;
    r.finish(&RunOutcome::Completed).await;

    assert_eq!(chat.messages(), vec!["x".repeat(95), METADATA.to_owned()]);
}

#[tokio::test]
async fn stop_notice_follows_partial_output() {
    let chat = FakeChat::new();
    let mut r = renderer(&chat, unthrottled());

    r.handle(text("partial")).await;
    r.finish(&RunOutcome::Stopped(StopReason::User)).await;

    assert_eq!(
        chat.messages(),
        vec!["partial".to_owned(), STOPPED_NOTICE.to_owned()]
    );
}

#[tokio::test]
async fn timeout_notice_is_distinct() {
    let chat = FakeChat::new();
    let mut r = renderer(&chat, unthrottled());

    r.finish(&RunOutcome::Stopped(StopReason::Timeout)).await;

    assert_eq!(chat.messages(), vec![TIMED_OUT_NOTICE.to_owned()]);
}

#[tokio::test]
async fn error_event_finalizes_and_posts_notice() {
    let chat = FakeChat::new();
    let mut r = renderer(&chat, unthrottled());

    r.handle(text("working")).await;
    r.handle(DomainEvent::Error {
        message: "agent exited with code 2".into(),
    })
    .await;

    assert_eq!(r.mode(), RenderMode::Idle);
    assert_eq!(
        chat.messages(),
        vec![
            "working".to_owned(),
            "\u{26a0}\u{fe0f} agent exited with code 2".to_owned(),
        ]
    );
}

// ── Platform failures ────────────────────────────────────────────────────────

#[tokio::test]
async fn rejected_markup_falls_back_to_plain() {
    let chat = FakeChat::new();
    chat.reject_rich();
    let mut r = renderer(&chat, unthrottled());

    r.handle(text("**hi** there")).await;

    let creates: Vec<(String, Markup)> = chat
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            ChatCall::Create { text, markup, .. } => Some((text, markup)),
            _ => None,
        })
        .collect();
    assert_eq!(creates, vec![("hi there".to_owned(), Markup::Plain)]);
}

#[tokio::test]
async fn not_modified_edit_counts_as_success() {
    let chat = FakeChat::new();
    let mut r = renderer(&chat, unthrottled());

    r.handle(text("a")).await;
    chat.fail_next(ChatError::NotModified);
    r.handle(text("b")).await;

    assert!(!r.has_pending());
}

#[tokio::test]
async fn rate_limited_post_is_retried_on_tick() {
    let chat = FakeChat::new();
    let mut r = renderer(&chat, unthrottled());

    chat.fail_next(ChatError::RateLimited(None));
    r.handle(text("a")).await;
    assert!(r.has_pending());
    assert!(chat.creates().is_empty());

    r.tick().await;
    assert!(!r.has_pending());
    assert_eq!(chat.creates(), vec!["a".to_owned()]);
}

fn slow_edits() -> RenderConfig {
    RenderConfig {
        edit_interval: Duration::from_secs(60),
        ..unthrottled()
    }
}

#[tokio::test]
async fn rate_limited_final_flush_is_retried() {
    let chat = FakeChat::new();
    let mut r = renderer(&chat, slow_edits());

    r.handle(text("first part, ")).await;
    r.handle(text("final tail")).await;
    assert!(r.has_pending());

    chat.fail_next(ChatError::RateLimited(Some(Duration::from_millis(1))));
    r.handle(completion()).await;
    r.finish(&RunOutcome::Completed).await;

    assert_eq!(
        chat.messages(),
        vec![format!("first part, final tail\n\n{METADATA}")]
    );
}

#[tokio::test]
async fn undelivered_final_flush_keeps_metadata_separate() {
    let chat = FakeChat::new();
    let mut r = renderer(&chat, slow_edits());

    r.handle(text("first part, ")).await;
    r.handle(text("final tail")).await;
    for _ in 0..4 {
        chat.fail_next(ChatError::RateLimited(Some(Duration::from_millis(1))));
    }
    r.handle(completion()).await;
    r.finish(&RunOutcome::Completed).await;

    assert_eq!(
        chat.messages(),
        vec!["first part, ".to_owned(), METADATA.to_owned()]
    );
}

#[tokio::test]
async fn unbroken_output_splits_into_three_full_messages() {
    let chat = FakeChat::new();
    let mut r = renderer(&chat, unthrottled());
    let body = "x".repeat(9000);

    for chunk in body.as_bytes().chunks(700) {
        r.handle(text(std::str::from_utf8(chunk).unwrap())).await;
    }
    r.finish(&RunOutcome::Completed).await;

    let messages = chat.messages();
    assert_eq!(messages.len(), 3);
    assert!(messages.iter().all(|m| m.len() == 3000));
    assert_eq!(messages.concat(), body);
}

#[tokio::test]
async fn split_thinking_annotates_first_part_only() {
    let chat = FakeChat::new();
    let config = RenderConfig {
        max_message_chars: 200,
        ..unthrottled()
    };
    let mut r = renderer(&chat, config);

    r.handle(DomainEvent::ThinkingStart).await;
    r.handle(DomainEvent::ThinkingDelta("t".repeat(400))).await;
    r.handle(DomainEvent::ThinkingDone {
        elapsed: Duration::from_secs(1),
    })
    .await;

    let messages = chat.messages();
    assert_eq!(
        messages,
        vec![
            format!("\u{1f4ad} _Thought for 1.0s_\n{}", "t".repeat(160)),
            "t".repeat(160),
            "t".repeat(80),
        ]
    );
    assert!(messages.iter().all(|m| !m.contains("Thinking")));
}
