//! Chat platform abstraction used by the renderer and the bridge.
//!
//! The bridge never talks to Slack directly; it goes through
//! [`ChatClient`], which the Slack service implements and tests replace
//! with an in-memory recorder.

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::key::ReplyContext;

/// Handle to a message the bridge has posted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageRef {
    /// Channel the message lives in.
    pub channel: String,
    /// Platform message identifier (Slack `ts`).
    pub id: String,
}

/// How message text should be interpreted by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Markup {
    /// Platform rich markup (Slack mrkdwn).
    Rich,
    /// Literal text.
    Plain,
}

/// Classified chat platform failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    /// The edit carried identical content; treated as success.
    NotModified,
    /// The platform rejected the markup.
    MarkupRejected(String),
    /// The platform rejected the content as too long.
    TooLong,
    /// The platform asked the caller to slow down.
    RateLimited(Option<Duration>),
    /// Any other failure.
    Other(String),
}

impl Display for ChatError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotModified => f.write_str("message not modified"),
            Self::MarkupRejected(msg) => write!(f, "markup rejected: {msg}"),
            Self::TooLong => f.write_str("message too long"),
            Self::RateLimited(Some(after)) => {
                write!(f, "rate limited, retry after {}s", after.as_secs())
            }
            Self::RateLimited(None) => f.write_str("rate limited"),
            Self::Other(msg) => f.write_str(msg),
        }
    }
}

impl std::error::Error for ChatError {}

/// Boxed future returned by [`ChatClient`] methods.
pub type ChatFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ChatError>> + Send + 'a>>;

/// Minimal message operations the bridge needs from a chat platform.
///
/// Every operation is best-effort; callers log failures and carry on.
pub trait ChatClient: Send + Sync + 'static {
    /// Post a new message to `target`.
    fn create_message<'a>(
        &'a self,
        target: &'a ReplyContext,
        text: &'a str,
        markup: Markup,
    ) -> ChatFuture<'a, MessageRef>;

    /// Replace the content of `message`.
    fn edit_message<'a>(
        &'a self,
        message: &'a MessageRef,
        text: &'a str,
        markup: Markup,
    ) -> ChatFuture<'a, ()>;

    /// Remove `message`.
    fn delete_message<'a>(&'a self, message: &'a MessageRef) -> ChatFuture<'a, ()>;
}
