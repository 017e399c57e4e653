//! Adaptive output renderer.
//!
//! Turns one run's [`DomainEvent`] stream into a small number of chat
//! messages. Consecutive events of the same kind accumulate in one live
//! message that is edited in place; a change of kind finalizes the live
//! message and opens a new one.
//!
//! # Modes
//!
//! | Mode       | Opened by          | Message content                         |
//! |------------|--------------------|-----------------------------------------|
//! | `Idle`     | start, finalize    | none                                    |
//! | `Text`     | `TextDelta`        | accumulated response text               |
//! | `ToolLog`  | `ToolInvocation`   | one line per tool call                  |
//! | `Thinking` | `ThinkingStart`    | header plus accumulated thinking text   |
//!
//! Edits are throttled to one per `edit_interval`; changes arriving faster
//! are marked pending and flushed by [`Renderer::tick`]. Finalizing always
//! flushes immediately.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::models::event::DomainEvent;
use crate::models::key::ReplyContext;
use crate::models::run::{RunOutcome, StopReason};
use crate::render::chat::{ChatClient, ChatError, Markup, MessageRef};
use crate::render::format;
use crate::render::split::{split_message, split_point};

/// Header shown on a thinking message while the segment is open.
pub const THINKING_HEADER: &str = "\u{1f4ad} _Thinking\u{2026}_\n";

/// Bytes kept free in thinking messages for the header.
const THINKING_HEADER_RESERVE: usize = 40;

/// Attempts made to deliver a final update that keeps getting rate limited.
const FINAL_FLUSH_RETRIES: usize = 3;

/// Notice posted when a run was stopped on request.
pub const STOPPED_NOTICE: &str = "\u{23f9} Stopped.";

/// Notice posted when a run hit its timeout.
pub const TIMED_OUT_NOTICE: &str = "\u{23f1} Run timed out and was stopped.";

/// Renderer limits and pacing.
#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// Largest message body, in bytes.
    pub max_message_chars: usize,
    /// Minimum time between two edits of the same message.
    pub edit_interval: Duration,
    /// Period of the tick that flushes pending edits.
    pub poll_interval: Duration,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            max_message_chars: 3000,
            edit_interval: Duration::from_millis(1500),
            poll_interval: Duration::from_millis(250),
        }
    }
}

/// Externally visible renderer mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    /// No live message.
    Idle,
    /// Accumulating response text.
    Text,
    /// Accumulating tool invocation lines.
    ToolLog,
    /// Accumulating thinking text.
    Thinking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Segment {
    Text,
    ToolLog,
    Thinking,
}

impl Segment {
    fn mode(self) -> RenderMode {
        match self {
            Self::Text => RenderMode::Text,
            Self::ToolLog => RenderMode::ToolLog,
            Self::Thinking => RenderMode::Thinking,
        }
    }
}

#[derive(Debug)]
struct LiveMessage {
    segment: Segment,
    body: String,
    thought_for: Option<Duration>,
    /// Follow-up part of a split thinking segment; shown without a header.
    continuation: bool,
    message: Option<MessageRef>,
    shown: Option<String>,
    last_attempt: Option<Instant>,
    pending: bool,
}

impl LiveMessage {
    fn new(segment: Segment, body: String) -> Self {
        Self {
            segment,
            body,
            thought_for: None,
            continuation: false,
            message: None,
            shown: None,
            last_attempt: None,
            pending: false,
        }
    }

    fn compose(&self) -> String {
        match self.segment {
            Segment::Thinking if self.continuation => self.body.clone(),
            Segment::Thinking => format!("{}{}", thinking_header(self.thought_for), self.body),
            Segment::Text | Segment::ToolLog => self.body.clone(),
        }
    }
}

#[derive(Debug)]
enum Mode {
    Idle,
    Active(LiveMessage),
}

/// Last finalized content message, kept for the metadata line.
#[derive(Debug)]
struct Finalized {
    message: MessageRef,
    text: String,
}

/// First message of a thinking segment that overflowed into follow-ups.
#[derive(Debug)]
struct ThinkingHead {
    message: MessageRef,
    body: String,
}

/// Completion statistics shown after the run.
#[derive(Debug, Clone, Default, PartialEq)]
struct Metadata {
    cost_usd: Option<f64>,
    elapsed: Option<Duration>,
    turns: Option<u32>,
}

impl Metadata {
    fn line(&self) -> Option<String> {
        let mut parts = Vec::new();
        if let Some(cost) = self.cost_usd {
            parts.push(format!("\u{1f4b0} ${cost:.4}"));
        }
        if let Some(elapsed) = self.elapsed {
            parts.push(format!("\u{23f1} {}", format_secs(elapsed)));
        }
        if let Some(turns) = self.turns {
            let unit = if turns == 1 { "turn" } else { "turns" };
            parts.push(format!("\u{1f504} {turns} {unit}"));
        }
        if parts.is_empty() {
            None
        } else {
            Some(format!("_{}_", parts.join(" \u{b7} ")))
        }
    }
}

/// Chat-side half of the renderer: posting and editing with fallback.
struct Outbox<C: ChatClient> {
    chat: Arc<C>,
    target: ReplyContext,
    config: RenderConfig,
}

impl<C: ChatClient> Outbox<C> {
    async fn create(&self, markdown: &str) -> Result<MessageRef, ChatError> {
        let rich = format::to_rich(markdown);
        match self.chat.create_message(&self.target, &rich, Markup::Rich).await {
            Err(err @ (ChatError::MarkupRejected(_) | ChatError::TooLong)) => {
                debug!(error = %err, "rich post rejected, retrying as plain text");
                let plain = format::to_plain(markdown);
                self.chat
                    .create_message(&self.target, &plain, Markup::Plain)
                    .await
            }
            other => other,
        }
    }

    async fn edit(&self, message: &MessageRef, markdown: &str) -> Result<(), ChatError> {
        let rich = format::to_rich(markdown);
        let result = match self.chat.edit_message(message, &rich, Markup::Rich).await {
            Err(err @ (ChatError::MarkupRejected(_) | ChatError::TooLong)) => {
                debug!(error = %err, "rich edit rejected, retrying as plain text");
                let plain = format::to_plain(markdown);
                self.chat.edit_message(message, &plain, Markup::Plain).await
            }
            other => other,
        };
        match result {
            Err(ChatError::NotModified) => Ok(()),
            other => other,
        }
    }

    /// Post a standalone notice, split if needed. Failures are logged.
    async fn notice(&self, markdown: &str) {
        for chunk in split_message(markdown, self.config.max_message_chars) {
            if let Err(err) = self.create(&chunk).await {
                warn!(error = %err, "failed to post notice");
            }
        }
    }

    /// Bring the live message's chat copy up to date.
    ///
    /// Without `force`, an edit within `edit_interval` of the previous
    /// attempt is deferred and the message marked pending. With `force`, a
    /// rate-limited update is retried after the advertised delay, up to
    /// [`FINAL_FLUSH_RETRIES`] times.
    async fn flush(&self, live: &mut LiveMessage, force: bool) {
        let rendered = live.compose();
        if live.shown.as_deref() == Some(rendered.as_str()) {
            live.pending = false;
            return;
        }
        if !force
            && live
                .last_attempt
                .is_some_and(|at| at.elapsed() < self.config.edit_interval)
        {
            live.pending = true;
            return;
        }

        let mut retries = 0;
        loop {
            live.last_attempt = Some(Instant::now());
            let result = match &live.message {
                Some(message) => self.edit(message, &rendered).await,
                None => self.create(&rendered).await.map(|message| {
                    live.message = Some(message);
                }),
            };

            match result {
                Ok(()) => {
                    live.shown = Some(rendered);
                    live.pending = false;
                    return;
                }
                Err(ChatError::RateLimited(after)) if force && retries < FINAL_FLUSH_RETRIES => {
                    retries += 1;
                    let wait = after.unwrap_or(self.config.edit_interval);
                    debug!(?wait, retries, "final message update rate limited, retrying");
                    tokio::time::sleep(wait).await;
                }
                Err(ChatError::RateLimited(after)) => {
                    debug!(?after, "message update rate limited, will retry");
                    live.pending = true;
                    return;
                }
                Err(err) => {
                    warn!(error = %err, "failed to update live message");
                    live.pending = !force;
                    return;
                }
            }
        }
    }
}

/// Renders one run's events into chat messages.
pub struct Renderer<C: ChatClient> {
    out: Outbox<C>,
    mode: Mode,
    last_content: Option<Finalized>,
    thinking_head: Option<ThinkingHead>,
    metadata: Option<Metadata>,
}

impl<C: ChatClient> Renderer<C> {
    /// Create an idle renderer posting to `target`.
    pub fn new(chat: Arc<C>, target: ReplyContext, config: RenderConfig) -> Self {
        Self {
            out: Outbox {
                chat,
                target,
                config,
            },
            mode: Mode::Idle,
            last_content: None,
            thinking_head: None,
            metadata: None,
        }
    }

    /// Current mode.
    #[must_use]
    pub fn mode(&self) -> RenderMode {
        match &self.mode {
            Mode::Idle => RenderMode::Idle,
            Mode::Active(live) => live.segment.mode(),
        }
    }

    /// Whether a throttled edit is waiting for the next tick.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        matches!(&self.mode, Mode::Active(live) if live.pending)
    }

    /// Apply one event.
    pub async fn handle(&mut self, event: DomainEvent) {
        match event {
            DomainEvent::TextDelta(text) => {
                self.append(Segment::Text, &text).await;
            }
            DomainEvent::ToolInvocation { name, detail } => {
                let line = if detail.is_empty() {
                    format!("\u{1f527} **{name}**\n")
                } else {
                    format!("\u{1f527} **{name}** `{}`\n", detail.replace('`', "'"))
                };
                self.append(Segment::ToolLog, &line).await;
            }
            DomainEvent::ThinkingStart => {
                self.finalize().await;
                self.thinking_head = None;
                self.mode = Mode::Active(LiveMessage::new(Segment::Thinking, String::new()));
            }
            DomainEvent::ThinkingDelta(text) => {
                self.append(Segment::Thinking, &text).await;
            }
            DomainEvent::ThinkingDone { elapsed } => self.thinking_done(elapsed).await,
            DomainEvent::Completion {
                cost_usd,
                elapsed,
                turns,
                ..
            } => {
                self.metadata = Some(Metadata {
                    cost_usd,
                    elapsed,
                    turns,
                });
            }
            DomainEvent::Error { message } => {
                self.finalize().await;
                self.out.notice(&format!("\u{26a0}\u{fe0f} {message}")).await;
            }
        }
    }

    /// Flush a throttled edit if one is pending and the interval has passed.
    pub async fn tick(&mut self) {
        if let Mode::Active(live) = &mut self.mode {
            if live.pending {
                self.out.flush(live, false).await;
            }
        }
    }

    /// Finalize output after the event stream has ended.
    pub async fn finish(&mut self, outcome: &RunOutcome) {
        self.finalize().await;

        match outcome {
            RunOutcome::Stopped(StopReason::User) => self.out.notice(STOPPED_NOTICE).await,
            RunOutcome::Stopped(StopReason::Timeout) => self.out.notice(TIMED_OUT_NOTICE).await,
            RunOutcome::Completed | RunOutcome::Failed { .. } => {}
        }

        let Some(line) = self.metadata.take().and_then(|meta| meta.line()) else {
            return;
        };

        if let Some(last) = &self.last_content {
            let combined = format!("{}\n\n{line}", last.text);
            if combined.len() <= self.out.config.max_message_chars {
                match self.out.edit(&last.message, &combined).await {
                    Ok(()) => return,
                    Err(err) => warn!(error = %err, "failed to append run metadata"),
                }
            }
        }
        self.out.notice(&line).await;
    }

    async fn append(&mut self, segment: Segment, text: &str) {
        if text.is_empty() {
            return;
        }
        if !matches!(&self.mode, Mode::Active(live) if live.segment == segment) {
            self.finalize().await;
            self.mode = Mode::Active(LiveMessage::new(segment, String::new()));
        }
        if let Mode::Active(live) = &mut self.mode {
            live.body.push_str(text);
        }
        self.split_overflow().await;
        if let Mode::Active(live) = &mut self.mode {
            self.out.flush(live, false).await;
        }
    }

    /// Move overflowing text into follow-up messages until the live body
    /// fits.
    async fn split_overflow(&mut self) {
        loop {
            let Mode::Active(live) = &mut self.mode else {
                return;
            };
            let capacity = capacity(&self.out.config, live.segment);
            if live.body.len() <= capacity {
                return;
            }

            let cut = split_point(&live.body, capacity);
            let rest = live.body.split_off(cut);
            let segment = live.segment;
            let head_body = (segment == Segment::Thinking && !live.continuation)
                .then(|| live.body.clone());
            let closed = self.finalize().await;
            if let (Some(body), Some(message)) = (head_body, closed) {
                self.thinking_head = Some(ThinkingHead { message, body });
            }
            let mut next = LiveMessage::new(segment, rest);
            next.continuation = segment == Segment::Thinking;
            self.mode = Mode::Active(next);
        }
    }

    async fn thinking_done(&mut self, elapsed: Duration) {
        match &mut self.mode {
            Mode::Active(live) if live.segment == Segment::Thinking => {
                if live.body.trim().is_empty() && live.message.is_none() && !live.continuation {
                    self.mode = Mode::Idle;
                    let text = thinking_header(Some(elapsed)).trim_end().to_owned();
                    match self.out.create(&text).await {
                        Ok(message) => self.last_content = Some(Finalized { message, text }),
                        Err(err) => warn!(error = %err, "failed to post thinking summary"),
                    }
                } else {
                    live.thought_for = Some(elapsed);
                    self.finalize().await;
                    if let Some(head) = self.thinking_head.take() {
                        let text = format!("{}{}", thinking_header(Some(elapsed)), head.body);
                        if let Err(err) = self.out.edit(&head.message, &text).await {
                            warn!(error = %err, "failed to annotate thinking message");
                        }
                    }
                }
            }
            _ => debug!("thinking close without an open thinking message"),
        }
    }

    /// Flush and close the live message, if any.
    ///
    /// Returns the closed message when its chat copy is up to date; only
    /// such a message may later receive the metadata line.
    async fn finalize(&mut self) -> Option<MessageRef> {
        let Mode::Active(mut live) = std::mem::replace(&mut self.mode, Mode::Idle) else {
            return None;
        };
        if live.body.is_empty() && live.thought_for.is_none() {
            return None;
        }
        self.out.flush(&mut live, true).await;
        let current = live.compose();
        match (live.message, live.shown) {
            (Some(message), Some(text)) if text == current => {
                self.last_content = Some(Finalized {
                    message: message.clone(),
                    text,
                });
                Some(message)
            }
            (Some(_), _) => {
                warn!("final message update was not delivered");
                self.last_content = None;
                None
            }
            (None, _) => None,
        }
    }
}

fn thinking_header(elapsed: Option<Duration>) -> String {
    elapsed.map_or_else(
        || THINKING_HEADER.to_owned(),
        |elapsed| format!("\u{1f4ad} _Thought for {}_\n", format_secs(elapsed)),
    )
}

/// Body bytes available to one message of `segment`.
fn capacity(config: &RenderConfig, segment: Segment) -> usize {
    let max = config.max_message_chars;
    match segment {
        Segment::Thinking => max.saturating_sub(THINKING_HEADER_RESERVE).max(1),
        Segment::Text | Segment::ToolLog => max,
    }
}

/// Format a duration as seconds with one decimal, e.g. `12.3s`.
#[must_use]
pub fn format_secs(elapsed: Duration) -> String {
    format!("{:.1}s", elapsed.as_secs_f64())
}
