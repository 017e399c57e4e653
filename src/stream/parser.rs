//! Line-level parser for the agent's stream-JSON output.
//!
//! Each complete line is one JSON record. [`StreamParser`] turns records
//! into [`DomainEvent`]s with a two-level state machine: the outer level
//! dispatches on the record type, the inner level tracks the single open
//! content block so that multi-fragment values (tool-call arguments) are
//! assembled before anything is emitted.
//!
//! # Recognized records
//!
//! | Record                                          | Emits                                   |
//! |-------------------------------------------------|-----------------------------------------|
//! | `system` (`init`)                               | nothing; remembers `session_id`         |
//! | `stream_event` / `content_block_start` thinking | [`DomainEvent::ThinkingStart`]          |
//! | `stream_event` / `content_block_delta`          | text / thinking deltas, tool fragments  |
//! | `stream_event` / `content_block_stop`           | `ThinkingDone` / `ToolInvocation`       |
//! | `result`                                        | optional `Error`, then `Completion`     |
//! | *(any other)*                                   | skipped; logged at `DEBUG`              |

use std::time::{Duration, Instant};

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::models::event::DomainEvent;

/// Longest tool detail shown, in characters.
pub const MAX_TOOL_DETAIL_CHARS: usize = 80;

/// Argument keys inspected, in order, to summarize a tool call.
const TOOL_DETAIL_KEYS: &[&str] = &[
    "command",
    "file_path",
    "path",
    "pattern",
    "url",
    "query",
    "description",
    "prompt",
];

// ── Wire records ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Record {
    System {
        #[serde(default)]
        session_id: Option<String>,
    },
    StreamEvent {
        event: StreamEvent,
    },
    Result(ResultRecord),
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    ContentBlockStart {
        index: usize,
        content_block: ContentBlock,
    },
    ContentBlockDelta {
        index: usize,
        delta: Delta,
    },
    ContentBlockStop {
        index: usize,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {},
    Thinking {},
    ToolUse {
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Delta {
    TextDelta { text: String },
    ThinkingDelta { thinking: String },
    InputJsonDelta { partial_json: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ResultRecord {
    #[serde(default)]
    subtype: Option<String>,
    #[serde(default)]
    is_error: bool,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    total_cost_usd: Option<f64>,
    #[serde(default)]
    duration_ms: Option<u64>,
    #[serde(default)]
    num_turns: Option<u32>,
}

// ── Open-block cursor ─────────────────────────────────────────────────────────

#[derive(Debug)]
enum OpenBlock {
    Text {
        index: usize,
    },
    Thinking {
        index: usize,
        opened: Instant,
    },
    Tool {
        index: usize,
        name: String,
        initial_input: Value,
        fragments: String,
    },
}

impl OpenBlock {
    fn index(&self) -> usize {
        match self {
            Self::Text { index } | Self::Thinking { index, .. } | Self::Tool { index, .. } => {
                *index
            }
        }
    }
}

// ── Parser ────────────────────────────────────────────────────────────────────

/// Stateful record parser for one run.
#[derive(Debug, Default)]
pub struct StreamParser {
    cursor: Option<OpenBlock>,
    session_token: Option<String>,
}

impl StreamParser {
    /// Create a parser with no open block.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Session token announced by the agent so far, if any.
    #[must_use]
    pub fn session_token(&self) -> Option<&str> {
        self.session_token.as_deref()
    }

    /// Parse one complete line, timestamping block transitions with the
    /// current instant.
    pub fn parse_line(&mut self, line: &str) -> Vec<DomainEvent> {
        self.parse_line_at(line, Instant::now())
    }

    /// Parse one complete line observed at `now`.
    ///
    /// Empty lines, unknown record types, and malformed JSON produce no
    /// events; malformed lines are logged and otherwise ignored.
    pub fn parse_line_at(&mut self, line: &str, now: Instant) -> Vec<DomainEvent> {
        let line = line.trim();
        if line.is_empty() {
            return Vec::new();
        }

        let record: Record = match serde_json::from_str(line) {
            Ok(record) => record,
            Err(err) => {
                warn!(error = %err, "skipping malformed agent output line");
                return Vec::new();
            }
        };

        let mut events = Vec::new();
        match record {
            Record::System { session_id } => {
                if let Some(token) = session_id {
                    debug!(session_token = %token, "agent announced session");
                    self.session_token = Some(token);
                }
            }
            Record::StreamEvent { event } => self.on_stream_event(event, now, &mut events),
            Record::Result(result) => self.on_result(result, &mut events),
            Record::Other => {}
        }
        events
    }

    /// Signal end of stream. A block still open here is incomplete and is
    /// dropped without emitting anything.
    pub fn finish(&mut self) {
        if let Some(block) = self.cursor.take() {
            debug!(index = block.index(), "discarding content block left open at end of stream");
        }
    }

    fn on_stream_event(&mut self, event: StreamEvent, now: Instant, out: &mut Vec<DomainEvent>) {
        match event {
            StreamEvent::ContentBlockStart {
                index,
                content_block,
            } => {
                if let Some(previous) = self.cursor.take() {
                    close_block(previous, now, out);
                }
                self.cursor = match content_block {
                    ContentBlock::Text {} => Some(OpenBlock::Text { index }),
                    ContentBlock::Thinking {} => {
                        out.push(DomainEvent::ThinkingStart);
                        Some(OpenBlock::Thinking { index, opened: now })
                    }
                    ContentBlock::ToolUse { name, input } => Some(OpenBlock::Tool {
                        index,
                        name,
                        initial_input: input,
                        fragments: String::new(),
                    }),
                    ContentBlock::Other => None,
                };
            }
            StreamEvent::ContentBlockDelta { index, delta } => match delta {
                Delta::TextDelta { text } if !text.is_empty() => {
                    out.push(DomainEvent::TextDelta(text));
                }
                Delta::ThinkingDelta { thinking } if !thinking.is_empty() => {
                    out.push(DomainEvent::ThinkingDelta(thinking));
                }
                Delta::InputJsonDelta { partial_json } => match self.cursor.as_mut() {
                    Some(OpenBlock::Tool {
                        index: open,
                        fragments,
                        ..
                    }) if *open == index => fragments.push_str(&partial_json),
                    _ => debug!(index, "tool argument fragment without matching open block"),
                },
                _ => {}
            },
            StreamEvent::ContentBlockStop { index } => {
                if self.cursor.as_ref().is_some_and(|block| block.index() == index) {
                    if let Some(block) = self.cursor.take() {
                        close_block(block, now, out);
                    }
                }
            }
            StreamEvent::Other => {}
        }
    }

    fn on_result(&mut self, result: ResultRecord, out: &mut Vec<DomainEvent>) {
        if let Some(block) = self.cursor.take() {
            debug!(index = block.index(), "result arrived with an open content block");
        }

        if result.is_error {
            let message = result
                .result
                .filter(|text| !text.trim().is_empty())
                .or(result.subtype)
                .unwrap_or_else(|| "agent reported an error".to_owned());
            out.push(DomainEvent::Error { message });
        }

        if result.session_id.is_some() {
            self.session_token.clone_from(&result.session_id);
        }

        out.push(DomainEvent::Completion {
            session_token: self.session_token.clone(),
            cost_usd: result.total_cost_usd,
            elapsed: result.duration_ms.map(Duration::from_millis),
            turns: result.num_turns,
        });
    }
}

fn close_block(block: OpenBlock, now: Instant, out: &mut Vec<DomainEvent>) {
    match block {
        OpenBlock::Text { .. } => {}
        OpenBlock::Thinking { opened, .. } => out.push(DomainEvent::ThinkingDone {
            elapsed: now.saturating_duration_since(opened),
        }),
        OpenBlock::Tool {
            name,
            initial_input,
            fragments,
            ..
        } => {
            let detail = if fragments.trim().is_empty() {
                summarize_tool_input(&initial_input)
            } else {
                match serde_json::from_str::<Value>(&fragments) {
                    Ok(input) => summarize_tool_input(&input),
                    Err(err) => {
                        debug!(tool = %name, error = %err, "tool arguments did not parse");
                        String::new()
                    }
                }
            };
            out.push(DomainEvent::ToolInvocation { name, detail });
        }
    }
}

/// One-line summary of a tool call's arguments.
///
/// Picks the first string argument among well-known keys, keeps only its
/// first line, and truncates it to [`MAX_TOOL_DETAIL_CHARS`].
#[must_use]
pub fn summarize_tool_input(input: &Value) -> String {
    let Some(args) = input.as_object() else {
        return String::new();
    };

    let Some(raw) = TOOL_DETAIL_KEYS
        .iter()
        .find_map(|key| args.get(*key).and_then(Value::as_str))
    else {
        return String::new();
    };

    let first_line = raw.lines().next().unwrap_or_default().trim();
    if first_line.chars().count() <= MAX_TOOL_DETAIL_CHARS {
        return first_line.to_owned();
    }
    let mut short: String = first_line.chars().take(MAX_TOOL_DETAIL_CHARS - 1).collect();
    short.push('\u{2026}');
    short
}
