//! Typed agent output events.

use std::time::Duration;

/// A parsed, typed unit of agent output.
///
/// Events of one run are delivered strictly in the order the agent emitted
/// the underlying records.
#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    /// Fragment of assistant response text.
    TextDelta(String),
    /// The agent invoked a tool; emitted once the call's arguments are complete.
    ToolInvocation {
        /// Tool name as reported by the agent (e.g. `Bash`, `Read`).
        name: String,
        /// One-line summary of the arguments; empty when unavailable.
        detail: String,
    },
    /// A thinking segment opened.
    ThinkingStart,
    /// Fragment of thinking text.
    ThinkingDelta(String),
    /// A thinking segment closed.
    ThinkingDone {
        /// Wall-clock time between the segment's open and close records.
        elapsed: Duration,
    },
    /// The agent finished its turn.
    Completion {
        /// Session token usable to resume the conversation.
        session_token: Option<String>,
        /// Total cost reported by the agent, in US dollars.
        cost_usd: Option<f64>,
        /// Total wall-clock duration reported by the agent.
        elapsed: Option<Duration>,
        /// Number of agent turns.
        turns: Option<u32>,
    },
    /// The run failed; terminal for the run.
    Error {
        /// Human-readable failure description.
        message: String,
    },
}
