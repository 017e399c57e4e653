#![forbid(unsafe_code)]

//! `agent-relay`: relay a command-line coding agent into Slack.
//!
//! Submissions from chat are routed per (user, workspace) key: at most one
//! agent process runs per key, later submissions queue and run together
//! as one batch, and each run's streamed output is rendered into a few
//! throttled, size-bounded chat messages.

pub mod config;
pub mod errors;
pub mod health;
pub mod ipc;
pub mod models;
pub mod orchestrator;
pub mod render;
pub mod slack;
pub mod state;
pub mod stream;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
