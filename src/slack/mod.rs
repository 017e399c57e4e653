//! Slack surface: Socket Mode client, message submissions, and the
//! `/relay` command.

pub mod blocks;
pub mod client;
pub mod commands;
pub mod events;
