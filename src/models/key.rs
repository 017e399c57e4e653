//! Concurrency key and reply routing context.

use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Unit of mutual exclusion: at most one agent run is live per key.
///
/// Two submissions from the same actor against different workspaces run
/// independently; two submissions against the same workspace serialize.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConcurrencyKey {
    /// Chat user identity that owns the run.
    pub actor: String,
    /// Workspace directory the agent runs in.
    pub workspace: PathBuf,
}

impl ConcurrencyKey {
    /// Build a key from an actor ID and a workspace path.
    pub fn new(actor: impl Into<String>, workspace: impl Into<PathBuf>) -> Self {
        Self {
            actor: actor.into(),
            workspace: workspace.into(),
        }
    }

    /// Workspace directory for this key.
    #[must_use]
    pub fn workspace(&self) -> &Path {
        &self.workspace
    }
}

impl Display for ConcurrencyKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.actor, self.workspace.display())
    }
}

/// Where a run's output should be posted.
///
/// Chat-platform agnostic: for Slack `channel` is the channel ID and
/// `thread` the parent message timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyContext {
    /// Conversation or channel identifier.
    pub channel: String,
    /// Optional thread anchor inside the conversation.
    pub thread: Option<String>,
}

impl ReplyContext {
    /// Reply context for a top-level channel post.
    pub fn channel(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            thread: None,
        }
    }

    /// Reply context for a threaded reply.
    pub fn thread(channel: impl Into<String>, thread: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            thread: Some(thread.into()),
        }
    }
}
