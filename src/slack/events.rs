//! Slack push event handler.
//!
//! Channel and DM messages from authorized users become bridge
//! submissions. The reply goes to the message's thread, so each thread
//! reads as one conversation with the agent.

use std::sync::Arc;

use slack_morphism::prelude::{
    SlackClient, SlackClientEventsUserState, SlackClientHyperHttpsConnector,
    SlackEventCallbackBody, SlackMessageEvent, SlackPushEventCallback,
};
use tracing::{debug, info, warn};

use crate::config::GlobalConfig;
use crate::models::key::{ConcurrencyKey, ReplyContext};
use crate::state::AppState;

/// A chat message accepted as agent input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    /// Slack user who wrote the message.
    pub user: String,
    /// Channel the message was posted in.
    pub channel: String,
    /// Thread to reply in: the message's thread, or the message itself.
    pub thread: String,
    /// Message text.
    pub text: String,
}

impl Submission {
    /// Concurrency key for this submission under `config`.
    #[must_use]
    pub fn key(&self, config: &GlobalConfig) -> ConcurrencyKey {
        ConcurrencyKey::new(self.user.clone(), config.workspace_for_channel(&self.channel))
    }

    /// Where replies to this submission go.
    #[must_use]
    pub fn origin(&self) -> ReplyContext {
        ReplyContext::thread(self.channel.clone(), self.thread.clone())
    }
}

/// Extract a submission from a message event.
///
/// Edits, deletions, bot posts, and other subtyped messages are ignored,
/// as are messages without a user, channel, or text.
#[must_use]
pub fn submission_from_message(message: &SlackMessageEvent) -> Option<Submission> {
    if message.subtype.is_some() || message.sender.bot_id.is_some() {
        return None;
    }
    let user = message.sender.user.as_ref()?.to_string();
    let channel = message.origin.channel.as_ref()?.to_string();
    let text = message
        .content
        .as_ref()
        .and_then(|content| content.text.as_deref())
        .map(str::trim)
        .filter(|text| !text.is_empty())?
        .to_owned();
    let thread = message
        .origin
        .thread_ts
        .as_ref()
        .unwrap_or(&message.origin.ts)
        .to_string();

    Some(Submission {
        user,
        channel,
        thread,
        text,
    })
}

/// Handle push events delivered via Socket Mode.
///
/// # Errors
///
/// Never fails; problems are logged and the event is dropped.
pub async fn handle_push_event(
    event: SlackPushEventCallback,
    _client: Arc<SlackClient<SlackClientHyperHttpsConnector>>,
    state: SlackClientEventsUserState,
) -> slack_morphism::UserCallbackResult<()> {
    let SlackEventCallbackBody::Message(message) = event.event else {
        debug!("ignoring non-message push event");
        return Ok(());
    };

    let app_state: Option<Arc<AppState>> = {
        let guard = state.read().await;
        guard.get_user_state::<Arc<AppState>>().cloned()
    };
    let Some(app) = app_state else {
        warn!("app state not available; dropping message event");
        return Ok(());
    };

    let Some(submission) = submission_from_message(&message) else {
        return Ok(());
    };

    if app.config.ensure_authorized(&submission.user).is_err() {
        warn!(
            user_id = submission.user,
            "unauthorized user sent a message (silently ignored)"
        );
        return Ok(());
    }

    let key = submission.key(&app.config);
    match app
        .bridge
        .submit(key.clone(), submission.text.clone(), submission.origin())
        .await
    {
        Ok(outcome) => info!(%key, ?outcome, "message submitted"),
        Err(err) => warn!(%key, %err, "message submission failed"),
    }
    Ok(())
}
