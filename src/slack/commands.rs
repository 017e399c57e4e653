//! `/relay` slash command router.
//!
//! | Sub-command | Effect                                                  |
//! |-------------|---------------------------------------------------------|
//! | `stop`      | stop the live run; queued messages run next             |
//! | `stopall`   | stop every live run of the caller                       |
//! | `drain`     | run queued messages now                                 |
//! | `discard`   | drop queued messages and stop the live run              |
//! | `new`       | forget the session so the next message starts fresh     |
//! | `status`    | list live runs and queue depths                         |

use std::fmt::Write as _;
use std::sync::Arc;

use slack_morphism::prelude::{
    SlackClient, SlackClientEventsUserState, SlackClientHyperHttpsConnector, SlackCommandEvent,
    SlackCommandEventResponse, SlackMessageContent, SlackMessageResponseType,
};
use tracing::{info, warn};

use crate::config::GlobalConfig;
use crate::models::key::ConcurrencyKey;
use crate::models::run::BridgeStatus;
use crate::orchestrator::bridge::Bridge;
use crate::render::chat::ChatClient;
use crate::state::AppState;

/// Usage text shown for `help` and unknown sub-commands.
pub const USAGE: &str = "Usage: `/relay stop | stopall | drain | discard | new | status`";

/// Handle incoming slash commands routed via Socket Mode.
///
/// # Errors
///
/// Returns an error if the command response cannot be constructed.
pub async fn handle_command(
    event: SlackCommandEvent,
    _client: Arc<SlackClient<SlackClientHyperHttpsConnector>>,
    state: SlackClientEventsUserState,
) -> slack_morphism::AnyStdResult<SlackCommandEventResponse> {
    info!(command = ?event.command, user = ?event.user_id, "received slash command");

    let app_state: Option<Arc<AppState>> = {
        let guard = state.read().await;
        guard.get_user_state::<Arc<AppState>>().cloned()
    };

    let reply = match app_state {
        Some(app) => {
            let user_id = event.user_id.to_string();
            if app.config.ensure_authorized(&user_id).is_err() {
                warn!(user_id, "unauthorized user attempted slash command");
                "You are not authorized to use this bridge.".to_owned()
            } else {
                run_command(
                    &app.bridge,
                    &app.config,
                    &user_id,
                    &event.channel_id.to_string(),
                    event.text.as_deref().unwrap_or_default(),
                )
                .await
            }
        }
        None => {
            warn!("app state not available; cannot process slash command");
            "The bridge is not ready yet.".to_owned()
        }
    };

    Ok(ephemeral(reply))
}

/// Execute one `/relay` sub-command for `user_id` in `channel_id`.
///
/// Returns the reply text shown to the caller.
pub async fn run_command<C: ChatClient>(
    bridge: &Arc<Bridge<C>>,
    config: &GlobalConfig,
    user_id: &str,
    channel_id: &str,
    text: &str,
) -> String {
    let key = ConcurrencyKey::new(user_id, config.workspace_for_channel(channel_id));
    let verb = text.split_whitespace().next().unwrap_or_default();

    match verb {
        "stop" => {
            if bridge.cancel(&key) {
                "\u{23f9} Stopping the current run. Queued messages will run next.".to_owned()
            } else {
                "Nothing is running here.".to_owned()
            }
        }
        "stopall" => {
            let stopped = bridge.cancel_all(user_id);
            format!("\u{23f9} Stopping {stopped} run(s).")
        }
        "drain" => {
            if bridge.force_drain(&key) {
                "\u{23e9} Running queued messages now.".to_owned()
            } else {
                "Nothing is queued or running here.".to_owned()
            }
        }
        "discard" => {
            let discarded = bridge.abort_and_discard(&key).await;
            format!("\u{1f5d1} Discarded {discarded} queued message(s) and stopped the current run.")
        }
        "new" => {
            bridge.reset_session(&key);
            "\u{2728} The next message starts a fresh session.".to_owned()
        }
        "status" => format_status(&bridge.status()),
        _ => USAGE.to_owned(),
    }
}

/// Human-readable rendering of a status snapshot.
#[must_use]
pub fn format_status(status: &BridgeStatus) -> String {
    if status.runs.is_empty() && status.queues.is_empty() {
        return "Idle: no runs and nothing queued.".to_owned();
    }
    let mut out = String::new();
    for run in &status.runs {
        let _ = writeln!(
            out,
            "\u{25b6} `{}` running since {}{}",
            run.key,
            run.started_at.format("%H:%M:%S UTC"),
            run.stopping
                .map(|reason| format!(" (stopping: {reason})"))
                .unwrap_or_default()
        );
    }
    for queue in &status.queues {
        let _ = writeln!(out, "\u{23f3} `{}`: {} queued", queue.key, queue.depth);
    }
    out.trim_end().to_owned()
}

fn ephemeral(text: String) -> SlackCommandEventResponse {
    SlackCommandEventResponse {
        content: SlackMessageContent {
            text: Some(text),
            blocks: None,
            attachments: None,
            upload: None,
            files: None,
            reactions: None,
            metadata: None,
            markdown_text: None,
        },
        response_type: Some(SlackMessageResponseType::Ephemeral),
    }
}
