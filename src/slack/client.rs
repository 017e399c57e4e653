//! Slack Socket Mode client and the [`ChatClient`] implementation.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use slack_morphism::errors::SlackClientError;
use slack_morphism::prelude::{
    SlackApiChatDeleteRequest, SlackApiChatPostMessageRequest, SlackApiChatUpdateRequest,
    SlackApiToken, SlackApiTokenType, SlackApiTokenValue, SlackChannelId, SlackClient,
    SlackClientEventsListenerEnvironment, SlackClientHyperHttpsConnector, SlackClientSession,
    SlackClientSocketModeConfig, SlackClientSocketModeListener, SlackMessageContent,
    SlackSocketModeListenerCallbacks, SlackTs,
};
use tokio::{task::JoinHandle, time::sleep};
use tracing::{debug, error, info, warn};

use crate::models::key::ReplyContext;
use crate::render::chat::{ChatClient, ChatError, ChatFuture, Markup, MessageRef};
use crate::slack::{blocks, commands, events};
use crate::state::AppState;
use crate::{config::SlackConfig, AppError, Result};

const INITIAL_RETRY_DELAY: Duration = Duration::from_secs(1);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Slack Web API and Socket Mode wrapper.
pub struct SlackService {
    client: Arc<SlackClient<SlackClientHyperHttpsConnector>>,
    bot_token: SlackApiToken,
    app_token: SlackApiToken,
}

impl SlackService {
    /// Build the Slack client from loaded credentials.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Slack` if the HTTPS connector cannot be created.
    pub fn new(config: &SlackConfig) -> Result<Self> {
        let connector = SlackClientHyperHttpsConnector::new()
            .map_err(|err| AppError::Slack(format!("failed to init slack connector: {err}")))?;
        let client = Arc::new(SlackClient::new(connector));
        let bot_token = SlackApiToken {
            token_value: SlackApiTokenValue(config.bot_token.clone()),
            cookie: None,
            team_id: None,
            scope: None,
            token_type: Some(SlackApiTokenType::Bot),
        };
        let app_token = SlackApiToken {
            token_value: SlackApiTokenValue(config.app_token.clone()),
            cookie: None,
            team_id: None,
            scope: None,
            token_type: Some(SlackApiTokenType::App),
        };

        Ok(Self {
            client,
            bot_token,
            app_token,
        })
    }

    /// Start the Socket Mode listener, routing events with `state`.
    #[must_use]
    pub fn spawn_socket_mode(&self, state: Arc<AppState>) -> JoinHandle<()> {
        let listener_env = Arc::new(
            SlackClientEventsListenerEnvironment::new(Arc::clone(&self.client))
                .with_error_handler(|err, _client, _state| {
                    error!(?err, "socket mode error");
                    axum::http::StatusCode::INTERNAL_SERVER_ERROR
                })
                .with_user_state(state),
        );
        let callbacks = SlackSocketModeListenerCallbacks::new()
            .with_hello_events(|event, _client, _state| async move {
                info!(?event, "socket hello");
            })
            .with_command_events(commands::handle_command)
            .with_push_events(events::handle_push_event);
        let config = SlackClientSocketModeConfig {
            max_connections_count: SlackClientSocketModeConfig::DEFAULT_CONNECTIONS_COUNT,
            debug_connections: SlackClientSocketModeConfig::DEFAULT_DEBUG_CONNECTIONS,
            initial_backoff_in_seconds:
                SlackClientSocketModeConfig::DEFAULT_INITIAL_BACKOFF_IN_SECONDS,
            reconnect_timeout_in_seconds:
                SlackClientSocketModeConfig::DEFAULT_RECONNECT_TIMEOUT_IN_SECONDS,
            ping_interval_in_seconds: SlackClientSocketModeConfig::DEFAULT_PING_INTERVAL_IN_SECONDS,
            ping_failure_threshold_times:
                SlackClientSocketModeConfig::DEFAULT_PING_FAILURE_THRESHOLD_TIMES,
        };

        let listener = SlackClientSocketModeListener::new(&config, listener_env, callbacks);
        let app_token = self.app_token.clone();
        tokio::spawn(async move {
            if let Err(error) = listener.listen_for(&app_token).await {
                error!(?error, "socket mode listen failed");
                return;
            }

            listener.serve().await;
            info!("socket mode listener exited");
        })
    }

    /// Create an HTTP session for direct API calls using the bot token.
    #[must_use]
    pub fn http_session(&self) -> SlackClientSession<'_, SlackClientHyperHttpsConnector> {
        self.client.open_session(&self.bot_token)
    }

    async fn post(
        &self,
        target: &ReplyContext,
        text: &str,
        markup: Markup,
    ) -> std::result::Result<MessageRef, ChatError> {
        let request = SlackApiChatPostMessageRequest {
            channel: SlackChannelId(target.channel.clone()),
            content: message_content(text, markup),
            as_user: None,
            icon_emoji: None,
            icon_url: None,
            link_names: Some(true),
            parse: None,
            thread_ts: target.thread.clone().map(SlackTs),
            username: None,
            reply_broadcast: None,
            unfurl_links: Some(false),
            unfurl_media: Some(false),
        };
        let session = self.http_session();
        let response = retry_rate_limited(|| session.chat_post_message(&request))
            .await
            .map_err(classify)?;
        debug!(channel = %target.channel, ts = %response.ts, "posted slack message");
        Ok(MessageRef {
            channel: response.channel.to_string(),
            id: response.ts.to_string(),
        })
    }

    async fn update(
        &self,
        message: &MessageRef,
        text: &str,
        markup: Markup,
    ) -> std::result::Result<(), ChatError> {
        let request = SlackApiChatUpdateRequest::new(
            SlackChannelId(message.channel.clone()),
            message_content(text, markup),
            SlackTs(message.id.clone()),
        );
        let session = self.http_session();
        retry_rate_limited(|| session.chat_update(&request))
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn delete(&self, message: &MessageRef) -> std::result::Result<(), ChatError> {
        let request = SlackApiChatDeleteRequest::new(
            SlackChannelId(message.channel.clone()),
            SlackTs(message.id.clone()),
        );
        let session = self.http_session();
        retry_rate_limited(|| session.chat_delete(&request))
            .await
            .map_err(classify)?;
        Ok(())
    }
}

impl ChatClient for SlackService {
    fn create_message<'a>(
        &'a self,
        target: &'a ReplyContext,
        text: &'a str,
        markup: Markup,
    ) -> ChatFuture<'a, MessageRef> {
        Box::pin(self.post(target, text, markup))
    }

    fn edit_message<'a>(
        &'a self,
        message: &'a MessageRef,
        text: &'a str,
        markup: Markup,
    ) -> ChatFuture<'a, ()> {
        Box::pin(self.update(message, text, markup))
    }

    fn delete_message<'a>(&'a self, message: &'a MessageRef) -> ChatFuture<'a, ()> {
        Box::pin(self.delete(message))
    }
}

fn message_content(text: &str, markup: Markup) -> SlackMessageContent {
    let block = match markup {
        Markup::Rich => blocks::markdown_section(text),
        Markup::Plain => blocks::plain_section(text),
    };
    SlackMessageContent {
        text: Some(text.to_owned()),
        blocks: Some(vec![block]),
        attachments: None,
        upload: None,
        files: None,
        reactions: None,
        metadata: None,
        markdown_text: None,
    }
}

/// Retry `op` while Slack answers with a rate-limit error, honouring its
/// `Retry-After` hint.
async fn retry_rate_limited<T, F, Fut>(mut op: F) -> std::result::Result<T, SlackClientError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, SlackClientError>>,
{
    let mut backoff = INITIAL_RETRY_DELAY;
    let mut attempts = 0;
    loop {
        match op().await {
            Err(SlackClientError::RateLimitError(rate)) if attempts < MAX_RATE_LIMIT_RETRIES => {
                let delay = rate.retry_after.unwrap_or(backoff);
                warn!(delay = ?delay, attempts, "slack rate limited; retrying");
                sleep(delay).await;
                backoff = (backoff * 2).min(MAX_RETRY_DELAY);
                attempts += 1;
            }
            other => return other,
        }
    }
}

/// Map a Slack client error onto the platform-neutral taxonomy.
#[must_use]
pub fn classify(err: SlackClientError) -> ChatError {
    match err {
        SlackClientError::ApiError(api) => classify_api_code(&api.code),
        SlackClientError::RateLimitError(rate) => ChatError::RateLimited(rate.retry_after),
        other => ChatError::Other(other.to_string()),
    }
}

/// Map a Slack Web API error code onto the platform-neutral taxonomy.
#[must_use]
pub fn classify_api_code(code: &str) -> ChatError {
    match code {
        "invalid_blocks" | "invalid_blocks_format" => ChatError::MarkupRejected(code.to_owned()),
        "msg_too_long" | "msg_blocks_too_long" => ChatError::TooLong,
        "ratelimited" => ChatError::RateLimited(None),
        other => ChatError::Other(format!("slack api error: {other}")),
    }
}
