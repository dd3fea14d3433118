//! Slack Web API message sink.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::MessageSink;
use crate::error::SinkError;
use crate::message::{Attachment, Message};
use crate::store::MessageReference;

/// Environment variable for the Slack bot token.
const ENV_SLACK_BOT_TOKEN: &str = "SLACK_BOT_TOKEN";
/// Environment variable overriding the Slack API base URL.
const ENV_SLACK_API_URL: &str = "SLACK_API_URL";

/// Default Slack Web API base URL.
pub const SLACK_API_URL: &str = "https://slack.com/api";

/// Sends and updates messages through the Slack Web API.
pub struct SlackSink {
    api_base: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl SlackSink {
    /// Create a Slack sink from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let api_base =
            std::env::var(ENV_SLACK_API_URL).unwrap_or_else(|_| SLACK_API_URL.to_string());
        let token = std::env::var(ENV_SLACK_BOT_TOKEN)
            .ok()
            .filter(|t| !t.is_empty());

        if token.is_some() {
            debug!("Slack sink enabled");
        } else {
            debug!("Slack sink disabled (SLACK_BOT_TOKEN not set)");
        }

        Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            token,
            client: reqwest::Client::new(),
        }
    }

    /// Create a Slack sink with a specific API base URL and bot token.
    #[must_use]
    pub fn new(api_base: &str, token: String) -> Self {
        Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            token: Some(token),
            client: reqwest::Client::new(),
        }
    }

    /// Check if a bot token is configured.
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.token.is_some()
    }

    async fn call<B, R>(&self, method: &'static str, body: &B) -> Result<R, SinkError>
    where
        B: Serialize + Sync,
        R: DeserializeOwned + SlackResponse + Send,
    {
        let token = self
            .token
            .as_ref()
            .ok_or_else(|| SinkError::NotConfigured(ENV_SLACK_BOT_TOKEN.to_string()))?;

        debug!(sink = "slack", method, "Calling Slack API");

        let response = self
            .client
            .post(format!("{}/{method}", self.api_base))
            .bearer_auth(token)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(1);
            return Err(SinkError::RateLimited { retry_after_secs });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();

            warn!(
                sink = "slack",
                method,
                status = %status,
                body = %body,
                "Slack API request failed"
            );

            return Err(SinkError::Api {
                method,
                error: format!("HTTP {status}: {body}"),
            });
        }

        let parsed: R = response.json().await?;
        if let Some(error) = parsed.error() {
            warn!(sink = "slack", method, error = %error, "Slack API returned an error");
            return Err(SinkError::Api { method, error });
        }
        Ok(parsed)
    }
}

#[async_trait]
impl MessageSink for SlackSink {
    fn name(&self) -> &'static str {
        "slack"
    }

    async fn send(
        &self,
        destination: &str,
        message: &Message,
    ) -> Result<MessageReference, SinkError> {
        const METHOD: &str = "chat.postMessage";
        let response: PostMessageResponse = self
            .call(
                METHOD,
                &PostMessageRequest {
                    channel: destination,
                    ts: None,
                    attachments: &message.attachments,
                },
            )
            .await?;

        let channel_id = response.channel.ok_or(SinkError::MissingField {
            method: METHOD,
            field: "channel",
        })?;
        let timestamp = response.ts.ok_or(SinkError::MissingField {
            method: METHOD,
            field: "ts",
        })?;
        Ok(MessageReference {
            channel_id,
            timestamp,
        })
    }

    async fn update(
        &self,
        reference: &MessageReference,
        message: &Message,
    ) -> Result<(), SinkError> {
        let _: PostMessageResponse = self
            .call(
                "chat.update",
                &PostMessageRequest {
                    channel: &reference.channel_id,
                    ts: Some(&reference.timestamp),
                    attachments: &message.attachments,
                },
            )
            .await?;
        Ok(())
    }

    async fn open_direct_conversation(&self, user_id: &str) -> Result<String, SinkError> {
        const METHOD: &str = "conversations.open";
        let response: OpenConversationResponse = self
            .call(METHOD, &OpenConversationRequest { users: user_id })
            .await?;

        response
            .channel
            .map(|channel| channel.id)
            .ok_or(SinkError::MissingField {
                method: METHOD,
                field: "channel",
            })
    }
}

// =============================================================================
// Slack API types
// =============================================================================

trait SlackResponse {
    /// The error reported by a response with `ok: false`.
    fn error(&self) -> Option<String>;
}

#[derive(Debug, Serialize)]
struct PostMessageRequest<'a> {
    channel: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    ts: Option<&'a str>,
    attachments: &'a [Attachment],
}

#[derive(Debug, Deserialize)]
struct PostMessageResponse {
    ok: bool,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    ts: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl SlackResponse for PostMessageResponse {
    fn error(&self) -> Option<String> {
        (!self.ok).then(|| {
            self.error
                .clone()
                .unwrap_or_else(|| "unknown error".to_string())
        })
    }
}

#[derive(Debug, Serialize)]
struct OpenConversationRequest<'a> {
    users: &'a str,
}

#[derive(Debug, Deserialize)]
struct OpenConversationResponse {
    ok: bool,
    #[serde(default)]
    channel: Option<ConversationChannel>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConversationChannel {
    id: String,
}

impl SlackResponse for OpenConversationResponse {
    fn error(&self) -> Option<String> {
        (!self.ok).then(|| {
            self.error
                .clone()
                .unwrap_or_else(|| "unknown error".to_string())
        })
    }
}
