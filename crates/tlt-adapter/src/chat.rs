//! Minimal long-poll client for the chat platform.
//!
//! The platform SDK is an external collaborator; this client speaks only the
//! slice of its HTTP API the adapter consumes: update polling, message send
//! and delete, reactions, private notices, and file download.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tlt_core::config::Config;

const CONNECT_TIMEOUT_SECS: u64 = 2;
const HTTP_TIMEOUT_SECS: u64 = 35;

/// One update from the platform's long-poll endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatUpdate {
    pub update_id: i64,
    #[serde(flatten)]
    pub event: ChatEvent,
}

/// A file attached to a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub url: String,
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl Attachment {
    /// Whether the attachment looks like an image.
    pub fn is_image(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|mime| mime.starts_with("image/"))
            || tlt_core::images::has_image_suffix(&self.filename)
    }
}

/// Chat events the adapter classifies.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    /// Slash-command modal submission.
    SlashCommand {
        guild_id: String,
        channel_id: String,
        user_id: String,
        user_name: String,
        command: String,
        #[serde(default)]
        options: Map<String, Value>,
    },
    /// Reaction added to a message.
    ReactionAdded {
        guild_id: String,
        channel_id: String,
        user_id: String,
        message_id: String,
        emoji: String,
    },
    /// Reaction removed from a message.
    ReactionRemoved {
        guild_id: String,
        channel_id: String,
        user_id: String,
        message_id: String,
        emoji: String,
    },
    /// Direct message to the bot.
    DirectMessage {
        user_id: String,
        user_name: String,
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        attachments: Vec<Attachment>,
    },
    /// Message in a guild channel or thread.
    ChannelMessage {
        guild_id: String,
        channel_id: String,
        #[serde(default)]
        thread_id: Option<String>,
        user_id: String,
        user_name: String,
        message_id: String,
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        attachments: Vec<Attachment>,
    },
    /// Guild join/leave admin command.
    GuildCommand {
        guild_id: String,
        guild_name: String,
        channel_id: String,
        channel_name: String,
        user_id: String,
        user_name: String,
        /// `join` or `leave`.
        action: String,
    },
    /// Platform-side timer callback.
    TimerCallback {
        guild_id: String,
        channel_id: String,
        event_id: String,
        timer_type: String,
        scheduled_time: String,
    },
}

/// Settings resolved from config and environment.
pub struct ChatSettings {
    pub bot_token: String,
    pub api_base: String,
}

impl ChatSettings {
    /// # Errors
    /// Returns an error when no bot token is configured.
    pub fn from_config(config: &Config) -> Result<Self> {
        let token = config
            .chat
            .bot_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(str::to_string)
            .or_else(|| {
                std::env::var("TLT_CHAT_BOT_TOKEN")
                    .ok()
                    .map(|token| token.trim().to_string())
                    .filter(|token| !token.is_empty())
            });
        let Some(bot_token) = token else {
            bail!("chat.bot_token or TLT_CHAT_BOT_TOKEN is required");
        };
        Ok(Self {
            bot_token,
            api_base: config.chat.api_base.clone(),
        })
    }
}

/// HTTP client for the chat platform.
#[derive(Clone)]
pub struct ChatClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl ChatClient {
    pub fn new(settings: ChatSettings) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            base_url: settings.api_base,
            token: settings.bot_token,
        }
    }

    async fn post<T: DeserializeOwned>(&self, method: &str, body: &Value) -> Result<T> {
        let url = format!("{}/{method}", self.base_url.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await
            .with_context(|| format!("chat api {method}"))?;
        let status = response.status();
        if !status.is_success() {
            bail!("chat api {method}: status {status}");
        }
        response
            .json()
            .await
            .with_context(|| format!("chat api {method} reply"))
    }

    /// Long-polls for updates past `offset`.
    ///
    /// # Errors
    /// Returns an error on transport failure or a non-success status.
    pub async fn get_updates(
        &self,
        offset: Option<i64>,
        timeout: Duration,
    ) -> Result<Vec<ChatUpdate>> {
        self.post(
            "getUpdates",
            &json!({"offset": offset, "timeout": timeout.as_secs()}),
        )
        .await
    }

    /// Sends a message into a channel, optionally as a reply.
    ///
    /// # Errors
    /// Returns an error on transport failure or a non-success status.
    pub async fn send_message(
        &self,
        guild_id: &str,
        channel_id: &str,
        text: &str,
        reply_to: Option<&str>,
    ) -> Result<()> {
        let _: Value = self
            .post(
                "sendMessage",
                &json!({
                    "guild_id": guild_id,
                    "channel_id": channel_id,
                    "text": text,
                    "reply_to_message_id": reply_to,
                }),
            )
            .await?;
        Ok(())
    }

    /// Deletes a message (moderation).
    ///
    /// # Errors
    /// Returns an error on transport failure or a non-success status.
    pub async fn delete_message(
        &self,
        guild_id: &str,
        channel_id: &str,
        message_id: &str,
    ) -> Result<()> {
        let _: Value = self
            .post(
                "deleteMessage",
                &json!({
                    "guild_id": guild_id,
                    "channel_id": channel_id,
                    "message_id": message_id,
                }),
            )
            .await?;
        Ok(())
    }

    /// Sends a private notice to a user.
    ///
    /// # Errors
    /// Returns an error on transport failure or a non-success status.
    pub async fn send_private_notice(&self, user_id: &str, text: &str) -> Result<()> {
        let _: Value = self
            .post(
                "sendPrivateMessage",
                &json!({"user_id": user_id, "text": text}),
            )
            .await?;
        Ok(())
    }

    /// Acknowledges a handled update with a reaction.
    pub async fn react(&self, guild_id: &str, channel_id: &str, message_id: &str, emoji: &str) {
        let result: Result<Value> = self
            .post(
                "addReaction",
                &json!({
                    "guild_id": guild_id,
                    "channel_id": channel_id,
                    "message_id": message_id,
                    "emoji": emoji,
                }),
            )
            .await;
        if let Err(err) = result {
            tracing::debug!(error = %format!("{err:#}"), "reaction failed");
        }
    }

    /// Downloads an attachment.
    ///
    /// # Errors
    /// Returns an error on transport failure or a non-success status.
    pub async fn download_file(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("download {url}"))?;
        let status = response.status();
        if !status.is_success() {
            bail!("download {url}: status {status}");
        }
        Ok(response.bytes().await.context("download body")?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn updates_deserialize_with_flattened_event() {
        let raw = json!({
            "update_id": 7,
            "type": "reaction_added",
            "guild_id": "100",
            "channel_id": "200",
            "user_id": "8",
            "message_id": "42",
            "emoji": "✅"
        });
        let update: ChatUpdate = serde_json::from_value(raw).unwrap();
        assert_eq!(update.update_id, 7);
        assert!(matches!(update.event, ChatEvent::ReactionAdded { .. }));
    }

    #[test]
    fn attachment_image_detection() {
        let by_mime = Attachment {
            url: "http://x/a".to_string(),
            filename: "a.bin".to_string(),
            content_type: Some("image/png".to_string()),
            size: None,
        };
        assert!(by_mime.is_image());
        let by_suffix = Attachment {
            url: "http://x/b".to_string(),
            filename: "b.JPG".to_string(),
            content_type: None,
            size: None,
        };
        assert!(by_suffix.is_image());
        let neither = Attachment {
            url: "http://x/c".to_string(),
            filename: "c.pdf".to_string(),
            content_type: Some("application/pdf".to_string()),
            size: None,
        };
        assert!(!neither.is_image());
    }
}
