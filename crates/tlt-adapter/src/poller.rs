//! Snapshot poll loop: applies the agent's outbound actions best-effort.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use serde_json::Value;

use crate::chat::ChatClient;
use crate::ingress::IngressClient;

/// Message ids remembered for redelivery dedup.
const SEEN_MESSAGE_CAP: usize = 1024;

/// Applies drained snapshots, deduping messages by their stable id.
pub struct ActionApplier {
    client: ChatClient,
    seen_messages: HashSet<String>,
    seen_order: VecDeque<String>,
}

impl ActionApplier {
    pub fn new(client: ChatClient) -> Self {
        Self {
            client,
            seen_messages: HashSet::new(),
            seen_order: VecDeque::new(),
        }
    }

    /// Applies one snapshot. Every action is best-effort: a transient chat
    /// failure is logged, never retried here.
    pub async fn apply(&mut self, snapshot: &Value) {
        let Some(by_guild) = snapshot
            .get("agent_state_by_guild")
            .and_then(Value::as_object)
        else {
            return;
        };
        for (guild_id, actions) in by_guild {
            self.apply_messages(actions).await;
            self.apply_notifications(guild_id, actions).await;
            if let Some(updates) = actions.get("event_updates").and_then(Value::as_array) {
                for update in updates {
                    tracing::info!(guild_id = %guild_id, %update, "event update received");
                }
            }
        }
    }

    async fn apply_messages(&mut self, actions: &Value) {
        let Some(messages) = actions.get("pending_messages").and_then(Value::as_array) else {
            return;
        };
        for message in messages {
            let Some(message_id) = message.get("message_id").and_then(Value::as_str) else {
                continue;
            };
            if !self.remember(message_id) {
                tracing::debug!(message_id, "skipping redelivered message");
                continue;
            }
            let guild_id = message
                .get("guild_id")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let channel_id = message
                .get("channel_id")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let content = message
                .get("content")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let reply_to = message.get("reply_to_message_id").and_then(Value::as_str);
            if let Err(err) = self
                .client
                .send_message(guild_id, channel_id, content, reply_to)
                .await
            {
                tracing::warn!(message_id, error = %format!("{err:#}"), "message delivery failed");
            }
        }
    }

    async fn apply_notifications(&mut self, guild_id: &str, actions: &Value) {
        let Some(notifications) = actions.get("user_notifications").and_then(Value::as_array)
        else {
            return;
        };
        for notification in notifications {
            let Some(user_id) = notification.get("user_id").and_then(Value::as_str) else {
                continue;
            };
            let text = notification
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if let Err(err) = self.client.send_private_notice(user_id, text).await {
                tracing::warn!(guild_id, user_id, error = %format!("{err:#}"), "notice failed");
            }
        }
    }

    /// Returns `false` when the id was already seen.
    fn remember(&mut self, message_id: &str) -> bool {
        if !self.seen_messages.insert(message_id.to_string()) {
            return false;
        }
        self.seen_order.push_back(message_id.to_string());
        while self.seen_order.len() > SEEN_MESSAGE_CAP {
            if let Some(oldest) = self.seen_order.pop_front() {
                self.seen_messages.remove(&oldest);
            }
        }
        true
    }
}

/// Polls the snapshot endpoint on a fixed interval until cancelled.
pub async fn poll_loop(
    ingress: IngressClient,
    mut applier: ActionApplier,
    interval: Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    tracing::info!(interval_secs = interval.as_secs(), "state poll loop started");
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            () = tokio::time::sleep(interval) => {}
        }
        match ingress.agent_state().await {
            Ok(snapshot) => applier.apply(&snapshot).await,
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), "snapshot poll failed");
            }
        }
    }
    tracing::info!("state poll loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remember_dedupes_and_bounds() {
        let settings = crate::chat::ChatSettings {
            bot_token: "t".to_string(),
            api_base: "http://127.0.0.1:1".to_string(),
        };
        let mut applier = ActionApplier::new(ChatClient::new(settings));
        assert!(applier.remember("m1"));
        assert!(!applier.remember("m1"));
        for i in 0..SEEN_MESSAGE_CAP {
            applier.remember(&format!("bulk-{i}"));
        }
        // The oldest id fell out of the window and counts as new again.
        assert!(applier.remember("m1"));
    }
}
