//! Outbound-action buffer the adapter drains through the snapshot endpoint.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Value, json};
use tlt_types::MessageToSend;
use tokio::sync::Mutex;

/// Actions accumulated for one guild since the last poll.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GuildActions {
    pub pending_messages: Vec<MessageToSend>,
    pub event_updates: Vec<Value>,
    pub user_notifications: Vec<Value>,
}

impl GuildActions {
    fn is_empty(&self) -> bool {
        self.pending_messages.is_empty()
            && self.event_updates.is_empty()
            && self.user_notifications.is_empty()
    }
}

/// Per-guild outbound actions, written by the respond node and drained by
/// the snapshot endpoint.
#[derive(Debug, Default)]
pub struct SnapshotBuffer {
    by_guild: HashMap<String, GuildActions>,
}

/// Handle shared between the agent and the HTTP layer.
pub type SharedSnapshot = Arc<Mutex<SnapshotBuffer>>;

pub fn new_shared_snapshot() -> SharedSnapshot {
    Arc::new(Mutex::new(SnapshotBuffer::default()))
}

impl SnapshotBuffer {
    fn guild(&mut self, guild_id: &str) -> &mut GuildActions {
        self.by_guild.entry(guild_id.to_string()).or_default()
    }

    pub fn push_message(&mut self, message: MessageToSend) {
        let guild_id = message.guild_id.clone();
        self.guild(&guild_id).pending_messages.push(message);
    }

    pub fn push_event_update(&mut self, guild_id: &str, update: Value) {
        self.guild(guild_id).event_updates.push(update);
    }

    pub fn push_notification(&mut self, guild_id: &str, notification: Value) {
        self.guild(guild_id).user_notifications.push(notification);
    }

    /// Drains all accumulated actions into the wire shape.
    ///
    /// Delivery is at-least-once: the adapter dedupes by message id.
    pub fn drain(&mut self) -> Value {
        let mut by_guild = serde_json::Map::new();
        for (guild_id, actions) in self.by_guild.drain() {
            if actions.is_empty() {
                continue;
            }
            by_guild.insert(
                guild_id,
                serde_json::to_value(&actions).unwrap_or_else(|_| json!({})),
            );
        }
        json!({"agent_state_by_guild": by_guild})
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_partitions_by_guild_and_empties() {
        let mut buffer = SnapshotBuffer::default();
        buffer.push_message(MessageToSend::new("100", "200", "hello"));
        buffer.push_message(MessageToSend::new("300", "400", "other"));
        buffer.push_notification("100", json!({"user_id": "7", "text": "hi"}));

        let snapshot = buffer.drain();
        let by_guild = snapshot["agent_state_by_guild"].as_object().unwrap();
        assert_eq!(by_guild.len(), 2);
        assert_eq!(
            by_guild["100"]["pending_messages"].as_array().unwrap().len(),
            1
        );
        assert_eq!(
            by_guild["100"]["user_notifications"]
                .as_array()
                .unwrap()
                .len(),
            1
        );

        let empty = buffer.drain();
        assert!(
            empty["agent_state_by_guild"]
                .as_object()
                .unwrap()
                .is_empty()
        );
    }
}
