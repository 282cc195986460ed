//! Agent tasks: CloudEvents wrapped with queueing, priority, and status.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::context::{ChatContext, EventContext, TimerContext};
use crate::events::{CloudEvent, EventType};

/// One trigger family per CloudEvent type, plus `Timer` for events the
/// monitor synthesises from fired timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    CreateEvent,
    UpdateEvent,
    DeleteEvent,
    ListEvents,
    EventInfo,
    RsvpEvent,
    RegisterGuild,
    DeregisterGuild,
    PhotoVibeCheck,
    PromotionImage,
    VibeAction,
    SaveEventToGuildData,
    Timer,
    ChatMessage,
}

impl From<EventType> for TriggerType {
    fn from(event_type: EventType) -> Self {
        match event_type {
            EventType::CreateEvent => TriggerType::CreateEvent,
            EventType::UpdateEvent => TriggerType::UpdateEvent,
            EventType::DeleteEvent => TriggerType::DeleteEvent,
            EventType::ListEvents => TriggerType::ListEvents,
            EventType::EventInfo => TriggerType::EventInfo,
            EventType::RsvpEvent => TriggerType::RsvpEvent,
            EventType::RegisterGuild => TriggerType::RegisterGuild,
            EventType::DeregisterGuild => TriggerType::DeregisterGuild,
            EventType::PhotoVibeCheck => TriggerType::PhotoVibeCheck,
            EventType::PromotionImage => TriggerType::PromotionImage,
            EventType::VibeAction => TriggerType::VibeAction,
            EventType::SaveEventToGuildData => TriggerType::SaveEventToGuildData,
            EventType::TimerTrigger => TriggerType::Timer,
            EventType::ChatMessage => TriggerType::ChatMessage,
        }
    }
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            TriggerType::CreateEvent => "create_event",
            TriggerType::UpdateEvent => "update_event",
            TriggerType::DeleteEvent => "delete_event",
            TriggerType::ListEvents => "list_events",
            TriggerType::EventInfo => "event_info",
            TriggerType::RsvpEvent => "rsvp_event",
            TriggerType::RegisterGuild => "register_guild",
            TriggerType::DeregisterGuild => "deregister_guild",
            TriggerType::PhotoVibeCheck => "photo_vibe_check",
            TriggerType::PromotionImage => "promotion_image",
            TriggerType::VibeAction => "vibe_action",
            TriggerType::SaveEventToGuildData => "save_event_to_guild_data",
            TriggerType::Timer => "timer",
            TriggerType::ChatMessage => "chat_message",
        };
        f.write_str(tag)
    }
}

/// Queue priority; ordering is `Low < Normal < High < Urgent`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl EventType {
    /// Default queue priority for tasks born from this event type.
    pub fn default_priority(self) -> TaskPriority {
        match self {
            EventType::RegisterGuild | EventType::DeregisterGuild | EventType::CreateEvent => {
                TaskPriority::High
            }
            EventType::ListEvents | EventType::EventInfo => TaskPriority::Low,
            _ => TaskPriority::Normal,
        }
    }
}

/// Task status; mutates monotonically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// One CloudEvent wrapped for queueing and completion tracking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTask {
    pub task_id: String,
    pub event_id: String,
    pub trigger_type: TriggerType,
    pub priority: TaskPriority,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub cloudevent: CloudEvent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_context: Option<ChatContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timer_context: Option<TimerContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_context: Option<EventContext>,
}

impl AgentTask {
    /// Wraps a validated CloudEvent, deriving trigger type and priority from
    /// its event type.
    pub fn from_cloudevent(cloudevent: CloudEvent) -> Self {
        let now = Utc::now();
        let chat_context =
            cloudevent
                .guild_id()
                .zip(cloudevent.channel_id())
                .map(|(guild, channel)| ChatContext {
                    guild_id: guild.to_string(),
                    channel_id: channel.to_string(),
                    user_id: cloudevent
                        .data
                        .get("user_id")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    user_name: cloudevent
                        .data
                        .get("user_name")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    message_id: cloudevent
                        .data
                        .get("message_id")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    thread_id: None,
                });
        Self {
            task_id: Uuid::new_v4().to_string(),
            event_id: cloudevent.id.clone(),
            trigger_type: TriggerType::from(cloudevent.event_type),
            priority: cloudevent.event_type.default_priority(),
            created_at: now,
            updated_at: now,
            status: TaskStatus::Pending,
            result: None,
            error: None,
            cloudevent,
            chat_context,
            timer_context: None,
            event_context: None,
        }
    }

    /// Transitions the task, refreshing the update time.
    pub fn set_status(&mut self, status: TaskStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    /// Marks the task completed with a result payload.
    pub fn complete(&mut self, result: Value) {
        self.result = Some(result);
        self.set_status(TaskStatus::Completed);
    }

    /// Marks the task failed with an error message.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.error = Some(error.into());
        self.set_status(TaskStatus::Failed);
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Map;

    use super::*;
    use crate::events::RsvpEventData;

    fn sample_event() -> CloudEvent {
        CloudEvent::rsvp_event(
            "200",
            RsvpEventData {
                guild_id: "100".to_string(),
                event_id: "42".to_string(),
                user_id: "8".to_string(),
                rsvp_type: "add".to_string(),
                emoji: None,
                metadata: Map::new(),
            },
        )
        .unwrap()
    }

    #[test]
    fn wrap_derives_trigger_and_priority() {
        let task = AgentTask::from_cloudevent(sample_event());
        assert_eq!(task.trigger_type, TriggerType::RsvpEvent);
        assert_eq!(task.priority, TaskPriority::Normal);
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.event_id, task.cloudevent.id);
        let chat = task.chat_context.unwrap();
        assert_eq!(chat.guild_id, "100");
        assert_eq!(chat.channel_id, "200");
        assert_eq!(chat.user_id.as_deref(), Some("8"));
    }

    #[test]
    fn priority_policy_matches_event_families() {
        assert_eq!(
            EventType::CreateEvent.default_priority(),
            TaskPriority::High
        );
        assert_eq!(
            EventType::RegisterGuild.default_priority(),
            TaskPriority::High
        );
        assert_eq!(EventType::ListEvents.default_priority(), TaskPriority::Low);
        assert_eq!(EventType::EventInfo.default_priority(), TaskPriority::Low);
        assert_eq!(
            EventType::UpdateEvent.default_priority(),
            TaskPriority::Normal
        );
        assert_eq!(
            EventType::PhotoVibeCheck.default_priority(),
            TaskPriority::Normal
        );
    }

    #[test]
    fn priority_ordering() {
        assert!(TaskPriority::Urgent > TaskPriority::High);
        assert!(TaskPriority::High > TaskPriority::Normal);
        assert!(TaskPriority::Normal > TaskPriority::Low);
    }

    #[test]
    fn complete_sets_result_and_status() {
        let mut task = AgentTask::from_cloudevent(sample_event());
        task.complete(serde_json::json!({"ok": true}));
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.result.is_some());
        assert!(task.updated_at >= task.created_at);
    }
}
