//! Reasoning decisions, tool requests, and the records nodes exchange.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::task::TaskPriority;

/// The five actions the reasoning node may choose, plus `no_action`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionType {
    SendMessage,
    ScheduleTimer,
    UseTool,
    NoAction,
    UpdateEvent,
    CreateReminder,
}

/// Structured output of one reasoning pass.
///
/// Optional fields are populated per decision type: message content and
/// target channel for `send_message`, timer type and delay for
/// `schedule_timer`, tool name and arguments for `use_tool`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub decision_type: DecisionType,
    pub reasoning: String,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_channel_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timer_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_minutes: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_arguments: Option<Map<String, Value>>,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Decision {
    /// Fallback decision when the model produced no usable output.
    pub fn no_action(reasoning: impl Into<String>, confidence: f64) -> Self {
        Self {
            decision_type: DecisionType::NoAction,
            reasoning: reasoning.into(),
            confidence: confidence.clamp(0.0, 1.0),
            message_content: None,
            target_channel_id: None,
            timer_type: None,
            delay_minutes: None,
            tool_name: None,
            tool_arguments: None,
            priority: TaskPriority::Normal,
            metadata: Map::new(),
        }
    }
}

/// A `use_tool` decision shaped into gateway-invocation form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRequest {
    /// Logical service tag (`event-manager`, `rsvp`, ...).
    pub tool_name: String,
    pub arguments: Map<String, Value>,
    #[serde(default)]
    pub priority: TaskPriority,
    /// Carries the associated task id and originating CloudEvent id/type so
    /// the executor can close the lifecycle.
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
}

/// Outbound chat message queued by a node and drained by `respond`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageToSend {
    /// Stable id making redelivery idempotent.
    pub message_id: String,
    pub guild_id: String,
    pub channel_id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_message_id: Option<String>,
    /// Task whose lifecycle closes once this message is handed off.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

impl MessageToSend {
    pub fn new(
        guild_id: impl Into<String>,
        channel_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            guild_id: guild_id.into(),
            channel_id: channel_id.into(),
            content: content.into(),
            reply_to_message_id: None,
            task_id: None,
        }
    }

    #[must_use]
    pub fn for_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }
}

/// A timer the monitor node fires once its scheduled time has passed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTimer {
    pub timer_id: String,
    pub event_id: String,
    pub timer_type: String,
    pub scheduled_time: DateTime<Utc>,
    #[serde(default)]
    pub priority: TaskPriority,
    /// Cleared when the timer fires.
    pub active: bool,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ScheduledTimer {
    pub fn new(
        event_id: impl Into<String>,
        timer_type: impl Into<String>,
        scheduled_time: DateTime<Utc>,
    ) -> Self {
        Self {
            timer_id: Uuid::new_v4().to_string(),
            event_id: event_id.into(),
            timer_type: timer_type.into(),
            scheduled_time,
            priority: TaskPriority::Normal,
            active: true,
            metadata: Map::new(),
        }
    }

    /// Whether the timer should fire at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.active && self.scheduled_time <= now
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn no_action_clamps_confidence() {
        assert!((Decision::no_action("x", 1.7).confidence - 1.0).abs() < f64::EPSILON);
        assert!(Decision::no_action("x", -0.3).confidence.abs() < f64::EPSILON);
    }

    #[test]
    fn decision_type_wire_tags() {
        let json = serde_json::to_string(&DecisionType::UseTool).unwrap();
        assert_eq!(json, "\"use_tool\"");
        let back: DecisionType = serde_json::from_str("\"create_reminder\"").unwrap();
        assert_eq!(back, DecisionType::CreateReminder);
    }

    #[test]
    fn timer_due_only_when_active_and_past() {
        let now = Utc::now();
        let mut timer = ScheduledTimer::new("42", "reminder", now - Duration::minutes(1));
        assert!(timer.is_due(now));
        timer.active = false;
        assert!(!timer.is_due(now));
        let future = ScheduledTimer::new("42", "reminder", now + Duration::minutes(5));
        assert!(!future.is_due(now));
    }
}
