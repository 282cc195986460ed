//! `event-monitor` node: fires due timers and enriches pending events.

use chrono::Utc;
use serde_json::{Map, Value, json};
use tlt_types::{ChatContext, EventContext, LifecycleStatus, TimerContext, TriggerType};
use uuid::Uuid;

use crate::lifecycle::LifecycleTracker;
use crate::state::{AgentState, IncomingEvent};

pub const NODE_NAME: &str = "event-monitor";

/// One monitor pass: timer firing, then classification and enrichment.
pub async fn run(state: &mut AgentState, lifecycles: &LifecycleTracker) {
    state.monitoring_cycles = state.monitoring_cycles.max(1) + 1;
    fire_due_timers(state);
    enrich_pending(state, lifecycles).await;
}

/// Converts every due timer into a pending event with trigger type `timer`.
fn fire_due_timers(state: &mut AgentState) {
    let now = Utc::now();
    let mut fired = Vec::new();
    for timer in &mut state.active_timers {
        if !timer.is_due(now) {
            continue;
        }
        timer.active = false;
        tracing::debug!(timer_id = %timer.timer_id, timer_type = %timer.timer_type, "timer fired");
        fired.push(IncomingEvent {
            event_id: Uuid::new_v4().to_string(),
            task_id: None,
            trigger_type: TriggerType::Timer,
            priority: timer.priority,
            cloudevent: None,
            payload: json!({
                "event_id": timer.event_id,
                "timer_type": timer.timer_type,
                "scheduled_time": timer.scheduled_time,
                "metadata": timer.metadata,
            }),
            chat_context: None,
            event_context: None,
            timer_context: Some(TimerContext {
                timer_id: timer.timer_id.clone(),
                timer_type: timer.timer_type.clone(),
                scheduled_time: timer.scheduled_time,
                event_id: Some(timer.event_id.clone()),
            }),
            received_at: now,
            enriched: true,
        });
    }
    state.active_timers.retain(|timer| timer.active);
    state.pending_events.extend(fired);
}

/// Classifies CloudEvent-bearing pending events into enriched internal form.
///
/// Enrichment failures keep the original event; items without a CloudEvent
/// pass through untouched.
async fn enrich_pending(state: &mut AgentState, lifecycles: &LifecycleTracker) {
    for event in &mut state.pending_events {
        if event.enriched {
            continue;
        }
        let Some(cloudevent) = &event.cloudevent else {
            event.enriched = true;
            continue;
        };

        event.trigger_type = TriggerType::from(cloudevent.event_type);
        event.priority = cloudevent.event_type.default_priority();
        event.chat_context = extract_chat_context(cloudevent.guild_id(), &event.payload);
        event.event_context = extract_event_context(&event.payload);
        if let Some(context) = &event.event_context {
            state
                .event_context_cache
                .insert(context.event_id.clone(), context.clone());
        }
        event.enriched = true;

        if let Some(task_id) = &event.task_id {
            let mut metadata = Map::new();
            metadata.insert("trigger_type".to_string(), json!(event.trigger_type.to_string()));
            lifecycles
                .record(
                    task_id,
                    LifecycleStatus::InMonitor,
                    NODE_NAME,
                    format!("classified {} event", cloudevent.event_type),
                    metadata,
                )
                .await;
        }
    }
}

fn extract_chat_context(guild_id: Option<&str>, payload: &Value) -> Option<ChatContext> {
    let guild_id = guild_id
        .map(str::to_string)
        .or_else(|| text(payload, "guild_id"))?;
    let channel_id = text(payload, "channel_id")?;
    Some(ChatContext {
        guild_id,
        channel_id,
        user_id: text(payload, "user_id"),
        user_name: text(payload, "user_name"),
        message_id: text(payload, "message_id"),
        thread_id: text(payload, "thread_id"),
    })
}

fn extract_event_context(payload: &Value) -> Option<EventContext> {
    let event_id = text(payload, "event_id").or_else(|| {
        payload
            .get("event_data")
            .and_then(|data| data.get("message_id"))
            .and_then(Value::as_str)
            .map(str::to_string)
    })?;
    Some(EventContext {
        event_id,
        title: payload
            .get("event_data")
            .and_then(|data| data.get("topic").or_else(|| data.get("title")))
            .and_then(Value::as_str)
            .map(str::to_string),
        created_by: text(payload, "user_id"),
        start_time: None,
        message_id: None,
        metadata: Map::new(),
    })
}

fn text(payload: &Value, key: &str) -> Option<String> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use tlt_types::events::RsvpEventData;
    use tlt_types::{CloudEvent, ScheduledTimer};

    use super::*;

    fn rsvp_event() -> CloudEvent {
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

    #[tokio::test]
    async fn due_timer_becomes_pending_event() {
        let mut state = AgentState::new("agent", false);
        state
            .active_timers
            .push(ScheduledTimer::new("42", "reminder", Utc::now() - Duration::minutes(1)));
        state
            .active_timers
            .push(ScheduledTimer::new("43", "reminder", Utc::now() + Duration::hours(1)));

        run(&mut state, &LifecycleTracker::new()).await;

        assert_eq!(state.pending_events.len(), 1);
        let fired = &state.pending_events[0];
        assert_eq!(fired.trigger_type, TriggerType::Timer);
        assert_eq!(fired.payload["event_id"], json!("42"));
        assert!(fired.timer_context.is_some());
        // The undue timer survives, the fired one is gone.
        assert_eq!(state.active_timers.len(), 1);
        assert_eq!(state.active_timers[0].event_id, "43");
    }

    #[tokio::test]
    async fn cloudevent_is_classified_and_enriched() {
        let mut state = AgentState::new("agent", false);
        let lifecycles = LifecycleTracker::new();
        let event = rsvp_event();
        lifecycles
            .open("t1", &event.id, TriggerType::RsvpEvent, event.event_type)
            .await;
        state
            .pending_events
            .push_back(IncomingEvent::from_cloudevent("t1", event));

        run(&mut state, &lifecycles).await;

        let enriched = &state.pending_events[0];
        assert!(enriched.enriched);
        let chat = enriched.chat_context.as_ref().unwrap();
        assert_eq!(chat.guild_id, "100");
        assert_eq!(chat.channel_id, "200");
        assert_eq!(enriched.event_context.as_ref().unwrap().event_id, "42");
        assert!(state.event_context_cache.contains_key("42"));

        let lifecycle = lifecycles.get("t1").await.unwrap();
        assert!(
            lifecycle
                .entries
                .iter()
                .any(|entry| entry.status == LifecycleStatus::InMonitor)
        );
    }

    #[tokio::test]
    async fn non_cloudevent_items_pass_through() {
        let mut state = AgentState::new("agent", false);
        state.pending_events.push_back(IncomingEvent {
            event_id: "manual".to_string(),
            task_id: None,
            trigger_type: TriggerType::Timer,
            priority: tlt_types::TaskPriority::Normal,
            cloudevent: None,
            payload: json!({}),
            chat_context: None,
            event_context: None,
            timer_context: None,
            received_at: Utc::now(),
            enriched: false,
        });
        run(&mut state, &LifecycleTracker::new()).await;
        assert!(state.pending_events[0].enriched);
        assert!(state.pending_events[0].chat_context.is_none());
    }
}
