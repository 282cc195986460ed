//! `reasoning` node: binds the language model to the fixed decision schema
//! and turns the structured output into queued work.

use chrono::{Duration, Utc};
use serde_json::{Map, Value, json};
use tlt_providers::{ContentBlock, ModelClient, StructuredSchema};
use tlt_types::{
    Decision, DecisionType, LifecycleStatus, MessageToSend, ScheduledTimer, ToolRequest,
    TriggerType,
};

use crate::analysis::analyze_cloudevent;
use crate::lifecycle::LifecycleTracker;
use crate::state::{AgentState, IncomingEvent};

pub const NODE_NAME: &str = "reasoning";

/// Confidence assigned to fallback decisions when the model produced
/// nothing usable.
const FALLBACK_CONFIDENCE: f64 = 0.1;

const SYSTEM_PROMPT: &str = r"You are the reasoning core of an ambient event-management agent for chat guilds.

For the current event you must produce exactly one decision via the AgentReasoningDecision tool. Allowed decision types:
- send_message: queue a chat message (set message_content, optionally target_channel_id)
- schedule_timer: schedule a follow-up (set timer_type and delay_minutes)
- use_tool: invoke a back-end tool through the gateway (RECOMMENDED for most CloudEvents; set tool_name)
- no_action: do nothing
- update_event: note an event change without further action
- create_reminder: schedule a reminder and confirm it to the user

Prefer the recommended tool from the analysis context when one is present. Guild registration events and info/list requests may just need logging.";

/// Schema the model must fill; mirrors the decision entity.
pub fn decision_schema() -> StructuredSchema {
    StructuredSchema {
        name: "AgentReasoningDecision".to_string(),
        description: "Decide what action the agent takes for the current event".to_string(),
        schema: json!({
            "type": "object",
            "properties": {
                "decision_type": {
                    "type": "string",
                    "enum": [
                        "send_message",
                        "schedule_timer",
                        "use_tool",
                        "no_action",
                        "update_event",
                        "create_reminder"
                    ]
                },
                "reasoning": {"type": "string"},
                "confidence": {"type": "number", "minimum": 0.0, "maximum": 1.0},
                "message_content": {"type": "string"},
                "target_channel_id": {"type": "string"},
                "timer_type": {"type": "string"},
                "delay_minutes": {"type": "integer"},
                "tool_name": {"type": "string"},
                "tool_arguments": {"type": "object"},
                "priority": {"type": "string", "enum": ["low", "normal", "high", "urgent"]}
            },
            "required": ["decision_type", "reasoning", "confidence"]
        }),
    }
}

/// Produces exactly one decision for the current event and executes it
/// against the state (queueing messages, timers, or tool requests).
pub async fn run(
    state: &mut AgentState,
    lifecycles: &LifecycleTracker,
    model: Option<&ModelClient>,
) -> Decision {
    let Some(event) = state.current_event.clone() else {
        return Decision::no_action("no current event", FALLBACK_CONFIDENCE);
    };

    if let Some(task_id) = &event.task_id {
        lifecycles
            .record(
                task_id,
                LifecycleStatus::InReasoning,
                NODE_NAME,
                format!("reasoning over {} event", event.trigger_type),
                Map::new(),
            )
            .await;
    }

    let decision = match model {
        Some(model) => model_decision(state, model, &event).await,
        None => table_decision(&event),
    };

    execute_decision(state, lifecycles, &event, &decision).await;
    state.processed_event_ids.push(event.event_id.clone());
    state.push_decision(decision.clone());
    decision
}

/// Asks the model; degrades to a low-confidence no-action on any failure.
async fn model_decision(
    state: &mut AgentState,
    model: &ModelClient,
    event: &IncomingEvent,
) -> Decision {
    let context = build_context(state, event);
    let schema = decision_schema();
    let raw = model
        .submit_structured(
            SYSTEM_PROMPT,
            vec![ContentBlock::Text(context.to_string())],
            &schema,
        )
        .await;
    match raw {
        Ok(value) => match serde_json::from_value::<Decision>(value) {
            Ok(decision) => decision,
            Err(err) => {
                state.push_error(format!("decision parse failed: {err}"));
                Decision::no_action(
                    format!("model output did not match the decision schema: {err}"),
                    FALLBACK_CONFIDENCE,
                )
            }
        },
        Err(err) => {
            state.push_error(format!("model call failed: {err}"));
            Decision::no_action(
                format!("model produced no decision: {err}"),
                FALLBACK_CONFIDENCE,
            )
        }
    }
}

/// Deterministic decision straight from the analysis table (model-free mode).
fn table_decision(event: &IncomingEvent) -> Decision {
    let Some(cloudevent) = &event.cloudevent else {
        return Decision::no_action("non-cloudevent item; nothing to do", 0.8);
    };
    let analysis = analyze_cloudevent(cloudevent);
    if !analysis.requires_tool {
        return Decision::no_action(
            format!("{} requires no tool action", cloudevent.event_type),
            analysis.confidence,
        );
    }
    Decision {
        decision_type: DecisionType::UseTool,
        reasoning: format!(
            "analysis table routes {} to {}",
            cloudevent.event_type,
            analysis.tool_name.unwrap_or("(none)")
        ),
        confidence: analysis.confidence,
        message_content: None,
        target_channel_id: None,
        timer_type: None,
        delay_minutes: None,
        tool_name: analysis.tool_name.map(str::to_string),
        tool_arguments: Some(analysis.arguments),
        priority: event.priority,
        metadata: Map::new(),
    }
}

/// JSON-safe projection of the reasoning context.
fn build_context(state: &AgentState, event: &IncomingEvent) -> Value {
    let recent_decisions: Vec<Value> = state
        .last_decisions(5)
        .iter()
        .map(|d| json!({"decision_type": d.decision_type, "reasoning": d.reasoning}))
        .collect();
    let recent_tool_calls: Vec<Value> = state
        .last_tool_calls(3)
        .iter()
        .map(|c| json!({"tool": c.tool_name, "success": c.success}))
        .collect();

    let analysis = event.cloudevent.as_ref().map(|cloudevent| {
        let analysis = analyze_cloudevent(cloudevent);
        json!({
            "requires_tool": analysis.requires_tool,
            "recommended_tool": analysis.tool_name,
            "recommended_action": analysis.action,
            "arguments": analysis.arguments,
        })
    });

    json!({
        "trigger_type": event.trigger_type.to_string(),
        "guidance": guidance(event.trigger_type),
        "payload": event.payload,
        "chat_context": event.chat_context,
        "event_context": event.event_context,
        "analysis": analysis,
        "recent_activity": {
            "decisions": recent_decisions,
            "tool_calls": recent_tool_calls,
        },
    })
}

/// Per-trigger guidance embedded in the prompt.
fn guidance(trigger: TriggerType) -> &'static str {
    match trigger {
        TriggerType::CreateEvent => "use_tool with the event-manager to create the event",
        TriggerType::UpdateEvent => "use_tool with the event-manager to apply the update",
        TriggerType::DeleteEvent => "use_tool with the event-manager to delete the event",
        TriggerType::ListEvents => "use_tool with the event-manager to list events",
        TriggerType::EventInfo => "usually no tool action needed; log or reply",
        TriggerType::RsvpEvent => "use_tool with the rsvp service to process the reaction",
        TriggerType::RegisterGuild | TriggerType::DeregisterGuild => {
            "use_tool with the guild-manager"
        }
        TriggerType::PhotoVibeCheck => "use_tool with the photo-vibe-check service",
        TriggerType::PromotionImage => "use_tool to add the promotional reference images",
        TriggerType::VibeAction => "use_tool with the canvas or photo service per the action",
        TriggerType::SaveEventToGuildData => "use_tool with the event-manager to persist the event",
        TriggerType::Timer => "consider a reminder message for the event's thread",
        TriggerType::ChatMessage => "usually no action; observe the conversation",
    }
}

/// Applies the decision to the state and closes lifecycles that end here.
async fn execute_decision(
    state: &mut AgentState,
    lifecycles: &LifecycleTracker,
    event: &IncomingEvent,
    decision: &Decision,
) {
    match decision.decision_type {
        DecisionType::SendMessage => queue_message(state, event, decision),
        DecisionType::ScheduleTimer => {
            schedule_timer(state, event, decision);
            close_completed(lifecycles, event, "timer scheduled").await;
        }
        DecisionType::CreateReminder => {
            schedule_timer(state, event, decision);
            queue_message(state, event, decision);
        }
        DecisionType::UseTool => queue_tool_request(state, lifecycles, event, decision).await,
        DecisionType::NoAction => {
            tracing::debug!(reasoning = %decision.reasoning, "no action");
            close_completed(lifecycles, event, "no action").await;
        }
        DecisionType::UpdateEvent => {
            tracing::debug!(reasoning = %decision.reasoning, "event update noted");
            close_completed(lifecycles, event, "event update noted").await;
        }
    }
}

fn queue_message(state: &mut AgentState, event: &IncomingEvent, decision: &Decision) {
    let chat = event.chat_context.as_ref();
    let guild_id = chat.map(|c| c.guild_id.clone()).unwrap_or_default();
    let channel_id = decision
        .target_channel_id
        .clone()
        .or_else(|| chat.map(|c| c.channel_id.clone()))
        .unwrap_or_default();
    if guild_id.is_empty() || channel_id.is_empty() {
        tracing::warn!("send_message decision without a resolvable channel; dropping");
        return;
    }
    let content = decision
        .message_content
        .clone()
        .unwrap_or_else(|| "Reminder scheduled.".to_string());
    let mut message = MessageToSend::new(guild_id, channel_id, content);
    if let Some(task_id) = &event.task_id {
        message = message.for_task(task_id.clone());
    }
    state.pending_messages.push(message);
}

fn schedule_timer(state: &mut AgentState, event: &IncomingEvent, decision: &Decision) {
    let delay = decision.delay_minutes.unwrap_or(60).max(1);
    let timer_type = decision
        .timer_type
        .clone()
        .unwrap_or_else(|| "reminder".to_string());
    let event_id = event
        .event_context
        .as_ref()
        .map(|c| c.event_id.clone())
        .unwrap_or_else(|| event.event_id.clone());
    let mut timer = ScheduledTimer::new(event_id, timer_type, Utc::now() + Duration::minutes(delay));
    timer.priority = decision.priority;
    tracing::debug!(timer_id = %timer.timer_id, delay, "timer scheduled");
    state.active_timers.push(timer);
}

async fn queue_tool_request(
    state: &mut AgentState,
    lifecycles: &LifecycleTracker,
    event: &IncomingEvent,
    decision: &Decision,
) {
    // The fixed analysis wins over whatever tool name the model suggested;
    // its argument shaping is what the executor expects.
    let analysis = event.cloudevent.as_ref().map(analyze_cloudevent);
    let (tool_name, mut arguments) = match &analysis {
        Some(analysis) if analysis.requires_tool => (
            analysis.tool_name.map(str::to_string),
            analysis.arguments.clone(),
        ),
        _ => (
            decision.tool_name.clone(),
            decision.tool_arguments.clone().unwrap_or_default(),
        ),
    };
    let Some(tool_name) = tool_name else {
        close_completed(lifecycles, event, "use_tool with no resolvable tool").await;
        return;
    };

    if let Some(args) = &decision.tool_arguments
        && analysis.as_ref().is_none_or(|a| !a.requires_tool)
    {
        for (key, value) in args {
            arguments.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }

    let mut metadata = Map::new();
    if let Some(task_id) = &event.task_id {
        metadata.insert("task_id".to_string(), json!(task_id));
    }
    if let Some(cloudevent) = &event.cloudevent {
        metadata.insert("cloudevent_id".to_string(), json!(cloudevent.id));
        metadata.insert("cloudevent_type".to_string(), json!(cloudevent.event_type));
    }

    let request = ToolRequest {
        tool_name,
        arguments,
        priority: decision.priority,
        metadata,
        event_id: event.event_context.as_ref().map(|c| c.event_id.clone()),
    };
    if let Some(task_id) = &event.task_id {
        lifecycles
            .record(
                task_id,
                LifecycleStatus::InReasoning,
                NODE_NAME,
                format!("tool request queued for {}", request.tool_name),
                Map::new(),
            )
            .await;
    }
    state.pending_tool_requests.push(request);
}

async fn close_completed(lifecycles: &LifecycleTracker, event: &IncomingEvent, details: &str) {
    if let Some(task_id) = &event.task_id {
        lifecycles
            .record(
                task_id,
                LifecycleStatus::Completed,
                NODE_NAME,
                details,
                Map::new(),
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use tlt_types::events::RsvpEventData;
    use tlt_types::{CloudEvent, EventType};

    use super::*;

    fn incoming(event_type: EventType) -> IncomingEvent {
        let mut cloudevent = CloudEvent::rsvp_event(
            "200",
            RsvpEventData {
                guild_id: "100".to_string(),
                event_id: "42".to_string(),
                user_id: "8".to_string(),
                rsvp_type: "add".to_string(),
                emoji: Some("✅".to_string()),
                metadata: Map::new(),
            },
        )
        .unwrap();
        cloudevent.event_type = event_type;
        IncomingEvent::from_cloudevent("t1", cloudevent)
    }

    async fn run_with_event(event: IncomingEvent) -> (AgentState, LifecycleTracker, Decision) {
        let mut state = AgentState::new("agent", false);
        let lifecycles = LifecycleTracker::new();
        if let (Some(task_id), Some(ce)) = (&event.task_id, &event.cloudevent) {
            lifecycles
                .open(task_id, &ce.id, event.trigger_type, ce.event_type)
                .await;
        }
        state.current_event = Some(event);
        let decision = run(&mut state, &lifecycles, None).await;
        (state, lifecycles, decision)
    }

    #[tokio::test]
    async fn rsvp_event_queues_tool_request() {
        let (state, lifecycles, decision) = run_with_event(incoming(EventType::RsvpEvent)).await;
        assert_eq!(decision.decision_type, DecisionType::UseTool);
        assert_eq!(state.pending_tool_requests.len(), 1);
        let request = &state.pending_tool_requests[0];
        assert_eq!(request.tool_name, "rsvp");
        assert_eq!(request.arguments["action"], json!("process_rsvp"));
        assert_eq!(request.metadata["task_id"], json!("t1"));
        // The lifecycle is still open; the executor closes it.
        assert_eq!(lifecycles.final_status("t1").await, None);
        assert_eq!(state.recent_decisions.len(), 1);
        assert_eq!(state.processed_event_ids.len(), 1);
    }

    #[tokio::test]
    async fn event_info_closes_completed_without_tools() {
        let (state, lifecycles, decision) = run_with_event(incoming(EventType::EventInfo)).await;
        assert_eq!(decision.decision_type, DecisionType::NoAction);
        assert!(state.pending_tool_requests.is_empty());
        assert_eq!(
            lifecycles.final_status("t1").await,
            Some(LifecycleStatus::Completed)
        );
    }

    #[tokio::test]
    async fn schema_allows_all_decision_types() {
        let schema = decision_schema();
        let allowed: Vec<String> = serde_json::from_value(
            schema.schema["properties"]["decision_type"]["enum"].clone(),
        )
        .unwrap();
        for kind in [
            "send_message",
            "schedule_timer",
            "use_tool",
            "no_action",
            "update_event",
            "create_reminder",
        ] {
            assert!(allowed.contains(&kind.to_string()), "{kind}");
        }
    }

    #[tokio::test]
    async fn create_reminder_queues_timer_and_message() {
        let mut event = incoming(EventType::RsvpEvent);
        event.chat_context = Some(tlt_types::ChatContext {
            guild_id: "100".to_string(),
            channel_id: "200".to_string(),
            ..Default::default()
        });
        let mut state = AgentState::new("agent", false);
        state.current_event = Some(event.clone());
        let decision = Decision {
            decision_type: DecisionType::CreateReminder,
            reasoning: "remind".to_string(),
            confidence: 0.9,
            message_content: Some("See you at 6".to_string()),
            target_channel_id: None,
            timer_type: Some("reminder".to_string()),
            delay_minutes: Some(30),
            tool_name: None,
            tool_arguments: None,
            priority: tlt_types::TaskPriority::Normal,
            metadata: Map::new(),
        };
        execute_decision(&mut state, &LifecycleTracker::new(), &event, &decision).await;
        assert_eq!(state.active_timers.len(), 1);
        assert_eq!(state.pending_messages.len(), 1);
        assert_eq!(state.pending_messages[0].task_id.as_deref(), Some("t1"));
    }
}
