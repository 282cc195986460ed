//! The single mutable agent record threaded through every graph node.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tlt_types::{
    ChatContext, CloudEvent, Decision, EventContext, MessageToSend, ScheduledTimer, TaskPriority,
    TimerContext, ToolRequest, TriggerType,
};

/// Hard cap on the bounded history lists.
const HISTORY_CAP: usize = 20;
/// How many entries survive a trim.
const HISTORY_KEEP: usize = 10;
/// Tool-call history trims from this ceiling...
const TOOL_HISTORY_CAP: usize = 100;
/// ...down to this floor.
const TOOL_HISTORY_KEEP: usize = 50;

/// Agent operating status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Initializing,
    Idle,
    Processing,
    Waiting,
    Error,
    Stopping,
}

/// One event waiting for (or under) processing.
#[derive(Debug, Clone)]
pub struct IncomingEvent {
    /// Processing id; equals the CloudEvent id when one is attached.
    pub event_id: String,
    /// Task whose lifecycle this event advances.
    pub task_id: Option<String>,
    pub trigger_type: TriggerType,
    pub priority: TaskPriority,
    pub cloudevent: Option<CloudEvent>,
    pub payload: Value,
    pub chat_context: Option<ChatContext>,
    pub event_context: Option<EventContext>,
    pub timer_context: Option<TimerContext>,
    pub received_at: DateTime<Utc>,
    /// Set once the monitor classified and enriched the event.
    pub enriched: bool,
}

impl IncomingEvent {
    /// Wraps a CloudEvent for the pending queue; enrichment happens in the
    /// monitor node.
    pub fn from_cloudevent(task_id: impl Into<String>, cloudevent: CloudEvent) -> Self {
        Self {
            event_id: cloudevent.id.clone(),
            task_id: Some(task_id.into()),
            trigger_type: TriggerType::from(cloudevent.event_type),
            priority: cloudevent.event_type.default_priority(),
            payload: cloudevent.data.clone(),
            cloudevent: Some(cloudevent),
            chat_context: None,
            event_context: None,
            timer_context: None,
            received_at: Utc::now(),
            enriched: false,
        }
    }
}

/// Recorded outcome of one gateway tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool_name: String,
    pub arguments: Map<String, Value>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

/// Mutable state owned by the graph driver.
///
/// Nodes mutate it in place; every node is responsible for keeping the
/// bounded lists bounded.
#[derive(Debug)]
pub struct AgentState {
    pub agent_id: String,
    pub status: AgentStatus,
    /// Total node transitions since start.
    pub iteration_count: u64,
    /// Monitor visits since start; floor of one keeps division safe.
    pub monitoring_cycles: u64,
    pub current_event: Option<IncomingEvent>,
    pub pending_events: VecDeque<IncomingEvent>,
    pub processed_event_ids: Vec<String>,
    pub active_timers: Vec<ScheduledTimer>,
    pub recent_decisions: Vec<Decision>,
    pub pending_tool_requests: Vec<ToolRequest>,
    pub pending_messages: Vec<MessageToSend>,
    pub event_context_cache: HashMap<String, EventContext>,
    pub user_contexts: HashMap<String, Map<String, Value>>,
    pub tool_call_history: Vec<ToolCallRecord>,
    pub error_history: Vec<String>,
    pub debug: bool,
}

impl AgentState {
    pub fn new(agent_id: impl Into<String>, debug: bool) -> Self {
        Self {
            agent_id: agent_id.into(),
            status: AgentStatus::Initializing,
            iteration_count: 0,
            monitoring_cycles: 1,
            current_event: None,
            pending_events: VecDeque::new(),
            processed_event_ids: Vec::new(),
            active_timers: Vec::new(),
            recent_decisions: Vec::new(),
            pending_tool_requests: Vec::new(),
            pending_messages: Vec::new(),
            event_context_cache: HashMap::new(),
            user_contexts: HashMap::new(),
            tool_call_history: Vec::new(),
            error_history: Vec::new(),
            debug,
        }
    }

    /// Records a decision, trimming the history past its cap.
    pub fn push_decision(&mut self, decision: Decision) {
        self.recent_decisions.push(decision);
        trim(&mut self.recent_decisions, HISTORY_CAP, HISTORY_KEEP);
    }

    /// Records an error, trimming the history past its cap.
    pub fn push_error(&mut self, error: impl Into<String>) {
        self.error_history.push(error.into());
        trim(&mut self.error_history, HISTORY_CAP, HISTORY_KEEP);
    }

    /// Records a tool call, trimming the history past its ceiling.
    pub fn push_tool_call(&mut self, record: ToolCallRecord) {
        self.tool_call_history.push(record);
        trim(
            &mut self.tool_call_history,
            TOOL_HISTORY_CAP,
            TOOL_HISTORY_KEEP,
        );
    }

    /// Last `n` decisions, newest last.
    pub fn last_decisions(&self, n: usize) -> &[Decision] {
        let start = self.recent_decisions.len().saturating_sub(n);
        &self.recent_decisions[start..]
    }

    /// Last `n` tool calls, newest last.
    pub fn last_tool_calls(&self, n: usize) -> &[ToolCallRecord] {
        let start = self.tool_call_history.len().saturating_sub(n);
        &self.tool_call_history[start..]
    }
}

fn trim<T>(list: &mut Vec<T>, cap: usize, keep: usize) {
    if list.len() > cap {
        list.drain(..list.len() - keep);
    }
}

#[cfg(test)]
mod tests {
    use tlt_types::Decision;

    use super::*;

    #[test]
    fn decision_history_trims_to_last_ten() {
        let mut state = AgentState::new("agent", false);
        for i in 0..=HISTORY_CAP {
            state.push_decision(Decision::no_action(format!("d{i}"), 0.5));
        }
        assert_eq!(state.recent_decisions.len(), HISTORY_KEEP);
        assert_eq!(state.recent_decisions.last().unwrap().reasoning, "d20");
        assert_eq!(state.recent_decisions.first().unwrap().reasoning, "d11");
    }

    #[test]
    fn tool_history_trims_from_ceiling_to_floor() {
        let mut state = AgentState::new("agent", false);
        for i in 0..=TOOL_HISTORY_CAP {
            state.push_tool_call(ToolCallRecord {
                tool_name: format!("tool{i}"),
                arguments: Map::new(),
                success: true,
                error: None,
                result: None,
                timestamp: Utc::now(),
                task_id: None,
            });
        }
        assert_eq!(state.tool_call_history.len(), TOOL_HISTORY_KEEP);
    }

    #[test]
    fn last_n_handles_short_history() {
        let mut state = AgentState::new("agent", false);
        state.push_decision(Decision::no_action("only", 0.5));
        assert_eq!(state.last_decisions(5).len(), 1);
        assert!(state.last_tool_calls(3).is_empty());
    }
}
