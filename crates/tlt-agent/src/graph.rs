//! Graph driver: routes the agent through its five nodes and enforces the
//! loop-termination safeguards.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Map;
use tlt_gateway::GatewayClient;
use tlt_providers::ModelClient;
use tlt_types::{DecisionType, LifecycleStatus};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::lifecycle::LifecycleTracker;
use crate::nodes::{executor, monitor, reasoning, respond};
use crate::snapshot::{SharedSnapshot, new_shared_snapshot};
use crate::state::{AgentState, AgentStatus, IncomingEvent};

/// Named graph nodes. `End` is the terminal pseudo-node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Node {
    Init,
    EventMonitor,
    Reasoning,
    ToolExecutor,
    Respond,
    End,
}

/// Driver configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub agent_id: String,
    /// Node transitions allowed per task before it is abandoned.
    pub recursion_limit: u32,
    /// Age after which unfinished lifecycles are swept to `abandoned`.
    pub abandon_age_minutes: i64,
    /// How long an idle monitor pass waits for new work.
    pub idle_wait: Duration,
    pub debug: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agent_id: "tlt-agent".to_string(),
            recursion_limit: 500,
            abandon_age_minutes: 30,
            idle_wait: Duration::from_millis(250),
            debug: false,
        }
    }
}

/// External handle: submit events, observe lifecycles, drain the snapshot,
/// request a cooperative stop.
#[derive(Clone)]
pub struct AgentHandle {
    inbox: mpsc::UnboundedSender<IncomingEvent>,
    pub lifecycles: LifecycleTracker,
    pub snapshot: SharedSnapshot,
    pub stop: CancellationToken,
}

impl AgentHandle {
    /// Queues an event for the agent; returns `false` once the agent is gone.
    pub fn submit(&self, event: IncomingEvent) -> bool {
        self.inbox.send(event).is_ok()
    }
}

/// The agent: exclusive owner of the mutable state record.
pub struct Agent {
    state: AgentState,
    config: AgentConfig,
    inbox: mpsc::UnboundedReceiver<IncomingEvent>,
    lifecycles: LifecycleTracker,
    snapshot: SharedSnapshot,
    gateway: GatewayClient,
    model: Option<Arc<ModelClient>>,
    stop: CancellationToken,
    /// Transitions spent on the current task.
    task_transitions: u32,
}

impl Agent {
    pub fn new(
        config: AgentConfig,
        gateway: GatewayClient,
        model: Option<Arc<ModelClient>>,
    ) -> (Self, AgentHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let lifecycles = LifecycleTracker::new();
        let snapshot = new_shared_snapshot();
        let stop = CancellationToken::new();
        let handle = AgentHandle {
            inbox: tx,
            lifecycles: lifecycles.clone(),
            snapshot: Arc::clone(&snapshot),
            stop: stop.clone(),
        };
        let agent = Self {
            state: AgentState::new(config.agent_id.clone(), config.debug),
            config,
            inbox: rx,
            lifecycles,
            snapshot,
            gateway,
            model,
            stop,
            task_transitions: 0,
        };
        (agent, handle)
    }

    /// Read-only view of the state, for observers inside the process.
    pub fn state(&self) -> &AgentState {
        &self.state
    }

    /// Runs the graph until a cooperative stop.
    pub async fn run(mut self) {
        tracing::info!(agent_id = %self.state.agent_id, "agent starting");
        let mut node = Node::Init;
        while node != Node::End {
            node = self.step(node).await;
        }
        self.state.status = AgentStatus::Stopping;
        tracing::info!(agent_id = %self.state.agent_id, "agent stopped");
    }

    /// One node transition.
    async fn step(&mut self, node: Node) -> Node {
        self.state.iteration_count += 1;
        match node {
            Node::Init => {
                self.state.status = AgentStatus::Idle;
                Node::EventMonitor
            }
            Node::EventMonitor => self.monitor_step().await,
            Node::Reasoning => {
                if self.recursion_exceeded().await {
                    return Node::EventMonitor;
                }
                let decision =
                    reasoning::run(&mut self.state, &self.lifecycles, self.model.as_deref()).await;
                match decision.decision_type {
                    DecisionType::UseTool => Node::ToolExecutor,
                    DecisionType::SendMessage | DecisionType::CreateReminder => Node::Respond,
                    _ => Node::EventMonitor,
                }
            }
            Node::ToolExecutor => {
                if self.recursion_exceeded().await {
                    return Node::EventMonitor;
                }
                executor::run(&mut self.state, &self.lifecycles, &self.gateway).await;
                if self.state.pending_messages.is_empty() {
                    Node::EventMonitor
                } else {
                    Node::Respond
                }
            }
            Node::Respond => {
                respond::run(&mut self.state, &self.lifecycles, &self.snapshot).await;
                if self.stopping() {
                    Node::End
                } else {
                    Node::EventMonitor
                }
            }
            Node::End => Node::End,
        }
    }

    async fn monitor_step(&mut self) -> Node {
        if self.stopping() {
            self.state.status = AgentStatus::Stopping;
            return Node::End;
        }
        self.state.current_event = None;
        self.task_transitions = 0;

        while let Ok(event) = self.inbox.try_recv() {
            self.state.pending_events.push_back(event);
        }
        monitor::run(&mut self.state, &self.lifecycles).await;

        // Sweep stale lifecycles occasionally; the exact cadence is not a
        // contract, only the abandonment age is.
        if self.state.monitoring_cycles % 100 == 0 {
            let abandoned = self
                .lifecycles
                .sweep_abandoned(self.config.abandon_age_minutes)
                .await;
            if !abandoned.is_empty() {
                tracing::warn!(count = abandoned.len(), "abandoned stale tasks");
            }
        }
        if self.state.monitoring_cycles % 50 == 0 {
            executor::refresh_event_contexts(&mut self.state, &self.gateway).await;
        }

        if let Some(event) = self.state.pending_events.pop_front() {
            self.state.status = AgentStatus::Processing;
            self.state.current_event = Some(event);
            return Node::Reasoning;
        }

        self.state.status = AgentStatus::Idle;
        tokio::select! {
            () = self.stop.cancelled() => {
                self.state.status = AgentStatus::Stopping;
                Node::End
            }
            received = self.inbox.recv() => match received {
                Some(event) => {
                    self.state.pending_events.push_back(event);
                    Node::EventMonitor
                }
                // Every handle is gone; nothing can ever arrive again.
                None => Node::End,
            },
            () = tokio::time::sleep(self.config.idle_wait) => Node::EventMonitor,
        }
    }

    /// Enforces the per-task transition bound; an overrun abandons the task.
    async fn recursion_exceeded(&mut self) -> bool {
        self.task_transitions += 1;
        if self.task_transitions <= self.config.recursion_limit {
            return false;
        }
        let detail = format!(
            "recursion limit {} exceeded for task",
            self.config.recursion_limit
        );
        tracing::error!(detail = %detail, "abandoning task");
        self.state.push_error(detail.clone());
        if let Some(task_id) = self
            .state
            .current_event
            .as_ref()
            .and_then(|event| event.task_id.clone())
        {
            self.lifecycles
                .record(
                    &task_id,
                    LifecycleStatus::Abandoned,
                    "graph",
                    detail,
                    Map::new(),
                )
                .await;
        }
        self.state.current_event = None;
        true
    }

    fn stopping(&self) -> bool {
        self.stop.is_cancelled() || self.state.status == AgentStatus::Stopping
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Map as JsonMap;
    use tlt_types::events::{ChatMessageData, RsvpEventData};
    use tlt_types::{CloudEvent, TriggerType};

    use super::*;

    fn test_agent() -> (Agent, AgentHandle) {
        let config = AgentConfig {
            idle_wait: Duration::from_millis(10),
            ..AgentConfig::default()
        };
        // Unreachable gateway: tool calls fail fast and deterministically.
        Agent::new(config, GatewayClient::new("http://127.0.0.1:1/rpc/"), None)
    }

    fn rsvp_cloudevent() -> CloudEvent {
        CloudEvent::rsvp_event(
            "200",
            RsvpEventData {
                guild_id: "100".to_string(),
                event_id: "42".to_string(),
                user_id: "8".to_string(),
                rsvp_type: "add".to_string(),
                emoji: Some("✅".to_string()),
                metadata: JsonMap::new(),
            },
        )
        .unwrap()
    }

    async fn open_and_submit(handle: &AgentHandle, task_id: &str, cloudevent: CloudEvent) {
        handle
            .lifecycles
            .open(
                task_id,
                &cloudevent.id,
                TriggerType::from(cloudevent.event_type),
                cloudevent.event_type,
            )
            .await;
        handle.submit(IncomingEvent::from_cloudevent(task_id, cloudevent));
    }

    #[tokio::test]
    async fn init_routes_to_monitor() {
        let (mut agent, _handle) = test_agent();
        assert_eq!(agent.step(Node::Init).await, Node::EventMonitor);
        assert_eq!(agent.state.status, AgentStatus::Idle);
    }

    #[tokio::test]
    async fn rsvp_task_with_dead_gateway_ends_in_error() {
        let (mut agent, handle) = test_agent();
        open_and_submit(&handle, "t1", rsvp_cloudevent()).await;

        let mut node = Node::Init;
        for _ in 0..10 {
            node = agent.step(node).await;
            if handle.lifecycles.final_status("t1").await.is_some() {
                break;
            }
        }
        assert_eq!(
            handle.lifecycles.final_status("t1").await,
            Some(LifecycleStatus::Error)
        );
        assert_eq!(agent.state.tool_call_history.len(), 1);
        assert!(!agent.state.tool_call_history[0].success);
        let lifecycle = handle.lifecycles.get("t1").await.unwrap();
        let visited = lifecycle.nodes_visited();
        assert!(visited.contains("reasoning"));
        assert!(visited.contains("tool-executor"));
        let _ = node;
    }

    #[tokio::test]
    async fn chat_message_completes_without_tools() {
        let (mut agent, handle) = test_agent();
        let cloudevent = CloudEvent::chat_message(ChatMessageData {
            guild_id: "100".to_string(),
            channel_id: "200".to_string(),
            user_id: "8".to_string(),
            message_id: None,
            content: "hello there".to_string(),
            message_type: "message".to_string(),
            metadata: JsonMap::new(),
        })
        .unwrap();
        open_and_submit(&handle, "t2", cloudevent).await;

        let mut node = Node::Init;
        for _ in 0..6 {
            node = agent.step(node).await;
            if handle.lifecycles.final_status("t2").await.is_some() {
                break;
            }
        }
        assert_eq!(
            handle.lifecycles.final_status("t2").await,
            Some(LifecycleStatus::Completed)
        );
        assert!(agent.state.tool_call_history.is_empty());
        // P8: completed implies the reasoning node was visited.
        let lifecycle = handle.lifecycles.get("t2").await.unwrap();
        assert!(lifecycle.nodes_visited().contains("reasoning"));
        let _ = node;
    }

    #[tokio::test]
    async fn recursion_limit_abandons_the_task() {
        let (mut agent, handle) = test_agent();
        agent.config.recursion_limit = 0;
        open_and_submit(&handle, "t3", rsvp_cloudevent()).await;

        let mut node = Node::Init;
        for _ in 0..4 {
            node = agent.step(node).await;
            if handle.lifecycles.final_status("t3").await.is_some() {
                break;
            }
        }
        assert_eq!(
            handle.lifecycles.final_status("t3").await,
            Some(LifecycleStatus::Abandoned)
        );
        assert!(agent.state.current_event.is_none());
        assert!(!agent.state.error_history.is_empty());
        let _ = node;
    }

    #[tokio::test]
    async fn stop_token_ends_the_loop() {
        let (agent, handle) = test_agent();
        let task = tokio::spawn(agent.run());
        handle.stop.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("agent loop must exit after stop")
            .unwrap();
    }
}
