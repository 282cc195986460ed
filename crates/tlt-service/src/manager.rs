//! Task Manager: accepts CloudEvents, wraps them as tracked agent tasks,
//! enforces rate limits, and drives tasks to completion via the agent.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value, json};
use tlt_agent::{AgentHandle, IncomingEvent};
use tlt_types::{
    AgentTask, CloudEvent, ErrorKind, LifecycleStatus, TaskPriority, TaskStatus, ValidationError,
};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// How long the worker sleeps when the queue is empty.
const DEQUEUE_IDLE_WAIT: Duration = Duration::from_millis(100);

/// Sliding rate-limit window length.
const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Task Manager tunables.
#[derive(Debug, Clone)]
pub struct TaskManagerConfig {
    /// Submissions allowed per sliding 60-second window.
    pub rate_limit_per_minute: u32,
    /// Queue length past which ingress sheds load.
    pub queue_soft_ceiling: usize,
    /// Submission-to-completion timeout.
    pub task_timeout: Duration,
    /// Completed tasks retained before eviction.
    pub max_completed_tasks: usize,
}

impl Default for TaskManagerConfig {
    fn default() -> Self {
        Self {
            rate_limit_per_minute: 30,
            queue_soft_ceiling: 100,
            task_timeout: Duration::from_secs(500),
            max_completed_tasks: 1000,
        }
    }
}

/// Why a submission was refused.
#[derive(Debug)]
pub enum SubmitError {
    Validation(ValidationError),
    RateLimited(&'static str),
}

impl SubmitError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SubmitError::Validation(_) => ErrorKind::ValidationError,
            SubmitError::RateLimited(_) => ErrorKind::RateLimited,
        }
    }
}

impl fmt::Display for SubmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmitError::Validation(err) => err.fmt(f),
            SubmitError::RateLimited(reason) => write!(f, "rate limited: {reason}"),
        }
    }
}

#[derive(Debug, Default)]
struct Metrics {
    tasks_received: u64,
    tasks_completed: u64,
    tasks_failed: u64,
    rate_limit_hits: u64,
}

/// FIFO per priority class; dequeue picks the highest non-empty class.
#[derive(Debug, Default)]
struct PriorityQueue {
    lanes: [VecDeque<String>; 4],
}

impl PriorityQueue {
    fn lane(priority: TaskPriority) -> usize {
        match priority {
            TaskPriority::Urgent => 0,
            TaskPriority::High => 1,
            TaskPriority::Normal => 2,
            TaskPriority::Low => 3,
        }
    }

    fn push(&mut self, priority: TaskPriority, task_id: String) {
        self.lanes[Self::lane(priority)].push_back(task_id);
    }

    fn pop(&mut self) -> Option<String> {
        self.lanes.iter_mut().find_map(VecDeque::pop_front)
    }

    fn len(&self) -> usize {
        self.lanes.iter().map(VecDeque::len).sum()
    }
}

/// Owns pending and completed tasks and the ingress rate limiter.
pub struct TaskManager {
    config: TaskManagerConfig,
    agent: AgentHandle,
    queue: Mutex<PriorityQueue>,
    pending: Mutex<HashMap<String, AgentTask>>,
    completed: Mutex<CompletedTasks>,
    window: Mutex<VecDeque<Instant>>,
    metrics: Mutex<Metrics>,
    uptime_start: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct CompletedTasks {
    tasks: HashMap<String, AgentTask>,
    /// Completion order; front is oldest and evicts first.
    order: VecDeque<String>,
}

impl TaskManager {
    pub fn new(config: TaskManagerConfig, agent: AgentHandle) -> Self {
        Self {
            config,
            agent,
            queue: Mutex::new(PriorityQueue::default()),
            pending: Mutex::new(HashMap::new()),
            completed: Mutex::new(CompletedTasks::default()),
            window: Mutex::new(VecDeque::new()),
            metrics: Mutex::new(Metrics::default()),
            uptime_start: Utc::now(),
        }
    }

    /// Validates, rate-limits, wraps, and enqueues one CloudEvent.
    ///
    /// # Errors
    /// Returns [`SubmitError::Validation`] when the envelope fails its
    /// contract and [`SubmitError::RateLimited`] when the sliding window or
    /// the queue ceiling refuses the submission.
    pub async fn submit(&self, cloudevent: CloudEvent) -> Result<String, SubmitError> {
        cloudevent.validate().map_err(SubmitError::Validation)?;

        if !self.check_rate_limit().await {
            self.metrics.lock().await.rate_limit_hits += 1;
            return Err(SubmitError::RateLimited("sliding window exceeded"));
        }
        if self.queue.lock().await.len() >= self.config.queue_soft_ceiling {
            self.metrics.lock().await.rate_limit_hits += 1;
            return Err(SubmitError::RateLimited("queue is saturated"));
        }

        let task = AgentTask::from_cloudevent(cloudevent);
        let task_id = task.task_id.clone();
        self.agent
            .lifecycles
            .open(
                &task_id,
                &task.event_id,
                task.trigger_type,
                task.cloudevent.event_type,
            )
            .await;
        self.agent
            .lifecycles
            .record(
                &task_id,
                LifecycleStatus::Queued,
                "task_manager",
                format!("queued at priority {:?}", task.priority),
                Map::new(),
            )
            .await;

        self.queue.lock().await.push(task.priority, task_id.clone());
        self.pending.lock().await.insert(task_id.clone(), task);
        self.metrics.lock().await.tasks_received += 1;
        tracing::info!(task_id = %task_id, "task submitted");
        Ok(task_id)
    }

    /// Sliding 60-second window; prunes, then admits iff under the cap.
    async fn check_rate_limit(&self) -> bool {
        let now = Instant::now();
        let mut window = self.window.lock().await;
        while window
            .front()
            .is_some_and(|t| now.duration_since(*t) > RATE_WINDOW)
        {
            window.pop_front();
        }
        if window.len() >= self.config.rate_limit_per_minute as usize {
            return false;
        }
        window.push_back(now);
        true
    }

    /// Task record by id, pending or completed.
    pub async fn status(&self, task_id: &str) -> Option<AgentTask> {
        if let Some(task) = self.pending.lock().await.get(task_id) {
            return Some(task.clone());
        }
        self.completed.lock().await.tasks.get(task_id).cloned()
    }

    /// Tasks in priority-then-creation order, optionally filtered, capped.
    pub async fn list(&self, status_filter: Option<TaskStatus>, limit: usize) -> Vec<AgentTask> {
        let mut tasks: Vec<AgentTask> = {
            let pending = self.pending.lock().await;
            let completed = self.completed.lock().await;
            pending
                .values()
                .chain(completed.tasks.values())
                .filter(|task| status_filter.is_none_or(|status| task.status == status))
                .cloned()
                .collect()
        };
        tasks.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
        });
        tasks.truncate(limit);
        tasks
    }

    /// Drains the agent's per-guild outbound actions for the adapter.
    pub async fn snapshot(&self) -> Value {
        self.agent.snapshot.lock().await.drain()
    }

    /// Aggregate counters for `/monitor/status`.
    pub async fn metrics_snapshot(&self) -> Value {
        let metrics = self.metrics.lock().await;
        json!({
            "tasks_received": metrics.tasks_received,
            "tasks_completed": metrics.tasks_completed,
            "tasks_failed": metrics.tasks_failed,
            "rate_limit_hits": metrics.rate_limit_hits,
            "pending_tasks": self.pending.lock().await.len(),
            "queued_tasks": self.queue.lock().await.len(),
            "uptime_start": self.uptime_start,
        })
    }

    /// Lifecycle record for one task, for diagnostics endpoints.
    pub async fn lifecycle(&self, task_id: &str) -> Option<tlt_types::Lifecycle> {
        self.agent.lifecycles.get(task_id).await
    }

    /// Worker loop: dequeues tasks, hands them to the agent, and awaits
    /// their lifecycle's final status.
    pub async fn run_worker(&self, stop: CancellationToken) {
        tracing::info!("task manager worker started");
        loop {
            if stop.is_cancelled() {
                break;
            }
            let next = self.queue.lock().await.pop();
            let Some(task_id) = next else {
                tokio::select! {
                    () = stop.cancelled() => break,
                    () = tokio::time::sleep(DEQUEUE_IDLE_WAIT) => continue,
                }
            };
            self.process_task(&task_id).await;
        }
        tracing::info!("task manager worker stopped");
    }

    async fn process_task(&self, task_id: &str) {
        let Some(mut task) = self.pending.lock().await.get(task_id).cloned() else {
            tracing::warn!(task_id, "queued task vanished from pending map");
            return;
        };
        task.set_status(TaskStatus::Processing);
        self.pending
            .lock()
            .await
            .insert(task_id.to_string(), task.clone());
        self.agent
            .lifecycles
            .record(
                task_id,
                LifecycleStatus::Processing,
                "task_manager",
                "dispatched to agent",
                Map::new(),
            )
            .await;

        // The whole envelope goes to the agent; the monitor node classifies.
        if !self
            .agent
            .submit(IncomingEvent::from_cloudevent(task_id, task.cloudevent.clone()))
        {
            self.finish_task(task, Some("agent unavailable".to_string()), None)
                .await;
            return;
        }

        let final_status = self
            .agent
            .lifecycles
            .wait_for_final(task_id, self.config.task_timeout)
            .await;

        match final_status {
            Some(LifecycleStatus::Completed) => {
                let result = json!({"final_status": "completed"});
                self.finish_task(task, None, Some(result)).await;
            }
            Some(status) => {
                self.finish_task(task, Some(format!("lifecycle ended {status:?}")), None)
                    .await;
            }
            None => {
                self.agent
                    .lifecycles
                    .record(
                        task_id,
                        LifecycleStatus::Abandoned,
                        "task_manager",
                        format!("no final status within {:?}", self.config.task_timeout),
                        Map::new(),
                    )
                    .await;
                self.finish_task(task, Some("task timed out".to_string()), None)
                    .await;
            }
        }
    }

    async fn finish_task(&self, mut task: AgentTask, error: Option<String>, result: Option<Value>) {
        let task_id = task.task_id.clone();
        match error {
            Some(error) => {
                task.fail(error);
                self.metrics.lock().await.tasks_failed += 1;
            }
            None => {
                task.complete(result.unwrap_or(Value::Null));
                self.metrics.lock().await.tasks_completed += 1;
            }
        }
        self.pending.lock().await.remove(&task_id);

        let mut completed = self.completed.lock().await;
        completed.order.push_back(task_id.clone());
        completed.tasks.insert(task_id, task);
        while completed.tasks.len() > self.config.max_completed_tasks {
            let Some(oldest) = completed.order.pop_front() else {
                break;
            };
            completed.tasks.remove(&oldest);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::Map as JsonMap;
    use tlt_agent::{Agent, AgentConfig};
    use tlt_gateway::GatewayClient;
    use tlt_types::events::{ChatMessageData, RsvpEventData};

    use super::*;

    fn manager(config: TaskManagerConfig) -> (Arc<TaskManager>, AgentHandle) {
        let agent_config = AgentConfig {
            idle_wait: Duration::from_millis(10),
            ..AgentConfig::default()
        };
        let (agent, handle) =
            Agent::new(agent_config, GatewayClient::new("http://127.0.0.1:1/rpc/"), None);
        tokio::spawn(agent.run());
        (Arc::new(TaskManager::new(config, handle.clone())), handle)
    }

    fn rsvp_cloudevent() -> CloudEvent {
        CloudEvent::rsvp_event(
            "200",
            RsvpEventData {
                guild_id: "100".to_string(),
                event_id: "42".to_string(),
                user_id: "8".to_string(),
                rsvp_type: "add".to_string(),
                emoji: None,
                metadata: JsonMap::new(),
            },
        )
        .unwrap()
    }

    fn chat_cloudevent() -> CloudEvent {
        CloudEvent::chat_message(ChatMessageData {
            guild_id: "100".to_string(),
            channel_id: "200".to_string(),
            user_id: "8".to_string(),
            message_id: None,
            content: "hi".to_string(),
            message_type: "message".to_string(),
            metadata: JsonMap::new(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn submit_opens_lifecycle_and_queues() {
        let (manager, handle) = manager(TaskManagerConfig::default());
        let task_id = manager.submit(rsvp_cloudevent()).await.unwrap();
        let task = manager.status(&task_id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        let lifecycle = handle.lifecycles.get(&task_id).await.unwrap();
        let history = lifecycle.status_history();
        assert_eq!(
            history,
            vec![LifecycleStatus::Received, LifecycleStatus::Queued]
        );
    }

    #[tokio::test]
    async fn invalid_envelope_is_rejected_without_a_task() {
        let (manager, handle) = manager(TaskManagerConfig::default());
        let mut cloudevent = rsvp_cloudevent();
        cloudevent.source = "/nope".to_string();
        let err = manager.submit(cloudevent).await.unwrap_err();
        assert!(matches!(err, SubmitError::Validation(_)));
        assert_eq!(err.kind(), ErrorKind::ValidationError);
        assert!(handle.lifecycles.is_empty().await);
        assert_eq!(manager.list(None, 10).await.len(), 0);
    }

    #[tokio::test]
    async fn rate_limit_admits_exactly_the_cap() {
        let config = TaskManagerConfig {
            rate_limit_per_minute: 5,
            ..TaskManagerConfig::default()
        };
        let (manager, _handle) = manager(config);
        let mut ok = 0;
        let mut limited = 0;
        for _ in 0..8 {
            match manager.submit(rsvp_cloudevent()).await {
                Ok(_) => ok += 1,
                Err(SubmitError::RateLimited(_)) => limited += 1,
                Err(other) => panic!("unexpected {other}"),
            }
        }
        assert_eq!(ok, 5);
        assert_eq!(limited, 3);
        let metrics = manager.metrics_snapshot().await;
        assert_eq!(metrics["rate_limit_hits"], json!(3));
        assert_eq!(metrics["tasks_received"], json!(5));
    }

    #[tokio::test]
    async fn queue_ceiling_sheds_load() {
        let config = TaskManagerConfig {
            rate_limit_per_minute: 100,
            queue_soft_ceiling: 2,
            ..TaskManagerConfig::default()
        };
        let (manager, _handle) = manager(config);
        assert!(manager.submit(rsvp_cloudevent()).await.is_ok());
        assert!(manager.submit(rsvp_cloudevent()).await.is_ok());
        let err = manager.submit(rsvp_cloudevent()).await.unwrap_err();
        assert!(matches!(err, SubmitError::RateLimited("queue is saturated")));
    }

    #[tokio::test]
    async fn worker_drives_task_to_completion() {
        let (manager, _handle) = manager(TaskManagerConfig::default());
        let stop = CancellationToken::new();
        let worker = {
            let manager = Arc::clone(&manager);
            let stop = stop.clone();
            tokio::spawn(async move { manager.run_worker(stop).await })
        };

        let task_id = manager.submit(chat_cloudevent()).await.unwrap();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(task) = manager.status(&task_id).await
                && task.status == TaskStatus::Completed
            {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "task never completed");
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        let metrics = manager.metrics_snapshot().await;
        assert_eq!(metrics["tasks_completed"], json!(1));
        stop.cancel();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn worker_marks_failed_on_error_lifecycle() {
        // Dead gateway: the rsvp tool call fails and the lifecycle errors.
        let (manager, _handle) = manager(TaskManagerConfig::default());
        let stop = CancellationToken::new();
        {
            let manager = Arc::clone(&manager);
            let stop = stop.clone();
            tokio::spawn(async move { manager.run_worker(stop).await });
        }

        let task_id = manager.submit(rsvp_cloudevent()).await.unwrap();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            if let Some(task) = manager.status(&task_id).await
                && task.status == TaskStatus::Failed
            {
                assert!(task.error.unwrap().contains("Error"));
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "task never failed");
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        stop.cancel();
    }

    #[tokio::test]
    async fn completed_map_evicts_oldest() {
        let config = TaskManagerConfig {
            max_completed_tasks: 2,
            rate_limit_per_minute: 100,
            ..TaskManagerConfig::default()
        };
        let (manager, _handle) = manager(config);
        let mut ids = Vec::new();
        for _ in 0..3 {
            let task_id = manager.submit(chat_cloudevent()).await.unwrap();
            let task = manager.pending.lock().await.get(&task_id).cloned().unwrap();
            manager.finish_task(task, None, None).await;
            ids.push(task_id);
        }
        assert!(manager.status(&ids[0]).await.is_none());
        assert!(manager.status(&ids[1]).await.is_some());
        assert!(manager.status(&ids[2]).await.is_some());
    }

    #[tokio::test]
    async fn list_orders_by_priority_then_creation() {
        let (manager, _handle) = manager(TaskManagerConfig::default());
        let low = manager.submit(chat_cloudevent()).await.unwrap();
        // create-event defaults to high priority.
        let mut event_data = JsonMap::new();
        event_data.insert("topic".to_string(), json!("Launch"));
        let mut interaction_data = JsonMap::new();
        interaction_data.insert("user_id".to_string(), json!("7"));
        let high = manager
            .submit(
                CloudEvent::create_event(
                    "100",
                    "200",
                    tlt_types::events::CreateEventData {
                        event_data,
                        interaction_data,
                        metadata: JsonMap::new(),
                    },
                )
                .unwrap(),
            )
            .await
            .unwrap();

        let listed = manager.list(None, 10).await;
        assert_eq!(listed[0].task_id, high);
        assert_eq!(listed[1].task_id, low);
    }
}
