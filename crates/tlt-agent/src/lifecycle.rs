//! Shared lifecycle map: one record per task, appended from every node.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Map;
use tlt_types::{EventType, Lifecycle, LifecycleStatus, TriggerType};
use tokio::sync::Mutex;

/// How often waiters re-check a lifecycle for a final status.
pub const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Concurrent map of task lifecycles.
///
/// Structural changes and entry appends share one lock; appends are bounded
/// in rate, so contention stays negligible.
#[derive(Debug, Clone, Default)]
pub struct LifecycleTracker {
    inner: Arc<Mutex<HashMap<String, Lifecycle>>>,
}

impl LifecycleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a lifecycle for a new task and records `received`.
    pub async fn open(
        &self,
        task_id: &str,
        event_id: &str,
        trigger_type: TriggerType,
        event_type: EventType,
    ) {
        let mut lifecycle = Lifecycle::new(task_id, event_id, trigger_type, event_type);
        lifecycle.record(
            LifecycleStatus::Received,
            "task_manager",
            format!("cloudevent {event_id} received"),
            Map::new(),
        );
        self.inner
            .lock()
            .await
            .insert(task_id.to_string(), lifecycle);
    }

    /// Appends an entry; no-op for unknown task ids or sealed lifecycles.
    pub async fn record(
        &self,
        task_id: &str,
        status: LifecycleStatus,
        node_name: &str,
        details: impl Into<String>,
        metadata: Map<String, serde_json::Value>,
    ) -> bool {
        let mut map = self.inner.lock().await;
        match map.get_mut(task_id) {
            Some(lifecycle) => lifecycle.record(status, node_name, details, metadata),
            None => false,
        }
    }

    /// Snapshot of one lifecycle.
    pub async fn get(&self, task_id: &str) -> Option<Lifecycle> {
        self.inner.lock().await.get(task_id).cloned()
    }

    /// Final status of one lifecycle, when sealed.
    pub async fn final_status(&self, task_id: &str) -> Option<LifecycleStatus> {
        self.inner
            .lock()
            .await
            .get(task_id)
            .and_then(|lifecycle| lifecycle.final_status)
    }

    /// Polls until the lifecycle seals or `timeout` elapses.
    ///
    /// Returns `None` on timeout; the caller decides whether to abandon.
    pub async fn wait_for_final(
        &self,
        task_id: &str,
        timeout: Duration,
    ) -> Option<LifecycleStatus> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(status) = self.final_status(task_id).await {
                return Some(status);
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }
    }

    /// Abandons every unfinished lifecycle older than `max_age_minutes`.
    ///
    /// Returns the task ids that were abandoned.
    pub async fn sweep_abandoned(&self, max_age_minutes: i64) -> Vec<String> {
        let now = Utc::now();
        let max_age = chrono::Duration::minutes(max_age_minutes);
        let mut abandoned = Vec::new();
        let mut map = self.inner.lock().await;
        for (task_id, lifecycle) in map.iter_mut() {
            if lifecycle.is_stale(now, max_age) {
                lifecycle.record(
                    LifecycleStatus::Abandoned,
                    "lifecycle_sweep",
                    format!("no final status after {max_age_minutes} minutes"),
                    Map::new(),
                );
                abandoned.push(task_id.clone());
            }
        }
        abandoned
    }

    /// Number of tracked lifecycles.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    /// Whether no lifecycles are tracked.
    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn tracker_with_task(task_id: &str) -> LifecycleTracker {
        let tracker = LifecycleTracker::new();
        tracker
            .open(task_id, "event-1", TriggerType::RsvpEvent, EventType::RsvpEvent)
            .await;
        tracker
    }

    #[tokio::test]
    async fn open_records_received() {
        let tracker = tracker_with_task("t1").await;
        let lifecycle = tracker.get("t1").await.unwrap();
        assert_eq!(lifecycle.entries.len(), 1);
        assert_eq!(lifecycle.entries[0].status, LifecycleStatus::Received);
        assert!(lifecycle.final_status.is_none());
    }

    #[tokio::test]
    async fn wait_for_final_sees_completion() {
        let tracker = tracker_with_task("t1").await;
        let waiter = tracker.clone();
        let handle = tokio::spawn(async move {
            waiter
                .wait_for_final("t1", Duration::from_secs(2))
                .await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        tracker
            .record("t1", LifecycleStatus::Completed, "respond", "", Map::new())
            .await;
        assert_eq!(handle.await.unwrap(), Some(LifecycleStatus::Completed));
    }

    #[tokio::test]
    async fn wait_for_final_times_out() {
        let tracker = tracker_with_task("t1").await;
        let status = tracker
            .wait_for_final("t1", Duration::from_millis(150))
            .await;
        assert_eq!(status, None);
    }

    #[tokio::test]
    async fn sweep_abandons_only_stale_unfinished() {
        let tracker = tracker_with_task("stale").await;
        tracker
            .open("fresh", "e2", TriggerType::Timer, EventType::TimerTrigger)
            .await;
        // Backdate the stale lifecycle.
        {
            let mut map = tracker.inner.lock().await;
            if let Some(lifecycle) = map.get_mut("stale") {
                lifecycle.created_at = Utc::now() - chrono::Duration::minutes(45);
            }
        }
        let abandoned = tracker.sweep_abandoned(30).await;
        assert_eq!(abandoned, vec!["stale".to_string()]);
        assert_eq!(
            tracker.final_status("stale").await,
            Some(LifecycleStatus::Abandoned)
        );
        assert_eq!(tracker.final_status("fresh").await, None);
    }
}
