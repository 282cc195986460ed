//! Per-task lifecycle records: ordered status transitions with provenance.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::events::EventType;
use crate::task::TriggerType;

/// Default age after which an unfinished task is abandoned.
pub const DEFAULT_ABANDON_AGE_MINUTES: i64 = 30;

/// Lifecycle stages a task moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStatus {
    Received,
    Queued,
    Processing,
    InMonitor,
    InReasoning,
    InExecutor,
    InRespond,
    Completed,
    Abandoned,
    Error,
}

impl LifecycleStatus {
    /// Whether this status seals the lifecycle.
    pub fn is_final(self) -> bool {
        matches!(
            self,
            LifecycleStatus::Completed | LifecycleStatus::Abandoned | LifecycleStatus::Error
        )
    }
}

/// One recorded transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEntry {
    pub timestamp: DateTime<Utc>,
    pub status: LifecycleStatus,
    /// Graph node that recorded the entry.
    pub node_name: String,
    pub details: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Ordered record of one task's status transitions.
///
/// Once a final status is recorded the lifecycle is sealed: further appends
/// are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lifecycle {
    pub task_id: String,
    pub event_id: String,
    pub trigger_type: TriggerType,
    pub event_type: EventType,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_status: Option<LifecycleStatus>,
    pub entries: Vec<LifecycleEntry>,
}

impl Lifecycle {
    pub fn new(
        task_id: impl Into<String>,
        event_id: impl Into<String>,
        trigger_type: TriggerType,
        event_type: EventType,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            event_id: event_id.into(),
            trigger_type,
            event_type,
            created_at: Utc::now(),
            completed_at: None,
            final_status: None,
            entries: Vec::new(),
        }
    }

    /// Appends a transition; seals the record when `status` is final.
    ///
    /// Returns `false` if the lifecycle was already sealed and nothing was
    /// recorded.
    pub fn record(
        &mut self,
        status: LifecycleStatus,
        node_name: impl Into<String>,
        details: impl Into<String>,
        metadata: Map<String, Value>,
    ) -> bool {
        if self.is_sealed() {
            return false;
        }
        self.entries.push(LifecycleEntry {
            timestamp: Utc::now(),
            status,
            node_name: node_name.into(),
            details: details.into(),
            metadata,
        });
        if status.is_final() {
            self.final_status = Some(status);
            self.completed_at = Some(Utc::now());
        }
        true
    }

    pub fn is_sealed(&self) -> bool {
        self.final_status.is_some()
    }

    /// Whether the task exceeded `max_age` without reaching a final status.
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        !self.is_sealed() && now - self.created_at > max_age
    }

    /// Distinct node names that recorded entries.
    pub fn nodes_visited(&self) -> BTreeSet<&str> {
        self.entries
            .iter()
            .map(|entry| entry.node_name.as_str())
            .collect()
    }

    /// Ordered status history, for diagnostics.
    pub fn status_history(&self) -> Vec<LifecycleStatus> {
        self.entries.iter().map(|entry| entry.status).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lifecycle() -> Lifecycle {
        Lifecycle::new(
            "task-1",
            "event-1",
            TriggerType::RsvpEvent,
            EventType::RsvpEvent,
        )
    }

    #[test]
    fn sealing_blocks_further_entries() {
        let mut lc = lifecycle();
        assert!(lc.record(LifecycleStatus::Received, "task_manager", "", Map::new()));
        assert!(lc.record(LifecycleStatus::Completed, "respond", "", Map::new()));
        assert!(lc.is_sealed());
        assert!(!lc.record(LifecycleStatus::Error, "respond", "late", Map::new()));
        assert_eq!(lc.entries.len(), 2);
        assert_eq!(lc.final_status, Some(LifecycleStatus::Completed));
        assert!(lc.completed_at.is_some());
    }

    #[test]
    fn no_duplicate_final_states() {
        let mut lc = lifecycle();
        lc.record(LifecycleStatus::Received, "task_manager", "", Map::new());
        lc.record(LifecycleStatus::InReasoning, "reasoning", "", Map::new());
        lc.record(LifecycleStatus::Error, "tool_executor", "", Map::new());
        lc.record(LifecycleStatus::Completed, "respond", "", Map::new());
        let finals = lc
            .status_history()
            .into_iter()
            .filter(|s| s.is_final())
            .count();
        assert_eq!(finals, 1);
    }

    #[test]
    fn staleness_respects_seal() {
        let mut lc = lifecycle();
        lc.created_at = Utc::now() - Duration::minutes(45);
        assert!(lc.is_stale(Utc::now(), Duration::minutes(30)));
        lc.record(LifecycleStatus::Completed, "respond", "", Map::new());
        assert!(!lc.is_stale(Utc::now(), Duration::minutes(30)));
    }

    #[test]
    fn nodes_visited_collects_distinct_names() {
        let mut lc = lifecycle();
        lc.record(LifecycleStatus::InMonitor, "event-monitor", "", Map::new());
        lc.record(LifecycleStatus::InMonitor, "event-monitor", "", Map::new());
        lc.record(LifecycleStatus::InReasoning, "reasoning", "", Map::new());
        let nodes = lc.nodes_visited();
        assert_eq!(nodes.len(), 2);
        assert!(nodes.contains("reasoning"));
    }
}
