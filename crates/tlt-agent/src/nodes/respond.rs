//! `respond` node: hands queued messages to the adapter via the snapshot
//! buffer and closes their task lifecycles.

use serde_json::Map;
use tlt_types::LifecycleStatus;

use crate::lifecycle::LifecycleTracker;
use crate::snapshot::SharedSnapshot;
use crate::state::AgentState;

pub const NODE_NAME: &str = "respond";

/// Drains the pending-messages queue into the per-guild snapshot buffer.
///
/// Each message carries a stable id, so a redelivered snapshot is idempotent
/// on the adapter side.
pub async fn run(state: &mut AgentState, lifecycles: &LifecycleTracker, snapshot: &SharedSnapshot) {
    let messages = std::mem::take(&mut state.pending_messages);
    if messages.is_empty() {
        return;
    }

    let mut buffer = snapshot.lock().await;
    for message in messages {
        let task_id = message.task_id.clone();
        tracing::debug!(
            message_id = %message.message_id,
            guild_id = %message.guild_id,
            "message handed off for delivery"
        );
        buffer.push_message(message);
        if let Some(task_id) = task_id {
            lifecycles
                .record(
                    &task_id,
                    LifecycleStatus::InRespond,
                    NODE_NAME,
                    "message handed off to adapter",
                    Map::new(),
                )
                .await;
            lifecycles
                .record(
                    &task_id,
                    LifecycleStatus::Completed,
                    NODE_NAME,
                    "reply delivered",
                    Map::new(),
                )
                .await;
        }
    }
}
