//! The ambient agent: a directed state graph that drives every queued
//! CloudEvent through monitor, reasoning, executor, and respond nodes.

pub mod analysis;
pub mod graph;
pub mod lifecycle;
pub mod nodes;
pub mod snapshot;
pub mod state;

pub use graph::{Agent, AgentConfig, AgentHandle, Node};
pub use lifecycle::LifecycleTracker;
pub use snapshot::{SharedSnapshot, SnapshotBuffer, new_shared_snapshot};
pub use state::{AgentState, AgentStatus, IncomingEvent, ToolCallRecord};
