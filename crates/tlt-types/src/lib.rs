//! Shared wire types for the TLT event platform.
//!
//! This crate defines the contracts every other crate speaks: the CloudEvent
//! envelope with its closed type set, agent tasks, reasoning decisions, tool
//! requests, and per-task lifecycle records.

pub mod context;
pub mod decision;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod task;

pub use context::{ChatContext, EventContext, TimerContext};
pub use decision::{Decision, DecisionType, MessageToSend, ScheduledTimer, ToolRequest};
pub use error::{ErrorBody, ErrorKind};
pub use events::{CloudEvent, EventType, ValidationError};
pub use lifecycle::{Lifecycle, LifecycleEntry, LifecycleStatus};
pub use task::{AgentTask, TaskPriority, TaskStatus, TriggerType};
