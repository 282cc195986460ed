//! Chat adapter: translates platform events into CloudEvents, forwards them
//! to the Task Manager, and applies the agent's outbound actions.

pub mod chat;
pub mod classify;
pub mod ingest;
pub mod ingress;
pub mod poller;

pub use chat::{Attachment, ChatClient, ChatEvent, ChatUpdate};
pub use classify::{ClassifyOutcome, Classifier, EventPostRef};
pub use ingress::IngressClient;
