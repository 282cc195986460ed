//! Back-end micro-services behind the TLT gateway.
//!
//! Each service owns one slice of guild data and answers the shared
//! `{tool, arguments}` RPC convention the gateway forwards.

pub mod event_manager;
pub mod guild_manager;
pub mod photo;
pub mod rpc;
pub mod rsvp;
pub mod vibe_canvas;

pub use event_manager::EventManagerService;
pub use guild_manager::GuildManagerService;
pub use photo::PhotoVibeCheckService;
pub use rsvp::RsvpService;
pub use vibe_canvas::VibeCanvasService;
