//! Back-end service registry: which service hosts which tools.
//!
//! Seeded from the per-service URL configuration at start; the registry is
//! the source of truth for tool discovery.

use serde::Serialize;
use tlt_core::config::ServiceUrls;

/// Tools exposed by the event-manager service.
pub const EVENT_MANAGER_TOOLS: &[&str] = &[
    "create_event",
    "get_event",
    "update_event",
    "delete_event",
    "list_all_events",
    "get_events_by_creator",
    "get_events_by_status",
    "get_event_analytics",
    "search_events",
    "get_event_stats",
    "save_event_to_guild_data",
];

/// Tools exposed by the rsvp service.
pub const RSVP_TOOLS: &[&str] = &[
    "create_rsvp",
    "get_rsvp",
    "update_rsvp",
    "delete_rsvp",
    "get_user_rsvp_for_event",
    "get_event_rsvps",
    "get_user_rsvps",
    "update_user_rsvp",
    "get_rsvp_analytics",
    "list_events_with_rsvps",
    "get_rsvp_stats",
    "process_rsvp",
];

/// Tools exposed by the guild-manager service.
pub const GUILD_MANAGER_TOOLS: &[&str] = &[
    "register_guild",
    "deregister_guild",
    "get_guild_info",
    "list_guilds",
    "update_guild_settings",
    "get_guild_stats",
];

/// Tools exposed by the photo-vibe-check service.
pub const PHOTO_VIBE_CHECK_TOOLS: &[&str] = &[
    "submit_photo_dm",
    "activate_photo_collection",
    "deactivate_photo_collection",
    "update_photo_settings",
    "add_pre_event_photos",
    "get_photo_status",
    "get_event_photo_summary",
    "generate_event_slideshow",
    "get_user_photo_history",
];

/// Tools exposed by the vibe-canvas service.
pub const VIBE_CANVAS_TOOLS: &[&str] = &[
    "vibe_bit",
    "create_vibe_canvas",
    "activate_vibe_canvas",
    "deactivate_vibe_canvas",
    "update_vibe_settings",
    "get_vibe_canvas_image",
    "get_vibe_canvas_preview",
    "get_vibe_canvas_stats",
    "get_user_vibe_history",
    "get_color_palettes",
    "get_emoji_sets",
    "create_vibe_snapshot",
];

/// One registered back-end.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceEntry {
    pub name: String,
    pub url: String,
    pub tools: Vec<String>,
}

/// Registry of every back-end behind the gateway.
#[derive(Debug, Clone)]
pub struct ServiceRegistry {
    entries: Vec<ServiceEntry>,
}

impl ServiceRegistry {
    /// Builds the registry from configured service URLs.
    pub fn from_services(urls: &ServiceUrls) -> Self {
        let tools_for = |name: &str| -> &'static [&'static str] {
            match name {
                "event-manager" => EVENT_MANAGER_TOOLS,
                "rsvp" => RSVP_TOOLS,
                "guild-manager" => GUILD_MANAGER_TOOLS,
                "photo-vibe-check" => PHOTO_VIBE_CHECK_TOOLS,
                _ => VIBE_CANVAS_TOOLS,
            }
        };
        let entries = urls
            .entries()
            .into_iter()
            .map(|(name, url)| ServiceEntry {
                name: name.to_string(),
                url: url.to_string(),
                tools: tools_for(name).iter().map(ToString::to_string).collect(),
            })
            .collect();
        Self { entries }
    }

    /// The service hosting `tool`, when any.
    pub fn service_for_tool(&self, tool: &str) -> Option<&ServiceEntry> {
        self.entries
            .iter()
            .find(|entry| entry.tools.iter().any(|t| t == tool))
    }

    /// All registered services.
    pub fn entries(&self) -> &[ServiceEntry] {
        &self.entries
    }
}
