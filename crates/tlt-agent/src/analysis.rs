//! Fixed CloudEvent-to-tool analysis table.
//!
//! For every event type the table yields a deterministic recommendation:
//! which logical service to call, with which action and arguments. The
//! reasoning node consults it before and after the model, so a model-free
//! deployment still routes every event correctly.

use serde_json::{Map, Value, json};
use tlt_types::{CloudEvent, EventType};

/// Deterministic recommendation for one CloudEvent.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolAnalysis {
    /// Whether the event warrants a tool call at all.
    pub requires_tool: bool,
    /// Logical service tag (`event-manager`, `rsvp`, ...).
    pub tool_name: Option<&'static str>,
    /// Service action the executor maps to a concrete gateway tool.
    pub action: Option<&'static str>,
    /// Arguments forwarded to the executor, including the `action` key the
    /// executor later strips.
    pub arguments: Map<String, Value>,
    /// Default confidence attached to table-driven decisions.
    pub confidence: f64,
}

impl ToolAnalysis {
    fn log_only() -> Self {
        Self {
            requires_tool: false,
            tool_name: None,
            action: None,
            arguments: Map::new(),
            confidence: 0.9,
        }
    }

    fn tool(tool_name: &'static str, action: &'static str, arguments: Map<String, Value>) -> Self {
        Self {
            requires_tool: true,
            tool_name: Some(tool_name),
            action: Some(action),
            arguments,
            confidence: 0.9,
        }
    }
}

/// Analyses one CloudEvent against the fixed table.
pub fn analyze_cloudevent(cloudevent: &CloudEvent) -> ToolAnalysis {
    let data = cloudevent.data.as_object().cloned().unwrap_or_default();
    let guild_id = cloudevent.guild_id().map(str::to_string);

    let pass_through = |keys: &[&str]| -> Map<String, Value> {
        let mut arguments = Map::new();
        for key in keys {
            if let Some(value) = data.get(*key) {
                arguments.insert((*key).to_string(), value.clone());
            }
        }
        if let Some(guild) = &guild_id {
            arguments
                .entry("guild_id".to_string())
                .or_insert_with(|| json!(guild));
        }
        arguments
    };

    match cloudevent.event_type {
        EventType::CreateEvent => {
            let mut arguments = pass_through(&["event_data", "interaction_data", "metadata"]);
            arguments.insert("action".to_string(), json!("create_event"));
            ToolAnalysis::tool("event-manager", "create_event", arguments)
        }
        EventType::UpdateEvent => {
            let mut arguments = pass_through(&[
                "event_id",
                "update_type",
                "update_data",
                "user_id",
                "event_data",
                "interaction_data",
                "metadata",
            ]);
            arguments.insert("action".to_string(), json!("update_event"));
            ToolAnalysis::tool("event-manager", "update_event", arguments)
        }
        EventType::DeleteEvent => {
            let mut arguments = pass_through(&["event_id", "user_id", "metadata"]);
            arguments.insert("action".to_string(), json!("delete_event"));
            ToolAnalysis::tool("event-manager", "delete_event", arguments)
        }
        EventType::ListEvents => {
            let mut arguments = pass_through(&["user_id", "metadata"]);
            arguments.insert("action".to_string(), json!("list_all_events"));
            ToolAnalysis::tool("event-manager", "list_all_events", arguments)
        }
        EventType::EventInfo => ToolAnalysis::log_only(),
        EventType::RsvpEvent => {
            let mut arguments =
                pass_through(&["event_id", "user_id", "rsvp_type", "emoji", "metadata"]);
            arguments.insert("action".to_string(), json!("process_rsvp"));
            ToolAnalysis::tool("rsvp", "process_rsvp", arguments)
        }
        EventType::RegisterGuild => {
            let mut arguments =
                pass_through(&["guild_name", "user_id", "user_name", "channel_id", "metadata"]);
            arguments.insert("action".to_string(), json!("register_guild"));
            ToolAnalysis::tool("guild-manager", "register_guild", arguments)
        }
        EventType::DeregisterGuild => {
            let mut arguments =
                pass_through(&["guild_name", "user_id", "user_name", "channel_id", "metadata"]);
            arguments.insert("action".to_string(), json!("deregister_guild"));
            ToolAnalysis::tool("guild-manager", "deregister_guild", arguments)
        }
        EventType::PhotoVibeCheck => {
            let mut arguments =
                pass_through(&["event_id", "user_id", "photo_url", "filename", "metadata"]);
            arguments.insert("action".to_string(), json!("submit_photo_dm"));
            ToolAnalysis::tool("photo-vibe-check", "submit_photo_dm", arguments)
        }
        EventType::PromotionImage => {
            let mut arguments = pass_through(&[
                "event_id",
                "user_id",
                "image_url",
                "local_path",
                "filename",
                "metadata",
            ]);
            arguments.insert("action".to_string(), json!("add_pre_event_photos"));
            ToolAnalysis::tool("photo-vibe-check", "add_pre_event_photos", arguments)
        }
        EventType::VibeAction => {
            let action = data.get("action").and_then(Value::as_str).unwrap_or("");
            let mut arguments =
                pass_through(&["event_id", "user_id", "action", "event_data", "metadata"]);
            // Canvas actions go to the canvas service; everything else is a
            // photo workflow action.
            if matches!(action, "vibe_bit" | "create_vibe_canvas" | "create_vibe_snapshot") {
                let mapped = match action {
                    "vibe_bit" => "vibe_bit",
                    "create_vibe_canvas" => "create_vibe_canvas",
                    _ => "create_vibe_snapshot",
                };
                arguments.insert("action".to_string(), json!(mapped));
                ToolAnalysis::tool("vibe-canvas", mapped, arguments)
            } else {
                arguments.insert("action".to_string(), json!("generate_event_slideshow"));
                ToolAnalysis::tool("photo-vibe-check", "generate_event_slideshow", arguments)
            }
        }
        EventType::SaveEventToGuildData => {
            let mut arguments =
                pass_through(&["event_id", "event_data", "user_id", "user_name", "metadata"]);
            arguments.insert("action".to_string(), json!("save_event_to_guild_data"));
            ToolAnalysis::tool("event-manager", "save_event_to_guild_data", arguments)
        }
        EventType::TimerTrigger | EventType::ChatMessage => ToolAnalysis::log_only(),
    }
}
