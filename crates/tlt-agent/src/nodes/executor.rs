//! `tool-executor` node: shapes arguments, routes requests through the
//! gateway, and closes task lifecycles on the result.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value, json};
use tlt_gateway::GatewayClient;
use tlt_types::{LifecycleStatus, ToolRequest};

use crate::lifecycle::LifecycleTracker;
use crate::state::{AgentState, ToolCallRecord};

pub const NODE_NAME: &str = "tool-executor";

/// Keys never forwarded to a back-end tool.
const FORBIDDEN_KEYS: &[&str] = &["action", "event_data", "interaction_data"];

/// Drains and executes every pending tool request.
pub async fn run(state: &mut AgentState, lifecycles: &LifecycleTracker, gateway: &GatewayClient) {
    let requests = std::mem::take(&mut state.pending_tool_requests);
    for request in requests {
        execute_request(state, lifecycles, gateway, request).await;
    }
}

async fn execute_request(
    state: &mut AgentState,
    lifecycles: &LifecycleTracker,
    gateway: &GatewayClient,
    request: ToolRequest,
) {
    let task_id = request
        .metadata
        .get("task_id")
        .and_then(Value::as_str)
        .map(str::to_string);
    let action = request
        .arguments
        .get("action")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let tool = map_tool_name(&request.tool_name, &action);
    let arguments = shape_arguments(&request.tool_name, &action, &request.arguments);

    if let Some(task_id) = &task_id {
        lifecycles
            .record(
                task_id,
                LifecycleStatus::InExecutor,
                NODE_NAME,
                format!("invoking {tool} via gateway"),
                Map::new(),
            )
            .await;
    }

    match gateway.call(&tool, arguments.clone()).await {
        Ok(envelope) if envelope.success => {
            let result = envelope.result.clone().unwrap_or(Value::Null);
            state.push_tool_call(ToolCallRecord {
                tool_name: tool.clone(),
                arguments: arguments.clone(),
                success: true,
                error: None,
                result: Some(result.clone()),
                timestamp: Utc::now(),
                task_id: task_id.clone(),
            });

            // A created event is immediately persisted to guild data with the
            // full merged payload.
            if action == "create_event" {
                follow_on_save(state, gateway, &arguments, &result, task_id.as_deref()).await;
            }

            if let Some(task_id) = &task_id {
                let mut metadata = Map::new();
                metadata.insert("tool".to_string(), json!(tool));
                lifecycles
                    .record(
                        task_id,
                        LifecycleStatus::Completed,
                        NODE_NAME,
                        format!("{tool} succeeded"),
                        metadata,
                    )
                    .await;
            }
        }
        Ok(envelope) => {
            let error = envelope
                .error
                .unwrap_or_else(|| "upstream-error: unknown failure".to_string());
            tracing::warn!(tool = %tool, error = %error, "tool call failed");
            state.push_tool_call(ToolCallRecord {
                tool_name: tool.clone(),
                arguments,
                success: false,
                error: Some(error.clone()),
                result: None,
                timestamp: Utc::now(),
                task_id: task_id.clone(),
            });
            state.push_error(format!("{tool}: {error}"));
            if let Some(task_id) = &task_id {
                lifecycles
                    .record(
                        task_id,
                        LifecycleStatus::Error,
                        NODE_NAME,
                        format!("{tool} failed: {error}"),
                        Map::new(),
                    )
                    .await;
            }
        }
        Err(err) => {
            let error = format!("gateway unreachable: {err:#}");
            tracing::error!(tool = %tool, error = %error, "gateway call failed");
            state.push_tool_call(ToolCallRecord {
                tool_name: tool.clone(),
                arguments,
                success: false,
                error: Some(error.clone()),
                result: None,
                timestamp: Utc::now(),
                task_id: task_id.clone(),
            });
            state.push_error(error.clone());
            if let Some(task_id) = &task_id {
                lifecycles
                    .record(task_id, LifecycleStatus::Error, NODE_NAME, error, Map::new())
                    .await;
            }
        }
    }
}

/// Emits the follow-on `save_event_to_guild_data` for a created event.
async fn follow_on_save(
    state: &mut AgentState,
    gateway: &GatewayClient,
    create_arguments: &Map<String, Value>,
    create_result: &Value,
    task_id: Option<&str>,
) {
    let event_id = create_result
        .get("event_id")
        .and_then(Value::as_str)
        .or_else(|| create_arguments.get("event_id").and_then(Value::as_str))
        .map(str::to_string);
    let Some(event_id) = event_id else {
        tracing::warn!("created event carries no event_id; skipping guild-data save");
        return;
    };

    let mut save_arguments = Map::new();
    save_arguments.insert("event_id".to_string(), json!(event_id));
    if let Some(guild_id) = create_arguments.get("guild_id") {
        save_arguments.insert("guild_id".to_string(), guild_id.clone());
    }
    if let Some(created_by) = create_arguments.get("created_by") {
        save_arguments.insert("user_id".to_string(), created_by.clone());
    }
    // Full merged payload: what was sent plus what came back.
    let mut event_data = create_arguments.clone();
    if let Value::Object(result) = create_result {
        for (key, value) in result {
            event_data.insert(key.clone(), value.clone());
        }
    }
    save_arguments.insert("event_data".to_string(), Value::Object(event_data));

    match gateway
        .call("save_event_to_guild_data", save_arguments.clone())
        .await
    {
        Ok(envelope) => {
            let success = envelope.success;
            state.push_tool_call(ToolCallRecord {
                tool_name: "save_event_to_guild_data".to_string(),
                arguments: save_arguments,
                success,
                error: envelope.error,
                result: envelope.result,
                timestamp: Utc::now(),
                task_id: task_id.map(str::to_string),
            });
        }
        Err(err) => {
            state.push_tool_call(ToolCallRecord {
                tool_name: "save_event_to_guild_data".to_string(),
                arguments: save_arguments,
                success: false,
                error: Some(format!("gateway unreachable: {err:#}")),
                result: None,
                timestamp: Utc::now(),
                task_id: task_id.map(str::to_string),
            });
        }
    }
}

/// Ceiling on cached event contexts.
const CONTEXT_CACHE_CAP: usize = 100;

/// Periodic side-task: probe gateway health and refresh the event-context
/// cache for events referenced by active timers or recent tool calls.
pub async fn refresh_event_contexts(state: &mut AgentState, gateway: &GatewayClient) {
    if !gateway.ping().await {
        tracing::warn!("gateway ping failed");
        state.push_error("gateway ping failed");
        return;
    }

    let mut wanted: Vec<(String, String)> = Vec::new();
    for timer in &state.active_timers {
        if let Some(guild_id) = timer.metadata.get("guild_id").and_then(Value::as_str) {
            wanted.push((guild_id.to_string(), timer.event_id.clone()));
        }
    }
    for call in state.last_tool_calls(10) {
        if let (Some(guild_id), Some(event_id)) = (
            call.arguments.get("guild_id").and_then(Value::as_str),
            call.arguments.get("event_id").and_then(Value::as_str),
        ) {
            wanted.push((guild_id.to_string(), event_id.to_string()));
        }
    }
    wanted.sort();
    wanted.dedup();

    for (guild_id, event_id) in wanted {
        let mut arguments = Map::new();
        arguments.insert("guild_id".to_string(), json!(guild_id));
        arguments.insert("event_id".to_string(), json!(event_id));
        match gateway.call("get_event", arguments).await {
            Ok(envelope) if envelope.success => {
                let result = envelope.result.unwrap_or(Value::Null);
                let context = tlt_types::EventContext {
                    event_id: event_id.clone(),
                    title: result
                        .get("title")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    created_by: result
                        .get("created_by")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    start_time: result
                        .get("start_time")
                        .and_then(Value::as_str)
                        .and_then(|raw| parse_iso_time(raw)),
                    message_id: None,
                    metadata: Map::new(),
                };
                state.event_context_cache.insert(event_id, context);
            }
            Ok(_) | Err(_) => {}
        }
    }

    // The cache stays bounded even when many events churn through.
    if state.event_context_cache.len() > CONTEXT_CACHE_CAP {
        let mut keys: Vec<String> = state.event_context_cache.keys().cloned().collect();
        keys.sort();
        keys.truncate(keys.len() - CONTEXT_CACHE_CAP / 2);
        for key in keys {
            state.event_context_cache.remove(&key);
        }
    }
}

/// Maps a logical service tag plus action onto the concrete gateway tool.
pub fn map_tool_name(service: &str, action: &str) -> String {
    let mapped = match service {
        "event-manager" => match action {
            "create_event" | "update_event" | "delete_event" | "get_event"
            | "list_all_events" | "get_events_by_creator" | "get_events_by_status"
            | "get_event_analytics" | "search_events" | "get_event_stats"
            | "save_event_to_guild_data" => action,
            "list_events" => "list_all_events",
            _ => "get_event",
        },
        "rsvp" => match action {
            "process_rsvp" | "create_rsvp" | "get_rsvp" | "update_rsvp" | "delete_rsvp"
            | "get_user_rsvp_for_event" | "get_event_rsvps" | "get_user_rsvps"
            | "update_user_rsvp" | "get_rsvp_analytics" | "list_events_with_rsvps"
            | "get_rsvp_stats" => action,
            _ => "get_event_rsvps",
        },
        "guild-manager" => match action {
            "register_guild" | "deregister_guild" | "get_guild_info" | "list_guilds"
            | "update_guild_settings" | "get_guild_stats" => action,
            _ => "get_guild_info",
        },
        "photo-vibe-check" => match action {
            "submit_photo_dm" | "activate_photo_collection" | "deactivate_photo_collection"
            | "update_photo_settings" | "add_pre_event_photos" | "get_photo_status"
            | "get_event_photo_summary" | "generate_event_slideshow"
            | "get_user_photo_history" => action,
            _ => "get_photo_status",
        },
        "vibe-canvas" => match action {
            "vibe_bit" | "create_vibe_canvas" | "activate_vibe_canvas"
            | "deactivate_vibe_canvas" | "update_vibe_settings" | "get_vibe_canvas_image"
            | "get_vibe_canvas_preview" | "get_vibe_canvas_stats" | "get_user_vibe_history"
            | "get_color_palettes" | "get_emoji_sets" | "create_vibe_snapshot" => action,
            _ => "get_vibe_canvas_stats",
        },
        // Unknown service tags pass the action through as the tool name.
        _ => {
            if action.is_empty() {
                service
            } else {
                action
            }
        }
    };
    mapped.to_string()
}

/// Shapes logical arguments into what the target tool accepts.
///
/// Forbidden keys (`action` and the nested `event_data`/`interaction_data`
/// containers) never survive; `start_time` is forwarded only when the input
/// time parses as ISO-8601.
pub fn shape_arguments(
    service: &str,
    action: &str,
    arguments: &Map<String, Value>,
) -> Map<String, Value> {
    let shaped = match (service, action) {
        ("event-manager", "create_event") => shape_create_event(arguments),
        ("event-manager", "update_event") => shape_update_event(arguments),
        ("event-manager", "list_events" | "list_all_events") => {
            let mut out = Map::new();
            if let Some(guild_id) = arguments.get("guild_id") {
                out.insert("guild_id".to_string(), guild_id.clone());
            }
            if let Some(status) = arguments.get("status").filter(|v| !v.is_null()) {
                out.insert("status".to_string(), status.clone());
            }
            out.insert(
                "limit".to_string(),
                arguments.get("limit").cloned().unwrap_or(json!(100)),
            );
            out
        }
        ("rsvp", "process_rsvp") => {
            let mut out = Map::new();
            for key in ["guild_id", "event_id", "user_id", "rsvp_type", "emoji", "metadata"] {
                if let Some(value) = arguments.get(key).filter(|v| !v.is_null()) {
                    out.insert(key.to_string(), value.clone());
                }
            }
            out
        }
        ("photo-vibe-check", "submit_photo_dm") => {
            let mut out = Map::new();
            let guild_id = arguments
                .get("guild_id")
                .filter(|v| !v.is_null())
                .cloned()
                .or_else(|| {
                    arguments
                        .get("metadata")
                        .and_then(|m| m.get("guild_id"))
                        .cloned()
                });
            if let Some(guild_id) = guild_id {
                out.insert("guild_id".to_string(), guild_id);
            }
            for key in ["event_id", "user_id", "photo_url", "metadata"] {
                if let Some(value) = arguments.get(key).filter(|v| !v.is_null()) {
                    out.insert(key.to_string(), value.clone());
                }
            }
            out
        }
        ("photo-vibe-check", "add_pre_event_photos") => {
            let mut out = Map::new();
            for key in ["guild_id", "event_id", "user_id", "metadata"] {
                if let Some(value) = arguments.get(key).filter(|v| !v.is_null()) {
                    out.insert(key.to_string(), value.clone());
                }
            }
            let urls = arguments
                .get("photo_urls")
                .cloned()
                .or_else(|| {
                    arguments
                        .get("image_url")
                        .and_then(Value::as_str)
                        .map(|url| json!([url]))
                })
                .unwrap_or_else(|| json!([]));
            out.insert("photo_urls".to_string(), urls);
            out
        }
        _ => arguments.clone(),
    };

    let mut shaped = shaped;
    for key in FORBIDDEN_KEYS {
        shaped.remove(*key);
    }
    shaped
}

fn shape_create_event(arguments: &Map<String, Value>) -> Map<String, Value> {
    let event_data = nested(arguments, "event_data");
    let interaction_data = nested(arguments, "interaction_data");
    let metadata = nested(arguments, "metadata");

    let title = event_data
        .get("topic")
        .or_else(|| event_data.get("title"))
        .and_then(Value::as_str)
        .unwrap_or("Unknown Event");
    let location = event_data.get("location").and_then(Value::as_str);
    let time_str = event_data.get("time").and_then(Value::as_str);

    let mut out = Map::new();
    out.insert("title".to_string(), json!(title));
    out.insert(
        "created_by".to_string(),
        json!(
            interaction_data
                .get("user_id")
                .or_else(|| interaction_data.get("user_name"))
                .and_then(Value::as_str)
                .unwrap_or("Unknown")
        ),
    );
    if let Some(guild_id) = arguments
        .get("guild_id")
        .filter(|v| !v.is_null())
        .cloned()
        .or_else(|| interaction_data.get("guild_id").cloned())
        .or_else(|| metadata.get("chat_guild_id").cloned())
    {
        out.insert("guild_id".to_string(), guild_id);
    }
    if let Some(message_id) = event_data.get("message_id").filter(|v| !v.is_null()) {
        out.insert("event_id".to_string(), json!(stringify(message_id)));
    }
    if let Some(description) = build_description(location, time_str) {
        out.insert("description".to_string(), json!(description));
    }
    if let Some(location) = location {
        out.insert("location".to_string(), json!(location));
    }
    if let Some(time_str) = time_str
        && parse_iso_time(time_str).is_some()
    {
        out.insert("start_time".to_string(), json!(time_str));
    }
    out.insert(
        "metadata".to_string(),
        json!({
            "chat_message_id": event_data.get("message_id"),
            "chat_thread_id": event_data.get("thread_id"),
            "chat_guild_id": interaction_data.get("guild_id"),
            "chat_channel_id": interaction_data.get("channel_id"),
            "chat_user_id": interaction_data.get("user_id"),
            "chat_user_name": interaction_data.get("user_name"),
            "original_time": time_str,
        }),
    );
    out
}

fn shape_update_event(arguments: &Map<String, Value>) -> Map<String, Value> {
    let event_data = nested(arguments, "event_data");
    let interaction_data = nested(arguments, "interaction_data");
    let metadata = nested(arguments, "metadata");

    let mut out = Map::new();
    let event_id = event_data
        .get("message_id")
        .filter(|v| !v.is_null())
        .cloned()
        .or_else(|| arguments.get("event_id").cloned())
        .unwrap_or_else(|| json!("unknown"));
    out.insert("event_id".to_string(), json!(stringify(&event_id)));
    out.insert(
        "user_id".to_string(),
        arguments
            .get("user_id")
            .filter(|v| !v.is_null())
            .cloned()
            .or_else(|| interaction_data.get("user_id").cloned())
            .unwrap_or_else(|| json!("unknown")),
    );
    if let Some(guild_id) = arguments
        .get("guild_id")
        .filter(|v| !v.is_null())
        .cloned()
        .or_else(|| interaction_data.get("guild_id").cloned())
        .or_else(|| metadata.get("chat_guild_id").cloned())
    {
        out.insert("guild_id".to_string(), guild_id);
    }
    if let Some(title) = event_data
        .get("topic")
        .or_else(|| event_data.get("title"))
        .and_then(Value::as_str)
    {
        out.insert("title".to_string(), json!(title));
    }
    let location = event_data.get("location").and_then(Value::as_str);
    let time_str = event_data.get("time").and_then(Value::as_str);
    if let Some(description) = build_description(location, time_str) {
        out.insert("description".to_string(), json!(description));
    }
    if let Some(time_str) = time_str
        && parse_iso_time(time_str).is_some()
    {
        out.insert("start_time".to_string(), json!(time_str));
    }
    if let Some(Value::Object(update_data)) = arguments.get("update_data") {
        for (key, value) in update_data {
            out.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }
    out
}

/// Identifier values arrive as strings or numbers; tools expect strings.
fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn nested(arguments: &Map<String, Value>, key: &str) -> Map<String, Value> {
    arguments
        .get(key)
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

fn build_description(location: Option<&str>, time_str: Option<&str>) -> Option<String> {
    let mut parts = Vec::new();
    if let Some(location) = location {
        parts.push(format!("Location: {location}"));
    }
    if let Some(time) = time_str {
        parts.push(format!("Time: {time}"));
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(", "))
    }
}

/// Accepts RFC 3339 / ISO-8601 timestamps, `Z` suffix included.
fn parse_iso_time(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_event_arguments(time: &str) -> Map<String, Value> {
        json!({
            "action": "create_event",
            "guild_id": "100",
            "event_data": {
                "topic": "Launch",
                "location": "HQ",
                "time": time,
                "message_id": "42"
            },
            "interaction_data": {
                "user_id": "7",
                "user_name": "Ada",
                "guild_id": "100",
                "channel_id": "200"
            }
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    #[test]
    fn create_event_flattens_and_gates_start_time() {
        let shaped = shape_arguments(
            "event-manager",
            "create_event",
            &create_event_arguments("2030-01-01T18:00:00Z"),
        );
        assert!(!shaped.contains_key("action"));
        assert!(!shaped.contains_key("event_data"));
        assert!(!shaped.contains_key("interaction_data"));
        assert_eq!(shaped["title"], json!("Launch"));
        assert_eq!(shaped["created_by"], json!("7"));
        assert_eq!(shaped["guild_id"], json!("100"));
        assert_eq!(shaped["event_id"], json!("42"));
        assert_eq!(shaped["location"], json!("HQ"));
        assert_eq!(
            shaped["description"],
            json!("Location: HQ, Time: 2030-01-01T18:00:00Z")
        );
        assert_eq!(shaped["start_time"], json!("2030-01-01T18:00:00Z"));
        assert_eq!(shaped["metadata"]["chat_channel_id"], json!("200"));
    }

    #[test]
    fn malformed_time_is_omitted() {
        let shaped = shape_arguments(
            "event-manager",
            "create_event",
            &create_event_arguments("next friday"),
        );
        assert!(!shaped.contains_key("start_time"));
        assert_eq!(shaped["metadata"]["original_time"], json!("next friday"));
    }

    #[test]
    fn no_shaped_call_carries_action() {
        for (service, action) in [
            ("event-manager", "create_event"),
            ("event-manager", "list_all_events"),
            ("event-manager", "save_event_to_guild_data"),
            ("rsvp", "process_rsvp"),
            ("photo-vibe-check", "submit_photo_dm"),
            ("vibe-canvas", "vibe_bit"),
        ] {
            let mut arguments = Map::new();
            arguments.insert("action".to_string(), json!(action));
            arguments.insert("guild_id".to_string(), json!("100"));
            let shaped = shape_arguments(service, action, &arguments);
            assert!(!shaped.contains_key("action"), "{service}/{action}");
        }
    }

    #[test]
    fn rsvp_envelope_passes_through() {
        let arguments = json!({
            "action": "process_rsvp",
            "guild_id": "100",
            "event_id": "42",
            "user_id": "8",
            "rsvp_type": "add",
            "emoji": "✅"
        })
        .as_object()
        .cloned()
        .unwrap();
        let shaped = shape_arguments("rsvp", "process_rsvp", &arguments);
        assert_eq!(shaped["guild_id"], json!("100"));
        assert_eq!(shaped["emoji"], json!("✅"));
        assert_eq!(shaped.len(), 5);
    }

    #[test]
    fn photo_guild_id_resolves_from_metadata() {
        let arguments = json!({
            "action": "submit_photo_dm",
            "event_id": "42",
            "user_id": "8",
            "photo_url": "http://x/y.jpg",
            "metadata": {"guild_id": "100"}
        })
        .as_object()
        .cloned()
        .unwrap();
        let shaped = shape_arguments("photo-vibe-check", "submit_photo_dm", &arguments);
        assert_eq!(shaped["guild_id"], json!("100"));
        assert_eq!(shaped["photo_url"], json!("http://x/y.jpg"));
    }

    #[test]
    fn promotion_image_url_becomes_photo_urls() {
        let arguments = json!({
            "action": "add_pre_event_photos",
            "guild_id": "100",
            "event_id": "42",
            "user_id": "8",
            "image_url": "http://x/promo.png"
        })
        .as_object()
        .cloned()
        .unwrap();
        let shaped = shape_arguments("photo-vibe-check", "add_pre_event_photos", &arguments);
        assert_eq!(shaped["photo_urls"], json!(["http://x/promo.png"]));
        assert!(!shaped.contains_key("image_url") || shaped.contains_key("photo_urls"));
    }

    #[test]
    fn tool_mapping_defaults() {
        assert_eq!(map_tool_name("event-manager", "list_events"), "list_all_events");
        assert_eq!(map_tool_name("event-manager", "bogus"), "get_event");
        assert_eq!(map_tool_name("rsvp", "bogus"), "get_event_rsvps");
        assert_eq!(map_tool_name("guild-manager", ""), "get_guild_info");
        assert_eq!(map_tool_name("photo-vibe-check", "x"), "get_photo_status");
        assert_eq!(map_tool_name("vibe-canvas", "x"), "get_vibe_canvas_stats");
        assert_eq!(map_tool_name("ping", ""), "ping");
    }

    #[tokio::test]
    async fn failed_ping_records_an_error_and_skips_refresh() {
        let mut state = AgentState::new("agent", false);
        state.event_context_cache.insert(
            "42".to_string(),
            tlt_types::EventContext {
                event_id: "42".to_string(),
                ..Default::default()
            },
        );
        let gateway = GatewayClient::new("http://127.0.0.1:1/rpc/");
        refresh_event_contexts(&mut state, &gateway).await;
        assert_eq!(state.error_history.len(), 1);
        assert!(state.error_history[0].contains("ping"));
        // The stale entry survives; nothing was refreshed or evicted.
        assert!(state.event_context_cache.contains_key("42"));
    }

    #[test]
    fn numeric_message_id_becomes_string_event_id() {
        let mut arguments = create_event_arguments("2030-01-01T18:00:00Z");
        if let Some(Value::Object(event_data)) = arguments.get_mut("event_data") {
            event_data.insert("message_id".to_string(), json!(42));
        }
        let shaped = shape_arguments("event-manager", "create_event", &arguments);
        assert_eq!(shaped["event_id"], json!("42"));
    }
}
