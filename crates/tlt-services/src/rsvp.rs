//! RSVP service: per-event attendance records and analytics.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{Map, Value, json};
use tlt_core::storage::{EventStateStore, UserStateStore};
use uuid::Uuid;

use crate::rpc::{RpcRequest, ToolOutcome, io_error, optional_str, reply, require_str};

/// Owns the `rsvps` and `processed_rsvps` arrays of each event record.
pub struct RsvpService {
    store: EventStateStore,
    user_store: UserStateStore,
}

/// Builds the service router.
pub fn router(service: Arc<RsvpService>) -> Router {
    Router::new()
        .route("/rpc", post(handle_rpc))
        .route("/health", get(|| async { "ok" }))
        .with_state(service)
}

async fn handle_rpc(
    State(service): State<Arc<RsvpService>>,
    Json(request): Json<RpcRequest>,
) -> Json<Value> {
    Json(reply(
        service.handle(&request.tool, request.arguments).await,
    ))
}

fn rsvp_entry(user_id: &str, emoji: Option<&str>, response: Option<&str>) -> Value {
    json!({
        "rsvp_id": Uuid::new_v4().to_string(),
        "user_id": user_id,
        "emoji": emoji,
        "response": response,
        "created_at": Utc::now(),
    })
}

fn is_for_user(entry: &Value, user_id: &str) -> bool {
    entry.get("user_id").and_then(Value::as_str) == Some(user_id)
}

impl RsvpService {
    pub fn new(store: EventStateStore, user_store: UserStateStore) -> Self {
        Self { store, user_store }
    }

    /// Dispatches one tool invocation.
    pub async fn handle(&self, tool: &str, arguments: Map<String, Value>) -> ToolOutcome {
        match tool {
            "process_rsvp" => self.process_rsvp(&arguments).await,
            "create_rsvp" => self.create_rsvp(&arguments).await,
            "get_rsvp" => self.get_rsvp(&arguments).await,
            "update_rsvp" | "update_user_rsvp" => self.update_user_rsvp(&arguments).await,
            "delete_rsvp" => self.delete_rsvp(&arguments).await,
            "get_user_rsvp_for_event" => self.user_rsvp_for_event(&arguments).await,
            "get_event_rsvps" => self.event_rsvps(&arguments).await,
            "get_user_rsvps" => self.user_rsvps(&arguments).await,
            "get_rsvp_analytics" => self.analytics(&arguments).await,
            "list_events_with_rsvps" => self.events_with_rsvps(&arguments).await,
            "get_rsvp_stats" => self.stats(&arguments).await,
            _ => Err(format!("not-found: unknown tool {tool}")),
        }
    }

    /// Handles a reaction add/remove coming off the agent path.
    async fn process_rsvp(&self, arguments: &Map<String, Value>) -> ToolOutcome {
        let guild_id = require_str(arguments, "guild_id")?;
        let event_id = require_str(arguments, "event_id")?;
        let user_id = require_str(arguments, "user_id")?;
        let rsvp_type = require_str(arguments, "rsvp_type")?;
        let emoji = optional_str(arguments, "emoji");

        match rsvp_type {
            "add" => {
                let entry = rsvp_entry(user_id, emoji, None);
                self.store
                    .replace_in_array(
                        guild_id,
                        event_id,
                        "rsvps",
                        |existing| is_for_user(existing, user_id),
                        Some(entry),
                    )
                    .await
                    .map_err(|err| io_error(&err))?;
            }
            "remove" => {
                self.store
                    .remove_from_array(guild_id, event_id, "rsvps", |existing| {
                        is_for_user(existing, user_id)
                    })
                    .await
                    .map_err(|err| io_error(&err))?;
            }
            other => {
                return Err(format!("validation-error: unknown rsvp_type {other}"));
            }
        }

        // The processed log keeps every reaction, adds and removals alike.
        let processed = json!({
            "user_id": user_id,
            "rsvp_type": rsvp_type,
            "emoji": emoji,
            "processed_at": Utc::now(),
        });
        self.store
            .append_to_array(guild_id, event_id, "processed_rsvps", processed.clone())
            .await
            .map_err(|err| io_error(&err))?;
        if let Err(err) = self
            .user_store
            .append(guild_id, event_id, user_id, json!({"tool": "process_rsvp", "result": processed}))
            .await
        {
            tracing::warn!(guild_id, event_id, user_id, error = %err, "user state append failed");
        }

        tracing::info!(guild_id, event_id, user_id, rsvp_type, "rsvp processed");
        Ok(json!({
            "guild_id": guild_id,
            "event_id": event_id,
            "user_id": user_id,
            "rsvp_type": rsvp_type,
            "emoji": emoji,
        }))
    }

    async fn create_rsvp(&self, arguments: &Map<String, Value>) -> ToolOutcome {
        let guild_id = require_str(arguments, "guild_id")?;
        let event_id = require_str(arguments, "event_id")?;
        let user_id = require_str(arguments, "user_id")?;
        let entry = rsvp_entry(
            user_id,
            optional_str(arguments, "emoji"),
            optional_str(arguments, "response"),
        );
        self.store
            .append_to_array(guild_id, event_id, "rsvps", entry.clone())
            .await
            .map_err(|err| io_error(&err))?;
        Ok(entry)
    }

    async fn get_rsvp(&self, arguments: &Map<String, Value>) -> ToolOutcome {
        let guild_id = require_str(arguments, "guild_id")?;
        let event_id = require_str(arguments, "event_id")?;
        let rsvp_id = require_str(arguments, "rsvp_id")?;
        let entries = self.load_rsvps(guild_id, event_id).await?;
        entries
            .into_iter()
            .find(|entry| entry.get("rsvp_id").and_then(Value::as_str) == Some(rsvp_id))
            .ok_or_else(|| format!("not-found: rsvp {rsvp_id}"))
    }

    async fn update_user_rsvp(&self, arguments: &Map<String, Value>) -> ToolOutcome {
        let guild_id = require_str(arguments, "guild_id")?;
        let event_id = require_str(arguments, "event_id")?;
        let user_id = require_str(arguments, "user_id")?;
        let entry = rsvp_entry(
            user_id,
            optional_str(arguments, "emoji"),
            optional_str(arguments, "response"),
        );
        let replaced = self
            .store
            .replace_in_array(
                guild_id,
                event_id,
                "rsvps",
                |existing| is_for_user(existing, user_id),
                Some(entry.clone()),
            )
            .await
            .map_err(|err| io_error(&err))?;
        Ok(json!({"updated": replaced > 0, "rsvp": entry}))
    }

    async fn delete_rsvp(&self, arguments: &Map<String, Value>) -> ToolOutcome {
        let guild_id = require_str(arguments, "guild_id")?;
        let event_id = require_str(arguments, "event_id")?;
        let rsvp_id = require_str(arguments, "rsvp_id")?;
        let removed = self
            .store
            .remove_from_array(guild_id, event_id, "rsvps", |entry| {
                entry.get("rsvp_id").and_then(Value::as_str) == Some(rsvp_id)
            })
            .await
            .map_err(|err| io_error(&err))?;
        if removed == 0 {
            return Err(format!("not-found: rsvp {rsvp_id}"));
        }
        Ok(json!({"rsvp_id": rsvp_id, "deleted": true}))
    }

    async fn user_rsvp_for_event(&self, arguments: &Map<String, Value>) -> ToolOutcome {
        let guild_id = require_str(arguments, "guild_id")?;
        let event_id = require_str(arguments, "event_id")?;
        let user_id = require_str(arguments, "user_id")?;
        let entries = self.load_rsvps(guild_id, event_id).await?;
        Ok(entries
            .into_iter()
            .find(|entry| is_for_user(entry, user_id))
            .unwrap_or(Value::Null))
    }

    async fn event_rsvps(&self, arguments: &Map<String, Value>) -> ToolOutcome {
        let guild_id = require_str(arguments, "guild_id")?;
        let event_id = require_str(arguments, "event_id")?;
        let entries = self.load_rsvps(guild_id, event_id).await?;
        Ok(json!({"event_id": event_id, "rsvps": entries}))
    }

    async fn user_rsvps(&self, arguments: &Map<String, Value>) -> ToolOutcome {
        let guild_id = require_str(arguments, "guild_id")?;
        let user_id = require_str(arguments, "user_id")?;
        let mut found = Vec::new();
        for event_id in self
            .store
            .list_events(guild_id)
            .await
            .map_err(|err| io_error(&err))?
        {
            for entry in self.load_rsvps(guild_id, &event_id).await? {
                if is_for_user(&entry, user_id) {
                    found.push(json!({"event_id": &event_id, "rsvp": entry}));
                }
            }
        }
        Ok(json!({"user_id": user_id, "rsvps": found}))
    }

    async fn analytics(&self, arguments: &Map<String, Value>) -> ToolOutcome {
        let guild_id = require_str(arguments, "guild_id")?;
        let event_id = require_str(arguments, "event_id")?;
        let entries = self.load_rsvps(guild_id, event_id).await?;
        let mut by_emoji: Map<String, Value> = Map::new();
        for entry in &entries {
            let emoji = entry
                .get("emoji")
                .and_then(Value::as_str)
                .unwrap_or("(none)");
            let count = by_emoji.get(emoji).and_then(Value::as_u64).unwrap_or(0);
            by_emoji.insert(emoji.to_string(), json!(count + 1));
        }
        Ok(json!({
            "event_id": event_id,
            "attendance_count": entries.len(),
            "by_emoji": by_emoji,
        }))
    }

    async fn events_with_rsvps(&self, arguments: &Map<String, Value>) -> ToolOutcome {
        let guild_id = require_str(arguments, "guild_id")?;
        let mut events = Vec::new();
        for event_id in self
            .store
            .list_events(guild_id)
            .await
            .map_err(|err| io_error(&err))?
        {
            let entries = self.load_rsvps(guild_id, &event_id).await?;
            if !entries.is_empty() {
                events.push(json!({"event_id": event_id, "rsvp_count": entries.len()}));
            }
        }
        Ok(json!({"guild_id": guild_id, "events": events}))
    }

    async fn stats(&self, arguments: &Map<String, Value>) -> ToolOutcome {
        let guild_id = require_str(arguments, "guild_id")?;
        let mut total = 0;
        let mut events = 0;
        for event_id in self
            .store
            .list_events(guild_id)
            .await
            .map_err(|err| io_error(&err))?
        {
            let count = self.load_rsvps(guild_id, &event_id).await?.len();
            if count > 0 {
                events += 1;
            }
            total += count;
        }
        Ok(json!({
            "guild_id": guild_id,
            "total_rsvps": total,
            "events_with_rsvps": events,
        }))
    }

    async fn load_rsvps(&self, guild_id: &str, event_id: &str) -> Result<Vec<Value>, String> {
        let record = self
            .store
            .load(guild_id, event_id)
            .await
            .map_err(|err| io_error(&err))?;
        Ok(record
            .get("rsvps")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }
}
