//! Event-manager service: canonical event records under guild data.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{Map, Value, json};
use tlt_core::storage::EventStateStore;
use uuid::Uuid;

use crate::rpc::{RpcRequest, ToolOutcome, io_error, optional_str, reply, require_str};

/// Array fields counted by the analytics tools.
const TRACKED_ARRAYS: &[&str] = &[
    "rsvps",
    "processed_rsvps",
    "photo_submissions",
    "vibe_checks",
    "slideshows",
    "vibe_bit_placements",
];

/// Owns `event_manager_data` inside each event record.
pub struct EventManagerService {
    store: EventStateStore,
}

/// Builds the service router.
pub fn router(service: Arc<EventManagerService>) -> Router {
    Router::new()
        .route("/rpc", post(handle_rpc))
        .route("/health", get(|| async { "ok" }))
        .with_state(service)
}

async fn handle_rpc(
    State(service): State<Arc<EventManagerService>>,
    Json(request): Json<RpcRequest>,
) -> Json<Value> {
    Json(reply(
        service.handle(&request.tool, request.arguments).await,
    ))
}

impl EventManagerService {
    pub fn new(store: EventStateStore) -> Self {
        Self { store }
    }

    /// Dispatches one tool invocation.
    pub async fn handle(&self, tool: &str, arguments: Map<String, Value>) -> ToolOutcome {
        match tool {
            "create_event" => self.create_event(&arguments).await,
            "get_event" => self.get_event(&arguments).await,
            "update_event" => self.update_event(&arguments).await,
            "delete_event" => self.delete_event(&arguments).await,
            "list_all_events" => self.list_all_events(&arguments).await,
            "get_events_by_creator" => self.events_by(&arguments, "created_by", "creator_id").await,
            "get_events_by_status" => self.events_by(&arguments, "status", "status").await,
            "get_event_analytics" => self.event_analytics(&arguments).await,
            "search_events" => self.search_events(&arguments).await,
            "get_event_stats" => self.event_stats(&arguments).await,
            "save_event_to_guild_data" => self.save_event_to_guild_data(&arguments).await,
            _ => Err(format!("not-found: unknown tool {tool}")),
        }
    }

    async fn create_event(&self, arguments: &Map<String, Value>) -> ToolOutcome {
        let guild_id = require_str(arguments, "guild_id")?;
        let title = require_str(arguments, "title")?;
        let created_by = require_str(arguments, "created_by")?;
        let event_id = optional_str(arguments, "event_id")
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut record = Map::new();
        record.insert("event_id".to_string(), json!(event_id));
        record.insert("title".to_string(), json!(title));
        record.insert("created_by".to_string(), json!(created_by));
        record.insert("status".to_string(), json!("scheduled"));
        record.insert("created_at".to_string(), json!(Utc::now()));
        for key in ["description", "location", "start_time"] {
            if let Some(value) = optional_str(arguments, key) {
                record.insert(key.to_string(), json!(value));
            }
        }
        if let Some(metadata) = arguments.get("metadata").filter(|m| m.is_object()) {
            record.insert("metadata".to_string(), metadata.clone());
        }

        self.store
            .set_field(guild_id, &event_id, "event_manager_data", Value::Object(record.clone()))
            .await
            .map_err(|err| io_error(&err))?;
        tracing::info!(guild_id, event_id = %event_id, title, "event created");
        Ok(Value::Object(record))
    }

    async fn get_event(&self, arguments: &Map<String, Value>) -> ToolOutcome {
        let guild_id = require_str(arguments, "guild_id")?;
        let event_id = require_str(arguments, "event_id")?;
        let record = self
            .store
            .load(guild_id, event_id)
            .await
            .map_err(|err| io_error(&err))?;
        record
            .get("event_manager_data")
            .cloned()
            .ok_or_else(|| format!("not-found: event {event_id}"))
    }

    async fn update_event(&self, arguments: &Map<String, Value>) -> ToolOutcome {
        let guild_id = require_str(arguments, "guild_id")?;
        let event_id = require_str(arguments, "event_id")?;
        let existing = self.get_event(arguments).await?;
        let Value::Object(mut data) = existing else {
            return Err(format!("internal-error: malformed record for {event_id}"));
        };
        for key in ["title", "description", "location", "start_time", "status"] {
            if let Some(value) = optional_str(arguments, key) {
                data.insert(key.to_string(), json!(value));
            }
        }
        if let Some(metadata) = arguments.get("metadata").filter(|m| m.is_object()) {
            data.insert("metadata".to_string(), metadata.clone());
        }
        data.insert("updated_at".to_string(), json!(Utc::now()));
        self.store
            .set_field(guild_id, event_id, "event_manager_data", Value::Object(data.clone()))
            .await
            .map_err(|err| io_error(&err))?;
        Ok(Value::Object(data))
    }

    async fn delete_event(&self, arguments: &Map<String, Value>) -> ToolOutcome {
        let guild_id = require_str(arguments, "guild_id")?;
        let event_id = require_str(arguments, "event_id")?;
        let user_id = require_str(arguments, "user_id")?;
        // Existence check keeps delete idempotent but honest about misses.
        self.get_event(arguments).await?;
        self.store
            .set_path(guild_id, event_id, "event_manager_data.status", json!("deleted"))
            .await
            .map_err(|err| io_error(&err))?;
        self.store
            .set_path(guild_id, event_id, "event_manager_data.deleted_by", json!(user_id))
            .await
            .map_err(|err| io_error(&err))?;
        Ok(json!({"event_id": event_id, "status": "deleted"}))
    }

    async fn list_all_events(&self, arguments: &Map<String, Value>) -> ToolOutcome {
        let guild_id = require_str(arguments, "guild_id")?;
        let summaries = self.load_summaries(guild_id).await?;
        let total = summaries.len();
        Ok(json!({"guild_id": guild_id, "events": summaries, "total": total}))
    }

    async fn events_by(
        &self,
        arguments: &Map<String, Value>,
        record_key: &str,
        argument_key: &str,
    ) -> ToolOutcome {
        let guild_id = require_str(arguments, "guild_id")?;
        let wanted = require_str(arguments, argument_key)?;
        let summaries = self.load_summaries(guild_id).await?;
        let matching: Vec<Value> = summaries
            .into_iter()
            .filter(|event| event.get(record_key).and_then(Value::as_str) == Some(wanted))
            .collect();
        Ok(json!({"guild_id": guild_id, "events": matching}))
    }

    async fn event_analytics(&self, arguments: &Map<String, Value>) -> ToolOutcome {
        let guild_id = require_str(arguments, "guild_id")?;
        let event_id = require_str(arguments, "event_id")?;
        let record = self
            .store
            .load(guild_id, event_id)
            .await
            .map_err(|err| io_error(&err))?;
        if !record.contains_key("event_manager_data") {
            return Err(format!("not-found: event {event_id}"));
        }
        let mut counts = Map::new();
        for field in TRACKED_ARRAYS {
            let len = record
                .get(*field)
                .and_then(Value::as_array)
                .map_or(0, Vec::len);
            counts.insert((*field).to_string(), json!(len));
        }
        Ok(json!({"event_id": event_id, "counts": counts}))
    }

    async fn search_events(&self, arguments: &Map<String, Value>) -> ToolOutcome {
        let guild_id = require_str(arguments, "guild_id")?;
        let query = require_str(arguments, "query")?.to_lowercase();
        let summaries = self.load_summaries(guild_id).await?;
        let matching: Vec<Value> = summaries
            .into_iter()
            .filter(|event| {
                ["title", "description", "location"].iter().any(|key| {
                    event
                        .get(*key)
                        .and_then(Value::as_str)
                        .is_some_and(|text| text.to_lowercase().contains(&query))
                })
            })
            .collect();
        Ok(json!({"guild_id": guild_id, "query": query, "events": matching}))
    }

    async fn event_stats(&self, arguments: &Map<String, Value>) -> ToolOutcome {
        let guild_id = require_str(arguments, "guild_id")?;
        let summaries = self.load_summaries(guild_id).await?;
        let mut by_status: Map<String, Value> = Map::new();
        for event in &summaries {
            let status = event
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            let count = by_status.get(status).and_then(Value::as_u64).unwrap_or(0);
            by_status.insert(status.to_string(), json!(count + 1));
        }
        Ok(json!({
            "guild_id": guild_id,
            "total_events": summaries.len(),
            "by_status": by_status,
        }))
    }

    async fn save_event_to_guild_data(&self, arguments: &Map<String, Value>) -> ToolOutcome {
        let guild_id = require_str(arguments, "guild_id")?;
        let event_id = require_str(arguments, "event_id")?;
        let saved_by = optional_str(arguments, "user_id")
            .or_else(|| optional_str(arguments, "created_by"))
            .unwrap_or("unknown")
            .to_string();

        // Everything except the routing identifiers merges into the record.
        let mut merged: Map<String, Value> = arguments
            .iter()
            .filter(|(key, _)| !matches!(key.as_str(), "guild_id" | "metadata"))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        if let Some(Value::Object(event_data)) = arguments.get("event_data") {
            merged.remove("event_data");
            for (key, value) in event_data {
                merged.insert(key.clone(), value.clone());
            }
        }

        self.store
            .update(guild_id, event_id, move |record| {
                let data = record
                    .entry("event_manager_data".to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
                if let Value::Object(data) = data {
                    for (key, value) in merged {
                        data.insert(key, value);
                    }
                    data.insert("saved_to_guild_data_at".to_string(), json!(Utc::now()));
                    data.insert("saved_by".to_string(), json!(saved_by));
                }
            })
            .await
            .map_err(|err| io_error(&err))?;
        tracing::info!(guild_id, event_id, "event saved to guild data");
        Ok(json!({"guild_id": guild_id, "event_id": event_id, "saved": true}))
    }

    async fn load_summaries(&self, guild_id: &str) -> Result<Vec<Value>, String> {
        let event_ids = self
            .store
            .list_events(guild_id)
            .await
            .map_err(|err| io_error(&err))?;
        let mut summaries = Vec::with_capacity(event_ids.len());
        for event_id in event_ids {
            let record = self
                .store
                .load(guild_id, &event_id)
                .await
                .map_err(|err| io_error(&err))?;
            if let Some(data) = record.get("event_manager_data") {
                summaries.push(data.clone());
            }
        }
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn service() -> (TempDir, EventManagerService) {
        let dir = TempDir::new().unwrap();
        let service = EventManagerService::new(EventStateStore::new(dir.path()));
        (dir, service)
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn create_then_get() {
        let (dir, service) = service();
        let created = service
            .handle(
                "create_event",
                args(json!({
                    "guild_id": "100", "event_id": "42",
                    "title": "Launch", "created_by": "7", "location": "HQ"
                })),
            )
            .await
            .unwrap();
        assert_eq!(created["title"], json!("Launch"));
        assert!(dir.path().join("100/42/event.json").exists());

        let fetched = service
            .handle("get_event", args(json!({"guild_id": "100", "event_id": "42"})))
            .await
            .unwrap();
        assert_eq!(fetched["location"], json!("HQ"));
        assert_eq!(fetched["status"], json!("scheduled"));
    }

    #[tokio::test]
    async fn get_missing_event_is_not_found() {
        let (_dir, service) = service();
        let err = service
            .handle("get_event", args(json!({"guild_id": "100", "event_id": "nope"})))
            .await
            .unwrap_err();
        assert!(err.starts_with("not-found"));
    }

    #[tokio::test]
    async fn save_merges_event_data() {
        let (_dir, service) = service();
        service
            .handle(
                "create_event",
                args(json!({
                    "guild_id": "100", "event_id": "42",
                    "title": "Launch", "created_by": "7"
                })),
            )
            .await
            .unwrap();
        service
            .handle(
                "save_event_to_guild_data",
                args(json!({
                    "guild_id": "100", "event_id": "42", "user_id": "7",
                    "event_data": {"topic": "Launch", "time": "2030-01-01T18:00:00Z"}
                })),
            )
            .await
            .unwrap();
        let fetched = service
            .handle("get_event", args(json!({"guild_id": "100", "event_id": "42"})))
            .await
            .unwrap();
        assert_eq!(fetched["title"], json!("Launch"));
        assert_eq!(fetched["topic"], json!("Launch"));
        assert_eq!(fetched["saved_by"], json!("7"));
    }

    #[tokio::test]
    async fn search_and_stats() {
        let (_dir, service) = service();
        for (id, title) in [("1", "Launch party"), ("2", "Retro")] {
            service
                .handle(
                    "create_event",
                    args(json!({
                        "guild_id": "100", "event_id": id,
                        "title": title, "created_by": "7"
                    })),
                )
                .await
                .unwrap();
        }
        let found = service
            .handle(
                "search_events",
                args(json!({"guild_id": "100", "query": "launch"})),
            )
            .await
            .unwrap();
        assert_eq!(found["events"].as_array().unwrap().len(), 1);

        let stats = service
            .handle("get_event_stats", args(json!({"guild_id": "100"})))
            .await
            .unwrap();
        assert_eq!(stats["total_events"], json!(2));
        assert_eq!(stats["by_status"]["scheduled"], json!(2));
    }

    #[tokio::test]
    async fn delete_marks_status() {
        let (_dir, service) = service();
        service
            .handle(
                "create_event",
                args(json!({
                    "guild_id": "100", "event_id": "42",
                    "title": "Launch", "created_by": "7"
                })),
            )
            .await
            .unwrap();
        service
            .handle(
                "delete_event",
                args(json!({"guild_id": "100", "event_id": "42", "user_id": "7"})),
            )
            .await
            .unwrap();
        let fetched = service
            .handle("get_event", args(json!({"guild_id": "100", "event_id": "42"})))
            .await
            .unwrap();
        assert_eq!(fetched["status"], json!("deleted"));
    }

    #[tokio::test]
    async fn analytics_counts_arrays() {
        let (_dir, service) = service();
        service
            .handle(
                "create_event",
                args(json!({
                    "guild_id": "100", "event_id": "42",
                    "title": "Launch", "created_by": "7"
                })),
            )
            .await
            .unwrap();
        let analytics = service
            .handle(
                "get_event_analytics",
                args(json!({"guild_id": "100", "event_id": "42"})),
            )
            .await
            .unwrap();
        assert_eq!(analytics["counts"]["rsvps"], json!(0));
        assert_eq!(analytics["counts"]["vibe_checks"], json!(0));
    }
}
