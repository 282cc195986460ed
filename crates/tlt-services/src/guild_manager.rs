//! Guild-manager service: registration records at `<root>/<guild>/guild.json`.

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{Map, Value, json};
use tlt_core::storage::write_atomic;
use tokio::sync::Mutex;

use crate::rpc::{RpcRequest, ToolOutcome, io_error, optional_str, reply, require_str};

/// Owns the per-guild registration record.
pub struct GuildManagerService {
    root: PathBuf,
    write_lock: Mutex<()>,
}

/// Builds the service router.
pub fn router(service: Arc<GuildManagerService>) -> Router {
    Router::new()
        .route("/rpc", post(handle_rpc))
        .route("/health", get(|| async { "ok" }))
        .with_state(service)
}

async fn handle_rpc(
    State(service): State<Arc<GuildManagerService>>,
    Json(request): Json<RpcRequest>,
) -> Json<Value> {
    Json(reply(
        service.handle(&request.tool, request.arguments).await,
    ))
}

impl GuildManagerService {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Dispatches one tool invocation.
    pub async fn handle(&self, tool: &str, arguments: Map<String, Value>) -> ToolOutcome {
        match tool {
            "register_guild" => self.register(&arguments).await,
            "deregister_guild" => self.deregister(&arguments).await,
            "get_guild_info" => self.info(&arguments).await,
            "list_guilds" => self.list(&arguments).await,
            "update_guild_settings" => self.update_settings(&arguments).await,
            "get_guild_stats" => self.stats(&arguments).await,
            _ => Err(format!("not-found: unknown tool {tool}")),
        }
    }

    fn guild_path(&self, guild_id: &str) -> PathBuf {
        self.root.join(guild_id).join("guild.json")
    }

    async fn load(&self, guild_id: &str) -> Result<Option<Map<String, Value>>, String> {
        let path = self.guild_path(guild_id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<Value>(&bytes)
                .ok()
                .and_then(|value| value.as_object().cloned())
                .map(Some)
                .ok_or_else(|| format!("io-error: malformed {}", path.display())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(format!("io-error: read {}: {err}", path.display())),
        }
    }

    async fn save(&self, guild_id: &str, record: Map<String, Value>) -> Result<(), String> {
        let _guard = self.write_lock.lock().await;
        let bytes = serde_json::to_vec_pretty(&Value::Object(record))
            .map_err(|err| format!("io-error: {err}"))?;
        write_atomic(&self.guild_path(guild_id), bytes)
            .await
            .map_err(|err| io_error(&err))
    }

    async fn register(&self, arguments: &Map<String, Value>) -> ToolOutcome {
        let guild_id = require_str(arguments, "guild_id")?;
        let guild_name = require_str(arguments, "guild_name")?;
        let user_id = require_str(arguments, "user_id")?;

        let mut record = self.load(guild_id).await?.unwrap_or_default();
        record.insert("guild_id".to_string(), json!(guild_id));
        record.insert("guild_name".to_string(), json!(guild_name));
        record.insert("status".to_string(), json!("registered"));
        record.insert("registered_by".to_string(), json!(user_id));
        record.insert("registered_at".to_string(), json!(Utc::now()));
        if let Some(name) = optional_str(arguments, "user_name") {
            record.insert("registered_by_name".to_string(), json!(name));
        }
        record
            .entry("settings".to_string())
            .or_insert_with(|| json!({}));
        self.save(guild_id, record.clone()).await?;
        tracing::info!(guild_id, guild_name, "guild registered");
        Ok(Value::Object(record))
    }

    async fn deregister(&self, arguments: &Map<String, Value>) -> ToolOutcome {
        let guild_id = require_str(arguments, "guild_id")?;
        let user_id = require_str(arguments, "user_id")?;
        let mut record = self
            .load(guild_id)
            .await?
            .ok_or_else(|| format!("not-found: guild {guild_id}"))?;
        record.insert("status".to_string(), json!("deregistered"));
        record.insert("deregistered_by".to_string(), json!(user_id));
        record.insert("deregistered_at".to_string(), json!(Utc::now()));
        self.save(guild_id, record.clone()).await?;
        tracing::info!(guild_id, "guild deregistered");
        Ok(Value::Object(record))
    }

    async fn info(&self, arguments: &Map<String, Value>) -> ToolOutcome {
        let guild_id = require_str(arguments, "guild_id")?;
        self.load(guild_id)
            .await?
            .map(Value::Object)
            .ok_or_else(|| format!("not-found: guild {guild_id}"))
    }

    async fn list(&self, arguments: &Map<String, Value>) -> ToolOutcome {
        let status_filter = optional_str(arguments, "status");
        let mut guilds = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(json!({"guilds": guilds}));
            }
            Err(err) => return Err(format!("io-error: read {}: {err}", self.root.display())),
        };
        while let Some(entry) = entries.next_entry().await.map_err(|e| e.to_string())? {
            let Some(guild_id) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if let Some(record) = self.load(&guild_id).await? {
                let status = record.get("status").and_then(Value::as_str);
                if status_filter.is_none() || status == status_filter {
                    guilds.push(Value::Object(record));
                }
            }
        }
        guilds.sort_by(|a, b| {
            let key = |v: &Value| {
                v.get("guild_id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string()
            };
            key(a).cmp(&key(b))
        });
        Ok(json!({"guilds": guilds}))
    }

    async fn update_settings(&self, arguments: &Map<String, Value>) -> ToolOutcome {
        let guild_id = require_str(arguments, "guild_id")?;
        let settings = arguments
            .get("settings")
            .and_then(Value::as_object)
            .ok_or_else(|| "validation-error: missing settings".to_string())?;
        let mut record = self
            .load(guild_id)
            .await?
            .ok_or_else(|| format!("not-found: guild {guild_id}"))?;
        let slot = record
            .entry("settings".to_string())
            .or_insert_with(|| json!({}));
        if let Value::Object(existing) = slot {
            for (key, value) in settings {
                existing.insert(key.clone(), value.clone());
            }
        }
        self.save(guild_id, record.clone()).await?;
        Ok(Value::Object(record))
    }

    async fn stats(&self, arguments: &Map<String, Value>) -> ToolOutcome {
        let guild_id = require_str(arguments, "guild_id")?;
        let record = self
            .load(guild_id)
            .await?
            .ok_or_else(|| format!("not-found: guild {guild_id}"))?;
        let guild_dir = self.root.join(guild_id);
        let mut event_count = 0;
        if let Ok(mut entries) = tokio::fs::read_dir(&guild_dir).await {
            while let Ok(Some(entry)) = entries.next_entry().await {
                if entry.path().join("event.json").exists() {
                    event_count += 1;
                }
            }
        }
        Ok(json!({
            "guild_id": guild_id,
            "status": record.get("status"),
            "event_count": event_count,
        }))
    }
}
