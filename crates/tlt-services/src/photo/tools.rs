//! Tool surface of the photo-vibe-check service.

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Duration, Utc};
use serde_json::{Map, Value, json};
use tlt_core::storage::{EventStateStore, UserStateStore};
use uuid::Uuid;

use super::pipeline::{PhotoPipeline, PipelineOutcome};
use crate::rpc::{RpcRequest, ToolOutcome, io_error, optional_str, reply, require_str};

/// Serves photo submissions and collection management.
pub struct PhotoVibeCheckService {
    store: EventStateStore,
    user_store: UserStateStore,
    pipeline: PhotoPipeline,
    data_root: PathBuf,
    /// Default minimum interval between submissions per user and event.
    rate_limit_hours: i64,
    http: reqwest::Client,
}

/// Builds the service router.
pub fn router(service: Arc<PhotoVibeCheckService>) -> Router {
    Router::new()
        .route("/rpc", post(handle_rpc))
        .route("/health", get(|| async { "ok" }))
        .with_state(service)
}

async fn handle_rpc(
    State(service): State<Arc<PhotoVibeCheckService>>,
    Json(request): Json<RpcRequest>,
) -> Json<Value> {
    Json(reply(
        service.handle(&request.tool, request.arguments).await,
    ))
}

impl PhotoVibeCheckService {
    pub fn new(
        data_root: impl Into<PathBuf>,
        pipeline: PhotoPipeline,
        rate_limit_hours: i64,
    ) -> Self {
        let data_root = data_root.into();
        Self {
            store: EventStateStore::new(&data_root),
            user_store: UserStateStore::new(&data_root),
            pipeline,
            data_root,
            rate_limit_hours,
            http: reqwest::Client::new(),
        }
    }

    /// Dispatches one tool invocation.
    pub async fn handle(&self, tool: &str, arguments: Map<String, Value>) -> ToolOutcome {
        match tool {
            "submit_photo_dm" => self.submit_photo(&arguments).await,
            "activate_photo_collection" => self.set_collection_active(&arguments, true).await,
            "deactivate_photo_collection" => self.set_collection_active(&arguments, false).await,
            "update_photo_settings" => self.update_settings(&arguments).await,
            "add_pre_event_photos" => self.add_pre_event_photos(&arguments).await,
            "get_photo_status" => self.photo_status(&arguments).await,
            "get_event_photo_summary" => self.event_summary(&arguments).await,
            "generate_event_slideshow" => self.generate_slideshow(&arguments).await,
            "get_user_photo_history" => self.user_history(&arguments).await,
            _ => Err(format!("not-found: unknown tool {tool}")),
        }
    }

    async fn submit_photo(&self, arguments: &Map<String, Value>) -> ToolOutcome {
        let guild_id = require_str(arguments, "guild_id")?;
        let event_id = require_str(arguments, "event_id")?;
        let user_id = require_str(arguments, "user_id")?;
        let photo_url = require_str(arguments, "photo_url")?;

        let record = self
            .store
            .load(guild_id, event_id)
            .await
            .map_err(|err| io_error(&err))?;
        let settings = record.get("photo_settings").and_then(Value::as_object);

        // An event without settings accepts submissions; an explicit
        // deactivation closes the window.
        let active = settings
            .and_then(|s| s.get("activated"))
            .and_then(Value::as_bool)
            .unwrap_or(true);
        if !active {
            return Err("validation-error: photo collection is not active".to_string());
        }

        let rate_limit_hours = settings
            .and_then(|s| s.get("rate_limit_hours"))
            .and_then(Value::as_i64)
            .unwrap_or(self.rate_limit_hours);
        if let Some(next_allowed) =
            next_allowed_submission(&record, user_id, rate_limit_hours, Utc::now())
        {
            return Err(format!(
                "rate-limited: next allowed submission at {}",
                next_allowed.to_rfc3339()
            ));
        }

        let submission_id = Uuid::new_v4().to_string();
        self.store
            .append_to_array(
                guild_id,
                event_id,
                "photo_submissions",
                json!({
                    "submission_id": &submission_id,
                    "user_id": user_id,
                    "photo_url": photo_url,
                    "submitted_at": Utc::now(),
                }),
            )
            .await
            .map_err(|err| io_error(&err))?;

        let outcome = self.pipeline.run(guild_id, event_id, photo_url).await;
        let entry = vibe_check_entry(user_id, photo_url, &outcome);

        // Verdict persistence is best-effort: a storage failure must not fail
        // the submission itself.
        if let Err(err) = self
            .store
            .replace_in_array(
                guild_id,
                event_id,
                "vibe_checks",
                |existing| existing.get("user_id").and_then(Value::as_str) == Some(user_id),
                Some(entry.clone()),
            )
            .await
        {
            tracing::error!(guild_id, event_id, user_id, error = %err, "vibe check persistence failed");
        }
        if let Err(err) = self
            .user_store
            .append(
                guild_id,
                event_id,
                user_id,
                json!({"tool": "submit_photo_dm", "result": entry}),
            )
            .await
        {
            tracing::warn!(guild_id, event_id, user_id, error = %err, "user state append failed");
        }

        tracing::info!(
            guild_id,
            event_id,
            user_id,
            method = outcome.method,
            vibe_score = outcome.verdict.vibe_score,
            "photo submission processed"
        );
        Ok(json!({
            "submission_id": submission_id,
            "vibe_check": entry,
            "rate_limit_hours": rate_limit_hours,
        }))
    }

    async fn set_collection_active(
        &self,
        arguments: &Map<String, Value>,
        active: bool,
    ) -> ToolOutcome {
        let guild_id = require_str(arguments, "guild_id")?;
        let event_id = require_str(arguments, "event_id")?;
        let user_id = require_str(arguments, "user_id")?;
        let rate_limit_hours = arguments
            .get("rate_limit_hours")
            .and_then(Value::as_i64)
            .unwrap_or(self.rate_limit_hours);

        self.store
            .update(guild_id, event_id, move |record| {
                let slot = record
                    .entry("photo_settings".to_string())
                    .or_insert_with(|| json!({}));
                if let Value::Object(settings) = slot {
                    settings.insert("activated".to_string(), json!(active));
                    settings.insert("updated_by".to_string(), json!(user_id));
                    settings.insert("updated_at".to_string(), json!(Utc::now()));
                    if active {
                        settings.insert("rate_limit_hours".to_string(), json!(rate_limit_hours));
                    }
                }
            })
            .await
            .map_err(|err| io_error(&err))?;
        Ok(json!({"event_id": event_id, "activated": active}))
    }

    async fn update_settings(&self, arguments: &Map<String, Value>) -> ToolOutcome {
        let guild_id = require_str(arguments, "guild_id")?;
        let event_id = require_str(arguments, "event_id")?;
        let updates = arguments
            .get("settings")
            .and_then(Value::as_object)
            .cloned()
            .ok_or_else(|| "validation-error: missing settings".to_string())?;
        self.store
            .update(guild_id, event_id, move |record| {
                let slot = record
                    .entry("photo_settings".to_string())
                    .or_insert_with(|| json!({}));
                if let Value::Object(settings) = slot {
                    for (key, value) in updates {
                        settings.insert(key, value);
                    }
                }
            })
            .await
            .map_err(|err| io_error(&err))?;
        Ok(json!({"event_id": event_id, "updated": true}))
    }

    /// Downloads curated promotional images into the event's reference set.
    async fn add_pre_event_photos(&self, arguments: &Map<String, Value>) -> ToolOutcome {
        let guild_id = require_str(arguments, "guild_id")?;
        let event_id = require_str(arguments, "event_id")?;
        let user_id = require_str(arguments, "user_id")?;
        let urls: Vec<String> = arguments
            .get("photo_urls")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .filter(|urls: &Vec<String>| !urls.is_empty())
            .ok_or_else(|| "validation-error: missing photo_urls".to_string())?;

        let promotion_dir = self
            .data_root
            .join(guild_id)
            .join(event_id)
            .join(user_id)
            .join("promotion");
        tokio::fs::create_dir_all(&promotion_dir)
            .await
            .map_err(|err| format!("io-error: create {}: {err}", promotion_dir.display()))?;

        let mut stored = Vec::new();
        for url in &urls {
            match self.download_reference(url).await {
                Ok(bytes) => {
                    let filename = format!(
                        "{}_{}",
                        Utc::now().format("%Y%m%d_%H%M%S"),
                        url.rsplit('/').next().unwrap_or("reference.jpg")
                    );
                    let path = promotion_dir.join(&filename);
                    if let Err(err) = tokio::fs::write(&path, bytes).await {
                        tracing::warn!(url = %url, error = %err, "failed to store reference");
                        continue;
                    }
                    stored.push(json!({"url": url, "local_path": path}));
                }
                Err(err) => tracing::warn!(url = %url, error = %err, "failed to download reference"),
            }
        }

        let record = json!({
            "user_id": user_id,
            "added_at": Utc::now(),
            "photos": stored,
        });
        self.store
            .append_to_array(guild_id, event_id, "pre_event_photos", record)
            .await
            .map_err(|err| io_error(&err))?;
        Ok(json!({"event_id": event_id, "stored": stored.len(), "requested": urls.len()}))
    }

    async fn photo_status(&self, arguments: &Map<String, Value>) -> ToolOutcome {
        let guild_id = require_str(arguments, "guild_id")?;
        let event_id = require_str(arguments, "event_id")?;
        let record = self
            .store
            .load(guild_id, event_id)
            .await
            .map_err(|err| io_error(&err))?;
        let filter_user = optional_str(arguments, "user_id");
        let select = |field: &str| -> Vec<Value> {
            record
                .get(field)
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter(|item| {
                            filter_user.is_none()
                                || item.get("user_id").and_then(Value::as_str) == filter_user
                        })
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        };
        Ok(json!({
            "event_id": event_id,
            "settings": record.get("photo_settings"),
            "submissions": select("photo_submissions"),
            "vibe_checks": select("vibe_checks"),
        }))
    }

    async fn event_summary(&self, arguments: &Map<String, Value>) -> ToolOutcome {
        let guild_id = require_str(arguments, "guild_id")?;
        let event_id = require_str(arguments, "event_id")?;
        let record = self
            .store
            .load(guild_id, event_id)
            .await
            .map_err(|err| io_error(&err))?;
        let checks: Vec<&Value> = record
            .get("vibe_checks")
            .and_then(Value::as_array)
            .map(|items| items.iter().collect())
            .unwrap_or_default();
        let scores: Vec<f64> = checks
            .iter()
            .filter_map(|check| check.get("vibe_score").and_then(Value::as_f64))
            .collect();
        let average = if scores.is_empty() {
            0.0
        } else {
            scores.iter().sum::<f64>() / scores.len() as f64
        };
        Ok(json!({
            "event_id": event_id,
            "total_vibe_checks": checks.len(),
            "average_vibe_score": average,
        }))
    }

    /// Collects the highest-scoring checked photos into a slideshow record.
    async fn generate_slideshow(&self, arguments: &Map<String, Value>) -> ToolOutcome {
        let guild_id = require_str(arguments, "guild_id")?;
        let event_id = require_str(arguments, "event_id")?;
        let max_photos = arguments
            .get("max_photos")
            .and_then(Value::as_u64)
            .unwrap_or(10) as usize;

        let record = self
            .store
            .load(guild_id, event_id)
            .await
            .map_err(|err| io_error(&err))?;
        let mut checks: Vec<Value> = record
            .get("vibe_checks")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        checks.sort_by(|a, b| {
            let score = |v: &Value| v.get("vibe_score").and_then(Value::as_f64).unwrap_or(0.0);
            score(b).partial_cmp(&score(a)).unwrap_or(std::cmp::Ordering::Equal)
        });
        checks.truncate(max_photos);

        let slideshow = json!({
            "slideshow_id": Uuid::new_v4().to_string(),
            "generated_at": Utc::now(),
            "photos": checks,
        });
        self.store
            .append_to_array(guild_id, event_id, "slideshows", slideshow.clone())
            .await
            .map_err(|err| io_error(&err))?;
        Ok(slideshow)
    }

    async fn user_history(&self, arguments: &Map<String, Value>) -> ToolOutcome {
        let guild_id = require_str(arguments, "guild_id")?;
        let user_id = require_str(arguments, "user_id")?;
        let mut history = Vec::new();
        for event_id in self
            .store
            .list_events(guild_id)
            .await
            .map_err(|err| io_error(&err))?
        {
            let record = self
                .store
                .load(guild_id, &event_id)
                .await
                .map_err(|err| io_error(&err))?;
            if let Some(checks) = record.get("vibe_checks").and_then(Value::as_array) {
                for check in checks {
                    if check.get("user_id").and_then(Value::as_str) == Some(user_id) {
                        history.push(json!({"event_id": &event_id, "vibe_check": check}));
                    }
                }
            }
        }
        Ok(json!({"user_id": user_id, "history": history}))
    }

    async fn download_reference(&self, url: &str) -> Result<Vec<u8>, String> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|err| format!("fetch {url}: {err}"))?;
        if !response.status().is_success() {
            return Err(format!("fetch {url}: status {}", response.status()));
        }
        response
            .bytes()
            .await
            .map(|bytes| bytes.to_vec())
            .map_err(|err| err.to_string())
    }
}

fn vibe_check_entry(user_id: &str, photo_url: &str, outcome: &PipelineOutcome) -> Value {
    let mut entry = json!({
        "user_id": user_id,
        "photo_url": photo_url,
        "vibe_score": outcome.verdict.vibe_score,
        "confidence_score": outcome.verdict.confidence_score,
        "vibe_analysis": outcome.verdict.vibe_analysis,
        "promotional_match": outcome.verdict.promotional_match,
        "reasoning": outcome.verdict.reasoning,
        "timestamp": Utc::now(),
        "method": outcome.method,
    });
    if let (Some(object), Some(message)) = (entry.as_object_mut(), &outcome.message) {
        object.insert("message".to_string(), json!(message));
    }
    entry
}

/// When the user's next submission is allowed, if they are still inside the
/// rate window.
fn next_allowed_submission(
    record: &Map<String, Value>,
    user_id: &str,
    rate_limit_hours: i64,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if rate_limit_hours <= 0 {
        return None;
    }
    let last = record
        .get("photo_submissions")?
        .as_array()?
        .iter()
        .filter(|entry| entry.get("user_id").and_then(Value::as_str) == Some(user_id))
        .filter_map(|entry| {
            entry
                .get("submitted_at")
                .and_then(Value::as_str)
                .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        })
        .map(|time| time.with_timezone(&Utc))
        .max()?;
    let next_allowed = last + Duration::hours(rate_limit_hours);
    (next_allowed > now).then_some(next_allowed)
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn service(dir: &TempDir) -> PhotoVibeCheckService {
        PhotoVibeCheckService::new(dir.path(), PhotoPipeline::new(dir.path(), None), 1)
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    fn submission() -> Map<String, Value> {
        args(json!({
            "guild_id": "100", "event_id": "42", "user_id": "7",
            "photo_url": "http://127.0.0.1:1/party.jpg"
        }))
    }

    #[tokio::test]
    async fn submission_without_references_persists_zero_verdict() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);
        let result = service.handle("submit_photo_dm", submission()).await.unwrap();
        assert_eq!(result["vibe_check"]["vibe_score"], json!(0.0));
        assert_eq!(result["vibe_check"]["confidence_score"], json!(0.0));
        assert!(
            result["vibe_check"]["message"]
                .as_str()
                .unwrap()
                .contains("no promotional images available")
        );

        let record = service.store.load("100", "42").await.unwrap();
        let checks = record["vibe_checks"].as_array().unwrap();
        assert_eq!(checks.len(), 1);
        assert_eq!(checks[0]["method"], json!("no_references"));
    }

    #[tokio::test]
    async fn repeat_submission_is_rate_limited() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);
        service.handle("submit_photo_dm", submission()).await.unwrap();
        let err = service
            .handle("submit_photo_dm", submission())
            .await
            .unwrap_err();
        assert!(err.starts_with("rate-limited"), "{err}");
        assert!(err.contains("next allowed submission"));
    }

    #[tokio::test]
    async fn deactivated_collection_rejects_submissions() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);
        service
            .handle(
                "deactivate_photo_collection",
                args(json!({"guild_id": "100", "event_id": "42", "user_id": "7"})),
            )
            .await
            .unwrap();
        let err = service
            .handle("submit_photo_dm", submission())
            .await
            .unwrap_err();
        assert!(err.contains("not active"));
    }

    #[tokio::test]
    async fn replace_on_match_keeps_latest_verdict_only() {
        let dir = TempDir::new().unwrap();
        // Rate window of zero allows immediate resubmission.
        let service =
            PhotoVibeCheckService::new(dir.path(), PhotoPipeline::new(dir.path(), None), 0);
        for _ in 0..3 {
            service.handle("submit_photo_dm", submission()).await.unwrap();
        }
        let record = service.store.load("100", "42").await.unwrap();
        assert_eq!(record["vibe_checks"].as_array().unwrap().len(), 1);
        assert_eq!(record["photo_submissions"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn slideshow_collects_top_scores() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);
        for (user, score) in [("1", 0.9), ("2", 0.3), ("3", 0.7)] {
            service
                .store
                .append_to_array(
                    "100",
                    "42",
                    "vibe_checks",
                    json!({"user_id": user, "vibe_score": score}),
                )
                .await
                .unwrap();
        }
        let slideshow = service
            .handle(
                "generate_event_slideshow",
                args(json!({"guild_id": "100", "event_id": "42", "max_photos": 2})),
            )
            .await
            .unwrap();
        let photos = slideshow["photos"].as_array().unwrap();
        assert_eq!(photos.len(), 2);
        assert_eq!(photos[0]["vibe_score"], json!(0.9));
        assert_eq!(photos[1]["vibe_score"], json!(0.7));

        let record = service.store.load("100", "42").await.unwrap();
        assert_eq!(record["slideshows"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn rate_window_math() {
        let now = Utc::now();
        let mut record = Map::new();
        record.insert(
            "photo_submissions".to_string(),
            json!([{"user_id": "7", "submitted_at": (now - Duration::minutes(30)).to_rfc3339()}]),
        );
        assert!(next_allowed_submission(&record, "7", 1, now).is_some());
        assert!(next_allowed_submission(&record, "7", 0, now).is_none());
        assert!(next_allowed_submission(&record, "8", 1, now).is_none());
        record.insert(
            "photo_submissions".to_string(),
            json!([{"user_id": "7", "submitted_at": (now - Duration::hours(2)).to_rfc3339()}]),
        );
        assert!(next_allowed_submission(&record, "7", 1, now).is_none());
    }
}
