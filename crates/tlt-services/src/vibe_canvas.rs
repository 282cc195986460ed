//! Vibe-canvas service: a shared per-event pixel/emoji canvas.

use std::io::Cursor;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Duration, Utc};
use image::{ImageFormat, Rgba, RgbaImage};
use serde_json::{Map, Value, json};
use tlt_core::storage::EventStateStore;
use uuid::Uuid;

use crate::rpc::{RpcRequest, ToolOutcome, io_error, optional_str, reply, require_str};

const DEFAULT_CANVAS_SIZE: u32 = 32;
const MAX_CANVAS_SIZE: u64 = 128;
const DEFAULT_RATE_LIMIT_HOURS: i64 = 1;
const IMAGE_CELL_PX: u32 = 16;
const PREVIEW_CELL_PX: u32 = 4;

/// Curated colour palettes offered to clients.
const COLOR_PALETTES: &[(&str, &[&str])] = &[
    ("classic", &["#FF0000", "#00FF00", "#0000FF", "#FFFF00", "#FF00FF", "#00FFFF"]),
    ("pastel", &["#FFB3BA", "#FFDFBA", "#FFFFBA", "#BAFFC9", "#BAE1FF"]),
    ("mono", &["#000000", "#444444", "#888888", "#CCCCCC", "#FFFFFF"]),
];

/// Curated emoji sets offered to clients.
const EMOJI_SETS: &[(&str, &[&str])] = &[
    ("party", &["🎉", "🎊", "🥳", "🎈", "🎆"]),
    ("nature", &["🌲", "🌊", "🌸", "🌙", "⭐"]),
    ("faces", &["😀", "😎", "🤩", "😴", "🤔"]),
];

/// Owns the `vibe_canvas` config and `vibe_bit_placements` array.
pub struct VibeCanvasService {
    store: EventStateStore,
}

/// Builds the service router.
pub fn router(service: Arc<VibeCanvasService>) -> Router {
    Router::new()
        .route("/rpc", post(handle_rpc))
        .route("/health", get(|| async { "ok" }))
        .with_state(service)
}

async fn handle_rpc(
    State(service): State<Arc<VibeCanvasService>>,
    Json(request): Json<RpcRequest>,
) -> Json<Value> {
    Json(reply(
        service.handle(&request.tool, request.arguments).await,
    ))
}

impl VibeCanvasService {
    pub fn new(store: EventStateStore) -> Self {
        Self { store }
    }

    /// Dispatches one tool invocation.
    pub async fn handle(&self, tool: &str, arguments: Map<String, Value>) -> ToolOutcome {
        match tool {
            "vibe_bit" => self.place_element(&arguments).await,
            "create_vibe_canvas" => self.create_canvas(&arguments).await,
            "activate_vibe_canvas" => self.set_active(&arguments, true).await,
            "deactivate_vibe_canvas" => self.set_active(&arguments, false).await,
            "update_vibe_settings" => self.update_settings(&arguments).await,
            "get_vibe_canvas_image" => self.render(&arguments, IMAGE_CELL_PX).await,
            "get_vibe_canvas_preview" => self.render(&arguments, PREVIEW_CELL_PX).await,
            "get_vibe_canvas_stats" => self.stats(&arguments).await,
            "get_user_vibe_history" => self.user_history(&arguments).await,
            "get_color_palettes" => Ok(static_sets(COLOR_PALETTES, "palettes")),
            "get_emoji_sets" => Ok(static_sets(EMOJI_SETS, "emoji_sets")),
            "create_vibe_snapshot" => self.create_snapshot(&arguments).await,
            _ => Err(format!("not-found: unknown tool {tool}")),
        }
    }

    async fn create_canvas(&self, arguments: &Map<String, Value>) -> ToolOutcome {
        let guild_id = require_str(arguments, "guild_id")?;
        let event_id = require_str(arguments, "event_id")?;
        let user_id = require_str(arguments, "user_id")?;
        let width = arguments
            .get("width")
            .and_then(Value::as_u64)
            .unwrap_or(u64::from(DEFAULT_CANVAS_SIZE));
        let height = arguments
            .get("height")
            .and_then(Value::as_u64)
            .unwrap_or(u64::from(DEFAULT_CANVAS_SIZE));
        if !(1..=MAX_CANVAS_SIZE).contains(&width) || !(1..=MAX_CANVAS_SIZE).contains(&height) {
            return Err(format!(
                "validation-error: canvas must be 1x1 to {MAX_CANVAS_SIZE}x{MAX_CANVAS_SIZE}"
            ));
        }
        let canvas = json!({
            "width": width,
            "height": height,
            "background_color": optional_str(arguments, "background_color").unwrap_or("#FFFFFF"),
            "rate_limit_hours": arguments
                .get("rate_limit_hours")
                .and_then(Value::as_i64)
                .unwrap_or(DEFAULT_RATE_LIMIT_HOURS),
            "allow_overlap": arguments
                .get("allow_overlap")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            "activated": true,
            "created_by": user_id,
            "created_at": Utc::now(),
        });
        self.store
            .set_field(guild_id, event_id, "vibe_canvas", canvas.clone())
            .await
            .map_err(|err| io_error(&err))?;
        tracing::info!(guild_id, event_id, width, height, "vibe canvas created");
        Ok(canvas)
    }

    async fn place_element(&self, arguments: &Map<String, Value>) -> ToolOutcome {
        let guild_id = require_str(arguments, "guild_id")?;
        let event_id = require_str(arguments, "event_id")?;
        let user_id = require_str(arguments, "user_id")?;
        let element_type = require_str(arguments, "element_type")?;
        let content = require_str(arguments, "content")?;
        let x = arguments
            .get("x")
            .and_then(Value::as_u64)
            .ok_or_else(|| "validation-error: missing x".to_string())?;
        let y = arguments
            .get("y")
            .and_then(Value::as_u64)
            .ok_or_else(|| "validation-error: missing y".to_string())?;

        match element_type {
            "color" => {
                if parse_hex_color(content).is_none() {
                    return Err(format!("validation-error: bad color {content}"));
                }
            }
            "emoji" => {}
            other => return Err(format!("validation-error: unknown element_type {other}")),
        }

        let record = self
            .store
            .load(guild_id, event_id)
            .await
            .map_err(|err| io_error(&err))?;
        let canvas = record
            .get("vibe_canvas")
            .and_then(Value::as_object)
            .ok_or_else(|| format!("not-found: no canvas for event {event_id}"))?;
        if !canvas
            .get("activated")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            return Err("validation-error: canvas is not active".to_string());
        }
        let width = canvas.get("width").and_then(Value::as_u64).unwrap_or(0);
        let height = canvas.get("height").and_then(Value::as_u64).unwrap_or(0);
        if x >= width || y >= height {
            return Err(format!(
                "validation-error: ({x},{y}) outside {width}x{height} canvas"
            ));
        }

        let placements = record
            .get("vibe_bit_placements")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let rate_limit_hours = canvas
            .get("rate_limit_hours")
            .and_then(Value::as_i64)
            .unwrap_or(DEFAULT_RATE_LIMIT_HOURS);
        if let Some(next_allowed) =
            next_allowed_placement(&placements, user_id, rate_limit_hours, Utc::now())
        {
            return Err(format!(
                "rate-limited: next allowed placement at {}",
                next_allowed.to_rfc3339()
            ));
        }

        let allow_overlap = canvas
            .get("allow_overlap")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if !allow_overlap
            && placements.iter().any(|p| {
                p.get("x").and_then(Value::as_u64) == Some(x)
                    && p.get("y").and_then(Value::as_u64) == Some(y)
            })
        {
            return Err(format!("validation-error: position ({x},{y}) is taken"));
        }

        let placement = json!({
            "placement_id": Uuid::new_v4().to_string(),
            "user_id": user_id,
            "x": x,
            "y": y,
            "element_type": element_type,
            "content": content,
            "placed_at": Utc::now(),
        });
        self.store
            .append_to_array(guild_id, event_id, "vibe_bit_placements", placement.clone())
            .await
            .map_err(|err| io_error(&err))?;
        Ok(placement)
    }

    async fn set_active(&self, arguments: &Map<String, Value>, active: bool) -> ToolOutcome {
        let guild_id = require_str(arguments, "guild_id")?;
        let event_id = require_str(arguments, "event_id")?;
        self.store
            .set_path(guild_id, event_id, "vibe_canvas.activated", json!(active))
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
                    .entry("vibe_canvas".to_string())
                    .or_insert_with(|| json!({}));
                if let Value::Object(canvas) = slot {
                    for (key, value) in updates {
                        canvas.insert(key, value);
                    }
                }
            })
            .await
            .map_err(|err| io_error(&err))?;
        Ok(json!({"event_id": event_id, "updated": true}))
    }

    /// Renders the canvas as a base64 PNG, one square per grid cell.
    async fn render(&self, arguments: &Map<String, Value>, cell_px: u32) -> ToolOutcome {
        let guild_id = require_str(arguments, "guild_id")?;
        let event_id = require_str(arguments, "event_id")?;
        let record = self
            .store
            .load(guild_id, event_id)
            .await
            .map_err(|err| io_error(&err))?;
        let canvas = record
            .get("vibe_canvas")
            .and_then(Value::as_object)
            .ok_or_else(|| format!("not-found: no canvas for event {event_id}"))?;
        let width = canvas
            .get("width")
            .and_then(Value::as_u64)
            .unwrap_or(u64::from(DEFAULT_CANVAS_SIZE))
            .clamp(1, MAX_CANVAS_SIZE) as u32;
        let height = canvas
            .get("height")
            .and_then(Value::as_u64)
            .unwrap_or(u64::from(DEFAULT_CANVAS_SIZE))
            .clamp(1, MAX_CANVAS_SIZE) as u32;
        let background = canvas
            .get("background_color")
            .and_then(Value::as_str)
            .and_then(parse_hex_color)
            .unwrap_or(Rgba([255, 255, 255, 255]));

        let mut img = RgbaImage::from_pixel(width * cell_px, height * cell_px, background);
        let placements = record
            .get("vibe_bit_placements")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for placement in &placements {
            let (Some(x), Some(y)) = (
                placement.get("x").and_then(Value::as_u64),
                placement.get("y").and_then(Value::as_u64),
            ) else {
                continue;
            };
            // Emoji cells render as a neutral grey block in the raster view.
            let color = match placement.get("element_type").and_then(Value::as_str) {
                Some("color") => placement
                    .get("content")
                    .and_then(Value::as_str)
                    .and_then(parse_hex_color)
                    .unwrap_or(Rgba([0, 0, 0, 255])),
                _ => Rgba([128, 128, 128, 255]),
            };
            fill_cell(&mut img, x as u32, y as u32, cell_px, color);
        }

        let mut out = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut out, ImageFormat::Png)
            .map_err(|err| format!("internal-error: render: {err}"))?;
        Ok(json!({
            "event_id": event_id,
            "width": width,
            "height": height,
            "format": "image/png",
            "data": BASE64.encode(out.into_inner()),
            "placements": placements.len(),
        }))
    }

    async fn stats(&self, arguments: &Map<String, Value>) -> ToolOutcome {
        let guild_id = require_str(arguments, "guild_id")?;
        let event_id = require_str(arguments, "event_id")?;
        let record = self
            .store
            .load(guild_id, event_id)
            .await
            .map_err(|err| io_error(&err))?;
        let placements = record
            .get("vibe_bit_placements")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let users: std::collections::HashSet<&str> = placements
            .iter()
            .filter_map(|p| p.get("user_id").and_then(Value::as_str))
            .collect();
        Ok(json!({
            "event_id": event_id,
            "total_placements": placements.len(),
            "unique_users": users.len(),
            "canvas": record.get("vibe_canvas"),
        }))
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
            if let Some(placements) = record.get("vibe_bit_placements").and_then(Value::as_array) {
                for placement in placements {
                    if placement.get("user_id").and_then(Value::as_str) == Some(user_id) {
                        history.push(json!({"event_id": &event_id, "placement": placement}));
                    }
                }
            }
        }
        Ok(json!({"user_id": user_id, "history": history}))
    }

    async fn create_snapshot(&self, arguments: &Map<String, Value>) -> ToolOutcome {
        let guild_id = require_str(arguments, "guild_id")?;
        let event_id = require_str(arguments, "event_id")?;
        let user_id = require_str(arguments, "user_id")?;
        let stats = self.stats(arguments).await?;
        let snapshot = json!({
            "snapshot_id": Uuid::new_v4().to_string(),
            "created_by": user_id,
            "created_at": Utc::now(),
            "stats": stats,
        });
        self.store
            .append_to_array(guild_id, event_id, "vibe_snapshots", snapshot.clone())
            .await
            .map_err(|err| io_error(&err))?;
        Ok(snapshot)
    }
}

fn static_sets(sets: &[(&str, &[&str])], key: &str) -> Value {
    let mut out = Map::new();
    for (name, members) in sets {
        out.insert((*name).to_string(), json!(members));
    }
    json!({key: out})
}

fn parse_hex_color(raw: &str) -> Option<Rgba<u8>> {
    let hex = raw.strip_prefix('#')?;
    if hex.len() != 6 {
        return None;
    }
    let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
    let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
    let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
    Some(Rgba([r, g, b, 255]))
}

fn fill_cell(img: &mut RgbaImage, x: u32, y: u32, cell_px: u32, color: Rgba<u8>) {
    for dx in 0..cell_px {
        for dy in 0..cell_px {
            let px = x * cell_px + dx;
            let py = y * cell_px + dy;
            if px < img.width() && py < img.height() {
                img.put_pixel(px, py, color);
            }
        }
    }
}

fn next_allowed_placement(
    placements: &[Value],
    user_id: &str,
    rate_limit_hours: i64,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if rate_limit_hours <= 0 {
        return None;
    }
    let last = placements
        .iter()
        .filter(|p| p.get("user_id").and_then(Value::as_str) == Some(user_id))
        .filter_map(|p| {
            p.get("placed_at")
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

    fn service() -> (TempDir, VibeCanvasService) {
        let dir = TempDir::new().unwrap();
        let service = VibeCanvasService::new(EventStateStore::new(dir.path()));
        (dir, service)
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    async fn create_canvas(service: &VibeCanvasService) {
        service
            .handle(
                "create_vibe_canvas",
                args(json!({
                    "guild_id": "100", "event_id": "42", "user_id": "7",
                    "width": 8, "height": 8, "rate_limit_hours": 0
                })),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn placement_requires_canvas() {
        let (_dir, service) = service();
        let err = service
            .handle(
                "vibe_bit",
                args(json!({
                    "guild_id": "100", "event_id": "42", "user_id": "7",
                    "x": 1, "y": 1, "element_type": "color", "content": "#FF0000"
                })),
            )
            .await
            .unwrap_err();
        assert!(err.starts_with("not-found"));
    }

    #[tokio::test]
    async fn placement_bounds_and_overlap() {
        let (_dir, service) = service();
        create_canvas(&service).await;
        let place = |x: u64, y: u64| {
            args(json!({
                "guild_id": "100", "event_id": "42", "user_id": "7",
                "x": x, "y": y, "element_type": "color", "content": "#FF0000"
            }))
        };
        service.handle("vibe_bit", place(1, 1)).await.unwrap();
        let overlap = service.handle("vibe_bit", place(1, 1)).await.unwrap_err();
        assert!(overlap.contains("taken"));
        let oob = service.handle("vibe_bit", place(8, 0)).await.unwrap_err();
        assert!(oob.contains("outside"));
    }

    #[tokio::test]
    async fn bad_color_is_rejected() {
        let (_dir, service) = service();
        create_canvas(&service).await;
        let err = service
            .handle(
                "vibe_bit",
                args(json!({
                    "guild_id": "100", "event_id": "42", "user_id": "7",
                    "x": 0, "y": 0, "element_type": "color", "content": "red"
                })),
            )
            .await
            .unwrap_err();
        assert!(err.contains("bad color"));
    }

    #[tokio::test]
    async fn rate_limit_applies_per_user() {
        let (_dir, service) = service();
        service
            .handle(
                "create_vibe_canvas",
                args(json!({
                    "guild_id": "100", "event_id": "42", "user_id": "7",
                    "width": 8, "height": 8, "rate_limit_hours": 1
                })),
            )
            .await
            .unwrap();
        let place = |user: &str, x: u64| {
            args(json!({
                "guild_id": "100", "event_id": "42", "user_id": user,
                "x": x, "y": 0, "element_type": "emoji", "content": "🎉"
            }))
        };
        service.handle("vibe_bit", place("7", 0)).await.unwrap();
        let limited = service.handle("vibe_bit", place("7", 1)).await.unwrap_err();
        assert!(limited.starts_with("rate-limited"));
        // A different user is unaffected.
        service.handle("vibe_bit", place("8", 2)).await.unwrap();
    }

    #[tokio::test]
    async fn render_produces_png() {
        let (_dir, service) = service();
        create_canvas(&service).await;
        service
            .handle(
                "vibe_bit",
                args(json!({
                    "guild_id": "100", "event_id": "42", "user_id": "7",
                    "x": 0, "y": 0, "element_type": "color", "content": "#112233"
                })),
            )
            .await
            .unwrap();
        let rendered = service
            .handle(
                "get_vibe_canvas_preview",
                args(json!({"guild_id": "100", "event_id": "42"})),
            )
            .await
            .unwrap();
        let bytes = BASE64
            .decode(rendered["data"].as_str().unwrap())
            .unwrap();
        let img = image::load_from_memory(&bytes).unwrap();
        assert_eq!(img.width(), 8 * PREVIEW_CELL_PX);
        assert_eq!(rendered["placements"], json!(1));
    }

    #[test]
    fn hex_parsing() {
        assert_eq!(parse_hex_color("#FFFFFF"), Some(Rgba([255, 255, 255, 255])));
        assert_eq!(parse_hex_color("#00FF7f"), Some(Rgba([0, 255, 127, 255])));
        assert_eq!(parse_hex_color("FFFFFF"), None);
        assert_eq!(parse_hex_color("#FFF"), None);
    }
}
