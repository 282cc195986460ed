//! Configuration management for TLT.
//!
//! Loads configuration from `${TLT_HOME}/config.toml` with sensible defaults.
//! Every field is optional in the file; the model API key may also come from
//! the environment.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Per-service back-end URLs behind the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceUrls {
    pub event_manager: String,
    pub rsvp: String,
    pub guild_manager: String,
    pub photo_vibe_check: String,
    pub vibe_canvas: String,
}

impl Default for ServiceUrls {
    fn default() -> Self {
        Self {
            event_manager: "http://localhost:8004".to_string(),
            rsvp: "http://localhost:8005".to_string(),
            guild_manager: "http://localhost:8006".to_string(),
            photo_vibe_check: "http://localhost:8007".to_string(),
            vibe_canvas: "http://localhost:8008".to_string(),
        }
    }
}

impl ServiceUrls {
    /// Resolves a logical service tag to its URL.
    pub fn url_for(&self, service: &str) -> Option<&str> {
        match service {
            "event-manager" => Some(&self.event_manager),
            "rsvp" => Some(&self.rsvp),
            "guild-manager" => Some(&self.guild_manager),
            "photo-vibe-check" => Some(&self.photo_vibe_check),
            "vibe-canvas" => Some(&self.vibe_canvas),
            _ => None,
        }
    }

    /// All `(service, url)` pairs in registry order.
    pub fn entries(&self) -> [(&'static str, &str); 5] {
        [
            ("event-manager", self.event_manager.as_str()),
            ("rsvp", self.rsvp.as_str()),
            ("guild-manager", self.guild_manager.as_str()),
            ("photo-vibe-check", self.photo_vibe_check.as_str()),
            ("vibe-canvas", self.vibe_canvas.as_str()),
        ]
    }
}

/// Language-model access configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// API key; falls back to `TLT_MODEL_API_KEY` in the environment.
    pub api_key: Option<String>,
    pub base_url: String,
    /// Model used by the reasoning node.
    pub model: String,
    /// Vision-capable model used by the photo pipeline.
    pub vision_model: String,
    pub max_tokens: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.anthropic.com".to_string(),
            model: "claude-haiku-4-5".to_string(),
            vision_model: "claude-haiku-4-5".to_string(),
            max_tokens: 1024,
        }
    }
}

impl ModelConfig {
    /// Resolves the API key from config or environment.
    ///
    /// # Errors
    /// Returns an error when neither source supplies a key.
    pub fn resolve_api_key(&self) -> Result<String> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(str::to_string)
            .or_else(|| {
                std::env::var("TLT_MODEL_API_KEY")
                    .ok()
                    .map(|key| key.trim().to_string())
                    .filter(|key| !key.is_empty())
            })
            .context("model.api_key or TLT_MODEL_API_KEY is required")
    }
}

/// Chat-platform access for the adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Bot token; falls back to `TLT_CHAT_BOT_TOKEN`.
    pub bot_token: Option<String>,
    pub api_base: String,
    /// Task-manager ingress the adapter posts CloudEvents to.
    pub ingress_url: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            api_base: "https://chat.example.com/api".to_string(),
            ingress_url: "http://localhost:8000".to_string(),
        }
    }
}

/// Top-level configuration recognised at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Gateway RPC front-end URL.
    pub gateway_url: String,
    pub services: ServiceUrls,
    /// Root directory for per-guild durable state.
    pub data_root: PathBuf,
    /// Bind address for the ingress/monitor HTTP surface.
    pub ingress_bind: String,
    /// Bind address for the gateway front-end.
    pub gateway_bind: String,
    /// Ingress sliding-window cap per 60 seconds.
    pub rate_limit_per_minute: u32,
    /// Queue length past which ingress sheds load.
    pub queue_soft_ceiling: usize,
    /// Per-run bound on graph node transitions.
    pub recursion_limit: u32,
    /// Adapter state-poll interval in seconds.
    pub snapshot_poll_interval_secs: u64,
    /// Submission-to-completion timeout in seconds.
    pub task_timeout_secs: u64,
    /// Age after which an unfinished task is abandoned.
    pub abandon_age_minutes: i64,
    /// Minimum interval between photo submissions per user and event.
    pub photo_rate_limit_hours: i64,
    pub model: ModelConfig,
    pub chat: ChatConfig,
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gateway_url: "http://localhost:8003/rpc/".to_string(),
            services: ServiceUrls::default(),
            data_root: PathBuf::from("./guild_data"),
            ingress_bind: "127.0.0.1:8000".to_string(),
            gateway_bind: "127.0.0.1:8003".to_string(),
            rate_limit_per_minute: 30,
            queue_soft_ceiling: 100,
            recursion_limit: 500,
            snapshot_poll_interval_secs: 30,
            task_timeout_secs: 500,
            abandon_age_minutes: 30,
            photo_rate_limit_hours: 1,
            model: ModelConfig::default(),
            chat: ChatConfig::default(),
            debug: false,
        }
    }
}

/// Path helpers for the TLT home directory.
pub mod paths {
    use super::PathBuf;

    /// Resolves the TLT home directory (`$TLT_HOME`, else `~/.tlt`).
    pub fn home_dir() -> PathBuf {
        if let Ok(home) = std::env::var("TLT_HOME")
            && !home.trim().is_empty()
        {
            return PathBuf::from(home);
        }
        std::env::var("HOME")
            .map(PathBuf::from)
            .map(|home| home.join(".tlt"))
            .unwrap_or_else(|_| PathBuf::from(".tlt"))
    }

    /// Full path to the configuration file.
    pub fn config_path() -> PathBuf {
        home_dir().join("config.toml")
    }
}

impl Config {
    /// Loads configuration from the default path, falling back to defaults
    /// when the file does not exist.
    ///
    /// # Errors
    /// Returns an error when the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let path = paths::config_path();
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Loads configuration from an explicit path.
    ///
    /// # Errors
    /// Returns an error when the file cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parse config {}", path.display()))
    }

    pub fn snapshot_poll_interval(&self) -> Duration {
        Duration::from_secs(self.snapshot_poll_interval_secs)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let config = Config::default();
        assert_eq!(config.rate_limit_per_minute, 30);
        assert_eq!(config.recursion_limit, 500);
        assert_eq!(config.queue_soft_ceiling, 100);
        assert_eq!(config.snapshot_poll_interval_secs, 30);
        assert_eq!(config.task_timeout_secs, 500);
        assert_eq!(config.abandon_age_minutes, 30);
        assert_eq!(config.photo_rate_limit_hours, 1);
        assert_eq!(config.data_root, PathBuf::from("./guild_data"));
        assert!(config.gateway_url.ends_with("/rpc/"));
    }

    #[test]
    fn partial_file_fills_defaults() {
        let parsed: Config = toml::from_str(
            r#"
            rate_limit_per_minute = 5
            [services]
            rsvp = "http://localhost:9999"
            "#,
        )
        .unwrap();
        assert_eq!(parsed.rate_limit_per_minute, 5);
        assert_eq!(parsed.services.rsvp, "http://localhost:9999");
        assert_eq!(parsed.recursion_limit, 500);
        assert_eq!(
            parsed.services.url_for("rsvp"),
            Some("http://localhost:9999")
        );
        assert_eq!(parsed.services.url_for("unknown"), None);
    }
}
