//! Append-only per-user tool-result log:
//! `<root>/<guild>/<event>/<user>/state.json`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::sync::Mutex;

use super::write_atomic;

/// Appends structured tool results to a per-user JSON array.
#[derive(Debug, Clone)]
pub struct UserStateStore {
    root: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl UserStateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Path of the state file for one user under one event.
    pub fn state_path(&self, guild_id: &str, event_id: &str, user_id: &str) -> PathBuf {
        self.root
            .join(guild_id)
            .join(event_id)
            .join(user_id)
            .join("state.json")
    }

    /// Loads the record array, or empty when the file does not exist.
    ///
    /// # Errors
    /// Returns an error when the file exists but cannot be read or parsed.
    pub async fn load(&self, guild_id: &str, event_id: &str, user_id: &str) -> Result<Vec<Value>> {
        let path = self.state_path(guild_id, event_id, user_id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let value: Value = serde_json::from_slice(&bytes)
                    .with_context(|| format!("parse {}", path.display()))?;
                match value {
                    Value::Array(items) => Ok(items),
                    _ => anyhow::bail!("{} does not hold a JSON array", path.display()),
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(err).with_context(|| format!("read {}", path.display())),
        }
    }

    /// Appends one record atomically.
    ///
    /// # Errors
    /// Returns an error on read or write failure.
    pub async fn append(
        &self,
        guild_id: &str,
        event_id: &str,
        user_id: &str,
        record: Value,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.load(guild_id, event_id, user_id).await?;
        records.push(record);
        let path = self.state_path(guild_id, event_id, user_id);
        let bytes = serde_json::to_vec_pretty(&Value::Array(records))?;
        write_atomic(&path, bytes).await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;

    #[tokio::test]
    async fn append_grows_the_array() {
        let dir = TempDir::new().unwrap();
        let store = UserStateStore::new(dir.path());
        store
            .append("100", "42", "7", json!({"tool": "process_rsvp"}))
            .await
            .unwrap();
        store
            .append("100", "42", "7", json!({"tool": "submit_photo_dm"}))
            .await
            .unwrap();
        let records = store.load("100", "42", "7").await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1]["tool"], json!("submit_photo_dm"));
        assert!(dir.path().join("100/42/7/state.json").exists());
    }

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let store = UserStateStore::new(dir.path());
        assert!(store.load("100", "42", "7").await.unwrap().is_empty());
    }
}
