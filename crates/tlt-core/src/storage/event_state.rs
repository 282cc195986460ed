//! Canonical per-event record: `<root>/<guild>/<event>/event.json`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use super::write_atomic;

/// Load-modify-write helper over the single JSON object in `event.json`.
///
/// All mutations run under one store-wide lock so concurrent writers cannot
/// interleave their read and write halves.
#[derive(Debug, Clone)]
pub struct EventStateStore {
    root: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl EventStateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Path of the record for one event.
    pub fn event_path(&self, guild_id: &str, event_id: &str) -> PathBuf {
        self.root.join(guild_id).join(event_id).join("event.json")
    }

    /// Loads the record, or an empty object when the file does not exist.
    ///
    /// # Errors
    /// Returns an error when the file exists but cannot be read or parsed.
    pub async fn load(&self, guild_id: &str, event_id: &str) -> Result<Map<String, Value>> {
        let path = self.event_path(guild_id, event_id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let value: Value = serde_json::from_slice(&bytes)
                    .with_context(|| format!("parse {}", path.display()))?;
                match value {
                    Value::Object(map) => Ok(map),
                    _ => anyhow::bail!("{} does not hold a JSON object", path.display()),
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Map::new()),
            Err(err) => Err(err).with_context(|| format!("read {}", path.display())),
        }
    }

    /// Applies `mutate` to the record and persists the result atomically.
    ///
    /// # Errors
    /// Returns an error on read, parse, or write failure; the record on disk
    /// is left untouched in that case.
    pub async fn update<F>(&self, guild_id: &str, event_id: &str, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut Map<String, Value>),
    {
        let _guard = self.write_lock.lock().await;
        let mut record = self.load(guild_id, event_id).await?;
        mutate(&mut record);
        let path = self.event_path(guild_id, event_id);
        let bytes = serde_json::to_vec_pretty(&Value::Object(record))?;
        write_atomic(&path, bytes).await
    }

    /// Sets a top-level field.
    ///
    /// # Errors
    /// Returns an error on read or write failure.
    pub async fn set_field(
        &self,
        guild_id: &str,
        event_id: &str,
        field: &str,
        value: Value,
    ) -> Result<()> {
        let field = field.to_string();
        self.update(guild_id, event_id, move |record| {
            record.insert(field, value);
        })
        .await
    }

    /// Sets a dotted-path nested field, creating intermediate objects.
    ///
    /// # Errors
    /// Returns an error on read or write failure.
    pub async fn set_path(
        &self,
        guild_id: &str,
        event_id: &str,
        dotted_path: &str,
        value: Value,
    ) -> Result<()> {
        let segments: Vec<String> = dotted_path.split('.').map(str::to_string).collect();
        anyhow::ensure!(
            segments.iter().all(|s| !s.is_empty()),
            "empty segment in path '{dotted_path}'"
        );
        self.update(guild_id, event_id, move |record| {
            set_nested(record, &segments, value);
        })
        .await
    }

    /// Appends a value to a named array field, creating it when absent.
    ///
    /// # Errors
    /// Returns an error on read or write failure.
    pub async fn append_to_array(
        &self,
        guild_id: &str,
        event_id: &str,
        field: &str,
        value: Value,
    ) -> Result<()> {
        let field = field.to_string();
        self.update(guild_id, event_id, move |record| {
            array_entry(record, &field).push(value);
        })
        .await
    }

    /// Removes entries matching `predicate` from a named array field, then
    /// appends `replacement` when provided. Returns the number removed.
    ///
    /// # Errors
    /// Returns an error on read or write failure.
    pub async fn replace_in_array<P>(
        &self,
        guild_id: &str,
        event_id: &str,
        field: &str,
        predicate: P,
        replacement: Option<Value>,
    ) -> Result<usize>
    where
        P: Fn(&Value) -> bool,
    {
        let field = field.to_string();
        let mut removed = 0;
        // update() takes FnOnce, so count through a local and copy out after.
        let removed_ref = &mut removed;
        self.update(guild_id, event_id, move |record| {
            let entries = array_entry(record, &field);
            let before = entries.len();
            entries.retain(|entry| !predicate(entry));
            *removed_ref = before - entries.len();
            if let Some(value) = replacement {
                entries.push(value);
            }
        })
        .await?;
        Ok(removed)
    }

    /// Removes entries matching `predicate` from a named array field.
    ///
    /// # Errors
    /// Returns an error on read or write failure.
    pub async fn remove_from_array<P>(
        &self,
        guild_id: &str,
        event_id: &str,
        field: &str,
        predicate: P,
    ) -> Result<usize>
    where
        P: Fn(&Value) -> bool,
    {
        self.replace_in_array(guild_id, event_id, field, predicate, None)
            .await
    }

    /// Event ids with a record under the given guild.
    ///
    /// # Errors
    /// Returns an error when the guild directory cannot be read.
    pub async fn list_events(&self, guild_id: &str) -> Result<Vec<String>> {
        let guild_dir = self.root.join(guild_id);
        let mut events = Vec::new();
        let mut entries = match tokio::fs::read_dir(&guild_dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(events),
            Err(err) => return Err(err).with_context(|| format!("read {}", guild_dir.display())),
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.path().join("event.json").exists()
                && let Some(name) = entry.file_name().to_str()
            {
                events.push(name.to_string());
            }
        }
        events.sort();
        Ok(events)
    }
}

fn set_nested(record: &mut Map<String, Value>, segments: &[String], value: Value) {
    let Some((last, rest)) = segments.split_last() else {
        return;
    };
    let mut cursor = record;
    for segment in rest {
        let slot = cursor
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        cursor = match slot.as_object_mut() {
            Some(map) => map,
            None => return,
        };
    }
    cursor.insert(last.clone(), value);
}

fn array_entry<'a>(record: &'a mut Map<String, Value>, field: &str) -> &'a mut Vec<Value> {
    let slot = record
        .entry(field.to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    if !slot.is_array() {
        *slot = Value::Array(Vec::new());
    }
    match slot {
        Value::Array(items) => items,
        _ => unreachable!(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;

    fn store() -> (TempDir, EventStateStore) {
        let dir = TempDir::new().unwrap();
        let store = EventStateStore::new(dir.path());
        (dir, store)
    }

    #[tokio::test]
    async fn missing_record_loads_empty() {
        let (_dir, store) = store();
        let record = store.load("100", "42").await.unwrap();
        assert!(record.is_empty());
    }

    #[tokio::test]
    async fn set_field_creates_parents() {
        let (dir, store) = store();
        store
            .set_field("100", "42", "status", json!("active"))
            .await
            .unwrap();
        assert!(dir.path().join("100/42/event.json").exists());
        let record = store.load("100", "42").await.unwrap();
        assert_eq!(record["status"], json!("active"));
    }

    #[tokio::test]
    async fn dotted_path_creates_intermediates() {
        let (_dir, store) = store();
        store
            .set_path("100", "42", "event_manager_data.title", json!("Launch"))
            .await
            .unwrap();
        let record = store.load("100", "42").await.unwrap();
        assert_eq!(record["event_manager_data"]["title"], json!("Launch"));
    }

    #[tokio::test]
    async fn append_and_remove_from_array() {
        let (_dir, store) = store();
        store
            .append_to_array("100", "42", "rsvps", json!({"user_id": "7"}))
            .await
            .unwrap();
        store
            .append_to_array("100", "42", "rsvps", json!({"user_id": "8"}))
            .await
            .unwrap();
        let removed = store
            .remove_from_array("100", "42", "rsvps", |entry| {
                entry.get("user_id").and_then(Value::as_str) == Some("7")
            })
            .await
            .unwrap();
        assert_eq!(removed, 1);
        let record = store.load("100", "42").await.unwrap();
        assert_eq!(record["rsvps"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn replace_in_array_keeps_single_entry_per_user() {
        let (_dir, store) = store();
        for score in [0.2, 0.9] {
            store
                .replace_in_array(
                    "100",
                    "42",
                    "vibe_checks",
                    |entry| entry.get("user_id").and_then(Value::as_str) == Some("7"),
                    Some(json!({"user_id": "7", "vibe_score": score})),
                )
                .await
                .unwrap();
        }
        let record = store.load("100", "42").await.unwrap();
        let checks = record["vibe_checks"].as_array().unwrap();
        assert_eq!(checks.len(), 1);
        assert_eq!(checks[0]["vibe_score"], json!(0.9));
    }

    #[tokio::test]
    async fn no_tmp_file_left_behind() {
        let (dir, store) = store();
        store
            .set_field("100", "42", "status", json!("active"))
            .await
            .unwrap();
        let entries: Vec<_> = std::fs::read_dir(dir.path().join("100/42"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("event.json")]);
    }
}
