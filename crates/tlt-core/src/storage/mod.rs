//! Append-only per-entity state stores under the guild data root.
//!
//! Both helpers write JSON files with a write-temp-then-rename step so a
//! crash mid-write never leaves a torn file behind.

mod event_state;
mod user_state;

pub use event_state::EventStateStore;
pub use user_state::UserStateStore;

use std::path::Path;

use anyhow::{Context, Result};

/// Writes `bytes` to `path` atomically, creating parent directories.
pub async fn write_atomic(path: &Path, bytes: Vec<u8>) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("no parent directory for {}", path.display()))?;
    tokio::fs::create_dir_all(parent)
        .await
        .with_context(|| format!("create {}", parent.display()))?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp);
    tokio::fs::write(&tmp, bytes)
        .await
        .with_context(|| format!("write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("rename {} -> {}", tmp.display(), path.display()))
}
