//! Attachment ingest: downloads uploads to their deterministic guild-data
//! path before the CloudEvent is emitted.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;

use crate::chat::{Attachment, ChatClient};

/// Deterministic storage path for one upload:
/// `<root>/<guild>/<event>/<user>/[promotion/]<YYYYMMDD_HHMMSS>_<filename>`.
pub fn upload_path(
    data_root: &Path,
    guild_id: &str,
    event_id: &str,
    user_id: &str,
    promotion: bool,
    filename: &str,
) -> PathBuf {
    let mut dir = data_root.join(guild_id).join(event_id).join(user_id);
    if promotion {
        dir = dir.join("promotion");
    }
    let stamp = Utc::now().format("%Y%m%d_%H%M%S");
    dir.join(format!("{stamp}_{}", sanitize(filename)))
}

/// Keeps file names path-safe without losing their suffix.
fn sanitize(filename: &str) -> String {
    let cleaned: String = filename
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}

/// Downloads an attachment to its deterministic path.
///
/// # Errors
/// Returns an error when the download or the local write fails; the caller
/// aborts emission and notifies the user.
pub async fn download_attachment(
    client: &ChatClient,
    data_root: &Path,
    guild_id: &str,
    event_id: &str,
    user_id: &str,
    promotion: bool,
    attachment: &Attachment,
) -> Result<PathBuf> {
    let bytes = client.download_file(&attachment.url).await?;
    let path = upload_path(
        data_root,
        guild_id,
        event_id,
        user_id,
        promotion,
        &attachment.filename,
    );
    let parent = path
        .parent()
        .context("upload path has no parent directory")?;
    tokio::fs::create_dir_all(parent)
        .await
        .with_context(|| format!("create {}", parent.display()))?;
    tokio::fs::write(&path, bytes)
        .await
        .with_context(|| format!("write {}", path.display()))?;
    tracing::info!(path = %path.display(), "attachment stored");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_layout_matches_contract() {
        let path = upload_path(Path::new("/data"), "100", "42", "7", false, "party.jpg");
        let rendered = path.to_string_lossy();
        assert!(rendered.starts_with("/data/100/42/7/"));
        assert!(rendered.ends_with("_party.jpg"));
        assert!(!rendered.contains("promotion"));

        let promo = upload_path(Path::new("/data"), "100", "42", "7", true, "ref.png");
        assert!(promo.to_string_lossy().contains("/7/promotion/"));
    }

    #[test]
    fn filenames_are_sanitized() {
        assert_eq!(sanitize("../../etc/passwd"), ".._.._etc_passwd");
        assert_eq!(sanitize("my photo!.jpg"), "my_photo_.jpg");
        assert_eq!(sanitize(""), "upload");
    }
}
