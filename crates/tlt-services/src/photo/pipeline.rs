//! The vibe-check pipeline: reference discovery, download, normalisation,
//! and the vision-model verdict.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tlt_core::images;
use tlt_providers::{ContentBlock, ModelClient, StructuredSchema};

/// At most this many promotional references accompany a verdict request.
const MAX_REFERENCES: usize = 5;

const DOWNLOAD_CONNECT_TIMEOUT_SECS: u64 = 5;
const DOWNLOAD_TIMEOUT_SECS: u64 = 30;

/// Scoring rubric for the vision model. The 0.0-1.0 ladder is the contract;
/// the prose around it is advisory.
const VIBE_CHECK_SYSTEM_PROMPT: &str = r"You are a vibe check expert for event check-in systems.

Your job is to analyze whether a user's photo submission matches the VIBE of an event based on its promotional images. The photo is the check-in method.

Score based on:
1. Visual vibe match: does the photo match the aesthetic, style, colors, or setting of the promotional images?
2. Event participation: does it look like the user is actually at this specific event?
3. Authenticity: does it feel genuine (not a screenshot, old photo, or unrelated image)?
4. Energy match: does the photo capture the same energy and mood as the promotional content?

SCORING GUIDE (be strict but fair):
- 1.0 = Perfect vibe match, clearly at the event, captures the exact energy
- 0.8-0.9 = Great match, definitely at event, good energy alignment
- 0.6-0.7 = Good match, probably at event, decent vibe alignment
- 0.4-0.5 = Okay match, might be at event, some vibe elements
- 0.2-0.3 = Poor match, unlikely at event, minimal vibe alignment
- 0.0-0.1 = No match, definitely not at event, completely off-vibe

Be natural in your analysis but precise with scoring.";

/// Structured verdict the model must produce.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VibeVerdict {
    /// Vibe match in `[0, 1]`.
    pub vibe_score: f64,
    /// Confidence in the score, in `[0, 1]`.
    pub confidence_score: f64,
    pub vibe_analysis: String,
    pub promotional_match: String,
    pub reasoning: String,
}

impl VibeVerdict {
    /// Zero-score verdict used when the pipeline cannot produce a real one.
    pub fn zero(analysis: impl Into<String>, reasoning: impl Into<String>) -> Self {
        Self {
            vibe_score: 0.0,
            confidence_score: 0.0,
            vibe_analysis: analysis.into(),
            promotional_match: String::new(),
            reasoning: reasoning.into(),
        }
    }

    fn clamped(mut self) -> Self {
        self.vibe_score = self.vibe_score.clamp(0.0, 1.0);
        self.confidence_score = self.confidence_score.clamp(0.0, 1.0);
        self
    }
}

/// Schema binding for the verdict.
pub fn vibe_check_schema() -> StructuredSchema {
    StructuredSchema {
        name: "VibeCheckVerdict".to_string(),
        description: "Score a photo submission against promotional reference images".to_string(),
        schema: json!({
            "type": "object",
            "properties": {
                "vibe_score": {"type": "number", "minimum": 0.0, "maximum": 1.0},
                "confidence_score": {"type": "number", "minimum": 0.0, "maximum": 1.0},
                "vibe_analysis": {"type": "string"},
                "promotional_match": {"type": "string"},
                "reasoning": {"type": "string"}
            },
            "required": [
                "vibe_score",
                "confidence_score",
                "vibe_analysis",
                "promotional_match",
                "reasoning"
            ]
        }),
    }
}

/// What one pipeline run produced.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub verdict: VibeVerdict,
    /// How the verdict was reached: `vision_model`, `no_references`, or
    /// `model_error`.
    pub method: &'static str,
    /// Short user-facing note for short-circuited runs.
    pub message: Option<String>,
}

/// Downloads, normalises, and scores one photo submission.
pub struct PhotoPipeline {
    data_root: PathBuf,
    http: reqwest::Client,
    model: Option<Arc<ModelClient>>,
}

impl PhotoPipeline {
    pub fn new(data_root: impl Into<PathBuf>, model: Option<Arc<ModelClient>>) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(DOWNLOAD_CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(DOWNLOAD_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            data_root: data_root.into(),
            http,
            model,
        }
    }

    /// Runs the full pipeline for one submission.
    ///
    /// Never fails: every error path degrades into a zero-score verdict with
    /// the failure recorded in `reasoning`.
    pub async fn run(&self, guild_id: &str, event_id: &str, photo_url: &str) -> PipelineOutcome {
        let references = self.load_references(guild_id, event_id).await;
        if references.is_empty() {
            let message = "no promotional images available".to_string();
            return PipelineOutcome {
                verdict: VibeVerdict::zero(
                    message.clone(),
                    "cannot score a submission without promotional references",
                ),
                method: "no_references",
                message: Some(message),
            };
        }

        let photo = match self.download(photo_url).await {
            Ok(bytes) => images::ensure_jpeg(bytes),
            Err(err) => {
                tracing::warn!(guild_id, event_id, error = %err, "photo download failed");
                return PipelineOutcome {
                    verdict: VibeVerdict::zero("photo download failed", err),
                    method: "model_error",
                    message: None,
                };
            }
        };

        match self.model_verdict(photo, references).await {
            Ok(verdict) => PipelineOutcome {
                verdict: verdict.clamped(),
                method: "vision_model",
                message: None,
            },
            Err(err) => PipelineOutcome {
                verdict: VibeVerdict::zero("vibe check failed", err),
                method: "model_error",
                message: None,
            },
        }
    }

    /// Walks `<root>/<guild>/<event>/*/promotion/*` for reference images,
    /// loading at most five in path order.
    async fn load_references(&self, guild_id: &str, event_id: &str) -> Vec<Vec<u8>> {
        let event_dir = self.data_root.join(guild_id).join(event_id);
        let mut paths = collect_reference_paths(&event_dir).await;
        paths.sort();
        paths.truncate(MAX_REFERENCES);

        let mut references = Vec::with_capacity(paths.len());
        for path in paths {
            match tokio::fs::read(&path).await {
                Ok(bytes) => references.push(images::ensure_jpeg(bytes)),
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "skipping unreadable reference");
                }
            }
        }
        references
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, String> {
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
            .map_err(|err| format!("read body of {url}: {err}"))
    }

    async fn model_verdict(
        &self,
        photo: Vec<u8>,
        references: Vec<Vec<u8>>,
    ) -> Result<VibeVerdict, String> {
        let Some(model) = &self.model else {
            return Err("no model configured".to_string());
        };

        let mut content = vec![
            ContentBlock::Text(
                "Analyze this user's photo submission for event check-in vibe matching."
                    .to_string(),
            ),
            ContentBlock::JpegImage(photo),
            ContentBlock::Text(format!(
                "USER'S SUBMISSION ABOVE. PROMOTIONAL REFERENCE IMAGES BELOW ({} total):",
                references.len()
            )),
        ];
        for (index, reference) in references.into_iter().enumerate() {
            content.push(ContentBlock::JpegImage(reference));
            content.push(ContentBlock::Text(format!(
                "^ Promotional Image {}",
                index + 1
            )));
        }

        let schema = vibe_check_schema();
        let raw = model
            .submit_structured(VIBE_CHECK_SYSTEM_PROMPT, content, &schema)
            .await
            .map_err(|err| err.to_string())?;
        serde_json::from_value(raw).map_err(|err| format!("verdict parse: {err}"))
    }
}

async fn collect_reference_paths(event_dir: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let Ok(mut user_dirs) = tokio::fs::read_dir(event_dir).await else {
        return found;
    };
    while let Ok(Some(user_dir)) = user_dirs.next_entry().await {
        let promotion_dir = user_dir.path().join("promotion");
        let Ok(mut files) = tokio::fs::read_dir(&promotion_dir).await else {
            continue;
        };
        while let Ok(Some(file)) = files.next_entry().await {
            let path = file.path();
            if let Some(name) = path.file_name().and_then(|n| n.to_str())
                && images::has_image_suffix(name)
            {
                found.push(path);
            }
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[tokio::test]
    async fn no_references_short_circuits() {
        let dir = TempDir::new().unwrap();
        let pipeline = PhotoPipeline::new(dir.path(), None);
        let outcome = pipeline
            .run("100", "42", "http://127.0.0.1:1/photo.jpg")
            .await;
        assert_eq!(outcome.method, "no_references");
        assert!(outcome.verdict.vibe_score.abs() < f64::EPSILON);
        assert!(outcome.verdict.confidence_score.abs() < f64::EPSILON);
        assert!(
            outcome
                .message
                .unwrap()
                .contains("no promotional images available")
        );
    }

    #[tokio::test]
    async fn download_failure_degrades_to_zero_verdict() {
        let dir = TempDir::new().unwrap();
        let promo = dir.path().join("100/42/7/promotion");
        std::fs::create_dir_all(&promo).unwrap();
        std::fs::write(promo.join("ref.jpg"), [0xFF, 0xD8, 0xFF, 0xE0]).unwrap();

        let pipeline = PhotoPipeline::new(dir.path(), None);
        let outcome = pipeline
            .run("100", "42", "http://127.0.0.1:1/photo.jpg")
            .await;
        assert_eq!(outcome.method, "model_error");
        assert!(outcome.verdict.vibe_score.abs() < f64::EPSILON);
        assert!(!outcome.verdict.reasoning.is_empty());
    }

    #[tokio::test]
    async fn reference_discovery_caps_at_five() {
        let dir = TempDir::new().unwrap();
        for user in ["1", "2"] {
            let promo = dir.path().join("100/42").join(user).join("promotion");
            std::fs::create_dir_all(&promo).unwrap();
            for n in 0..4 {
                std::fs::write(promo.join(format!("ref{n}.jpg")), [0xFF, 0xD8]).unwrap();
            }
            std::fs::write(promo.join("notes.txt"), b"skip me").unwrap();
        }
        let event_dir = dir.path().join("100/42");
        let mut paths = collect_reference_paths(&event_dir).await;
        paths.sort();
        assert_eq!(paths.len(), 8);

        let pipeline = PhotoPipeline::new(dir.path(), None);
        let references = pipeline.load_references("100", "42").await;
        assert_eq!(references.len(), 5);
    }

    #[test]
    fn schema_lists_every_verdict_field() {
        let schema = vibe_check_schema();
        let required: Vec<String> =
            serde_json::from_value(schema.schema["required"].clone()).unwrap();
        for field in [
            "vibe_score",
            "confidence_score",
            "vibe_analysis",
            "promotional_match",
            "reasoning",
        ] {
            assert!(required.contains(&field.to_string()), "{field}");
        }
    }
}
