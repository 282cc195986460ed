//! Photo vibe-check service: submissions scored against promotional
//! reference images by a vision-capable model.

mod pipeline;
mod tools;

pub use pipeline::{PhotoPipeline, VibeVerdict, vibe_check_schema};
pub use tools::{PhotoVibeCheckService, router};
