//! Language-model access for TLT (structured decisions and vision verdicts).

mod model;

pub use model::{
    ContentBlock, ModelCallError, ModelClient, ModelClientConfig, StructuredSchema,
    DEFAULT_BASE_URL,
};
