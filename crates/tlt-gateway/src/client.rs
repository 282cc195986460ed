//! Client side of the gateway RPC convention.

use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::{Map, Value, json};

use crate::envelope::ToolEnvelope;

const CONNECT_TIMEOUT_SECS: u64 = 2;
const REQUEST_TIMEOUT_SECS: u64 = 60;

/// HTTP client for the gateway's `/rpc` endpoint.
#[derive(Debug, Clone)]
pub struct GatewayClient {
    http: reqwest::Client,
    url: String,
}

impl GatewayClient {
    /// Creates a client for the configured gateway URL.
    pub fn new(url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            url: url.into(),
        }
    }

    /// Invokes one tool through the gateway.
    ///
    /// A semantic failure comes back as `success = false` inside the
    /// envelope; an `Err` here means the gateway itself was unreachable.
    ///
    /// # Errors
    /// Returns an error when the gateway cannot be reached or replies with
    /// a non-envelope body.
    pub async fn call(&self, tool: &str, arguments: Map<String, Value>) -> Result<ToolEnvelope> {
        let body = json!({"tool": tool, "arguments": arguments});
        let response = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("gateway call {tool}"))?;
        response
            .json::<ToolEnvelope>()
            .await
            .with_context(|| format!("gateway reply for {tool}"))
    }

    /// Gateway liveness probe via the `ping` management tool.
    pub async fn ping(&self) -> bool {
        match self.call("ping", Map::new()).await {
            Ok(envelope) => envelope.success,
            Err(_) => false,
        }
    }
}
