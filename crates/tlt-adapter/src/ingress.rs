//! Client for the Task Manager's ingress and snapshot endpoints.

use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value;
use tlt_types::{CloudEvent, ErrorKind};

const CONNECT_TIMEOUT_SECS: u64 = 2;
const REQUEST_TIMEOUT_SECS: u64 = 15;

/// What ingress said about a submission.
#[derive(Debug)]
pub enum SubmitOutcome {
    /// Accepted with a task id.
    Accepted { task_id: String },
    /// Refused with a structured error kind.
    Refused { kind: ErrorKind, message: String },
}

/// HTTP client for the coordinator.
#[derive(Clone)]
pub struct IngressClient {
    http: reqwest::Client,
    base_url: String,
}

impl IngressClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.trim_end_matches('/'))
    }

    /// Posts one CloudEvent to `/cloudevents`.
    ///
    /// # Errors
    /// Returns an error only when the coordinator is unreachable; semantic
    /// refusals come back as [`SubmitOutcome::Refused`].
    pub async fn submit(&self, cloudevent: &CloudEvent) -> Result<SubmitOutcome> {
        let response = self
            .http
            .post(self.url("/cloudevents"))
            .json(cloudevent)
            .send()
            .await
            .context("post /cloudevents")?;
        let status = response.status();
        let body: Value = response.json().await.context("ingress reply")?;

        if status.is_success() {
            let task_id = body
                .get("task_id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            return Ok(SubmitOutcome::Accepted { task_id });
        }

        let kind = body
            .get("error")
            .cloned()
            .and_then(|kind| serde_json::from_value(kind).ok())
            .unwrap_or(ErrorKind::InternalError);
        let message = body
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("ingress refused the event")
            .to_string();
        Ok(SubmitOutcome::Refused { kind, message })
    }

    /// Fetches (and thereby drains) the agent-state snapshot.
    ///
    /// # Errors
    /// Returns an error when the coordinator is unreachable.
    pub async fn agent_state(&self) -> Result<Value> {
        let response = self
            .http
            .get(self.url("/monitor/agent/state"))
            .send()
            .await
            .context("get /monitor/agent/state")?;
        response.json().await.context("snapshot reply")
    }
}

/// User-facing prose for each refusal kind; internal detail never leaks.
pub fn prose_for(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::ValidationError => "I didn't understand that.",
        ErrorKind::RateLimited => "I'm getting too many requests right now, try again later.",
        ErrorKind::ServiceUnavailable => "I can't reach that service right now.",
        ErrorKind::AccessDenied => "You don't have permission to do that.",
        _ => "Something went wrong on my side, sorry about that.",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prose_table_covers_the_spec_kinds() {
        assert!(prose_for(ErrorKind::ValidationError).contains("didn't understand"));
        assert!(prose_for(ErrorKind::RateLimited).contains("try again later"));
        assert!(prose_for(ErrorKind::ServiceUnavailable).contains("can't reach"));
        assert!(prose_for(ErrorKind::AccessDenied).contains("permission"));
        // Internal kinds collapse to a generic apology.
        assert_eq!(
            prose_for(ErrorKind::InternalError),
            prose_for(ErrorKind::IoError)
        );
    }
}
