//! Uniform result envelope returned for every forwarded tool call.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// What a tool call came back with, success or not.
///
/// The gateway always answers HTTP 200 with one of these; transport failures
/// to a back-end become `success = false` with a `service-unavailable` error
/// so callers never see a low-level connection failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolEnvelope {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub tool: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Map<String, Value>>,
    pub service: String,
    pub timestamp: DateTime<Utc>,
}

impl ToolEnvelope {
    pub fn success(tool: &str, service: &str, result: Value) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
            tool: tool.to_string(),
            parameters: None,
            service: service.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn failure(
        tool: &str,
        service: &str,
        error: impl Into<String>,
        parameters: Option<Map<String, Value>>,
    ) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.into()),
            tool: tool.to_string(),
            parameters,
            service: service.to_string(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_envelope_shape() {
        let envelope = ToolEnvelope::success("ping", "gateway", serde_json::json!({"ok": true}));
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["success"], serde_json::json!(true));
        assert!(value.get("error").is_none());
        assert_eq!(value["service"], serde_json::json!("gateway"));
    }

    #[test]
    fn failure_envelope_keeps_parameters() {
        let mut params = Map::new();
        params.insert("event_id".to_string(), serde_json::json!("42"));
        let envelope =
            ToolEnvelope::failure("get_event", "event-manager", "boom", Some(params));
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["success"], serde_json::json!(false));
        assert_eq!(value["parameters"]["event_id"], serde_json::json!("42"));
    }
}
