//! Shared RPC plumbing for the back-end services.
//!
//! Every service answers `POST /rpc` with `{"result": ...}` on success or
//! `{"error": "..."}` on semantic failure, always at HTTP 200; the gateway
//! folds either shape into its uniform envelope.

use serde::Deserialize;
use serde_json::{Map, Value, json};

/// Tool invocation body the gateway forwards.
#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    pub tool: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

/// Outcome of one tool invocation inside a service.
pub type ToolOutcome = Result<Value, String>;

/// Wraps a tool outcome into the wire reply.
pub fn reply(outcome: ToolOutcome) -> Value {
    match outcome {
        Ok(result) => json!({"result": result}),
        Err(error) => json!({"error": error}),
    }
}

/// Fetches a required string argument.
pub fn require_str<'a>(arguments: &'a Map<String, Value>, key: &str) -> Result<&'a str, String> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| format!("validation-error: missing {key}"))
}

/// Fetches an optional string argument.
pub fn optional_str<'a>(arguments: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

/// Maps a storage failure into the wire error shape.
pub fn io_error(err: &anyhow::Error) -> String {
    format!("io-error: {err:#}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_shapes() {
        assert_eq!(
            reply(Ok(json!({"x": 1}))),
            json!({"result": {"x": 1}})
        );
        assert_eq!(
            reply(Err("not-found: nope".to_string())),
            json!({"error": "not-found: nope"})
        );
    }

    #[test]
    fn require_str_rejects_empty() {
        let mut args = Map::new();
        args.insert("guild_id".to_string(), json!(""));
        assert!(require_str(&args, "guild_id").is_err());
        args.insert("guild_id".to_string(), json!("100"));
        assert_eq!(require_str(&args, "guild_id").unwrap(), "100");
    }
}
