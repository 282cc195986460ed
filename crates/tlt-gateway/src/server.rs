//! Gateway front-end: auth, forwarding, degradation, management tools.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tlt_types::ErrorKind;
use tokio::sync::RwLock;

use crate::envelope::ToolEnvelope;
use crate::policy::{AuthContext, PolicyEngine, Role};
use crate::registry::ServiceRegistry;

const FORWARD_CONNECT_TIMEOUT_SECS: u64 = 2;
// Long enough for the photo pipeline's model round-trip.
const FORWARD_REQUEST_TIMEOUT_SECS: u64 = 120;

/// Management tools served by the gateway itself.
pub const GATEWAY_TOOLS: &[&str] = &[
    "ping",
    "get_gateway_status",
    "get_user_permissions",
    "get_available_tools",
    "get_policies",
    "add_policy",
    "remove_policy",
    "get_user_roles",
    "add_user_role",
    "remove_user_role",
];

/// Shared state behind the gateway router.
pub struct GatewayState {
    policy: RwLock<PolicyEngine>,
    registry: ServiceRegistry,
    http: reqwest::Client,
    /// Absent auth context is tolerated only when set.
    dev_mode: bool,
    started_at: DateTime<Utc>,
}

impl GatewayState {
    pub fn new(registry: ServiceRegistry, policy: PolicyEngine, dev_mode: bool) -> Arc<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(FORWARD_CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(FORWARD_REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Arc::new(Self {
            policy: RwLock::new(policy),
            registry,
            http,
            dev_mode,
            started_at: Utc::now(),
        })
    }
}

/// JSON-RPC-style tool invocation.
#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    pub tool: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

/// Builds the gateway router.
pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/rpc", post(handle_rpc))
        .route("/rpc/", post(handle_rpc))
        .route("/health", get(|| async { "ok" }))
        .with_state(state)
}

async fn handle_rpc(
    State(state): State<Arc<GatewayState>>,
    Json(request): Json<RpcRequest>,
) -> Json<ToolEnvelope> {
    Json(dispatch(&state, request).await)
}

async fn dispatch(state: &GatewayState, request: RpcRequest) -> ToolEnvelope {
    let RpcRequest {
        tool,
        mut arguments,
    } = request;
    let auth = AuthContext::take_from(&mut arguments);

    if GATEWAY_TOOLS.contains(&tool.as_str()) {
        return handle_management(state, &tool, auth.as_ref(), arguments).await;
    }

    let Some(service) = state.registry.service_for_tool(&tool) else {
        return ToolEnvelope::failure(
            &tool,
            "gateway",
            format!("{}: unknown tool", ErrorKind::NotFound),
            Some(arguments),
        );
    };

    // Calls without an explicit context still carry the acting user; their
    // role comes from the gateway's own assignment store.
    let auth = match auth {
        Some(auth) => Some(auth),
        None => match arguments.get("user_id").and_then(Value::as_str) {
            Some(user_id) => {
                let role = state.policy.read().await.role_for_user(user_id);
                Some(AuthContext {
                    user_id: user_id.to_string(),
                    role,
                    event_permissions: Vec::new(),
                })
            }
            None => None,
        },
    };

    match &auth {
        Some(auth) => {
            let allowed = state.policy.read().await.check(auth.role, &tool);
            if !allowed {
                tracing::warn!(tool = %tool, role = %auth.role, "tool invocation denied");
                return ToolEnvelope::failure(
                    &tool,
                    &service.name,
                    format!(
                        "{}: role '{}' may not invoke '{tool}'",
                        ErrorKind::AccessDenied,
                        auth.role
                    ),
                    Some(arguments),
                );
            }
        }
        None if state.dev_mode => {
            tracing::debug!(tool = %tool, "no auth context; allowing in development mode");
        }
        None => {
            return ToolEnvelope::failure(
                &tool,
                &service.name,
                format!("{}: authentication context required", ErrorKind::AccessDenied),
                Some(arguments),
            );
        }
    }

    forward(state, &service.name, &service.url, &tool, arguments).await
}

/// Forwards a tool call to its back-end and translates the reply.
///
/// Transport failures degrade to a structured `service-unavailable` result;
/// the gateway never propagates a connection error to its caller.
async fn forward(
    state: &GatewayState,
    service: &str,
    url: &str,
    tool: &str,
    arguments: Map<String, Value>,
) -> ToolEnvelope {
    let endpoint = format!("{}/rpc", url.trim_end_matches('/'));
    let body = json!({"tool": tool, "arguments": &arguments});
    let response = state.http.post(&endpoint).json(&body).send().await;

    let response = match response {
        Ok(response) => response,
        Err(err) => {
            tracing::warn!(service, tool, error = %err, "back-end unreachable");
            return ToolEnvelope::failure(
                tool,
                service,
                format!(
                    "{}: service {service} is currently unavailable",
                    ErrorKind::ServiceUnavailable
                ),
                Some(arguments),
            );
        }
    };

    let status = response.status();
    let payload: Value = match response.json().await {
        Ok(payload) => payload,
        Err(err) => {
            return ToolEnvelope::failure(
                tool,
                service,
                format!("{}: invalid reply: {err}", ErrorKind::UpstreamError),
                Some(arguments),
            );
        }
    };

    if !status.is_success() {
        return ToolEnvelope::failure(
            tool,
            service,
            format!("{}: status {status}", ErrorKind::UpstreamError),
            Some(arguments),
        );
    }

    match payload.get("error").and_then(Value::as_str) {
        Some(error) => ToolEnvelope::failure(tool, service, error.to_string(), Some(arguments)),
        None => {
            let result = payload.get("result").cloned().unwrap_or(payload);
            ToolEnvelope::success(tool, service, result)
        }
    }
}

async fn handle_management(
    state: &GatewayState,
    tool: &str,
    auth: Option<&AuthContext>,
    arguments: Map<String, Value>,
) -> ToolEnvelope {
    // Policy-mutating tools require a present admin context, dev mode or not.
    let mutating = matches!(
        tool,
        "add_policy" | "remove_policy" | "add_user_role" | "remove_user_role"
    );
    if mutating && auth.is_none_or(|auth| auth.role != Role::Admin) {
        return ToolEnvelope::failure(
            tool,
            "gateway",
            format!("{}: admin role required", ErrorKind::AccessDenied),
            Some(arguments),
        );
    }

    match management_result(state, tool, &arguments).await {
        Ok(result) => ToolEnvelope::success(tool, "gateway", result),
        Err(error) => ToolEnvelope::failure(tool, "gateway", error, Some(arguments)),
    }
}

async fn management_result(
    state: &GatewayState,
    tool: &str,
    arguments: &Map<String, Value>,
) -> Result<Value, String> {
    match tool {
        "ping" => Ok(json!({"status": "ok", "service": "gateway"})),
        "get_gateway_status" => Ok(gateway_status(state).await),
        "get_user_permissions" => user_permissions(state, arguments).await,
        "get_available_tools" => Ok(available_tools(state)),
        "get_policies" => {
            let policy = state.policy.read().await;
            Ok(json!({
                "policies": policy.rules(),
                "roles": [Role::Admin, Role::EventOwner, Role::User],
            }))
        }
        "add_policy" => {
            let role = require_role(arguments)?;
            let rule_tool = require_str(arguments, "tool")?;
            let allow = arguments
                .get("allow")
                .and_then(Value::as_bool)
                .unwrap_or(true);
            let mut policy = state.policy.write().await;
            policy
                .add_rule(role, rule_tool, allow)
                .map_err(|err| management_error(ErrorKind::IoError, &err.to_string()))?;
            Ok(json!({"role": role, "tool": rule_tool, "allow": allow, "added": true}))
        }
        "remove_policy" => {
            let role = require_role(arguments)?;
            let rule_tool = require_str(arguments, "tool")?;
            let mut policy = state.policy.write().await;
            let removed = policy
                .remove_rule(role, rule_tool)
                .map_err(|err| management_error(ErrorKind::IoError, &err.to_string()))?;
            Ok(json!({"role": role, "tool": rule_tool, "removed": removed}))
        }
        "get_user_roles" => {
            let user_id = require_str(arguments, "user_id")?;
            let role = state.policy.read().await.role_for_user(user_id);
            Ok(json!({"user_id": user_id, "role": role}))
        }
        "add_user_role" => {
            let user_id = require_str(arguments, "user_id")?;
            let role = require_role(arguments)?;
            let mut policy = state.policy.write().await;
            policy
                .add_user_role(user_id, role)
                .map_err(|err| management_error(ErrorKind::IoError, &err.to_string()))?;
            Ok(json!({"user_id": user_id, "role": role, "assigned": true}))
        }
        "remove_user_role" => {
            let user_id = require_str(arguments, "user_id")?;
            let mut policy = state.policy.write().await;
            let removed = policy
                .remove_user_role(user_id)
                .map_err(|err| management_error(ErrorKind::IoError, &err.to_string()))?;
            Ok(json!({"user_id": user_id, "removed": removed}))
        }
        _ => Err(management_error(ErrorKind::NotFound, "unknown management tool")),
    }
}

fn management_error(kind: ErrorKind, message: &str) -> String {
    format!("{kind}: {message}")
}

fn require_str<'a>(arguments: &'a Map<String, Value>, key: &str) -> Result<&'a str, String> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| management_error(ErrorKind::ValidationError, &format!("missing {key}")))
}

fn require_role(arguments: &Map<String, Value>) -> Result<Role, String> {
    let raw = require_str(arguments, "role")?;
    Role::parse(raw)
        .ok_or_else(|| management_error(ErrorKind::ValidationError, &format!("unknown role {raw}")))
}

async fn gateway_status(state: &GatewayState) -> Value {
    let services: Vec<Value> = state
        .registry
        .entries()
        .iter()
        .map(|entry| json!({"name": entry.name, "url": entry.url, "tools": entry.tools.len()}))
        .collect();
    json!({
        "status": "healthy",
        "dev_mode": state.dev_mode,
        "uptime_seconds": (Utc::now() - state.started_at).num_seconds(),
        "services": services,
    })
}

async fn user_permissions(
    state: &GatewayState,
    arguments: &Map<String, Value>,
) -> Result<Value, String> {
    let role = require_role(arguments)?;
    let policy = state.policy.read().await;
    let mut allowed = Vec::new();
    let mut denied = Vec::new();
    for entry in state.registry.entries() {
        for tool in &entry.tools {
            if policy.check(role, tool) {
                allowed.push(tool.clone());
            } else {
                denied.push(tool.clone());
            }
        }
    }
    Ok(json!({"role": role, "allowed": allowed, "denied": denied}))
}

fn available_tools(state: &GatewayState) -> Value {
    let mut services = Map::new();
    for entry in state.registry.entries() {
        services.insert(
            entry.name.clone(),
            json!({"url": entry.url, "tools": entry.tools}),
        );
    }
    services.insert(
        "gateway".to_string(),
        json!({"url": "local", "tools": GATEWAY_TOOLS}),
    );
    Value::Object(services)
}

#[cfg(test)]
mod tests {
    use tlt_core::config::ServiceUrls;

    use super::*;

    fn test_state(dev_mode: bool) -> Arc<GatewayState> {
        // Unroutable URLs so forwarded calls exercise the degradation path.
        let urls = ServiceUrls {
            event_manager: "http://127.0.0.1:1".to_string(),
            rsvp: "http://127.0.0.1:1".to_string(),
            guild_manager: "http://127.0.0.1:1".to_string(),
            photo_vibe_check: "http://127.0.0.1:1".to_string(),
            vibe_canvas: "http://127.0.0.1:1".to_string(),
        };
        GatewayState::new(
            ServiceRegistry::from_services(&urls),
            PolicyEngine::new(),
            dev_mode,
        )
    }

    fn request(tool: &str, arguments: Value) -> RpcRequest {
        RpcRequest {
            tool: tool.to_string(),
            arguments: arguments.as_object().cloned().unwrap_or_default(),
        }
    }

    #[tokio::test]
    async fn ping_answers_locally() {
        let state = test_state(true);
        let envelope = dispatch(&state, request("ping", json!({}))).await;
        assert!(envelope.success);
        assert_eq!(envelope.service, "gateway");
    }

    #[tokio::test]
    async fn unknown_tool_is_not_found() {
        let state = test_state(true);
        let envelope = dispatch(&state, request("no_such_tool", json!({}))).await;
        assert!(!envelope.success);
        assert!(envelope.error.unwrap().starts_with("not-found"));
    }

    #[tokio::test]
    async fn missing_auth_rejected_outside_dev_mode() {
        let state = test_state(false);
        let envelope = dispatch(&state, request("list_all_events", json!({}))).await;
        assert!(!envelope.success);
        assert!(envelope.error.unwrap().starts_with("access-denied"));
    }

    #[tokio::test]
    async fn denied_role_is_named_in_error() {
        let state = test_state(false);
        let envelope = dispatch(
            &state,
            request(
                "delete_event",
                json!({"auth_context": {"user_id": "9", "role": "user"}, "event_id": "42"}),
            ),
        )
        .await;
        assert!(!envelope.success);
        let error = envelope.error.unwrap();
        assert!(error.starts_with("access-denied"));
        assert!(error.contains("'user'"));
        // The stripped auth context must not leak into the echoed parameters.
        assert!(!envelope.parameters.unwrap().contains_key("auth_context"));
    }

    #[tokio::test]
    async fn bare_user_id_resolves_to_assigned_role() {
        let state = test_state(true);
        // Unassigned users default to the `user` role, so admin-ish tools
        // stay shut even in development mode.
        let denied = dispatch(
            &state,
            request("delete_event", json!({"user_id": "9", "event_id": "42"})),
        )
        .await;
        assert!(!denied.success);
        assert!(denied.error.unwrap().starts_with("access-denied"));

        state
            .policy
            .write()
            .await
            .add_user_role("9", Role::EventOwner)
            .unwrap();
        let envelope = dispatch(
            &state,
            request("delete_event", json!({"user_id": "9", "event_id": "42"})),
        )
        .await;
        // Policy passes now; the dead back-end is the only failure left.
        assert!(!envelope.success);
        assert!(
            envelope
                .error
                .unwrap()
                .starts_with(ErrorKind::ServiceUnavailable.as_str())
        );
    }

    #[tokio::test]
    async fn unreachable_backend_degrades_in_bounded_time() {
        let state = test_state(true);
        let started = std::time::Instant::now();
        let envelope = dispatch(&state, request("list_all_events", json!({}))).await;
        assert!(!envelope.success);
        assert!(
            envelope
                .error
                .unwrap()
                .starts_with(ErrorKind::ServiceUnavailable.as_str())
        );
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn policy_mutation_requires_admin() {
        let state = test_state(true);
        let denied = dispatch(
            &state,
            request("add_policy", json!({"role": "user", "tool": "vibe_bit", "allow": false})),
        )
        .await;
        assert!(!denied.success);

        let allowed = dispatch(
            &state,
            request(
                "add_policy",
                json!({
                    "auth_context": {"user_id": "1", "role": "admin"},
                    "role": "user", "tool": "vibe_bit", "allow": false
                }),
            ),
        )
        .await;
        assert!(allowed.success);
        assert!(!state.policy.read().await.check(Role::User, "vibe_bit"));
    }

    #[tokio::test]
    async fn permissions_listing_reflects_role() {
        let state = test_state(true);
        let envelope = dispatch(
            &state,
            request("get_user_permissions", json!({"role": "user"})),
        )
        .await;
        assert!(envelope.success);
        let result = envelope.result.unwrap();
        let denied: Vec<String> =
            serde_json::from_value(result["denied"].clone()).unwrap();
        assert!(denied.contains(&"delete_event".to_string()));
    }
}
