//! Ingress and monitor HTTP surface.
//!
//! `POST /cloudevents` accepts an envelope verbatim and answers 202 with the
//! task id; validation failures answer 400 and rate limiting 429, both with
//! a structured error body.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use tlt_types::{CloudEvent, ErrorBody, ErrorKind, TaskStatus};

use crate::manager::{SubmitError, TaskManager};

/// Builds the coordinator router.
pub fn router(manager: Arc<TaskManager>) -> Router {
    Router::new()
        .route("/cloudevents", post(submit_cloudevent))
        .route("/monitor/agent/state", get(agent_state))
        .route("/monitor/tasks/{task_id}", get(task_status))
        .route("/events/task/{task_id}/result", get(task_result))
        .route("/monitor/status", get(monitor_status))
        .route("/health", get(|| async { "ok" }))
        .with_state(manager)
}

async fn submit_cloudevent(
    State(manager): State<Arc<TaskManager>>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    // Manual envelope decode so an unknown type surfaces as a validation
    // error instead of a bare 422.
    let cloudevent: CloudEvent = match serde_json::from_value(body) {
        Ok(cloudevent) => cloudevent,
        Err(err) => {
            let body = ErrorBody::new(ErrorKind::ValidationError, err.to_string());
            return (StatusCode::BAD_REQUEST, Json(json!(body)));
        }
    };
    let cloudevent_id = cloudevent.id.clone();

    match manager.submit(cloudevent).await {
        Ok(task_id) => (
            StatusCode::ACCEPTED,
            Json(json!({"cloudevent_id": cloudevent_id, "task_id": task_id})),
        ),
        Err(err @ SubmitError::Validation(_)) => {
            let body = ErrorBody::new(err.kind(), err.to_string());
            (StatusCode::BAD_REQUEST, Json(json!(body)))
        }
        Err(err @ SubmitError::RateLimited(_)) => {
            let body = ErrorBody::new(err.kind(), err.to_string());
            (StatusCode::TOO_MANY_REQUESTS, Json(json!(body)))
        }
    }
}

async fn agent_state(State(manager): State<Arc<TaskManager>>) -> Json<Value> {
    Json(manager.snapshot().await)
}

#[derive(Deserialize)]
struct ListParams {
    status: Option<TaskStatus>,
    limit: Option<usize>,
}

async fn monitor_status(
    State(manager): State<Arc<TaskManager>>,
    Query(params): Query<ListParams>,
) -> Json<Value> {
    let mut status = manager.metrics_snapshot().await;
    let tasks = manager
        .list(params.status, params.limit.unwrap_or(50))
        .await;
    if let Some(object) = status.as_object_mut() {
        object.insert(
            "tasks".to_string(),
            json!(
                tasks
                    .iter()
                    .map(|task| {
                        json!({
                            "task_id": task.task_id,
                            "status": task.status,
                            "priority": task.priority,
                            "trigger_type": task.trigger_type,
                        })
                    })
                    .collect::<Vec<Value>>()
            ),
        );
    }
    Json(status)
}

async fn task_status(
    State(manager): State<Arc<TaskManager>>,
    Path(task_id): Path<String>,
) -> (StatusCode, Json<Value>) {
    match manager.status(&task_id).await {
        Some(task) => {
            let lifecycle = manager.lifecycle(&task_id).await;
            (
                StatusCode::OK,
                Json(json!({"task": task, "lifecycle": lifecycle})),
            )
        }
        None => not_found(&task_id),
    }
}

async fn task_result(
    State(manager): State<Arc<TaskManager>>,
    Path(task_id): Path<String>,
) -> (StatusCode, Json<Value>) {
    match manager.status(&task_id).await {
        Some(task) => (
            StatusCode::OK,
            Json(json!({
                "task_id": task.task_id,
                "status": task.status,
                "result": task.result,
                "error": task.error,
            })),
        ),
        None => not_found(&task_id),
    }
}

fn not_found(task_id: &str) -> (StatusCode, Json<Value>) {
    let body = ErrorBody::new(ErrorKind::NotFound, format!("no task {task_id}"));
    (StatusCode::NOT_FOUND, Json(json!(body)))
}
