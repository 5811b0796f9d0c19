//! Admin read/retry surface: inspect failures, retry them, list audit
//! events, and run the retention sweep.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::job_queue::{JobPayload, JobQueue};
use crate::store::{EventType, OutboxRecord, Store, TaskEventRecord, TaskRecord};

#[derive(Clone)]
pub struct AdminState {
    pub store: Arc<Store>,
    pub queue: Arc<JobQueue>,
    pub config: Arc<PipelineConfig>,
}

pub fn admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/admin/tasks/failed", get(list_failed_tasks))
        .route("/admin/outbox/failed", get(list_failed_outbox))
        .route("/admin/tasks/{task_id}/retry", post(retry_task))
        .route("/admin/tasks/{task_id}/events", get(list_task_events))
        .route("/admin/outbox/{outbox_id}/retry", post(retry_outbox))
        .route("/admin/retention/sweep", post(retention_sweep))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

#[derive(Debug, Serialize)]
struct TaskView {
    task_id: Uuid,
    user_id: String,
    due_at: Option<DateTime<Utc>>,
    action_type: String,
    contact_hint: String,
    context: String,
    status: String,
    attempt_count: i32,
    updated_at: DateTime<Utc>,
}

impl From<TaskRecord> for TaskView {
    fn from(task: TaskRecord) -> Self {
        Self {
            task_id: task.task_id,
            user_id: task.user_id,
            due_at: task.due_at,
            action_type: task.action_type.to_string(),
            contact_hint: task.contact_hint,
            context: task.context,
            status: task.status.to_string(),
            attempt_count: task.attempt_count,
            updated_at: task.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
struct OutboxView {
    outbox_id: Uuid,
    task_id: Option<Uuid>,
    user_id: String,
    channel: String,
    recipient: String,
    subject: Option<String>,
    status: String,
    attempts: i32,
    next_retry_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<OutboxRecord> for OutboxView {
    fn from(row: OutboxRecord) -> Self {
        Self {
            outbox_id: row.outbox_id,
            task_id: row.task_id,
            user_id: row.user_id,
            channel: row.channel.to_string(),
            recipient: row.recipient,
            subject: row.subject,
            status: row.status.to_string(),
            attempts: row.attempts,
            next_retry_at: row.next_retry_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
struct EventView {
    event_id: i64,
    event_type: String,
    payload: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl From<TaskEventRecord> for EventView {
    fn from(event: TaskEventRecord) -> Self {
        Self {
            event_id: event.event_id,
            event_type: event.event_type.to_string(),
            payload: event.payload,
            created_at: event.created_at,
        }
    }
}

const LIST_LIMIT: i64 = 100;

type AdminResponse = (StatusCode, Json<serde_json::Value>);

/// The store client is synchronous; run each request's work on the blocking
/// pool.
async fn run_blocking<F>(work: F) -> AdminResponse
where
    F: FnOnce() -> AdminResponse + Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(response) => response,
        Err(err) => internal_error(err),
    }
}

async fn list_failed_tasks(State(state): State<AdminState>) -> impl IntoResponse {
    run_blocking(move || match state.store.list_failed_tasks(LIST_LIMIT) {
        Ok(tasks) => {
            let views: Vec<TaskView> = tasks.into_iter().map(TaskView::from).collect();
            (StatusCode::OK, Json(json!({ "tasks": views })))
        }
        Err(err) => internal_error(err),
    })
    .await
}

async fn list_failed_outbox(State(state): State<AdminState>) -> impl IntoResponse {
    run_blocking(move || match state.store.list_failed_outbox(LIST_LIMIT) {
        Ok(rows) => {
            let views: Vec<OutboxView> = rows.into_iter().map(OutboxView::from).collect();
            (StatusCode::OK, Json(json!({ "outbox": views })))
        }
        Err(err) => internal_error(err),
    })
    .await
}

/// Retry a failed task: reset its attempt counter, move it back to `due`,
/// and enqueue a fresh execute job under a new dedupe key.
async fn retry_task(
    State(state): State<AdminState>,
    Path(task_id): Path<Uuid>,
) -> impl IntoResponse {
    run_blocking(move || {
        match state.store.retry_failed_task(task_id) {
            Ok(true) => {}
            Ok(false) => {
                return (
                    StatusCode::NOT_FOUND,
                    Json(json!({ "error": "task not found or not failed" })),
                );
            }
            Err(err) => return internal_error(err),
        }

        let task = match state.store.load_task(task_id) {
            Ok(Some(task)) => task,
            Ok(None) => {
                return (
                    StatusCode::NOT_FOUND,
                    Json(json!({ "error": "task not found" })),
                );
            }
            Err(err) => return internal_error(err),
        };

        state.store.log_task_event(
            task_id,
            &task.user_id,
            EventType::Retried,
            json!({ "source": "admin" }),
        );

        let dedupe_key = format!("retry:{}:{}", task_id, Utc::now().timestamp());
        if let Err(err) = state
            .queue
            .enqueue(&JobPayload::Execute { task_id }, &dedupe_key)
        {
            error!("failed to enqueue retry job for task {}: {}", task_id, err);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "retry enqueue failed" })),
            );
        }

        info!("admin retried task {}", task_id);
        (StatusCode::OK, Json(json!({ "status": "retried" })))
    })
    .await
}

async fn retry_outbox(
    State(state): State<AdminState>,
    Path(outbox_id): Path<Uuid>,
) -> impl IntoResponse {
    run_blocking(move || match state.store.retry_failed_outbox(outbox_id) {
        Ok(true) => {
            info!("admin retried outbox {}", outbox_id);
            (StatusCode::OK, Json(json!({ "status": "retried" })))
        }
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "outbox row not found or not failed" })),
        ),
        Err(err) => internal_error(err),
    })
    .await
}

async fn list_task_events(
    State(state): State<AdminState>,
    Path(task_id): Path<Uuid>,
) -> impl IntoResponse {
    run_blocking(move || match state.store.list_task_events(task_id) {
        Ok(events) => {
            let views: Vec<EventView> = events.into_iter().map(EventView::from).collect();
            (StatusCode::OK, Json(json!({ "events": views })))
        }
        Err(err) => internal_error(err),
    })
    .await
}

/// Redact stored inbound text older than the retention window.
async fn retention_sweep(State(state): State<AdminState>) -> impl IntoResponse {
    run_blocking(move || {
        let cutoff = Utc::now() - Duration::days(state.config.retention_days);
        match state.store.redact_inbound_older_than(cutoff) {
            Ok(redacted) => {
                info!("retention sweep redacted {} inbound row(s)", redacted);
                (StatusCode::OK, Json(json!({ "redacted": redacted })))
            }
            Err(err) => internal_error(err),
        }
    })
    .await
}

fn internal_error(err: impl std::fmt::Display) -> AdminResponse {
    error!("admin request failed: {}", err);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": err.to_string() })),
    )
}
