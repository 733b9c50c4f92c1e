//! Control-surface request handlers.

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::models::session::SessionView;

use super::{ApiError, ApiState};

/// Body for `POST /api/sessions`.
#[derive(Debug, Deserialize)]
pub struct CreateRequest {
    /// Email or phone identity to bind the new session to.
    pub user: String,
}

/// Body for `POST /api/sessions/{id}/finalize`.
#[derive(Debug, Deserialize, Default)]
pub struct FinalizeRequest {
    /// Optional metadata persisted with the session.
    #[serde(default)]
    pub metadata: Option<Value>,
}

/// `GET /api/health` — liveness plus fleet counters.
pub async fn health(State(state): State<ApiState>) -> Json<Value> {
    let sessions = state.orchestrator.list().await;
    let running = sessions.iter().filter(|view| view.can_stop).count();
    Json(json!({
        "status": "healthy",
        "active_sessions": running,
        "total_sessions": sessions.len(),
    }))
}

/// `GET /api/sessions` — all sessions with derived predicates.
pub async fn list_sessions(State(state): State<ApiState>) -> Json<Value> {
    let sessions = state.orchestrator.list().await;
    Json(json!({
        "status": "success",
        "total_sessions": sessions.len(),
        "sessions": sessions,
    }))
}

/// `POST /api/sessions` — create a session and begin provisioning.
pub async fn create_session(
    State(state): State<ApiState>,
    Json(body): Json<CreateRequest>,
) -> Result<Json<Value>, ApiError> {
    let session = state.orchestrator.create(&body.user).await?;
    Ok(Json(json!({
        "status": "success",
        "message": format!("session {} created, complete the login to finish setup", session.id),
        "session": SessionView::from(&session),
    })))
}

/// `POST /api/sessions/{id}/finalize` — complete provisioning.
pub async fn finalize_session(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(body): Json<FinalizeRequest>,
) -> Result<Json<Value>, ApiError> {
    let session = state.orchestrator.finalize(&id, body.metadata).await?;
    Ok(Json(json!({
        "status": "success",
        "session": SessionView::from(&session),
    })))
}

/// `POST /api/sessions/{id}/start`.
pub async fn start_session(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let session = state.orchestrator.start(&id).await?;
    Ok(Json(json!({
        "status": "success",
        "message": format!("session {id} started"),
        "session": SessionView::from(&session),
    })))
}

/// `POST /api/sessions/{id}/stop`.
pub async fn stop_session(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let session = state.orchestrator.stop(&id).await?;
    Ok(Json(json!({
        "status": "success",
        "message": format!("session {id} stopped"),
        "session": SessionView::from(&session),
    })))
}

/// `POST /api/sessions/start-all` — concurrent fan-out over every
/// startable session; partial success is reported, never inferred.
pub async fn start_all_sessions(State(state): State<ApiState>) -> Json<Value> {
    let report = state.orchestrator.start_all().await;
    Json(json!({
        "status": "success",
        "message": format!("started {} sessions", report.started.len()),
        "started_sessions": report.started,
        "failed_sessions": report.failed,
    }))
}

/// `POST /api/sessions/stop-all`.
pub async fn stop_all_sessions(State(state): State<ApiState>) -> Json<Value> {
    let report = state.orchestrator.stop_all().await;
    Json(json!({
        "status": "success",
        "message": format!("stopped {} sessions", report.stopped.len()),
        "stopped_sessions": report.stopped,
        "failed_sessions": report.failed,
    }))
}

/// `POST /api/sessions/start-sequential` — run the queue in the background.
///
/// A sequential run over a fleet outlives any sane request timeout, so the
/// handler admits the queue and returns immediately; progress is observable
/// through the session list and log streams.
pub async fn start_sequential_sessions(State(state): State<ApiState>) -> Json<Value> {
    let queued = state
        .orchestrator
        .list()
        .await
        .iter()
        .filter(|view| view.can_start)
        .count();

    let orchestrator = std::sync::Arc::clone(&state.orchestrator);
    let cancel = state.shutdown.child_token();
    tokio::spawn(async move {
        let report = orchestrator.start_sequential(cancel).await;
        info!(slots = report.slots.len(), "background sequential run finished");
    });

    Json(json!({
        "status": "success",
        "message": format!("sequential run admitted with {queued} sessions"),
        "queued": queued,
    }))
}

/// `GET /api/sessions/{id}/logs` — full ordered history.
pub async fn get_session_logs(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let session = state.orchestrator.get(&id).await?;
    let logs = state.orchestrator.logs(&id).await?;
    Ok(Json(json!({
        "status": "success",
        "session_id": id,
        "session_status": session.status,
        "logs": logs,
    })))
}
