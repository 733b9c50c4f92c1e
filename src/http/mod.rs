//! HTTP/SSE control surface.
//!
//! A thin axum transport over the orchestrator's operation surface. Every
//! write operation returns a JSON success payload or a structured
//! `{kind, message}` error; it never partially applies.

pub mod routes;
pub mod sse;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::orchestrator::SessionOrchestrator;
use crate::{AppError, Result};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct ApiState {
    /// The fleet façade.
    pub orchestrator: Arc<SessionOrchestrator>,
    /// Server-wide shutdown token; background batch runs derive from it.
    pub shutdown: CancellationToken,
}

/// Wrapper mapping [`AppError`] onto HTTP responses.
#[derive(Debug)]
pub struct ApiError(pub AppError);

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            AppError::Invalid(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Busy(_) | AppError::IllegalTransition(_) => StatusCode::CONFLICT,
            AppError::Launch(_) | AppError::Termination(_) | AppError::Provisioning(_) => {
                StatusCode::BAD_GATEWAY
            }
            AppError::Config(_) | AppError::Db(_) | AppError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = Json(serde_json::json!({
            "status": "error",
            "kind": self.0.kind(),
            "retryable": self.0.retryable(),
            "message": self.0.to_string(),
        }));
        (status, body).into_response()
    }
}

/// Build the control-surface router.
#[must_use]
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/health", get(routes::health))
        .route(
            "/api/sessions",
            get(routes::list_sessions).post(routes::create_session),
        )
        .route("/api/sessions/start-all", post(routes::start_all_sessions))
        .route("/api/sessions/stop-all", post(routes::stop_all_sessions))
        .route(
            "/api/sessions/start-sequential",
            post(routes::start_sequential_sessions),
        )
        .route("/api/sessions/{id}/finalize", post(routes::finalize_session))
        .route("/api/sessions/{id}/start", post(routes::start_session))
        .route("/api/sessions/{id}/stop", post(routes::stop_session))
        .route("/api/sessions/{id}/logs", get(routes::get_session_logs))
        .route("/api/sessions/{id}/logs/stream", get(sse::stream_session_logs))
        .with_state(state)
}

/// Serve the control surface on `port` until `ct` fires.
///
/// # Errors
///
/// Returns `AppError::Config` if the server fails to bind or errors while
/// serving.
pub async fn serve(state: ApiState, port: u16, ct: CancellationToken) -> Result<()> {
    let bind = SocketAddr::from(([127, 0, 0, 1], port));
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|err| AppError::Config(format!("failed to bind control surface on {bind}: {err}")))?;

    info!(%bind, "starting control surface");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            ct.cancelled().await;
        })
        .await
        .map_err(|err| AppError::Config(format!("control surface error: {err}")))?;

    info!("control surface shut down");
    Ok(())
}
