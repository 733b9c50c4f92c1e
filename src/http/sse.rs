//! Live log streaming over Server-Sent Events.
//!
//! `GET /api/sessions/{id}/logs/stream` replays the session's history and
//! then pushes live lines until the session reaches a terminal state or
//! the subscriber disconnects. The final `ended` event carries the run's
//! outcome so observers can distinguish normal completion from a crash.

use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::stream::{self, Stream};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::models::log::{LogEntry, LogEvent};
use crate::models::session::SessionStatus;
use crate::models::worker::ExitOutcome;

use super::{ApiError, ApiState};

/// State threaded through the unfolded SSE stream.
struct StreamState {
    pending: std::vec::IntoIter<Event>,
    live: Option<broadcast::Receiver<LogEvent>>,
}

/// `GET /api/sessions/{id}/logs/stream`.
///
/// # Errors
///
/// Returns `404` for an unknown session id.
pub async fn stream_session_logs(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let (session, history, rx) = state.orchestrator.subscribe(&id).await?;

    // History first. If the session is already terminal the stream ends
    // right after the replay — the live marker was published before this
    // subscriber attached.
    let mut pending: Vec<Event> = history.iter().map(line_event).collect();
    let live = if session.status.is_terminal() {
        pending.push(ended_event(&id, outcome_for(session.status)));
        None
    } else {
        Some(rx)
    };

    let initial = StreamState {
        pending: pending.into_iter(),
        live,
    };

    let stream = stream::unfold(initial, |mut st| async move {
        if let Some(event) = st.pending.next() {
            return Some((Ok(event), st));
        }

        let received = match st.live.as_mut() {
            Some(rx) => rx.recv().await,
            None => return None,
        };
        match received {
            Ok(LogEvent::Line { entry }) => Some((Ok(line_event(&entry)), st)),
            Ok(LogEvent::Ended {
                session_id,
                outcome,
            }) => {
                debug!(session_id, "log stream ended");
                st.live = None;
                Some((Ok(ended_event(&session_id, outcome)), st))
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                Some((Ok(lagged_event(skipped)), st))
            }
            Err(broadcast::error::RecvError::Closed) => {
                st.live = None;
                None
            }
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Map a terminal status onto the outcome reported after the fact.
fn outcome_for(status: SessionStatus) -> ExitOutcome {
    match status {
        SessionStatus::Stopped => ExitOutcome::Killed,
        SessionStatus::Error => ExitOutcome::Crashed,
        _ => ExitOutcome::Clean,
    }
}

fn line_event(entry: &LogEntry) -> Event {
    json_event("log", entry)
}

fn ended_event(session_id: &str, outcome: ExitOutcome) -> Event {
    json_event(
        "ended",
        &serde_json::json!({
            "session_id": session_id,
            "outcome": outcome,
        }),
    )
}

fn lagged_event(skipped: u64) -> Event {
    json_event("lagged", &serde_json::json!({ "skipped": skipped }))
}

fn json_event<T: Serialize>(name: &str, data: &T) -> Event {
    match Event::default().event(name).json_data(data) {
        Ok(event) => event,
        Err(err) => Event::default()
            .event("error")
            .data(format!("serialization failure: {err}")),
    }
}
