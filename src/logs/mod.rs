//! Per-session log multiplexing: append-only history plus live fan-out.
//!
//! Each session owns one stream: a history of every line the bound worker
//! has ever emitted (retained for the session's full lifetime, independent
//! of subscriber presence) and a broadcast channel feeding any number of
//! live subscribers. Only the bound worker appends; many subscribers read.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use tokio::sync::broadcast;

use crate::models::log::{LogEntry, LogEvent};
use crate::models::worker::ExitOutcome;
use crate::{AppError, Result};

/// State for one session's log stream.
struct StreamState {
    history: Vec<LogEntry>,
    tx: broadcast::Sender<LogEvent>,
}

/// Log multiplexer: the single sink for worker output and the single
/// source for history reads and live subscriptions.
pub struct LogHub {
    buffer: usize,
    streams: Mutex<HashMap<String, StreamState>>,
}

impl LogHub {
    /// Create a hub whose live channels hold `buffer` undelivered events
    /// per subscriber before lagging.
    #[must_use]
    pub fn new(buffer: usize) -> Self {
        Self {
            buffer: buffer.max(1),
            streams: Mutex::new(HashMap::new()),
        }
    }

    /// Create the stream for a session. Idempotent; existing history is
    /// never discarded.
    pub fn register(&self, session_id: &str) {
        let mut streams = self.lock();
        streams.entry(session_id.to_owned()).or_insert_with(|| {
            let (tx, _) = broadcast::channel(self.buffer);
            StreamState {
                history: Vec::new(),
                tx,
            }
        });
    }

    /// Append one worker line: record it in history and push it to every
    /// live subscriber. Lines for unknown sessions are dropped.
    pub fn append(&self, session_id: &str, message: String) {
        let entry = LogEntry::now(session_id, message);
        let mut streams = self.lock();
        if let Some(stream) = streams.get_mut(session_id) {
            stream.history.push(entry.clone());
            // A send error only means there is no live subscriber right now.
            let _ = stream.tx.send(LogEvent::Line { entry });
        }
    }

    /// Publish the stream-end marker for a finished run. History is kept;
    /// a later restart reuses the same stream.
    pub fn end(&self, session_id: &str, outcome: ExitOutcome) {
        let streams = self.lock();
        if let Some(stream) = streams.get(session_id) {
            let _ = stream.tx.send(LogEvent::Ended {
                session_id: session_id.to_owned(),
                outcome,
            });
        }
    }

    /// Full ordered history for a session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no stream exists for `session_id`.
    pub fn history(&self, session_id: &str) -> Result<Vec<LogEntry>> {
        let streams = self.lock();
        streams
            .get(session_id)
            .map(|stream| stream.history.clone())
            .ok_or_else(|| AppError::NotFound(format!("no log stream for session {session_id}")))
    }

    /// Subscribe to a session's live stream.
    ///
    /// The history snapshot and the receiver are taken under one lock, so a
    /// subscriber attached mid-run sees every line exactly once: lines up to
    /// the snapshot in the returned history, lines after it on the channel.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no stream exists for `session_id`.
    pub fn subscribe(
        &self,
        session_id: &str,
    ) -> Result<(Vec<LogEntry>, broadcast::Receiver<LogEvent>)> {
        let streams = self.lock();
        streams
            .get(session_id)
            .map(|stream| (stream.history.clone(), stream.tx.subscribe()))
            .ok_or_else(|| AppError::NotFound(format!("no log stream for session {session_id}")))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, StreamState>> {
        self.streams
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
