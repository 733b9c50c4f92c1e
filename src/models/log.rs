//! Log entry model and free-text level classification.
//!
//! Workers emit unstructured log lines; no level field is guaranteed by the
//! worker contract. The receiver classifies each line from its content so
//! the control surface can colour-code output.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::worker::ExitOutcome;

static ERROR_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| compiled(r"(?i)\berror\b|\bfailed\b|\bfailure\b|\bfatal\b|\bpanic\b|❌"));

static WARN_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| compiled(r"(?i)\bwarn(?:ing)?\b|\bretry(?:ing)?\b|\btimeout\b|⚠"));

#[allow(clippy::expect_used)]
fn compiled(pattern: &str) -> Regex {
    // Patterns are static literals; a failure here is a programming error.
    Regex::new(pattern).expect("static log pattern is valid")
}

/// Severity assigned to a worker log line by content classification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    /// Default level for unclassified lines.
    Info,
    /// Line mentions a retry, timeout, or warning.
    Warn,
    /// Line mentions an error, failure, or panic.
    Error,
}

impl LogLevel {
    /// Classify a free-text line. Error markers take precedence over
    /// warning markers when both are present.
    #[must_use]
    pub fn classify(message: &str) -> Self {
        if ERROR_PATTERN.is_match(message) {
            Self::Error
        } else if WARN_PATTERN.is_match(message) {
            Self::Warn
        } else {
            Self::Info
        }
    }
}

/// One timestamped log line bound to a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct LogEntry {
    /// Session the line belongs to.
    pub session_id: String,
    /// Time the orchestrator received the line.
    pub timestamp: DateTime<Utc>,
    /// Content-classified severity.
    pub level: LogLevel,
    /// Raw line as emitted by the worker.
    pub message: String,
}

impl LogEntry {
    /// Build an entry for a freshly received line, classifying its level.
    #[must_use]
    pub fn now(session_id: &str, message: String) -> Self {
        Self {
            session_id: session_id.to_owned(),
            timestamp: Utc::now(),
            level: LogLevel::classify(&message),
            message,
        }
    }
}

/// Event pushed to live log subscribers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum LogEvent {
    /// A worker log line.
    Line {
        /// The received entry.
        entry: LogEntry,
    },
    /// The session reached a terminal state; the live stream ends here.
    /// Subscribers use `outcome` to distinguish normal completion from a
    /// crash or an operator stop.
    Ended {
        /// Session whose run ended.
        session_id: String,
        /// Terminal outcome of the run.
        outcome: ExitOutcome,
    },
}
