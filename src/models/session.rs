//! Session model and lifecycle state machine.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status for an automation session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Manual-login flow in progress; profile not yet usable.
    Provisioning,
    /// Profile provisioned and ready to run.
    Created,
    /// Worker process bound and running.
    Running,
    /// Stop requested; waiting for the worker to terminate.
    Stopping,
    /// Worker confirmed terminated after a stop request.
    Stopped,
    /// Worker exited cleanly, work complete.
    Finished,
    /// Worker crashed, reported failure, or provisioning failed.
    Error,
}

impl SessionStatus {
    /// Stable lowercase name, used for persistence and log fields.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Provisioning => "provisioning",
            Self::Created => "created",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Finished => "finished",
            Self::Error => "error",
        }
    }

    /// Parse a persisted status name.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "provisioning" => Some(Self::Provisioning),
            "created" => Some(Self::Created),
            "running" => Some(Self::Running),
            "stopping" => Some(Self::Stopping),
            "stopped" => Some(Self::Stopped),
            "finished" => Some(Self::Finished),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// Whether no further transition happens without an explicit operation.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Finished | Self::Error)
    }
}

/// Session domain entity: one persistent binding between a user identity,
/// a browser profile directory, and a lifecycle state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Session {
    /// Unique record identifier, immutable after creation.
    pub id: String,
    /// Human identity (email or phone) the profile is logged in as.
    pub user: String,
    /// Current lifecycle status.
    pub status: SessionStatus,
    /// Whether the profile/login material is usable.
    pub valid: bool,
    /// Creation timestamp.
    pub created: DateTime<Utc>,
    /// Updated on every start attempt, successful or not.
    pub last_used: DateTime<Utc>,
    /// Browser profile directory exclusively owned by this session.
    pub profile_path: PathBuf,
    /// Free-form metadata persisted at finalization.
    pub metadata: Option<serde_json::Value>,
}

impl Session {
    /// Construct a new session in `Provisioning` with a generated identifier.
    #[must_use]
    pub fn new(user: String, profile_path: PathBuf) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            user,
            status: SessionStatus::Provisioning,
            valid: false,
            created: now,
            last_used: now,
            profile_path,
            metadata: None,
        }
    }

    /// Determine whether a lifecycle transition is permitted.
    ///
    /// `Stopping -> Stopping` is accepted so that a second stop request can
    /// re-enter the stop path instead of failing while a worker winds down.
    #[must_use]
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        matches!(
            (self.status, next),
            (
                SessionStatus::Provisioning,
                SessionStatus::Created | SessionStatus::Error
            ) | (
                SessionStatus::Created
                    | SessionStatus::Stopped
                    | SessionStatus::Finished
                    | SessionStatus::Error,
                SessionStatus::Running
            ) | (
                SessionStatus::Running,
                SessionStatus::Stopping | SessionStatus::Finished | SessionStatus::Error
            ) | (
                SessionStatus::Stopping,
                SessionStatus::Stopping | SessionStatus::Stopped
            )
        )
    }

    /// Whether a start request is legal right now.
    #[must_use]
    pub fn can_start(&self) -> bool {
        self.valid
            && matches!(
                self.status,
                SessionStatus::Created
                    | SessionStatus::Stopped
                    | SessionStatus::Finished
                    | SessionStatus::Error
            )
    }

    /// Whether a stop request is legal right now.
    #[must_use]
    pub fn can_stop(&self) -> bool {
        matches!(
            self.status,
            SessionStatus::Running | SessionStatus::Stopping
        )
    }
}

/// Session snapshot decorated with the derived predicates, as listed on the
/// control surface.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionView {
    /// Unique record identifier.
    pub id: String,
    /// Human identity the profile is logged in as.
    pub user: String,
    /// Current lifecycle status.
    pub status: SessionStatus,
    /// Whether the profile/login material is usable.
    pub valid: bool,
    /// Creation timestamp.
    pub created: DateTime<Utc>,
    /// Last start attempt timestamp.
    pub last_used: DateTime<Utc>,
    /// Whether a start request would be admitted.
    pub can_start: bool,
    /// Whether a stop request would be admitted.
    pub can_stop: bool,
}

impl From<&Session> for SessionView {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id.clone(),
            user: session.user.clone(),
            status: session.status,
            valid: session.valid,
            created: session.created,
            last_used: session.last_used,
            can_start: session.can_start(),
            can_stop: session.can_stop(),
        }
    }
}
