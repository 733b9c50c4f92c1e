//! Authoritative session table and state machine.
//!
//! The registry is the single source of truth for "can this session legally
//! transition now". [`SessionRegistry::transition`] is the only status
//! mutator: it checks the caller's expected-state set and the state machine
//! edge, then applies and persists the write, all under one lock. User
//! operations and the worker supervisor's asynchronous exit notifications
//! both go through it, so racing writers have exactly one of the two
//! transitions rejected instead of corrupting state.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::models::session::{Session, SessionStatus};
use crate::persistence::session_repo::SessionRepo;
use crate::{AppError, Result};

/// In-memory session table with write-through persistence.
///
/// The table lock is held across the database write, so every mutation is
/// atomic per call, including durability. Registry calls are bookkeeping
/// only; workers run outside the lock.
pub struct SessionRegistry {
    profiles_dir: PathBuf,
    repo: SessionRepo,
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionRegistry {
    /// Create an empty registry persisting into `repo`, allocating profile
    /// directories under `profiles_dir`.
    #[must_use]
    pub fn new(repo: SessionRepo, profiles_dir: PathBuf) -> Self {
        Self {
            profiles_dir,
            repo,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Load persisted sessions, downgrading rows stranded by a previous
    /// process: `provisioning` becomes `error` with `valid=false` (the
    /// manual login never completed); `running`/`stopping` become `error`
    /// (their workers died with the previous process; the profile stays
    /// usable and the session restartable).
    ///
    /// Returns the number of sessions loaded.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on load or write-back failure.
    pub async fn load(&self) -> Result<usize> {
        let mut sessions = self.sessions.lock().await;
        let rows = self.repo.load_all().await?;
        let count = rows.len();

        for mut session in rows {
            let stranded = match session.status {
                SessionStatus::Provisioning => {
                    session.valid = false;
                    true
                }
                SessionStatus::Running | SessionStatus::Stopping => true,
                _ => false,
            };
            if stranded {
                warn!(
                    session_id = %session.id,
                    from = session.status.as_str(),
                    "downgrading session stranded by previous run"
                );
                session.status = SessionStatus::Error;
                self.repo.update(&session).await?;
            }
            sessions.insert(session.id.clone(), session);
        }

        info!(count, "session registry loaded");
        Ok(count)
    }

    /// Create a new session record in `provisioning` for `user`.
    ///
    /// The profile directory path is derived from the identity plus a
    /// unique suffix so that no two sessions ever share a profile.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails.
    pub async fn create(&self, user: &str) -> Result<Session> {
        let mut sessions = self.sessions.lock().await;

        let mut session = Session::new(user.to_owned(), PathBuf::new());
        let short_id: String = session.id.chars().take(8).collect();
        session.profile_path = self
            .profiles_dir
            .join(format!("profile_{}_{short_id}", sanitize(user)));

        self.repo.insert(&session).await?;
        sessions.insert(session.id.clone(), session.clone());

        info!(session_id = %session.id, user, "session created");
        Ok(session)
    }

    /// Snapshot of one session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown id.
    pub async fn get(&self, id: &str) -> Result<Session> {
        let sessions = self.sessions.lock().await;
        sessions
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("session {id} not found")))
    }

    /// Snapshots of all sessions, ordered by creation time ascending with
    /// the id as a stable tiebreaker.
    pub async fn list(&self) -> Vec<Session> {
        let sessions = self.sessions.lock().await;
        let mut all: Vec<Session> = sessions.values().cloned().collect();
        all.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.id.cmp(&b.id)));
        all
    }

    /// Atomically transition a session: the current status must be a member
    /// of `expected` and the edge must be legal, otherwise the call fails
    /// with `IllegalTransition` and has no side effects.
    ///
    /// Entering `created` from `provisioning` sets `valid=true`; entering
    /// `error` from `provisioning` sets `valid=false`. No other transition
    /// touches validity.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown id, `IllegalTransition`
    /// when rejected, or `AppError::Db` if the write-through fails.
    pub async fn transition(
        &self,
        id: &str,
        expected: &[SessionStatus],
        next: SessionStatus,
    ) -> Result<Session> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| AppError::NotFound(format!("session {id} not found")))?;

        if !expected.contains(&session.status) || !session.can_transition_to(next) {
            return Err(AppError::IllegalTransition(format!(
                "session {id}: {} -> {} not permitted",
                session.status.as_str(),
                next.as_str()
            )));
        }

        let previous = session.status;
        session.status = next;
        match (previous, next) {
            (SessionStatus::Provisioning, SessionStatus::Created) => session.valid = true,
            (SessionStatus::Provisioning, SessionStatus::Error) => session.valid = false,
            _ => {}
        }

        self.repo.update(session).await?;
        info!(
            session_id = id,
            from = previous.as_str(),
            to = next.as_str(),
            "session transition"
        );
        Ok(session.clone())
    }

    /// Record a start attempt by bumping `last_used`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown id, or `AppError::Db` if
    /// the write-through fails.
    pub async fn touch_last_used(&self, id: &str) -> Result<Session> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| AppError::NotFound(format!("session {id} not found")))?;
        session.last_used = Utc::now();
        self.repo.update(session).await?;
        Ok(session.clone())
    }

    /// Mark a session's profile unusable (detected corruption).
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown id, or `AppError::Db` if
    /// the write-through fails.
    pub async fn set_invalid(&self, id: &str) -> Result<Session> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| AppError::NotFound(format!("session {id} not found")))?;
        session.valid = false;
        self.repo.update(session).await?;
        warn!(session_id = id, "session marked invalid");
        Ok(session.clone())
    }

    /// Persist finalization metadata on a session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown id, or `AppError::Db` if
    /// the write-through fails.
    pub async fn set_metadata(&self, id: &str, metadata: serde_json::Value) -> Result<Session> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| AppError::NotFound(format!("session {id} not found")))?;
        session.metadata = Some(metadata);
        self.repo.update(session).await?;
        Ok(session.clone())
    }
}

/// Reduce a user identifier to a filesystem-safe profile directory stem.
fn sanitize(user: &str) -> String {
    user.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}
