//! Session orchestrator façade.
//!
//! Exposes the create/finalize/start/stop/list operations, drives the
//! worker supervisor and the log hub, and admission-controls every
//! per-session operation through a mutual-exclusion token: a second
//! `start`/`stop`/`finalize` on the same session while one is in flight
//! fails fast with `Busy` instead of queuing, so a double-click can never
//! race the state machine.

pub mod batch;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::sync::OwnedMutexGuard;
use tracing::{info, info_span, warn, Instrument};

use crate::logs::LogHub;
use crate::models::log::{LogEntry, LogEvent};
use crate::models::session::{Session, SessionStatus, SessionView};
use crate::provision::Provisioner;
use crate::registry::SessionRegistry;
use crate::worker::supervisor::WorkerSupervisor;
use crate::{AppError, Result};

/// Statuses from which a start is legal; used as the expected set for the
/// restart transition.
const STARTABLE: &[SessionStatus] = &[
    SessionStatus::Created,
    SessionStatus::Stopped,
    SessionStatus::Finished,
    SessionStatus::Error,
];

/// The fleet façade. All external surfaces (HTTP today) call through here.
pub struct SessionOrchestrator {
    registry: Arc<SessionRegistry>,
    supervisor: Arc<WorkerSupervisor>,
    hub: Arc<LogHub>,
    provisioner: Arc<dyn Provisioner>,
    grace: Duration,
    sequential_slot: Duration,
    tokens: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionOrchestrator {
    /// Wire the orchestrator to its collaborators.
    #[must_use]
    pub fn new(
        registry: Arc<SessionRegistry>,
        supervisor: Arc<WorkerSupervisor>,
        hub: Arc<LogHub>,
        provisioner: Arc<dyn Provisioner>,
        grace: Duration,
        sequential_slot: Duration,
    ) -> Self {
        Self {
            registry,
            supervisor,
            hub,
            provisioner,
            grace,
            sequential_slot,
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Create a session for `user` and kick off the manual-login
    /// provisioning flow in the background.
    ///
    /// The returned session is in `provisioning`; it becomes `created`
    /// (valid) when the flow succeeds or `error` (invalid) when it fails
    /// or is abandoned.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Invalid` for an empty or malformed identifier,
    /// or `AppError::Db` if the record cannot be persisted.
    pub async fn create(self: &Arc<Self>, user: &str) -> Result<Session> {
        let user = validate_identifier(user)?;
        let session = self.registry.create(&user).await?;
        self.hub.register(&session.id);

        let orchestrator = Arc::clone(self);
        let spawned = session.clone();
        tokio::spawn(
            async move {
                orchestrator.run_provisioning(&spawned).await;
            }
            .instrument(info_span!("provision", session_id = %session.id)),
        );

        Ok(session)
    }

    /// Mark a provisioning session `created` and persist its metadata.
    ///
    /// Idempotent when the session is already `created` — the provisioning
    /// task and an operator confirmation may race; whichever lands first
    /// wins.
    ///
    /// # Errors
    ///
    /// Returns `Busy` when another operation holds the session token,
    /// `NotFound` for an unknown id, or `IllegalTransition` when the
    /// session is past provisioning (e.g. already failed).
    pub async fn finalize(
        &self,
        id: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<Session> {
        let _guard = self.admission(id)?;

        let current = self.registry.get(id).await?;
        if current.status != SessionStatus::Created {
            match self
                .registry
                .transition(id, &[SessionStatus::Provisioning], SessionStatus::Created)
                .await
            {
                Ok(_) => {}
                Err(AppError::IllegalTransition(msg)) => {
                    // The provisioning task may have landed in between;
                    // only a session that is genuinely past provisioning
                    // (failed, running, ...) rejects the finalize.
                    let now = self.registry.get(id).await?;
                    if now.status != SessionStatus::Created {
                        return Err(AppError::IllegalTransition(msg));
                    }
                }
                Err(err) => return Err(err),
            }
        }

        let session = match metadata {
            Some(metadata) => self.registry.set_metadata(id, metadata).await?,
            None => self.registry.get(id).await?,
        };
        info!(session_id = id, "session finalized");
        Ok(session)
    }

    /// Start a session's worker.
    ///
    /// `last_used` is bumped on every attempt, successful or not. The
    /// status moves to `running` only after the launch succeeded; a launch
    /// failure leaves the status unchanged (it may be transient), except
    /// that a missing profile directory additionally marks the session
    /// invalid.
    ///
    /// # Errors
    ///
    /// Returns `Busy` on token contention, `NotFound` for an unknown id,
    /// `IllegalTransition` when `can_start` is false, or `Launch` when the
    /// worker cannot be spawned.
    pub async fn start(&self, id: &str) -> Result<Session> {
        let _guard = self.admission(id)?;
        let session = self.registry.touch_last_used(id).await?;

        if !session.can_start() {
            return Err(AppError::IllegalTransition(format!(
                "session {id} cannot start from {} (valid={})",
                session.status.as_str(),
                session.valid
            )));
        }

        if !session.profile_path.is_dir() {
            self.registry.set_invalid(id).await?;
            return Err(AppError::Launch(format!(
                "profile directory {} missing; session marked invalid",
                session.profile_path.display()
            )));
        }

        self.supervisor.launch(&session)?;

        let session = match self
            .registry
            .transition(id, STARTABLE, SessionStatus::Running)
            .await
        {
            Ok(session) => session,
            Err(err) => {
                // Do not leave an orphan bound to the profile.
                self.supervisor.abort(id);
                return Err(err);
            }
        };

        self.supervisor.watch(id)?;
        info!(session_id = id, "session started");
        Ok(session)
    }

    /// Stop a session's worker: `running -> stopping`, graceful terminate
    /// with the configured grace period, forced kill on timeout. Returns
    /// once the supervisor confirmed `stopping -> stopped`.
    ///
    /// # Errors
    ///
    /// Returns `Busy` on token contention, `NotFound` for an unknown id,
    /// `IllegalTransition` when `can_stop` is false, or `Termination` when
    /// the worker survives the kill window.
    pub async fn stop(&self, id: &str) -> Result<Session> {
        let _guard = self.admission(id)?;

        let session = self.registry.get(id).await?;
        if !session.can_stop() {
            return Err(AppError::IllegalTransition(format!(
                "session {id} cannot stop from {}",
                session.status.as_str()
            )));
        }

        self.registry
            .transition(
                id,
                &[SessionStatus::Running, SessionStatus::Stopping],
                SessionStatus::Stopping,
            )
            .await?;

        self.supervisor.terminate(id, self.grace).await?;

        let session = self.registry.get(id).await?;
        info!(session_id = id, status = session.status.as_str(), "session stopped");
        Ok(session)
    }

    /// Session snapshots with the derived `can_start`/`can_stop` flags,
    /// ordered by creation time.
    pub async fn list(&self) -> Vec<SessionView> {
        self.registry
            .list()
            .await
            .iter()
            .map(SessionView::from)
            .collect()
    }

    /// One session snapshot.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown id.
    pub async fn get(&self, id: &str) -> Result<Session> {
        self.registry.get(id).await
    }

    /// Full ordered log history for a session.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown id.
    pub async fn logs(&self, id: &str) -> Result<Vec<LogEntry>> {
        self.registry.get(id).await?;
        self.hub.history(id)
    }

    /// Subscribe to a session's live log stream.
    ///
    /// Returns the session snapshot (so the caller can tell whether the
    /// stream is already over), the history emitted before attachment, and
    /// the live receiver for everything after it — no duplicates, no gaps.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown id.
    pub async fn subscribe(
        &self,
        id: &str,
    ) -> Result<(Session, Vec<LogEntry>, broadcast::Receiver<LogEvent>)> {
        let session = self.registry.get(id).await?;
        let (history, rx) = self.hub.subscribe(id)?;
        Ok((session, history, rx))
    }

    /// Grace period used between stop request and forced kill.
    #[must_use]
    pub fn grace(&self) -> Duration {
        self.grace
    }

    pub(crate) fn supervisor(&self) -> &Arc<WorkerSupervisor> {
        &self.supervisor
    }

    pub(crate) fn sequential_slot(&self) -> Duration {
        self.sequential_slot
    }

    /// Drive the provisioning collaborator and record its verdict.
    async fn run_provisioning(&self, session: &Session) {
        let result = self
            .provisioner
            .provision(&session.id, &session.user, &session.profile_path)
            .await;

        match result {
            Ok(()) => {
                if let Err(err) = self
                    .registry
                    .transition(
                        &session.id,
                        &[SessionStatus::Provisioning],
                        SessionStatus::Created,
                    )
                    .await
                {
                    // An operator finalize beat us to it; nothing to do.
                    warn!(session_id = %session.id, %err, "provisioning result superseded");
                }
            }
            Err(err) => {
                warn!(session_id = %session.id, %err, "provisioning failed");
                if let Err(err) = self
                    .registry
                    .transition(
                        &session.id,
                        &[SessionStatus::Provisioning],
                        SessionStatus::Error,
                    )
                    .await
                {
                    warn!(session_id = %session.id, %err, "provisioning failure superseded");
                }
            }
        }
    }

    /// Acquire the per-session mutual-exclusion token, failing fast.
    fn admission(&self, id: &str) -> Result<OwnedMutexGuard<()>> {
        let token = {
            let mut tokens = self
                .tokens
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            Arc::clone(
                tokens
                    .entry(id.to_owned())
                    .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
            )
        };
        token.try_lock_owned().map_err(|_| {
            AppError::Busy(format!("another operation on session {id} is in flight"))
        })
    }
}

/// Validate a user identifier: an email-looking string or a phone number.
fn validate_identifier(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AppError::Invalid("user identifier must not be empty".into()));
    }

    if let Some((local, domain)) = trimmed.split_once('@') {
        if local.is_empty() || domain.is_empty() || !domain.contains('.') {
            return Err(AppError::Invalid(format!(
                "'{trimmed}' is not a valid email address"
            )));
        }
        return Ok(trimmed.to_owned());
    }

    let digits = trimmed.strip_prefix('+').unwrap_or(trimmed);
    if digits.len() >= 7 && digits.chars().all(|c| c.is_ascii_digit()) {
        return Ok(trimmed.to_owned());
    }

    Err(AppError::Invalid(format!(
        "'{trimmed}' is neither an email address nor a phone number"
    )))
}
