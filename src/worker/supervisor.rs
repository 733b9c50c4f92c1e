//! Worker supervisor — owns the lifecycle of one worker process per session.
//!
//! `launch` binds a worker to a session's profile and attaches its output
//! to the log hub; `watch` starts the asynchronous exit monitor once the
//! registry has acknowledged the start; `terminate` requests graceful
//! shutdown and escalates to a forced kill after the grace period. Exit is
//! always observed asynchronously: the monitor reports the terminal outcome
//! to the registry through the same atomic `transition` primitive that
//! user-initiated calls use, so a notification racing an operator `stop`
//! simply has one of the two transitions rejected.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::future::join_all;
use tokio::process::Child;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::WorkerConfig;
use crate::logs::LogHub;
use crate::models::session::{Session, SessionStatus};
use crate::models::worker::{ExitOutcome, Termination};
use crate::registry::SessionRegistry;
use crate::worker::{reader, spawner};
use crate::{AppError, Result};

/// Book-keeping for one launched worker.
///
/// The entry outlives the process: after exit it stays latched with the
/// outcome until the next `launch` replaces it, so `await_exit` observes
/// runs that have already ended.
struct WorkerEntry {
    /// Present until `watch` hands the child to the exit monitor.
    child: Option<Child>,
    /// Present until `watch` hands the sender to the exit monitor.
    exit_tx: Option<watch::Sender<Option<ExitOutcome>>>,
    /// Reader tasks pumping the worker's pipes; present until `watch`.
    readers: Option<Vec<tokio::task::JoinHandle<()>>>,
    exit_rx: watch::Receiver<Option<ExitOutcome>>,
    pid: Option<u32>,
    stop_requested: Arc<AtomicBool>,
    kill: CancellationToken,
}

impl WorkerEntry {
    fn is_live(&self) -> bool {
        self.exit_rx.borrow().is_none()
    }
}

/// Supervisor for the fleet's worker processes, one per running session.
pub struct WorkerSupervisor {
    config: WorkerConfig,
    registry: Arc<SessionRegistry>,
    hub: Arc<LogHub>,
    workers: Mutex<HashMap<String, WorkerEntry>>,
    shutdown: CancellationToken,
}

impl WorkerSupervisor {
    /// Create a supervisor spawning workers per `config`, reporting exits
    /// into `registry` and log lines into `hub`.
    #[must_use]
    pub fn new(
        config: WorkerConfig,
        registry: Arc<SessionRegistry>,
        hub: Arc<LogHub>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            registry,
            hub,
            workers: Mutex::new(HashMap::new()),
            shutdown,
        }
    }

    /// Whether a live worker is currently bound to `session_id`.
    #[must_use]
    pub fn is_live(&self, session_id: &str) -> bool {
        let workers = self.lock();
        workers.get(session_id).is_some_and(WorkerEntry::is_live)
    }

    /// Launch a worker bound exclusively to `session`'s profile and attach
    /// its output pipes to the session's log stream.
    ///
    /// The exit monitor is not started here; call [`Self::watch`] once the
    /// registry has transitioned the session to `running`, or
    /// [`Self::abort`] if that transition is refused.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Launch` when a live worker is already bound to
    /// this session (one worker per profile), the profile directory is
    /// missing, or the process cannot be started.
    pub fn launch(&self, session: &Session) -> Result<()> {
        let mut workers = self.lock();

        if workers
            .get(&session.id)
            .is_some_and(WorkerEntry::is_live)
        {
            return Err(AppError::Launch(format!(
                "a worker is already bound to session {}",
                session.id
            )));
        }

        let spawned = spawner::spawn_worker(&self.config, session)?;
        let pid = spawned.child.id();

        self.hub.register(&session.id);
        let reader_cancel = self.shutdown.child_token();
        let readers = vec![
            tokio::spawn(reader::run_reader(
                session.id.clone(),
                spawned.stdout,
                Arc::clone(&self.hub),
                reader_cancel.clone(),
            )),
            tokio::spawn(reader::run_reader(
                session.id.clone(),
                spawned.stderr,
                Arc::clone(&self.hub),
                reader_cancel,
            )),
        ];

        let (exit_tx, exit_rx) = watch::channel(None);
        workers.insert(
            session.id.clone(),
            WorkerEntry {
                child: Some(spawned.child),
                exit_tx: Some(exit_tx),
                readers: Some(readers),
                exit_rx,
                pid,
                stop_requested: Arc::new(AtomicBool::new(false)),
                // Independent of the server shutdown token: a forced kill
                // is an explicit escalation, never a side effect of
                // cancelling the server.
                kill: CancellationToken::new(),
            },
        );

        info!(session_id = %session.id, ?pid, "worker launched");
        Ok(())
    }

    /// Start the exit monitor for a launched worker. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no worker was launched for
    /// `session_id`.
    pub fn watch(self: &Arc<Self>, session_id: &str) -> Result<()> {
        let (child, exit_tx, readers, stop_requested, kill) = {
            let mut workers = self.lock();
            let entry = workers.get_mut(session_id).ok_or_else(|| {
                AppError::NotFound(format!("no worker launched for session {session_id}"))
            })?;
            let Some(child) = entry.child.take() else {
                // Monitor already running.
                return Ok(());
            };
            let Some(exit_tx) = entry.exit_tx.take() else {
                return Ok(());
            };
            (
                child,
                exit_tx,
                entry.readers.take().unwrap_or_default(),
                Arc::clone(&entry.stop_requested),
                entry.kill.clone(),
            )
        };

        let supervisor = Arc::clone(self);
        let session_id = session_id.to_owned();
        tokio::spawn(async move {
            supervisor
                .monitor_exit(session_id, child, exit_tx, readers, stop_requested, kill)
                .await;
        });
        Ok(())
    }

    /// Discard a launched-but-unwatched worker, killing its process.
    ///
    /// Used when the registry refuses the `running` transition after a
    /// successful launch, so no orphan keeps the profile bound.
    pub fn abort(&self, session_id: &str) {
        let entry = {
            let mut workers = self.lock();
            workers.remove(session_id)
        };
        if let Some(mut entry) = entry {
            if let Some(mut child) = entry.child.take() {
                warn!(session_id, "aborting unwatched worker");
                tokio::spawn(async move {
                    if let Err(err) = child.kill().await {
                        warn!(%err, "failed to kill aborted worker");
                    }
                });
            }
        }
    }

    /// Request termination of a session's worker: graceful first, then a
    /// forced kill once `grace` elapses. Idempotent — terminating a worker
    /// that has already exited (or was never launched) returns
    /// `Terminated` without error. The call returns only after the exit
    /// monitor has confirmed the outcome.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Termination` if the worker survives the forced
    /// kill window.
    pub async fn terminate(&self, session_id: &str, grace: Duration) -> Result<Termination> {
        let (stop_requested, pid, kill, rx) = {
            let workers = self.lock();
            let Some(entry) = workers.get(session_id) else {
                return Ok(Termination::Terminated);
            };
            if !entry.is_live() {
                return Ok(Termination::Terminated);
            }
            (
                Arc::clone(&entry.stop_requested),
                entry.pid,
                entry.kill.clone(),
                entry.exit_rx.clone(),
            )
        };

        // Flag first so the exit monitor classifies the death as a kill.
        stop_requested.store(true, Ordering::SeqCst);

        #[cfg(unix)]
        if let Some(pid) = pid {
            send_sigterm(session_id, pid);
        }
        #[cfg(not(unix))]
        let _ = pid;

        if wait_exited(rx.clone(), grace).await {
            return Ok(Termination::Terminated);
        }

        warn!(
            session_id,
            grace_secs = grace.as_secs(),
            "worker ignored graceful shutdown, forcing kill"
        );
        kill.cancel();

        if wait_exited(rx, grace).await {
            Ok(Termination::ForcedKill)
        } else {
            Err(AppError::Termination(format!(
                "worker for session {session_id} survived forced kill"
            )))
        }
    }

    /// Wait until the current (or latest) worker run for `session_id` has a
    /// terminal outcome.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no worker was ever launched for the
    /// session, or `AppError::Termination` if the exit monitor vanished
    /// without reporting.
    pub async fn await_exit(&self, session_id: &str) -> Result<ExitOutcome> {
        let mut rx = {
            let workers = self.lock();
            let entry = workers.get(session_id).ok_or_else(|| {
                AppError::NotFound(format!("no worker launched for session {session_id}"))
            })?;
            entry.exit_rx.clone()
        };

        let waited = rx.wait_for(Option::is_some).await.map(|o| *o);
        let latched = match waited {
            Ok(outcome) => outcome,
            Err(_) => *rx.borrow(),
        };
        latched.ok_or_else(|| {
            AppError::Termination(format!(
                "exit monitor for session {session_id} dropped without reporting"
            ))
        })
    }

    /// Terminate every live worker concurrently. Used on server shutdown.
    pub async fn shutdown_all(&self, grace: Duration) {
        let live: Vec<String> = {
            let workers = self.lock();
            workers
                .iter()
                .filter(|(_, entry)| entry.is_live())
                .map(|(id, _)| id.clone())
                .collect()
        };

        join_all(live.iter().map(|id| async move {
            if let Err(err) = self.terminate(id, grace).await {
                warn!(session_id = %id, %err, "shutdown termination failed");
            }
        }))
        .await;
    }

    /// Await the child's exit, classify it, report it to the registry, and
    /// publish the stream-end marker.
    async fn monitor_exit(
        &self,
        session_id: String,
        mut child: Child,
        exit_tx: watch::Sender<Option<ExitOutcome>>,
        readers: Vec<tokio::task::JoinHandle<()>>,
        stop_requested: Arc<AtomicBool>,
        kill: CancellationToken,
    ) {
        let wait_result = tokio::select! {
            result = child.wait() => result,
            () = kill.cancelled() => {
                if let Err(err) = child.start_kill() {
                    warn!(session_id, %err, "forced kill failed");
                }
                child.wait().await
            }
        };

        // Let the readers drain the pipes to EOF before the terminal state
        // and the stream-end marker become visible; a subscriber must never
        // see the end of the stream ahead of the final log lines. Bounded:
        // a grandchild holding the pipe open must not stall the report.
        for handle in readers {
            if tokio::time::timeout(READER_DRAIN_TIMEOUT, handle)
                .await
                .is_err()
            {
                warn!(session_id, "worker pipe still open after exit, not draining further");
            }
        }

        let outcome = match &wait_result {
            _ if stop_requested.load(Ordering::SeqCst) => ExitOutcome::Killed,
            Ok(status) if status.success() => ExitOutcome::Clean,
            Ok(_) => ExitOutcome::Crashed,
            Err(err) => {
                warn!(session_id, %err, "error waiting for worker process");
                ExitOutcome::Crashed
            }
        };

        info!(
            session_id,
            outcome = outcome.as_str(),
            exit = ?wait_result.as_ref().ok().and_then(std::process::ExitStatus::code),
            "worker exited"
        );

        let transition = match outcome {
            ExitOutcome::Killed => {
                self.registry
                    .transition(&session_id, &[SessionStatus::Stopping], SessionStatus::Stopped)
                    .await
            }
            ExitOutcome::Clean => {
                self.notify_terminal(&session_id, SessionStatus::Finished)
                    .await
            }
            ExitOutcome::Crashed => {
                self.notify_terminal(&session_id, SessionStatus::Error).await
            }
        };
        if let Err(err) = transition {
            warn!(session_id, %err, "exit notification rejected by registry");
        }

        let _ = exit_tx.send(Some(outcome));
        self.hub.end(&session_id, outcome);
    }

    /// Report a natural exit. When an operator stop raced the exit and
    /// already moved the session to `stopping`, fall back to confirming
    /// the stop instead.
    async fn notify_terminal(&self, session_id: &str, terminal: SessionStatus) -> Result<Session> {
        match self
            .registry
            .transition(session_id, &[SessionStatus::Running], terminal)
            .await
        {
            Err(AppError::IllegalTransition(_)) => {
                debug!(
                    session_id,
                    "stop request raced natural exit; confirming stop"
                );
                self.registry
                    .transition(session_id, &[SessionStatus::Stopping], SessionStatus::Stopped)
                    .await
            }
            other => other,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, WorkerEntry>> {
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Upper bound on waiting for reader tasks after the worker exited.
const READER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Wait up to `dur` for the exit monitor to latch an outcome.
async fn wait_exited(mut rx: watch::Receiver<Option<ExitOutcome>>, dur: Duration) -> bool {
    let outcome = tokio::time::timeout(dur, rx.wait_for(Option::is_some))
        .await
        .map(|r| r.is_ok());
    match outcome {
        Ok(true) => true,
        Ok(false) => rx.borrow().is_some(),
        Err(_) => false,
    }
}

#[cfg(unix)]
fn send_sigterm(session_id: &str, pid: u32) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    match i32::try_from(pid) {
        Ok(raw) => {
            if let Err(err) = kill(Pid::from_raw(raw), Signal::SIGTERM) {
                warn!(session_id, pid, %err, "failed to send SIGTERM");
            }
        }
        Err(_) => warn!(session_id, pid, "pid out of range for SIGTERM"),
    }
}
