//! Shared fixtures for orchestrator integration tests.
//!
//! Builds the full component stack against a temp directory, a scripted
//! provisioner, and `sh -c` workers so lifecycle behaviour can be driven
//! with real processes.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use session_fleet::config::WorkerConfig;
use session_fleet::logs::LogHub;
use session_fleet::models::session::{Session, SessionStatus};
use session_fleet::orchestrator::SessionOrchestrator;
use session_fleet::persistence::{db, session_repo::SessionRepo};
use session_fleet::provision::Provisioner;
use session_fleet::registry::SessionRegistry;
use session_fleet::worker::supervisor::WorkerSupervisor;
use session_fleet::{AppError, Result};

/// Scripted provisioning behaviours.
#[derive(Debug, Clone, Copy)]
pub enum ProvisionScript {
    /// Create the profile directory and succeed immediately.
    Succeed,
    /// Fail immediately, as an abandoned or failed manual login.
    Fail,
    /// Never resolve, as a login the operator has not completed yet.
    Hang,
}

/// Test double for the manual-login collaborator.
pub struct ScriptedProvisioner {
    script: ProvisionScript,
}

impl Provisioner for ScriptedProvisioner {
    fn provision(
        &self,
        _session_id: &str,
        _user: &str,
        profile_dir: &Path,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let script = self.script;
        let dir = profile_dir.to_owned();
        Box::pin(async move {
            match script {
                ProvisionScript::Succeed => {
                    tokio::fs::create_dir_all(&dir)
                        .await
                        .map_err(|err| AppError::Provisioning(err.to_string()))?;
                    Ok(())
                }
                ProvisionScript::Fail => {
                    Err(AppError::Provisioning("scripted login failure".into()))
                }
                ProvisionScript::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(())
                }
            }
        })
    }
}

/// Fully wired orchestrator stack over a temp directory.
pub struct Fixture {
    pub orchestrator: Arc<SessionOrchestrator>,
    pub registry: Arc<SessionRegistry>,
    pub supervisor: Arc<WorkerSupervisor>,
    pub hub: Arc<LogHub>,
    pub shutdown: CancellationToken,
    _temp: tempfile::TempDir,
}

impl Fixture {
    /// Build the stack with a `sh -c` worker script and scripted
    /// provisioning. `grace`/`slot` are the stop-grace and sequential-slot
    /// budgets in seconds, kept short for tests.
    pub async fn new(worker_script: &str, provision: ProvisionScript, grace: u64, slot: u64) -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let pool = db::connect(&temp.path().join("sessions.db"))
            .await
            .expect("db connect");
        let repo = SessionRepo::new(pool);
        let registry = Arc::new(SessionRegistry::new(repo, temp.path().join("profiles")));

        let hub = Arc::new(LogHub::new(256));
        let shutdown = CancellationToken::new();
        let supervisor = Arc::new(WorkerSupervisor::new(
            WorkerConfig {
                command: "sh".into(),
                args: vec!["-c".into(), worker_script.into()],
            },
            Arc::clone(&registry),
            Arc::clone(&hub),
            shutdown.clone(),
        ));

        let orchestrator = Arc::new(SessionOrchestrator::new(
            Arc::clone(&registry),
            Arc::clone(&supervisor),
            Arc::clone(&hub),
            Arc::new(ScriptedProvisioner { script: provision }),
            Duration::from_secs(grace),
            Duration::from_secs(slot),
        ));

        Self {
            orchestrator,
            registry,
            supervisor,
            hub,
            shutdown,
            _temp: temp,
        }
    }

    /// Create a session and wait until provisioning completed.
    pub async fn create_ready(&self, user: &str) -> Session {
        let session = self.orchestrator.create(user).await.expect("create");
        self.wait_for_status(&session.id, SessionStatus::Created, Duration::from_secs(5))
            .await
    }

    /// Poll until the session reaches `status` or the deadline passes.
    pub async fn wait_for_status(
        &self,
        id: &str,
        status: SessionStatus,
        timeout: Duration,
    ) -> Session {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let session = self.orchestrator.get(id).await.expect("get session");
            if session.status == status {
                return session;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "session {id} stuck in {:?} waiting for {status:?}",
                session.status
            );
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }
}

/// Worker script that runs long enough to be stopped explicitly.
pub const LONG_WORKER: &str = "sleep 30";

/// Worker script that completes quickly and cleanly.
pub const QUICK_WORKER: &str = "sleep 0.2";

/// Worker script that crashes immediately.
pub const CRASHING_WORKER: &str = "exit 3";

/// Worker script that sleeps long only when the profile carries a `slow`
/// marker file; used to make one session of a fleet misbehave.
pub const MARKER_WORKER: &str =
    r#"if [ -f "$FLEET_PROFILE_DIR/slow" ]; then sleep 30; else sleep 0.2; fi"#;

/// Worker script emitting five numbered lines over half a second.
pub const CHATTY_WORKER: &str =
    r#"for i in 1 2 3 4 5; do echo "line $i"; sleep 0.1; done"#;
