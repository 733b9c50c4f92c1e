//! Manual-login provisioning collaborator.
//!
//! Provisioning is the one-time flow that prepares a session's browser
//! profile: a bootstrap process opens the target site's login page in a
//! virtual display and the operator completes the login by hand. The
//! orchestrator only consumes the narrow [`Provisioner`] contract; success
//! means the profile directory exists and holds usable login material.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::time::Duration;

use tokio::process::Command;
use tracing::{info, warn};

use crate::config::ProvisionConfig;
use crate::worker::spawner::ALLOWED_ENV_VARS;
use crate::{AppError, Result};

/// Asynchronous provisioning contract consumed by the orchestrator.
pub trait Provisioner: Send + Sync {
    /// Prepare the profile at `profile_dir` for `user`.
    ///
    /// Must guarantee the directory exists and is usable before resolving
    /// successfully.
    ///
    /// # Errors
    ///
    /// Resolves to [`AppError::Provisioning`] when the flow fails or is
    /// abandoned; that outcome is terminal for the creation attempt.
    fn provision(
        &self,
        session_id: &str,
        user: &str,
        profile_dir: &Path,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Process-backed provisioner launching the configured login bootstrap.
pub struct ProcessProvisioner {
    config: ProvisionConfig,
    timeout: Duration,
}

impl ProcessProvisioner {
    /// Create a provisioner from configuration.
    #[must_use]
    pub fn new(config: ProvisionConfig, timeout: Duration) -> Self {
        Self { config, timeout }
    }

    async fn run(&self, session_id: String, user: String, profile_dir: std::path::PathBuf) -> Result<()> {
        tokio::fs::create_dir_all(&profile_dir)
            .await
            .map_err(|err| {
                AppError::Provisioning(format!("cannot create profile directory: {err}"))
            })?;

        let mut cmd = Command::new(&self.config.command);
        for arg in &self.config.args {
            cmd.arg(arg);
        }
        cmd.arg("--session")
            .arg(&session_id)
            .arg("--user")
            .arg(&user)
            .arg("--profile")
            .arg(&profile_dir);

        cmd.env_clear();
        for &key in ALLOWED_ENV_VARS {
            if let Ok(val) = std::env::var(key) {
                cmd.env(key, val);
            }
        }
        cmd.env("FLEET_SESSION_ID", &session_id);
        cmd.env("FLEET_PROFILE_DIR", &profile_dir);

        cmd.stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|err| {
            AppError::Provisioning(format!("failed to spawn login bootstrap: {err}"))
        })?;

        let status = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(err)) => {
                return Err(AppError::Provisioning(format!(
                    "failed waiting for login bootstrap: {err}"
                )));
            }
            Err(_elapsed) => {
                warn!(session_id, "manual login not completed in time, abandoning");
                if let Err(err) = child.kill().await {
                    warn!(session_id, %err, "failed to kill login bootstrap");
                }
                return Err(AppError::Provisioning(format!(
                    "manual login abandoned after {:?}",
                    self.timeout
                )));
            }
        };

        if !status.success() {
            return Err(AppError::Provisioning(format!(
                "login bootstrap exited with {status}"
            )));
        }
        if !profile_dir.is_dir() {
            return Err(AppError::Provisioning(
                "login bootstrap succeeded but left no profile directory".into(),
            ));
        }

        info!(session_id, user, "manual login completed, profile saved");
        Ok(())
    }
}

impl Provisioner for ProcessProvisioner {
    fn provision(
        &self,
        session_id: &str,
        user: &str,
        profile_dir: &Path,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let session_id = session_id.to_owned();
        let user = user.to_owned();
        let profile_dir = profile_dir.to_owned();
        Box::pin(self.run(session_id, user, profile_dir))
    }
}
