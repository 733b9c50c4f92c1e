//! Worker process spawner.
//!
//! Spawns the external automation worker bound to one session's profile:
//! - `kill_on_drop(true)` so orphaned processes are cleaned up.
//! - `env_clear()` + a safe variable allowlist so server secrets never leak
//!   into the child's environment.
//! - The session binding travels both ways: `FLEET_SESSION_ID` /
//!   `FLEET_PROFILE_DIR` in the environment and `--session` / `--profile`
//!   as trailing CLI arguments.

use tokio::process::{Child, ChildStderr, ChildStdout, Command};

use crate::config::WorkerConfig;
use crate::models::session::Session;
use crate::{AppError, Result};

/// Environment variables inherited by spawned worker processes.
///
/// Everything else is stripped via `env_clear()` before launch. `DISPLAY`
/// and the X authority are kept because workers drive a browser that may
/// render into the virtual display.
pub const ALLOWED_ENV_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "LANG",
    "RUST_LOG",
    "DISPLAY",
    "XAUTHORITY",
    // Windows-specific variables.
    "USERPROFILE",
    "SystemRoot",
    "TEMP",
    "TMP",
    "USERNAME",
    "APPDATA",
    "LOCALAPPDATA",
    "COMSPEC",
];

/// A freshly spawned worker with its output pipes detached for reading.
#[derive(Debug)]
pub struct SpawnedWorker {
    /// Child process handle — kept alive so `kill_on_drop` works.
    pub child: Child,
    /// Worker stdout; attached to the log hub by the supervisor.
    pub stdout: ChildStdout,
    /// Worker stderr; attached to the log hub by the supervisor.
    pub stderr: ChildStderr,
}

/// Spawn the configured worker command bound to `session`'s profile.
///
/// # Errors
///
/// Returns `AppError::Launch` if the profile directory is missing or the
/// OS refuses to start the process.
pub fn spawn_worker(config: &WorkerConfig, session: &Session) -> Result<SpawnedWorker> {
    if !session.profile_path.is_dir() {
        return Err(AppError::Launch(format!(
            "profile directory {} does not exist",
            session.profile_path.display()
        )));
    }

    let mut cmd = Command::new(&config.command);
    for arg in &config.args {
        cmd.arg(arg);
    }
    cmd.arg("--session")
        .arg(&session.id)
        .arg("--profile")
        .arg(&session.profile_path);

    // Strip inherited environment, then inject only the safe allowlist.
    cmd.env_clear();
    for &key in ALLOWED_ENV_VARS {
        if let Ok(val) = std::env::var(key) {
            cmd.env(key, val);
        }
    }
    cmd.env("FLEET_SESSION_ID", &session.id);
    cmd.env("FLEET_PROFILE_DIR", &session.profile_path);

    cmd.stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|err| AppError::Launch(format!("failed to spawn worker: {err}")))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Launch("failed to capture worker stdout".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AppError::Launch("failed to capture worker stderr".into()))?;

    Ok(SpawnedWorker {
        child,
        stdout,
        stderr,
    })
}
