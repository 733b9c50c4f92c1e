//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug, Clone)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Persistence failure when interacting with `SQLite`.
    Db(String),
    /// The state machine rejected a requested transition; the caller should
    /// reread the session status and retry against the new truth.
    IllegalTransition(String),
    /// Another operation on the same session is in flight; retry after
    /// backoff.
    Busy(String),
    /// Worker process could not be launched.
    Launch(String),
    /// Worker process could not be terminated.
    Termination(String),
    /// Manual-login provisioning failed; terminal for that creation attempt.
    Provisioning(String),
    /// Requested session does not exist.
    NotFound(String),
    /// Caller-supplied input failed validation.
    Invalid(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl AppError {
    /// Short machine-readable kind, used in structured API error payloads.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Db(_) => "db",
            Self::IllegalTransition(_) => "illegal_transition",
            Self::Busy(_) => "busy",
            Self::Launch(_) => "launch",
            Self::Termination(_) => "termination",
            Self::Provisioning(_) => "provisioning",
            Self::NotFound(_) => "not_found",
            Self::Invalid(_) => "invalid",
            Self::Io(_) => "io",
        }
    }

    /// Whether the caller may retry the same request without changing it.
    ///
    /// `IllegalTransition` is excluded: a retry is only meaningful after the
    /// caller has reread the session status.
    #[must_use]
    pub fn retryable(&self) -> bool {
        matches!(self, Self::Busy(_) | Self::Launch(_) | Self::Termination(_))
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Db(msg) => write!(f, "db: {msg}"),
            Self::IllegalTransition(msg) => write!(f, "illegal transition: {msg}"),
            Self::Busy(msg) => write!(f, "busy: {msg}"),
            Self::Launch(msg) => write!(f, "launch: {msg}"),
            Self::Termination(msg) => write!(f, "termination: {msg}"),
            Self::Provisioning(msg) => write!(f, "provisioning: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Invalid(msg) => write!(f, "invalid: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::Db(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
