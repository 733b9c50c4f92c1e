//! Worker process outcome types.

use serde::{Deserialize, Serialize};

/// Terminal outcome of one worker process run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExitOutcome {
    /// Worker exited with code zero; work complete.
    Clean,
    /// Worker exited nonzero or died on a signal without a stop request.
    Crashed,
    /// Worker terminated after an operator-issued stop request.
    Killed,
}

impl ExitOutcome {
    /// Stable lowercase name, used in log markers and API payloads.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Clean => "clean",
            Self::Crashed => "crashed",
            Self::Killed => "killed",
        }
    }
}

/// Result of a termination request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// Worker exited within the grace period (or had already exited).
    Terminated,
    /// Worker ignored the graceful request and was force-killed.
    ForcedKill,
}
