//! Batch execution modes: parallel fan-out and ordered sequential runs.

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::models::worker::ExitOutcome;
use crate::AppError;

use super::SessionOrchestrator;

/// One session's failure inside a batch result partition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct BatchFailure {
    /// Session the failure belongs to.
    pub session_id: String,
    /// Machine-readable error kind.
    pub kind: String,
    /// Human-readable error message.
    pub message: String,
}

impl BatchFailure {
    fn new(session_id: String, err: &AppError) -> Self {
        Self {
            session_id,
            kind: err.kind().to_owned(),
            message: err.to_string(),
        }
    }
}

/// Partition returned by [`SessionOrchestrator::start_all`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct StartAllReport {
    /// Sessions whose workers launched.
    pub started: Vec<String>,
    /// Sessions that failed, with their errors.
    pub failed: Vec<BatchFailure>,
}

/// Partition returned by [`SessionOrchestrator::stop_all`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct StopAllReport {
    /// Sessions confirmed stopped.
    pub stopped: Vec<String>,
    /// Sessions that failed, with their errors.
    pub failed: Vec<BatchFailure>,
}

/// How one sequential-mode slot ended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "result")]
pub enum SlotDisposition {
    /// The session reached a terminal state within its slot.
    Completed {
        /// The worker's terminal outcome.
        outcome: ExitOutcome,
    },
    /// The session could not be started or awaited.
    Failed {
        /// Machine-readable error kind.
        kind: String,
        /// Human-readable error message.
        message: String,
    },
    /// The slot budget elapsed; the session keeps running and the queue
    /// advanced.
    TimedOut,
    /// Admission was cancelled before this slot started.
    Skipped,
}

/// One slot of a sequential run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SequentialSlot {
    /// Session the slot ran.
    pub session_id: String,
    /// How the slot ended.
    pub disposition: SlotDisposition,
}

/// Full report of a sequential run, one slot per admitted session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SequentialReport {
    /// Slots in admission order.
    pub slots: Vec<SequentialSlot>,
}

impl SessionOrchestrator {
    /// Start every startable session concurrently.
    ///
    /// Sessions are independent resources: one failure never blocks or
    /// rolls back the others. The partition is the whole result; there is
    /// no cross-session ordering guarantee.
    pub async fn start_all(&self) -> StartAllReport {
        let candidates: Vec<String> = self
            .list()
            .await
            .into_iter()
            .filter(|view| view.can_start)
            .map(|view| view.id)
            .collect();

        let results = join_all(candidates.into_iter().map(|id| async move {
            let result = self.start(&id).await;
            (id, result)
        }))
        .await;

        let mut report = StartAllReport {
            started: Vec::new(),
            failed: Vec::new(),
        };
        for (id, result) in results {
            match result {
                Ok(_) => report.started.push(id),
                Err(err) => {
                    warn!(session_id = %id, %err, "start-all: session failed");
                    report.failed.push(BatchFailure::new(id, &err));
                }
            }
        }
        info!(
            started = report.started.len(),
            failed = report.failed.len(),
            "start-all complete"
        );
        report
    }

    /// Stop every stoppable session concurrently.
    pub async fn stop_all(&self) -> StopAllReport {
        let candidates: Vec<String> = self
            .list()
            .await
            .into_iter()
            .filter(|view| view.can_stop)
            .map(|view| view.id)
            .collect();

        let results = join_all(candidates.into_iter().map(|id| async move {
            let result = self.stop(&id).await;
            (id, result)
        }))
        .await;

        let mut report = StopAllReport {
            stopped: Vec::new(),
            failed: Vec::new(),
        };
        for (id, result) in results {
            match result {
                Ok(_) => report.stopped.push(id),
                Err(err) => {
                    warn!(session_id = %id, %err, "stop-all: session failed");
                    report.failed.push(BatchFailure::new(id, &err));
                }
            }
        }
        info!(
            stopped = report.stopped.len(),
            failed = report.failed.len(),
            "stop-all complete"
        );
        report
    }

    /// Run every startable session one at a time, ordered by creation time.
    ///
    /// Each slot starts its session and waits for a terminal state or the
    /// configured slot budget, then the queue advances regardless of the
    /// slot's outcome. Serial execution exists for targets that rate-limit
    /// or fingerprint concurrent sessions from one network egress.
    ///
    /// Cancelling `cancel` stops admitting new slots; the session already
    /// running in its slot is never killed by cancellation.
    pub async fn start_sequential(&self, cancel: CancellationToken) -> SequentialReport {
        let candidates: Vec<String> = self
            .list()
            .await
            .into_iter()
            .filter(|view| view.can_start)
            .map(|view| view.id)
            .collect();

        let mut slots = Vec::with_capacity(candidates.len());
        for id in candidates {
            if cancel.is_cancelled() {
                slots.push(SequentialSlot {
                    session_id: id,
                    disposition: SlotDisposition::Skipped,
                });
                continue;
            }

            let disposition = self.run_slot(&id).await;
            slots.push(SequentialSlot {
                session_id: id,
                disposition,
            });
        }

        info!(slots = slots.len(), "sequential run complete");
        SequentialReport { slots }
    }

    /// Start one session and wait out its slot.
    async fn run_slot(&self, id: &str) -> SlotDisposition {
        if let Err(err) = self.start(id).await {
            warn!(session_id = id, %err, "sequential: start failed, advancing");
            return SlotDisposition::Failed {
                kind: err.kind().to_owned(),
                message: err.to_string(),
            };
        }

        match tokio::time::timeout(self.sequential_slot(), self.supervisor().await_exit(id)).await
        {
            Ok(Ok(outcome)) => SlotDisposition::Completed { outcome },
            Ok(Err(err)) => {
                warn!(session_id = id, %err, "sequential: exit wait failed, advancing");
                SlotDisposition::Failed {
                    kind: err.kind().to_owned(),
                    message: err.to_string(),
                }
            }
            Err(_elapsed) => {
                warn!(
                    session_id = id,
                    "sequential: slot budget elapsed, session left running"
                );
                SlotDisposition::TimedOut
            }
        }
    }
}
