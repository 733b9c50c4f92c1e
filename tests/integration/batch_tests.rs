//! Integration tests for the batch execution modes.

use session_fleet::models::session::SessionStatus;
use session_fleet::orchestrator::batch::SlotDisposition;
use session_fleet::models::worker::ExitOutcome;
use tokio_util::sync::CancellationToken;

use super::test_helpers::{Fixture, ProvisionScript, LONG_WORKER, MARKER_WORKER, QUICK_WORKER};

#[tokio::test]
async fn start_all_partitions_one_failure_from_the_rest() {
    let fixture = Fixture::new(LONG_WORKER, ProvisionScript::Succeed, 1, 5).await;
    let a = fixture.create_ready("a@example.com").await;
    let b = fixture.create_ready("b@example.com").await;
    let c = fixture.create_ready("c@example.com").await;

    // Sabotage exactly one session's profile so its launch fails.
    std::fs::remove_dir_all(&b.profile_path).expect("remove profile");

    let report = fixture.orchestrator.start_all().await;

    assert_eq!(report.started.len(), 2);
    assert!(report.started.contains(&a.id));
    assert!(report.started.contains(&c.id));

    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].session_id, b.id);
    assert_eq!(report.failed[0].kind, "launch");

    // The failure never blocked the others.
    for id in [&a.id, &c.id] {
        let session = fixture.orchestrator.get(id).await.expect("get");
        assert_eq!(session.status, SessionStatus::Running);
    }

    let _ = fixture.orchestrator.stop_all().await;
}

#[tokio::test]
async fn start_all_skips_sessions_that_cannot_start() {
    let fixture = Fixture::new(LONG_WORKER, ProvisionScript::Succeed, 1, 5).await;
    let ready = fixture.create_ready("ready@example.com").await;
    let running = fixture.create_ready("running@example.com").await;
    fixture
        .orchestrator
        .start(&running.id)
        .await
        .expect("pre-start");

    let report = fixture.orchestrator.start_all().await;

    assert_eq!(report.started, vec![ready.id]);
    assert!(report.failed.is_empty(), "running session is not a candidate");

    let _ = fixture.orchestrator.stop_all().await;
}

#[tokio::test]
async fn stop_all_stops_every_running_session() {
    let fixture = Fixture::new(LONG_WORKER, ProvisionScript::Succeed, 1, 5).await;
    for user in ["a@example.com", "b@example.com", "c@example.com"] {
        let session = fixture.create_ready(user).await;
        fixture.orchestrator.start(&session.id).await.expect("start");
    }

    let report = fixture.orchestrator.stop_all().await;
    assert_eq!(report.stopped.len(), 3);
    assert!(report.failed.is_empty());

    for view in fixture.orchestrator.list().await {
        assert_eq!(view.status, SessionStatus::Stopped);
    }
}

#[tokio::test]
async fn stop_all_with_nothing_running_is_empty() {
    let fixture = Fixture::new(LONG_WORKER, ProvisionScript::Succeed, 1, 5).await;
    fixture.create_ready("idle@example.com").await;

    let report = fixture.orchestrator.stop_all().await;
    assert!(report.stopped.is_empty());
    assert!(report.failed.is_empty());
}

#[tokio::test]
async fn sequential_times_out_one_slot_and_still_runs_the_rest() {
    // Slot budget of 2s; the marked session sleeps far past it.
    let fixture = Fixture::new(MARKER_WORKER, ProvisionScript::Succeed, 1, 2).await;
    let a = fixture.create_ready("a@example.com").await;
    let b = fixture.create_ready("b@example.com").await;
    let c = fixture.create_ready("c@example.com").await;

    std::fs::write(b.profile_path.join("slow"), b"1").expect("marker");

    let report = fixture
        .orchestrator
        .start_sequential(CancellationToken::new())
        .await;

    let ids: Vec<&str> = report.slots.iter().map(|s| s.session_id.as_str()).collect();
    assert_eq!(ids, [a.id.as_str(), b.id.as_str(), c.id.as_str()]);

    assert_eq!(
        report.slots[0].disposition,
        SlotDisposition::Completed {
            outcome: ExitOutcome::Clean
        }
    );
    assert_eq!(report.slots[1].disposition, SlotDisposition::TimedOut);
    assert_eq!(
        report.slots[2].disposition,
        SlotDisposition::Completed {
            outcome: ExitOutcome::Clean
        }
    );

    // The timed-out session was not killed by the queue advancing.
    let still_running = fixture.orchestrator.get(&b.id).await.expect("get");
    assert_eq!(still_running.status, SessionStatus::Running);

    let _ = fixture.orchestrator.stop_all().await;
}

#[tokio::test]
async fn sequential_runs_in_creation_order_one_at_a_time() {
    let fixture = Fixture::new(QUICK_WORKER, ProvisionScript::Succeed, 1, 5).await;
    let a = fixture.create_ready("a@example.com").await;
    let b = fixture.create_ready("b@example.com").await;

    let report = fixture
        .orchestrator
        .start_sequential(CancellationToken::new())
        .await;

    assert_eq!(report.slots.len(), 2);
    assert_eq!(report.slots[0].session_id, a.id);
    assert_eq!(report.slots[1].session_id, b.id);
    for slot in &report.slots {
        assert_eq!(
            slot.disposition,
            SlotDisposition::Completed {
                outcome: ExitOutcome::Clean
            }
        );
    }

    // B only started after A's slot ended.
    let a = fixture.orchestrator.get(&a.id).await.expect("get a");
    let b = fixture.orchestrator.get(&b.id).await.expect("get b");
    assert!(b.last_used >= a.last_used);
}

#[tokio::test]
async fn sequential_records_failures_and_continues() {
    let fixture = Fixture::new(QUICK_WORKER, ProvisionScript::Succeed, 1, 5).await;
    let a = fixture.create_ready("a@example.com").await;
    let b = fixture.create_ready("b@example.com").await;

    std::fs::remove_dir_all(&a.profile_path).expect("remove profile");

    let report = fixture
        .orchestrator
        .start_sequential(CancellationToken::new())
        .await;

    assert!(matches!(
        report.slots[0].disposition,
        SlotDisposition::Failed { ref kind, .. } if kind == "launch"
    ));
    assert_eq!(
        report.slots[1].disposition,
        SlotDisposition::Completed {
            outcome: ExitOutcome::Clean
        }
    );
    assert_eq!(report.slots[1].session_id, b.id);
}

#[tokio::test]
async fn sequential_cancellation_stops_admission() {
    let fixture = Fixture::new(QUICK_WORKER, ProvisionScript::Succeed, 1, 5).await;
    fixture.create_ready("a@example.com").await;
    fixture.create_ready("b@example.com").await;

    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = fixture.orchestrator.start_sequential(cancel).await;
    assert_eq!(report.slots.len(), 2);
    for slot in &report.slots {
        assert_eq!(slot.disposition, SlotDisposition::Skipped);
    }

    // Nothing was admitted, nothing runs.
    for view in fixture.orchestrator.list().await {
        assert_eq!(view.status, SessionStatus::Created);
    }
}
