//! Unit tests for the session registry and its atomic transition primitive.

use std::sync::Arc;

use session_fleet::models::session::SessionStatus;
use session_fleet::persistence::{db, session_repo::SessionRepo};
use session_fleet::registry::SessionRegistry;
use session_fleet::AppError;

async fn registry_fixture() -> (Arc<SessionRegistry>, SessionRepo, tempfile::TempDir) {
    let temp = tempfile::tempdir().expect("tempdir");
    let pool = db::connect(&temp.path().join("sessions.db"))
        .await
        .expect("db connect");
    let repo = SessionRepo::new(pool);
    let registry = Arc::new(SessionRegistry::new(
        repo.clone(),
        temp.path().join("profiles"),
    ));
    (registry, repo, temp)
}

#[tokio::test]
async fn create_enters_provisioning_invalid() {
    let (registry, _, _temp) = registry_fixture().await;

    let session = registry.create("buyer@example.com").await.expect("create");
    assert_eq!(session.status, SessionStatus::Provisioning);
    assert!(!session.valid);
    assert!(session
        .profile_path
        .to_string_lossy()
        .contains("profile_buyer_example_com"));
}

#[tokio::test]
async fn get_unknown_session_is_not_found() {
    let (registry, _, _temp) = registry_fixture().await;
    assert!(matches!(
        registry.get("missing").await,
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn list_orders_by_creation() {
    let (registry, _, _temp) = registry_fixture().await;

    let a = registry.create("a@example.com").await.expect("create a");
    let b = registry.create("b@example.com").await.expect("create b");
    let c = registry.create("c@example.com").await.expect("create c");

    let ids: Vec<String> = registry.list().await.into_iter().map(|s| s.id).collect();
    assert_eq!(ids, [a.id, b.id, c.id]);
}

#[tokio::test]
async fn provisioning_success_sets_valid() {
    let (registry, _, _temp) = registry_fixture().await;
    let session = registry.create("buyer@example.com").await.expect("create");

    let updated = registry
        .transition(
            &session.id,
            &[SessionStatus::Provisioning],
            SessionStatus::Created,
        )
        .await
        .expect("transition");

    assert_eq!(updated.status, SessionStatus::Created);
    assert!(updated.valid);
}

#[tokio::test]
async fn provisioning_failure_clears_valid() {
    let (registry, _, _temp) = registry_fixture().await;
    let session = registry.create("buyer@example.com").await.expect("create");

    let updated = registry
        .transition(
            &session.id,
            &[SessionStatus::Provisioning],
            SessionStatus::Error,
        )
        .await
        .expect("transition");

    assert_eq!(updated.status, SessionStatus::Error);
    assert!(!updated.valid);
}

#[tokio::test]
async fn expected_set_mismatch_is_rejected_without_side_effects() {
    let (registry, _, _temp) = registry_fixture().await;
    let session = registry.create("buyer@example.com").await.expect("create");

    let result = registry
        .transition(&session.id, &[SessionStatus::Running], SessionStatus::Error)
        .await;
    assert!(matches!(result, Err(AppError::IllegalTransition(_))));

    let current = registry.get(&session.id).await.expect("get");
    assert_eq!(current.status, SessionStatus::Provisioning);
}

#[tokio::test]
async fn illegal_edge_is_rejected_even_when_expected_matches() {
    let (registry, _, _temp) = registry_fixture().await;
    let session = registry.create("buyer@example.com").await.expect("create");
    registry
        .transition(
            &session.id,
            &[SessionStatus::Provisioning],
            SessionStatus::Created,
        )
        .await
        .expect("to created");

    // Created -> Stopped is not an edge of the state machine.
    let result = registry
        .transition(&session.id, &[SessionStatus::Created], SessionStatus::Stopped)
        .await;
    assert!(matches!(result, Err(AppError::IllegalTransition(_))));
}

#[tokio::test]
async fn racing_transitions_settle_exactly_one_winner() {
    let (registry, _, _temp) = registry_fixture().await;
    let session = registry.create("buyer@example.com").await.expect("create");
    registry
        .transition(
            &session.id,
            &[SessionStatus::Provisioning],
            SessionStatus::Created,
        )
        .await
        .expect("to created");
    registry
        .transition(&session.id, &[SessionStatus::Created], SessionStatus::Running)
        .await
        .expect("to running");

    // A stop request and an exit notification race from Running.
    let stop = registry.transition(
        &session.id,
        &[SessionStatus::Running],
        SessionStatus::Stopping,
    );
    let exit = registry.transition(
        &session.id,
        &[SessionStatus::Running],
        SessionStatus::Finished,
    );
    let (stop_result, exit_result) = tokio::join!(stop, exit);

    assert_eq!(
        u8::from(stop_result.is_ok()) + u8::from(exit_result.is_ok()),
        1,
        "exactly one racing transition must win"
    );
}

#[tokio::test]
async fn touch_last_used_bumps_timestamp() {
    let (registry, _, _temp) = registry_fixture().await;
    let session = registry.create("buyer@example.com").await.expect("create");

    let touched = registry.touch_last_used(&session.id).await.expect("touch");
    assert!(touched.last_used >= session.last_used);
}

#[tokio::test]
async fn metadata_and_state_survive_reload() {
    let (registry, repo, _temp) = registry_fixture().await;
    let session = registry.create("buyer@example.com").await.expect("create");
    registry
        .transition(
            &session.id,
            &[SessionStatus::Provisioning],
            SessionStatus::Created,
        )
        .await
        .expect("to created");
    registry
        .set_metadata(&session.id, serde_json::json!({ "otp_channel": "sms" }))
        .await
        .expect("metadata");

    let reloaded = SessionRegistry::new(repo, _temp.path().join("profiles"));
    reloaded.load().await.expect("load");

    let restored = reloaded.get(&session.id).await.expect("get");
    assert_eq!(restored.status, SessionStatus::Created);
    assert!(restored.valid);
    assert_eq!(
        restored.metadata,
        Some(serde_json::json!({ "otp_channel": "sms" }))
    );
}

#[tokio::test]
async fn stranded_rows_downgrade_on_load() {
    let (registry, repo, _temp) = registry_fixture().await;

    let running = registry.create("run@example.com").await.expect("create");
    registry
        .transition(
            &running.id,
            &[SessionStatus::Provisioning],
            SessionStatus::Created,
        )
        .await
        .expect("to created");
    registry
        .transition(&running.id, &[SessionStatus::Created], SessionStatus::Running)
        .await
        .expect("to running");

    let stuck = registry.create("stuck@example.com").await.expect("create");

    let reloaded = SessionRegistry::new(repo, _temp.path().join("profiles"));
    reloaded.load().await.expect("load");

    let was_running = reloaded.get(&running.id).await.expect("get");
    assert_eq!(was_running.status, SessionStatus::Error);
    assert!(was_running.valid, "profile is intact, session restartable");

    let was_provisioning = reloaded.get(&stuck.id).await.expect("get");
    assert_eq!(was_provisioning.status, SessionStatus::Error);
    assert!(!was_provisioning.valid, "login never completed");
}
