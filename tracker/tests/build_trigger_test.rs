mod helpers;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use helpers::{FakeApi, push, submission, wait_for_state};
use tracker::events::{SUBMISSION_CREATED, SUBMISSION_FAILED};
use tracker::{
    ApiError, SubmissionState, SubmissionType, TrackerError, TrackerOptions, TrackerState,
};
use util::ws::TopicHub;

fn tracker(hub: &TopicHub, api: Arc<FakeApi>) -> TrackerState {
    TrackerState::new(
        Arc::new(hub.clone()),
        api,
        TrackerOptions {
            summary_debounce: Duration::from_millis(30),
            refresh_snapshots: false,
            ..TrackerOptions::default()
        },
    )
}

fn rejected() -> ApiError {
    ApiError::Server {
        status: 403,
        error_key: Some("notAllowed".into()),
        message: "no permission".into(),
    }
}

#[tokio::test]
async fn accepted_trigger_leaves_state_to_the_server() {
    let hub = TopicHub::new();
    let api = Arc::new(FakeApi::new());
    let state = tracker(&hub, api.clone());
    let _rx = state.store().track(1).await;

    state
        .builds()
        .trigger_build(1, SubmissionType::Instructor)
        .await
        .unwrap();
    assert_eq!(api.state().single_triggers, vec![(1, SubmissionType::Instructor)]);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(
        state.store().current(1).state,
        SubmissionState::NoPendingSubmission
    );
}

#[tokio::test]
async fn server_push_after_trigger_marks_building() {
    let hub = TopicHub::new();
    let api = Arc::new(FakeApi::pushing_to(hub.clone()));
    let state = tracker(&hub, api.clone());
    let mut rx = state.store().track(1).await;

    state
        .builds()
        .trigger_build(1, SubmissionType::Manual)
        .await
        .unwrap();
    let building = wait_for_state(&mut rx, SubmissionState::PendingSubmissionBuilding).await;
    assert_eq!(building.pending().map(|s| s.participation_id), Some(1));
}

#[tokio::test]
async fn rejected_trigger_is_returned_once() {
    let hub = TopicHub::new();
    let api = Arc::new(FakeApi::new());
    api.state().trigger_error = Some(rejected());
    let state = tracker(&hub, api.clone());

    let err = state
        .builds()
        .trigger_build(3, SubmissionType::Manual)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        TrackerError::Api(ApiError::Server { status: 403, .. })
    ));
    assert_eq!(api.state().single_triggers.len(), 1);
    assert_eq!(
        state.store().current(3).state,
        SubmissionState::NoPendingSubmission
    );
}

#[tokio::test]
async fn bulk_trigger_skips_participations_already_building() {
    let hub = TopicHub::new();
    let api = Arc::new(FakeApi::new());
    let state = tracker(&hub, api.clone());

    let mut rx = state.store().track(2).await;
    push(&hub, SUBMISSION_CREATED, &submission(20, 2), None, Utc::now()).await;
    wait_for_state(&mut rx, SubmissionState::PendingSubmissionBuilding).await;

    let bulk = state
        .builds()
        .trigger_bulk_for_exercise(7, &[3, 1, 2, 3])
        .await
        .unwrap();
    assert_eq!(bulk.triggered, vec![1, 3]);
    assert_eq!(bulk.skipped, vec![2]);
    assert_eq!(api.state().bulk_triggers, vec![(7, vec![1, 3])]);
}

#[tokio::test]
async fn bulk_trigger_with_nothing_to_do_makes_no_request() {
    let hub = TopicHub::new();
    let api = Arc::new(FakeApi::new());
    let state = tracker(&hub, api.clone());

    let mut rx = state.store().track(2).await;
    push(&hub, SUBMISSION_CREATED, &submission(20, 2), None, Utc::now()).await;
    wait_for_state(&mut rx, SubmissionState::PendingSubmissionBuilding).await;

    let bulk = state.builds().trigger_bulk_for_exercise(7, &[2]).await.unwrap();
    assert!(bulk.triggered.is_empty());
    assert!(api.state().bulk_triggers.is_empty());

    let bulk = state.builds().trigger_bulk_for_exercise(7, &[]).await.unwrap();
    assert_eq!(bulk, Default::default());
    assert!(api.state().bulk_triggers.is_empty());
}

#[tokio::test]
async fn failed_retrigger_sends_only_failed_participations() {
    let hub = TopicHub::new();
    let api = Arc::new(FakeApi::new().with_participations(7, vec![1, 2, 3]));
    let state = tracker(&hub, api.clone());

    let summary = state.aggregator().summary_for(7).await.unwrap();
    push(&hub, SUBMISSION_CREATED, &submission(10, 1), None, Utc::now()).await;
    push(&hub, SUBMISSION_FAILED, &submission(20, 2), None, Utc::now()).await;
    let settled = util::test_helpers::eventually(helpers::WAIT, || {
        let latest = summary.latest();
        async move { latest.counts.building == 1 && latest.counts.failed == 1 }
    })
    .await;
    assert!(settled);

    let bulk = state
        .builds()
        .trigger_bulk_for_failed_submissions(7)
        .await
        .unwrap();
    assert_eq!(bulk.triggered, vec![2]);
    assert_eq!(api.state().bulk_triggers, vec![(7, vec![2])]);
}

#[tokio::test]
async fn failed_bulk_is_surfaced_without_retry() {
    let hub = TopicHub::new();
    let api = Arc::new(FakeApi::new());
    api.state().trigger_error = Some(rejected());
    let state = tracker(&hub, api.clone());

    let err = state
        .builds()
        .trigger_bulk_for_exercise(7, &[1, 2])
        .await
        .unwrap_err();
    assert!(matches!(err, TrackerError::Api(_)));
    assert_eq!(api.state().bulk_triggers.len(), 1);
}

#[tokio::test]
async fn failed_retrigger_skips_a_rebuild_the_summary_has_not_caught_up_with() {
    let hub = TopicHub::new();
    let api = Arc::new(FakeApi::new().with_participations(7, vec![1, 2]));
    let state = TrackerState::new(
        Arc::new(hub.clone()),
        api.clone(),
        TrackerOptions {
            summary_debounce: Duration::from_secs(1),
            refresh_snapshots: false,
            ..TrackerOptions::default()
        },
    );

    let mut summary = state.aggregator().summary_for(7).await.unwrap();
    let t0 = Utc::now();
    push(&hub, SUBMISSION_FAILED, &submission(20, 2), None, t0).await;
    let emitted = tokio::time::timeout(helpers::WAIT, summary.changed())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(emitted.counts.failed, 1);

    let mut rx = state.store().track(2).await;
    push(
        &hub,
        SUBMISSION_CREATED,
        &submission(21, 2),
        None,
        t0 + chrono::Duration::seconds(1),
    )
    .await;
    wait_for_state(&mut rx, SubmissionState::PendingSubmissionBuilding).await;
    assert_eq!(summary.latest().counts.failed, 1);

    let bulk = state
        .builds()
        .trigger_bulk_for_failed_submissions(7)
        .await
        .unwrap();
    assert!(bulk.triggered.is_empty());
    assert!(api.state().bulk_triggers.is_empty());
}
