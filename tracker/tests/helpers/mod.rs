#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Notify, broadcast, watch};
use tracker::api::{ParticipationDirectory, SubmissionApi};
use tracker::channel::MessageChannel;
use tracker::events::{SUBMISSION_CREATED, SubmissionEventPayload};
use tracker::topics::participation_topic;
use tracker::{
    ApiError, ChannelError, ExerciseId, ParticipationId, Submission, SubmissionId, SubmissionState,
    SubmissionType, TrackedSubmission,
};
use util::ws::{ConnectionState, TopicHub, emit_at};

pub const WAIT: Duration = Duration::from_secs(2);

pub fn submission(id: SubmissionId, participation_id: ParticipationId) -> Submission {
    Submission {
        id,
        participation_id,
        submission_type: SubmissionType::Manual,
        commit_hash: Some(format!("c0ffee{id}")),
        submission_date: Utc::now(),
        build_failed: false,
    }
}

pub fn lock_limit_error() -> ApiError {
    ApiError::Server {
        status: 400,
        error_key: Some(ApiError::LOCK_LIMIT_REACHED.into()),
        message: "error.lockedSubmissionsLimitReached".into(),
    }
}

/// Pushes a lifecycle event for `submission` on its participation topic.
pub async fn push(
    hub: &TopicHub,
    event: &str,
    submission: &Submission,
    eta_ms: Option<u64>,
    ts: DateTime<Utc>,
) {
    let payload = SubmissionEventPayload {
        submission: submission.clone(),
        eta_ms,
    };
    emit_at(
        hub,
        &participation_topic(submission.participation_id),
        event,
        &payload,
        ts,
    )
    .await;
}

pub async fn wait_for_state(
    rx: &mut watch::Receiver<TrackedSubmission>,
    state: SubmissionState,
) -> TrackedSubmission {
    tokio::time::timeout(WAIT, rx.wait_for(|t| t.state == state))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {state:?}"))
        .expect("store dropped")
        .clone()
}

pub async fn wait_for_subscriptions(hub: &TopicHub, topic: &str, expected: usize) {
    let met = util::test_helpers::eventually(WAIT, || async {
        hub.subscription_count(topic).await == expected
    })
    .await;
    assert!(met, "'{topic}' never reached {expected} subscriptions");
}

#[derive(Default)]
pub struct FakeState {
    pub participations: HashMap<ExerciseId, Vec<ParticipationId>>,
    pub directory_error: Option<ApiError>,
    pub directory_calls: usize,
    pub pending: HashMap<ParticipationId, Submission>,
    pub snapshot_calls: usize,
    pub single_triggers: Vec<(ParticipationId, SubmissionType)>,
    pub bulk_triggers: Vec<(ExerciseId, Vec<ParticipationId>)>,
    pub trigger_error: Option<ApiError>,
    pub unassessed: VecDeque<Submission>,
    pub lock_error: Option<ApiError>,
    pub lock_calls: usize,
    pub cancelled: Vec<SubmissionId>,
    next_submission_id: SubmissionId,
}

/// In-memory REST collaborator. With a hub attached, accepted triggers are answered
/// by a "submission created" push, the way the server reacts to a queued build.
#[derive(Default)]
pub struct FakeApi {
    hub: Option<TopicHub>,
    lock_gate: Option<Arc<Notify>>,
    state: Mutex<FakeState>,
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pushing_to(hub: TopicHub) -> Self {
        Self {
            hub: Some(hub),
            ..Self::default()
        }
    }

    /// Lock requests wait for `gate.notify_one()` before answering.
    pub fn with_lock_gate(mut self, gate: Arc<Notify>) -> Self {
        self.lock_gate = Some(gate);
        self
    }

    pub fn with_participations(self, exercise_id: ExerciseId, ids: Vec<ParticipationId>) -> Self {
        self.state().participations.insert(exercise_id, ids);
        self
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    async fn announce(&self, participation_ids: &[ParticipationId]) {
        let Some(hub) = &self.hub else {
            return;
        };
        let created: Vec<Submission> = {
            let mut state = self.state();
            participation_ids
                .iter()
                .map(|pid| {
                    state.next_submission_id += 1;
                    submission(10_000 + state.next_submission_id, *pid)
                })
                .collect()
        };
        for s in &created {
            push(hub, SUBMISSION_CREATED, s, Some(30_000), Utc::now()).await;
        }
    }

    async fn gate(&self) {
        if let Some(gate) = &self.lock_gate {
            gate.notified().await;
        }
    }
}

#[async_trait]
impl SubmissionApi for FakeApi {
    async fn latest_pending_submission(
        &self,
        participation_id: ParticipationId,
    ) -> Result<Option<Submission>, ApiError> {
        let mut state = self.state();
        state.snapshot_calls += 1;
        Ok(state.pending.get(&participation_id).cloned())
    }

    async fn trigger_build(
        &self,
        participation_id: ParticipationId,
        submission_type: SubmissionType,
    ) -> Result<(), ApiError> {
        {
            let mut state = self.state();
            state.single_triggers.push((participation_id, submission_type));
            if let Some(e) = state.trigger_error.clone() {
                return Err(e);
            }
        }
        self.announce(&[participation_id]).await;
        Ok(())
    }

    async fn trigger_builds(
        &self,
        exercise_id: ExerciseId,
        participation_ids: &[ParticipationId],
    ) -> Result<(), ApiError> {
        {
            let mut state = self.state();
            state
                .bulk_triggers
                .push((exercise_id, participation_ids.to_vec()));
            if let Some(e) = state.trigger_error.clone() {
                return Err(e);
            }
        }
        self.announce(participation_ids).await;
        Ok(())
    }

    async fn lock_next_unassessed(
        &self,
        _exercise_id: ExerciseId,
        _correction_round: u8,
    ) -> Result<Option<Submission>, ApiError> {
        self.gate().await;
        let mut state = self.state();
        state.lock_calls += 1;
        if let Some(e) = state.lock_error.clone() {
            return Err(e);
        }
        Ok(state.unassessed.pop_front())
    }

    async fn lock_participation(
        &self,
        participation_id: ParticipationId,
        _correction_round: u8,
    ) -> Result<Submission, ApiError> {
        self.gate().await;
        let mut state = self.state();
        state.lock_calls += 1;
        if let Some(e) = state.lock_error.clone() {
            return Err(e);
        }
        Ok(submission(1_000 + participation_id, participation_id))
    }

    async fn cancel_assessment(&self, submission_id: SubmissionId) -> Result<(), ApiError> {
        self.state().cancelled.push(submission_id);
        Ok(())
    }
}

#[async_trait]
impl ParticipationDirectory for FakeApi {
    async fn participations_of(
        &self,
        exercise_id: ExerciseId,
    ) -> Result<Vec<ParticipationId>, ApiError> {
        let mut state = self.state();
        state.directory_calls += 1;
        if let Some(e) = state.directory_error.clone() {
            return Err(e);
        }
        Ok(state
            .participations
            .get(&exercise_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// Push channel over a hub whose first subscription to one topic never completes.
pub struct StallingChannel {
    hub: TopicHub,
    stall_on: Mutex<Option<String>>,
}

impl StallingChannel {
    pub fn new(hub: TopicHub, topic: &str) -> Self {
        Self {
            hub,
            stall_on: Mutex::new(Some(topic.to_string())),
        }
    }
}

#[async_trait]
impl MessageChannel for StallingChannel {
    async fn subscribe(
        &self,
        topic: &str,
    ) -> Result<broadcast::Receiver<String>, ChannelError> {
        let stall = {
            let mut stall_on = self.stall_on.lock().unwrap();
            if stall_on.as_deref() == Some(topic) {
                *stall_on = None;
                true
            } else {
                false
            }
        };
        if stall {
            std::future::pending::<()>().await;
        }
        MessageChannel::subscribe(&self.hub, topic).await
    }

    async fn unsubscribe(&self, topic: &str) {
        MessageChannel::unsubscribe(&self.hub, topic).await
    }

    fn connection(&self) -> watch::Receiver<ConnectionState> {
        self.hub.connection()
    }
}
