//! REST collaborators the tracker depends on.

use async_trait::async_trait;

use crate::error::ApiError;
use crate::types::{ExerciseId, ParticipationId, Submission, SubmissionId, SubmissionType};

/// Build-trigger, snapshot and assessment-lock endpoints.
#[async_trait]
pub trait SubmissionApi: Send + Sync + 'static {
    /// Latest submission of the participation that has no result yet.
    async fn latest_pending_submission(
        &self,
        participation_id: ParticipationId,
    ) -> Result<Option<Submission>, ApiError>;

    async fn trigger_build(
        &self,
        participation_id: ParticipationId,
        submission_type: SubmissionType,
    ) -> Result<(), ApiError>;

    /// One request for any number of participations of an exercise.
    async fn trigger_builds(
        &self,
        exercise_id: ExerciseId,
        participation_ids: &[ParticipationId],
    ) -> Result<(), ApiError>;

    /// Server picks and locks an unassessed submission; `None` when none is left.
    async fn lock_next_unassessed(
        &self,
        exercise_id: ExerciseId,
        correction_round: u8,
    ) -> Result<Option<Submission>, ApiError>;

    /// Locks the latest submission of one participation.
    async fn lock_participation(
        &self,
        participation_id: ParticipationId,
        correction_round: u8,
    ) -> Result<Submission, ApiError>;

    async fn cancel_assessment(&self, submission_id: SubmissionId) -> Result<(), ApiError>;
}

/// Lists the participations belonging to an exercise.
#[async_trait]
pub trait ParticipationDirectory: Send + Sync + 'static {
    async fn participations_of(
        &self,
        exercise_id: ExerciseId,
    ) -> Result<Vec<ParticipationId>, ApiError>;
}
