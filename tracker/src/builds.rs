//! Build triggers.
//!
//! A trigger never touches the tracked state. A participation shows as building only
//! once the server pushes "submission created", because only the server knows whether
//! the request was actually queued.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::aggregator::ExerciseStateAggregator;
use crate::api::SubmissionApi;
use crate::error::Result;
use crate::store::SubmissionStateSource;
use crate::types::{ExerciseId, ParticipationId, SubmissionState, SubmissionType};

/// What a bulk trigger did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkTrigger {
    /// Sent to the server in one request.
    pub triggered: Vec<ParticipationId>,
    /// Left alone because they were already building.
    pub skipped: Vec<ParticipationId>,
}

#[derive(Clone)]
pub struct BuildTriggerCoordinator {
    api: Arc<dyn SubmissionApi>,
    source: Arc<dyn SubmissionStateSource>,
    aggregator: ExerciseStateAggregator,
}

impl BuildTriggerCoordinator {
    pub fn new(
        api: Arc<dyn SubmissionApi>,
        source: Arc<dyn SubmissionStateSource>,
        aggregator: ExerciseStateAggregator,
    ) -> Self {
        Self {
            api,
            source,
            aggregator,
        }
    }

    /// Asks the server to build the participation's latest commit. Rejections are
    /// returned as-is; nothing is retried.
    pub async fn trigger_build(
        &self,
        participation_id: ParticipationId,
        submission_type: SubmissionType,
    ) -> Result<()> {
        if let Err(e) = self
            .api
            .trigger_build(participation_id, submission_type)
            .await
        {
            warn!("Build trigger for participation {participation_id} rejected: {e}");
            return Err(e.into());
        }
        info!(
            "Build trigger ({}) for participation {participation_id} accepted",
            submission_type.as_str()
        );
        Ok(())
    }

    /// Triggers every listed participation that is not already building, in one request.
    pub async fn trigger_bulk_for_exercise(
        &self,
        exercise_id: ExerciseId,
        participation_ids: &[ParticipationId],
    ) -> Result<BulkTrigger> {
        let mut ids = participation_ids.to_vec();
        ids.sort_unstable();
        ids.dedup();

        let (skipped, triggered): (Vec<_>, Vec<_>) = ids
            .into_iter()
            .partition(|pid| self.source.current(*pid).is_building());
        self.issue_bulk(exercise_id, triggered, skipped).await
    }

    /// Re-triggers exactly the participations that are failed right now.
    ///
    /// The participation set comes from the exercise summary, but each state is read
    /// from the store in one pass, since a live summary may lag by a debounce window.
    pub async fn trigger_bulk_for_failed_submissions(
        &self,
        exercise_id: ExerciseId,
    ) -> Result<BulkTrigger> {
        let snapshot = self.aggregator.current_summary(exercise_id).await?;
        let failed: Vec<_> = snapshot
            .submissions
            .keys()
            .copied()
            .filter(|pid| {
                self.source.current(*pid).state == SubmissionState::PendingSubmissionFailed
            })
            .collect();
        self.issue_bulk(exercise_id, failed, Vec::new()).await
    }

    async fn issue_bulk(
        &self,
        exercise_id: ExerciseId,
        triggered: Vec<ParticipationId>,
        skipped: Vec<ParticipationId>,
    ) -> Result<BulkTrigger> {
        if triggered.is_empty() {
            debug!("Nothing to trigger for exercise {exercise_id}");
            return Ok(BulkTrigger { triggered, skipped });
        }

        if let Err(e) = self.api.trigger_builds(exercise_id, &triggered).await {
            warn!(
                "Bulk trigger of {} participations in exercise {exercise_id} rejected: {e}",
                triggered.len()
            );
            return Err(e.into());
        }
        info!(
            "Triggered {} builds in exercise {exercise_id} ({} already building)",
            triggered.len(),
            skipped.len()
        );
        Ok(BulkTrigger { triggered, skipped })
    }
}
