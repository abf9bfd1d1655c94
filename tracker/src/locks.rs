//! Manual-grading locks.
//!
//! The server is the only lock authority. A lock exists here only after the server
//! confirmed it, and it disappears when cancelled or when the assessment was submitted.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::api::SubmissionApi;
use crate::error::{ApiError, Result, TrackerError};
use crate::types::{ExerciseId, ParticipationId, Submission, SubmissionId};

/// What a lock request is aimed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockTarget {
    NextUnassessed {
        exercise_id: ExerciseId,
        correction_round: u8,
    },
    Participation {
        participation_id: ParticipationId,
        correction_round: u8,
    },
}

impl LockTarget {
    pub fn correction_round(&self) -> u8 {
        match *self {
            LockTarget::NextUnassessed {
                correction_round, ..
            }
            | LockTarget::Participation {
                correction_round, ..
            } => correction_round,
        }
    }
}

impl fmt::Display for LockTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockTarget::NextUnassessed {
                exercise_id,
                correction_round,
            } => write!(
                f,
                "next unassessed submission of exercise {exercise_id} (round {correction_round})"
            ),
            LockTarget::Participation {
                participation_id,
                correction_round,
            } => write!(
                f,
                "participation {participation_id} (round {correction_round})"
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Unlocked,
    LockRequested,
    Locked,
}

/// A server-confirmed claim on one submission for one correction round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssessmentLock {
    pub submission_id: SubmissionId,
    pub participation_id: ParticipationId,
    pub correction_round: u8,
    pub acquired_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockOutcome {
    Locked(AssessmentLock),
    /// Every submission of the exercise is assessed or locked by someone else.
    NothingToAssess,
    /// The grader holds as many locks as the server allows. Stop offering grading.
    LockLimitReached,
}

impl LockOutcome {
    pub const LOCK_LIMIT_MESSAGE_KEY: &'static str = "assessment.lockedSubmissionsLimitReached";
    pub const NOTHING_TO_ASSESS_MESSAGE_KEY: &'static str = "assessment.noSubmissionLeft";

    /// Translation key of the message the UI shows instead of the grading view.
    pub fn message_key(&self) -> Option<&'static str> {
        match self {
            LockOutcome::Locked(_) => None,
            LockOutcome::NothingToAssess => Some(Self::NOTHING_TO_ASSESS_MESSAGE_KEY),
            LockOutcome::LockLimitReached => Some(Self::LOCK_LIMIT_MESSAGE_KEY),
        }
    }

    pub fn lock(&self) -> Option<&AssessmentLock> {
        match self {
            LockOutcome::Locked(lock) => Some(lock),
            _ => None,
        }
    }
}

#[derive(Default)]
struct LockTable {
    requested: HashSet<LockTarget>,
    held: HashMap<(SubmissionId, u8), AssessmentLock>,
}

fn table(table: &Mutex<LockTable>) -> MutexGuard<'_, LockTable> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Clears the `LockRequested` mark even if the request future is dropped.
struct PendingRequest<'a> {
    table: &'a Mutex<LockTable>,
    target: LockTarget,
}

impl Drop for PendingRequest<'_> {
    fn drop(&mut self) {
        table(self.table).requested.remove(&self.target);
    }
}

#[derive(Clone)]
pub struct AssessmentLockCoordinator {
    api: Arc<dyn SubmissionApi>,
    table: Arc<Mutex<LockTable>>,
}

impl AssessmentLockCoordinator {
    pub fn new(api: Arc<dyn SubmissionApi>) -> Self {
        Self {
            api,
            table: Arc::new(Mutex::new(LockTable::default())),
        }
    }

    /// Lets the server pick and lock one unassessed submission of the exercise.
    pub async fn lock_next_unassessed_submission(
        &self,
        exercise_id: ExerciseId,
        correction_round: u8,
    ) -> Result<LockOutcome> {
        let target = LockTarget::NextUnassessed {
            exercise_id,
            correction_round,
        };
        self.request(
            target,
            self.api.lock_next_unassessed(exercise_id, correction_round),
        )
        .await
    }

    /// Locks the latest submission of one participation, e.g. when opened from a link.
    pub async fn lock_specific_participation(
        &self,
        participation_id: ParticipationId,
        correction_round: u8,
    ) -> Result<LockOutcome> {
        let target = LockTarget::Participation {
            participation_id,
            correction_round,
        };
        let api = Arc::clone(&self.api);
        self.request(target, async move {
            api.lock_participation(participation_id, correction_round)
                .await
                .map(Some)
        })
        .await
    }

    async fn request<F>(&self, target: LockTarget, call: F) -> Result<LockOutcome>
    where
        F: Future<Output = std::result::Result<Option<Submission>, ApiError>>,
    {
        if !table(&self.table).requested.insert(target) {
            return Err(TrackerError::LockRequestInFlight(target.to_string()));
        }
        let pending = PendingRequest {
            table: &self.table,
            target,
        };
        let response = call.await;
        drop(pending);

        match response {
            Ok(Some(submission)) => {
                let lock = AssessmentLock {
                    submission_id: submission.id,
                    participation_id: submission.participation_id,
                    correction_round: target.correction_round(),
                    acquired_at: Utc::now(),
                };
                table(&self.table)
                    .held
                    .insert((lock.submission_id, lock.correction_round), lock.clone());
                info!("Locked submission {} for {target}", lock.submission_id);
                Ok(LockOutcome::Locked(lock))
            }
            Ok(None) => {
                info!("No submission left to lock for {target}");
                Ok(LockOutcome::NothingToAssess)
            }
            Err(e) if e.is_lock_limit_reached() => {
                info!("Lock limit reached while locking {target}");
                Ok(LockOutcome::LockLimitReached)
            }
            Err(e) => {
                warn!("Locking {target} failed: {e}");
                Err(e.into())
            }
        }
    }

    /// Releases a held lock without an assessment. Does nothing when no lock is held.
    pub async fn cancel_lock(&self, submission_id: SubmissionId) -> Result<()> {
        if !self.holds_lock(submission_id) {
            debug!("No lock held on submission {submission_id}; nothing to cancel");
            return Ok(());
        }
        if let Err(e) = self.api.cancel_assessment(submission_id).await {
            warn!("Cancelling the lock on submission {submission_id} failed: {e}");
            return Err(e.into());
        }
        table(&self.table)
            .held
            .retain(|(sid, _), _| *sid != submission_id);
        info!("Released lock on submission {submission_id}");
        Ok(())
    }

    /// Forgets the lock after the assessment was submitted; the server released it.
    pub fn assessment_submitted(&self, submission_id: SubmissionId) -> bool {
        let mut t = table(&self.table);
        let before = t.held.len();
        t.held.retain(|(sid, _), _| *sid != submission_id);
        before != t.held.len()
    }

    /// Whether grading affordances may be shown for the submission.
    pub fn holds_lock(&self, submission_id: SubmissionId) -> bool {
        table(&self.table)
            .held
            .keys()
            .any(|(sid, _)| *sid == submission_id)
    }

    pub fn state(&self, target: LockTarget) -> LockState {
        let t = table(&self.table);
        if t.requested.contains(&target) {
            return LockState::LockRequested;
        }
        let locked = match target {
            LockTarget::NextUnassessed { .. } => false,
            LockTarget::Participation {
                participation_id,
                correction_round,
            } => t.held.values().any(|lock| {
                lock.participation_id == participation_id
                    && lock.correction_round == correction_round
            }),
        };
        if locked {
            LockState::Locked
        } else {
            LockState::Unlocked
        }
    }

    pub fn state_for_participation(
        &self,
        participation_id: ParticipationId,
        correction_round: u8,
    ) -> LockState {
        self.state(LockTarget::Participation {
            participation_id,
            correction_round,
        })
    }

    pub fn held_locks(&self) -> Vec<AssessmentLock> {
        let mut locks: Vec<_> = table(&self.table).held.values().cloned().collect();
        locks.sort_by_key(|l| (l.submission_id, l.correction_round));
        locks
    }
}
