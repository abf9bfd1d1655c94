use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type ParticipationId = i64;
pub type ExerciseId = i64;
pub type SubmissionId = i64;

/// Why a build was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmissionType {
    Manual,
    Instructor,
    Test,
    Other,
}

impl SubmissionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionType::Manual => "MANUAL",
            SubmissionType::Instructor => "INSTRUCTOR",
            SubmissionType::Test => "TEST",
            SubmissionType::Other => "OTHER",
        }
    }
}

/// A programming submission as the server reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub id: SubmissionId,
    pub participation_id: ParticipationId,
    pub submission_type: SubmissionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_hash: Option<String>,
    pub submission_date: DateTime<Utc>,
    #[serde(default)]
    pub build_failed: bool,
}

/// The client's interpretation of where a participation's latest submission stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionState {
    NoPendingSubmission,
    PendingSubmissionBuilding,
    PendingSubmissionFailed,
}

/// Last-known submission of a participation with its derived state.
///
/// `submission` is the most recent submission seen: the pending one while building or
/// failed, the one the latest result belongs to otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedSubmission {
    pub state: SubmissionState,
    pub submission: Option<Submission>,
    pub updated_at: DateTime<Utc>,
}

impl Default for TrackedSubmission {
    fn default() -> Self {
        Self {
            state: SubmissionState::NoPendingSubmission,
            submission: None,
            updated_at: DateTime::<Utc>::MIN_UTC,
        }
    }
}

impl TrackedSubmission {
    /// The submission still waiting for a result, if any.
    pub fn pending(&self) -> Option<&Submission> {
        match self.state {
            SubmissionState::NoPendingSubmission => None,
            _ => self.submission.as_ref(),
        }
    }

    pub fn is_building(&self) -> bool {
        self.state == SubmissionState::PendingSubmissionBuilding
    }
}
