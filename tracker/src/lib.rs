//! Client-side tracking of programming-submission build state and manual-grading locks.
//!
//! The [`store::SubmissionStateStore`] keeps one push-driven state per participation,
//! the [`aggregator::ExerciseStateAggregator`] folds those into debounced per-exercise
//! summaries, [`builds::BuildTriggerCoordinator`] and [`locks::AssessmentLockCoordinator`]
//! drive the REST side, and [`eta::ResultEtaEstimator`] relays the server's ETA.

pub mod aggregator;
pub mod api;
pub mod builds;
pub mod channel;
pub mod error;
pub mod eta;
pub mod events;
pub mod http;
pub mod locks;
pub mod state;
pub mod store;
pub mod topics;
pub mod types;

pub use error::{ApiError, ChannelError, Result, TrackerError};
pub use state::{TrackerOptions, TrackerState};
pub use types::{
    ExerciseId, ParticipationId, Submission, SubmissionId, SubmissionState, SubmissionType,
    TrackedSubmission,
};
