use crate::types::{ExerciseId, ParticipationId};

/// Push topics the tracker listens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PushTopic {
    /// Submission lifecycle of one participation.
    Participation { participation_id: ParticipationId },
    /// Exercise-wide signals, e.g. build ETA.
    Exercise { exercise_id: ExerciseId },
}

impl PushTopic {
    pub fn path(&self) -> String {
        match *self {
            PushTopic::Participation { participation_id } => {
                format!("participation:{participation_id}.submissions")
            }
            PushTopic::Exercise { exercise_id } => format!("exercise:{exercise_id}.submissions"),
        }
    }
}

pub fn participation_topic(participation_id: ParticipationId) -> String {
    PushTopic::Participation { participation_id }.path()
}

pub fn exercise_topic(exercise_id: ExerciseId) -> String {
    PushTopic::Exercise { exercise_id }.path()
}
