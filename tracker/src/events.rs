//! Push frames understood by the tracker and their typed interpretation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use util::ws::EventEnvelope;

use crate::types::Submission;

pub const SUBMISSION_CREATED: &str = "submission.created";
pub const SUBMISSION_RESULT: &str = "submission.result";
pub const SUBMISSION_FAILED: &str = "submission.failed";
pub const BUILD_ETA: &str = "build.eta";

/// Payload of the three submission lifecycle events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionEventPayload {
    pub submission: Submission,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EtaPayload {
    pub eta_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    /// A new submission exists and no result has arrived yet.
    Created,
    /// The result for the submission arrived.
    ResultReceived,
    /// The submission could not be built.
    Failed,
}

/// One timestamped observation about a participation's submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionUpdate {
    pub kind: UpdateKind,
    pub submission: Submission,
    pub at: DateTime<Utc>,
    pub eta_ms: Option<u64>,
}

impl SubmissionUpdate {
    /// Interprets a REST snapshot of the latest pending submission.
    pub fn from_pending_snapshot(submission: Submission) -> Self {
        let kind = if submission.build_failed {
            UpdateKind::Failed
        } else {
            UpdateKind::Created
        };
        Self {
            kind,
            at: submission.submission_date,
            submission,
            eta_ms: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushEvent {
    Submission(SubmissionUpdate),
    Eta { eta_ms: u64 },
    Ignored { event: String },
}

/// Parses a raw text frame into a [`PushEvent`].
pub fn parse_frame(raw: &str) -> Result<PushEvent, serde_json::Error> {
    let env: EventEnvelope<serde_json::Value> = serde_json::from_str(raw)?;

    let kind = match env.event.as_str() {
        SUBMISSION_CREATED => UpdateKind::Created,
        SUBMISSION_RESULT => UpdateKind::ResultReceived,
        SUBMISSION_FAILED => UpdateKind::Failed,
        BUILD_ETA => {
            let payload: EtaPayload = serde_json::from_value(env.payload)?;
            return Ok(PushEvent::Eta {
                eta_ms: payload.eta_ms,
            });
        }
        _ => {
            return Ok(match env.payload.get("etaMs").and_then(|v| v.as_u64()) {
                Some(eta_ms) => PushEvent::Eta { eta_ms },
                None => PushEvent::Ignored { event: env.event },
            });
        }
    };

    let payload: SubmissionEventPayload = serde_json::from_value(env.payload)?;
    Ok(PushEvent::Submission(SubmissionUpdate {
        kind,
        submission: payload.submission,
        at: env.ts,
        eta_ms: payload.eta_ms,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SubmissionType;

    fn frame(event: &str, payload: serde_json::Value) -> String {
        serde_json::json!({
            "type": "event",
            "event": event,
            "topic": "participation:42.submissions",
            "payload": payload,
            "ts": "2026-03-01T10:00:03Z",
        })
        .to_string()
    }

    fn submission_json() -> serde_json::Value {
        serde_json::json!({
            "id": 7,
            "participationId": 42,
            "submissionType": "MANUAL",
            "submissionDate": "2026-03-01T10:00:00Z"
        })
    }

    #[test]
    fn parses_lifecycle_events() {
        let raw = frame(
            SUBMISSION_CREATED,
            serde_json::json!({ "submission": submission_json(), "etaMs": 9000 }),
        );
        let PushEvent::Submission(update) = parse_frame(&raw).unwrap() else {
            panic!("expected a submission update");
        };
        assert_eq!(update.kind, UpdateKind::Created);
        assert_eq!(update.submission.id, 7);
        assert_eq!(update.eta_ms, Some(9000));
        assert_eq!(update.at.to_rfc3339(), "2026-03-01T10:00:03+00:00");

        let raw = frame(SUBMISSION_FAILED, serde_json::json!({ "submission": submission_json() }));
        assert!(matches!(
            parse_frame(&raw).unwrap(),
            PushEvent::Submission(SubmissionUpdate { kind: UpdateKind::Failed, .. })
        ));
    }

    #[test]
    fn eta_is_read_from_dedicated_and_foreign_events() {
        let raw = frame(BUILD_ETA, serde_json::json!({ "etaMs": 4200 }));
        assert!(matches!(
            parse_frame(&raw).unwrap(),
            PushEvent::Eta { eta_ms: 4200 }
        ));

        let raw = frame("queue.changed", serde_json::json!({ "etaMs": 100 }));
        assert!(matches!(parse_frame(&raw).unwrap(), PushEvent::Eta { eta_ms: 100 }));

        let raw = frame("queue.changed", serde_json::json!({}));
        assert_eq!(
            parse_frame(&raw).unwrap(),
            PushEvent::Ignored {
                event: "queue.changed".into()
            }
        );
    }

    #[test]
    fn malformed_frames_are_errors() {
        assert!(parse_frame("not json").is_err());
        let raw = frame(SUBMISSION_RESULT, serde_json::json!({ "nope": true }));
        assert!(parse_frame(&raw).is_err());
    }

    #[test]
    fn snapshot_of_failed_build_becomes_failed_update() {
        let submission = Submission {
            id: 3,
            participation_id: 1,
            submission_type: SubmissionType::Manual,
            commit_hash: None,
            submission_date: Utc::now(),
            build_failed: true,
        };
        let update = SubmissionUpdate::from_pending_snapshot(submission.clone());
        assert_eq!(update.kind, UpdateKind::Failed);
        assert_eq!(update.at, submission.submission_date);
    }
}
