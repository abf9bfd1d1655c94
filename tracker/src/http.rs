//! `reqwest` implementation of the REST collaborators.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use util::config::AppConfig;

use crate::api::{ParticipationDirectory, SubmissionApi};
use crate::error::ApiError;
use crate::types::{ExerciseId, ParticipationId, Submission, SubmissionId, SubmissionType};

/// Error body the server sends with non-2xx responses.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    error_key: Option<String>,
    message: Option<String>,
    title: Option<String>,
}

#[derive(Clone)]
pub struct HttpSubmissionApi {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpSubmissionApi {
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, ApiError> {
        Self::new(
            config.api_base_url.clone(),
            config.api_token.clone(),
            Duration::from_secs(config.api_timeout_secs),
        )
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}/{}", self.base_url, path));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(builder: RequestBuilder) -> Result<Response, ApiError> {
        let response = builder.send().await?;
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status().as_u16();
        let raw = response
            .text()
            .await
            .map_err(|e| ApiError::Transport(format!("reading the error body failed: {e}")))?;
        let (error_key, message) = match serde_json::from_str::<ErrorBody>(&raw) {
            Ok(body) => (body.error_key, body.message.or(body.title)),
            Err(_) => (None, None),
        };
        Err(ApiError::Server {
            status,
            error_key,
            message: message.unwrap_or(raw),
        })
    }

    /// Decodes a JSON body; an empty body or `null` yields `None`.
    async fn optional_json<T: DeserializeOwned>(response: Response) -> Result<Option<T>, ApiError> {
        let bytes = response.bytes().await?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        serde_json::from_slice::<Option<T>>(&bytes).map_err(|e| ApiError::Decode(e.to_string()))
    }
}

#[async_trait]
impl SubmissionApi for HttpSubmissionApi {
    async fn latest_pending_submission(
        &self,
        participation_id: ParticipationId,
    ) -> Result<Option<Submission>, ApiError> {
        let path = format!(
            "programming-exercise-participations/{participation_id}/latest-pending-submission"
        );
        let response = Self::send(self.request(Method::GET, &path)).await?;
        Self::optional_json(response).await
    }

    async fn trigger_build(
        &self,
        participation_id: ParticipationId,
        submission_type: SubmissionType,
    ) -> Result<(), ApiError> {
        let path = format!("programming-submissions/{participation_id}/trigger-build");
        Self::send(
            self.request(Method::POST, &path)
                .query(&[("submissionType", submission_type.as_str())]),
        )
        .await?;
        Ok(())
    }

    async fn trigger_builds(
        &self,
        exercise_id: ExerciseId,
        participation_ids: &[ParticipationId],
    ) -> Result<(), ApiError> {
        let path = format!("programming-exercises/{exercise_id}/trigger-instructor-build");
        Self::send(self.request(Method::POST, &path).json(participation_ids)).await?;
        Ok(())
    }

    async fn lock_next_unassessed(
        &self,
        exercise_id: ExerciseId,
        correction_round: u8,
    ) -> Result<Option<Submission>, ApiError> {
        let path = format!("exercises/{exercise_id}/programming-submission-without-assessment");
        let round = correction_round.to_string();
        let response = Self::send(
            self.request(Method::GET, &path)
                .query(&[("lock", "true"), ("correction-round", round.as_str())]),
        )
        .await?;
        Self::optional_json(response).await
    }

    async fn lock_participation(
        &self,
        participation_id: ParticipationId,
        correction_round: u8,
    ) -> Result<Submission, ApiError> {
        let path = format!("programming-submissions/{participation_id}/lock");
        let round = correction_round.to_string();
        let response = Self::send(
            self.request(Method::GET, &path)
                .query(&[("correction-round", round.as_str())]),
        )
        .await?;
        Self::optional_json(response)
            .await?
            .ok_or_else(|| ApiError::Decode("lock response carried no submission".into()))
    }

    async fn cancel_assessment(&self, submission_id: SubmissionId) -> Result<(), ApiError> {
        let path = format!("programming-submissions/{submission_id}/cancel-assessment");
        Self::send(self.request(Method::PUT, &path)).await?;
        Ok(())
    }
}

#[async_trait]
impl ParticipationDirectory for HttpSubmissionApi {
    async fn participations_of(
        &self,
        exercise_id: ExerciseId,
    ) -> Result<Vec<ParticipationId>, ApiError> {
        let path = format!("exercises/{exercise_id}/participations");
        let response = Self::send(self.request(Method::GET, &path)).await?;
        Ok(Self::optional_json(response).await?.unwrap_or_default())
    }
}
