//! The contract with the remote generation service.
//!
//! The service is opaque: jobs are submitted, polled until a terminal status
//! arrives, and optionally cancelled. Implementations adapt a concrete
//! transport (HTTP, gRPC, an in-process fake) to [`GenerationClient`]; the
//! orchestrator owns the polling cadence and never calls the service outside
//! this trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::job::settings::GenerationRequest;

/// The remote service's handle for a submitted job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExternalJobId(String);

impl ExternalJobId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ExternalJobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for ExternalJobId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl std::fmt::Display for ExternalJobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Failures talking to the generation service.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    #[error("generation service unreachable: {0}")]
    Connection(String),
    #[error("request to the generation service timed out")]
    Timeout,
    #[error("generation service rejected the request: {message}")]
    Rejected { message: String, retryable: bool },
    #[error("prompt rejected by content policy: {0}")]
    ContentPolicy(String),
    #[error("generation service does not know job {0}")]
    UnknownJob(ExternalJobId),
}

impl ApiError {
    /// Whether a later identical request could plausibly succeed.
    pub fn retryable(&self) -> bool {
        match self {
            Self::Connection(_) | Self::Timeout => true,
            Self::Rejected { retryable, .. } => *retryable,
            Self::ContentPolicy(_) | Self::UnknownJob(_) => false,
        }
    }
}

/// Whether a cancellation request took effect.
///
/// The service may refuse to cancel a job whose generation is past the point
/// of no return; the job then continues to a terminal state on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    Rejected,
}

/// Status reported by the generation service for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteStatus {
    Queued,
    Initializing,
    Generating,
    Processing,
    Finalizing,
    Uploading,
    Completed,
    Failed,
    Cancelled,
}

impl RemoteStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Failure detail attached to a terminal [`RemoteStatus::Failed`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    pub code: RemoteErrorCode,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteErrorCode {
    ContentPolicy,
    QuotaExceeded,
    Internal,
    Other(String),
}

impl RemoteErrorCode {
    pub fn retryable(&self) -> bool {
        match self {
            Self::ContentPolicy => false,
            Self::QuotaExceeded | Self::Internal | Self::Other(_) => true,
        }
    }
}

/// One status snapshot for a remote job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollResponse {
    pub status: RemoteStatus,
    /// Percentage in `[0, 100]`, when the service reports one.
    pub progress: Option<u8>,
    /// Seconds the service expects the job to still need.
    pub estimated_time_remaining: Option<u32>,
    pub video_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub error: Option<RemoteError>,
}

impl PollResponse {
    pub fn status(status: RemoteStatus) -> Self {
        Self {
            status,
            progress: None,
            estimated_time_remaining: None,
            video_url: None,
            thumbnail_url: None,
            metadata: None,
            error: None,
        }
    }

    pub fn processing(progress: u8) -> Self {
        Self {
            progress: Some(progress),
            ..Self::status(RemoteStatus::Processing)
        }
    }

    pub fn completed(video_url: impl Into<String>) -> Self {
        Self {
            progress: Some(100),
            video_url: Some(video_url.into()),
            ..Self::status(RemoteStatus::Completed)
        }
    }

    pub fn failed(code: RemoteErrorCode, message: impl Into<String>) -> Self {
        Self {
            error: Some(RemoteError {
                code,
                message: message.into(),
            }),
            ..Self::status(RemoteStatus::Failed)
        }
    }

    pub fn with_progress(self, progress: u8) -> Self {
        Self {
            progress: Some(progress),
            ..self
        }
    }

    pub fn with_estimated_time_remaining(self, seconds: u32) -> Self {
        Self {
            estimated_time_remaining: Some(seconds),
            ..self
        }
    }

    pub fn with_thumbnail_url(self, thumbnail_url: impl Into<String>) -> Self {
        Self {
            thumbnail_url: Some(thumbnail_url.into()),
            ..self
        }
    }

    pub fn with_metadata(self, metadata: serde_json::Value) -> Self {
        Self {
            metadata: Some(metadata),
            ..self
        }
    }
}

/// Adapter to the remote generation service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Submits a generation and returns the service's handle for it.
    async fn submit_job(&self, request: &GenerationRequest) -> Result<ExternalJobId, ApiError>;

    /// Fetches the current status of a submitted job.
    ///
    /// Polling is read-only on the remote side; repeating the same poll has
    /// no further effect.
    async fn poll_status(&self, id: &ExternalJobId) -> Result<PollResponse, ApiError>;

    /// Asks the service to cancel a running job.
    async fn cancel_job(&self, id: &ExternalJobId) -> Result<CancelOutcome, ApiError>;

    /// Asks the service to improve a prompt.
    ///
    /// Best effort: adapters must return the input unchanged when the
    /// upstream call fails, never an error.
    async fn enhance_prompt(&self, prompt: &str) -> String {
        prompt.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn connection_and_timeout_errors_are_retryable() {
        assert!(ApiError::Connection("refused".to_owned()).retryable());
        assert!(ApiError::Timeout.retryable());
        assert!(!ApiError::ContentPolicy("violence".to_owned()).retryable());
        assert!(!ApiError::UnknownJob("gen-1".into()).retryable());
    }

    #[test]
    fn rejected_errors_carry_their_own_retryability() {
        let overloaded = ApiError::Rejected {
            message: "service overloaded".to_owned(),
            retryable: true,
        };
        let unsupported = ApiError::Rejected {
            message: "unsupported resolution".to_owned(),
            retryable: false,
        };

        assert!(overloaded.retryable());
        assert!(!unsupported.retryable());
    }

    #[test]
    fn content_policy_failures_are_not_retryable() {
        let response = PollResponse::failed(RemoteErrorCode::ContentPolicy, "rejected");

        assert_matches!(response.error, Some(ref error) if !error.code.retryable());
        assert!(response.status.is_terminal());
    }

    struct MinimalClient;

    #[async_trait]
    impl GenerationClient for MinimalClient {
        async fn submit_job(
            &self,
            _request: &GenerationRequest,
        ) -> Result<ExternalJobId, ApiError> {
            Ok("gen-1".into())
        }

        async fn poll_status(&self, _id: &ExternalJobId) -> Result<PollResponse, ApiError> {
            Ok(PollResponse::status(RemoteStatus::Queued))
        }

        async fn cancel_job(&self, _id: &ExternalJobId) -> Result<CancelOutcome, ApiError> {
            Ok(CancelOutcome::Cancelled)
        }
    }

    #[tokio::test]
    async fn prompt_enhancement_defaults_to_passthrough() {
        assert_eq!(
            MinimalClient.enhance_prompt("a lion at sunset").await,
            "a lion at sunset"
        );
    }
}
