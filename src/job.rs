//! The canonical record for one generation request and its lifecycle.
//!
//! A [`Job`] is only ever mutated through its transition functions; callers
//! observe cloned snapshots. Terminal states absorb: once a job is completed,
//! failed, or cancelled, further transitions are no-ops.

use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::client::{ApiError, ExternalJobId, RemoteError, RemoteErrorCode};
use crate::cost::GenerationCost;
use crate::job::settings::{GenerationRequest, GenerationSettings};

pub mod settings;

/// Identifier assigned by the job store on admission.
#[derive(Debug, Eq, PartialEq, Hash, Clone, Copy, Serialize, Deserialize)]
pub struct JobId(i32);

impl From<i32> for JobId {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

impl From<JobId> for i32 {
    fn from(value: JobId) -> Self {
        value.0
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JobId({})", self.0)
    }
}

/// Client-generated identifier used before the store assigns a [`JobId`].
#[derive(Debug, Eq, PartialEq, Hash, Clone, Copy, Serialize, Deserialize)]
pub struct ProvisionalId(Uuid);

impl ProvisionalId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ProvisionalId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for ProvisionalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ProvisionalId({})", self.0)
    }
}

/// A job's identity over its lifetime.
///
/// Jobs are created optimistically with a [`ProvisionalId`] so callers can
/// track them before the store has assigned the real id; the store swaps the
/// variant on insert.
#[derive(Debug, Eq, PartialEq, Hash, Clone, Copy, Serialize, Deserialize)]
pub enum JobRef {
    Provisional(ProvisionalId),
    Persisted(JobId),
}

impl JobRef {
    pub fn persisted(&self) -> Option<JobId> {
        match self {
            Self::Persisted(id) => Some(*id),
            Self::Provisional(_) => None,
        }
    }
}

impl Display for JobRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Provisional(id) => write!(f, "{id}"),
            Self::Persisted(id) => write!(f, "{id}"),
        }
    }
}

/// Owner of a job.
#[derive(Debug, Eq, PartialEq, Hash, Clone, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for UserId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Coarse lifecycle state of a job.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Sub-state of a job while it is pending or processing.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    Queued,
    Initializing,
    Generating,
    Processing,
    Finalizing,
    Uploading,
}

/// Classification of a recorded job failure.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobErrorCode {
    Api,
    Timeout,
    ContentPolicy,
    Other(String),
}

/// Failure recorded on a job when it reaches [`JobStatus::Failed`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobError {
    pub code: JobErrorCode,
    pub message: String,
    /// Whether submitting the identical request again could succeed.
    pub retryable: bool,
    /// Hint shown to the user alongside the message.
    pub suggested_action: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl JobError {
    pub fn api(message: impl Into<String>, retryable: bool) -> Self {
        Self {
            code: JobErrorCode::Api,
            message: message.into(),
            retryable,
            suggested_action: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn timeout(attempts: u32) -> Self {
        Self {
            code: JobErrorCode::Timeout,
            message: format!("generation did not finish within {attempts} status checks"),
            retryable: true,
            suggested_action: Some("try again, or reduce the duration".to_owned()),
            recorded_at: Utc::now(),
        }
    }

    pub fn content_policy(message: impl Into<String>) -> Self {
        Self {
            code: JobErrorCode::ContentPolicy,
            message: message.into(),
            retryable: false,
            suggested_action: Some("rephrase the prompt".to_owned()),
            recorded_at: Utc::now(),
        }
    }

    pub fn with_suggested_action(self, suggested_action: impl Into<String>) -> Self {
        Self {
            suggested_action: Some(suggested_action.into()),
            ..self
        }
    }
}

impl From<&ApiError> for JobError {
    fn from(error: &ApiError) -> Self {
        match error {
            ApiError::ContentPolicy(message) => Self::content_policy(message.clone()),
            other => Self::api(other.to_string(), other.retryable()),
        }
    }
}

impl From<&RemoteError> for JobError {
    fn from(error: &RemoteError) -> Self {
        match &error.code {
            RemoteErrorCode::ContentPolicy => Self::content_policy(error.message.clone()),
            RemoteErrorCode::QuotaExceeded => Self::api(error.message.clone(), true)
                .with_suggested_action("reduce the duration or resolution"),
            code => Self::api(error.message.clone(), code.retryable()),
        }
    }
}

/// One video-generation request and everything observed about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobRef,
    pub user_id: UserId,
    pub title: String,
    pub prompt: String,
    pub settings: GenerationSettings,
    /// Priced once at admission; never recomputed for this job.
    pub cost: GenerationCost,
    pub status: JobStatus,
    /// `Some` exactly while `status` is pending or processing.
    pub stage: Option<JobStage>,
    /// Percentage in `[0, 100]`, non-decreasing while processing.
    pub progress: u8,
    pub estimated_time_remaining: Option<u32>,
    pub retry_count: u8,
    pub max_retries: u8,
    pub error: Option<JobError>,
    pub video_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub external_job_id: Option<ExternalJobId>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Creates a freshly admitted job in `Pending`/`Queued`.
    pub(crate) fn admitted(
        user_id: UserId,
        request: &GenerationRequest,
        cost: GenerationCost,
        retry_count: u8,
        max_retries: u8,
    ) -> Self {
        Self {
            id: JobRef::Provisional(ProvisionalId::new()),
            user_id,
            title: request.title.clone(),
            prompt: request.prompt.clone(),
            settings: request.settings.clone(),
            cost,
            status: JobStatus::Pending,
            stage: Some(JobStage::Queued),
            progress: 0,
            estimated_time_remaining: None,
            retry_count,
            max_retries,
            error: None,
            video_url: None,
            thumbnail_url: None,
            metadata: None,
            external_job_id: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// The request this job was admitted with, for resubmission on retry.
    pub fn request(&self) -> GenerationRequest {
        GenerationRequest {
            title: self.title.clone(),
            prompt: self.prompt.clone(),
            settings: self.settings.clone(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether [`crate::orchestrator::Orchestrator::retry`] would be allowed.
    pub fn can_retry(&self) -> bool {
        self.status == JobStatus::Failed
            && self.retry_count < self.max_retries
            && self
                .error
                .as_ref()
                .map(|error| error.retryable)
                .unwrap_or(false)
    }

    pub(crate) fn record_dispatch(&mut self, external_job_id: ExternalJobId) {
        self.external_job_id = Some(external_job_id);
        self.started_at = Some(Utc::now());
    }

    pub(crate) fn update_estimate(&mut self, estimated_time_remaining: Option<u32>) {
        if !self.is_terminal() {
            if let Some(seconds) = estimated_time_remaining {
                self.estimated_time_remaining = Some(seconds);
            }
        }
    }

    /// Moves the job into an active processing stage.
    ///
    /// Progress never regresses: a stale percentage keeps the previous value.
    /// Returns `false` when the job is already terminal.
    pub(crate) fn mark_processing(
        &mut self,
        stage: JobStage,
        progress: Option<u8>,
        estimated_time_remaining: Option<u32>,
    ) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = JobStatus::Processing;
        self.stage = Some(stage);
        if let Some(progress) = progress {
            self.progress = self.progress.max(progress.min(100));
        }
        self.update_estimate(estimated_time_remaining);
        true
    }

    /// Returns `false` when the job is already terminal.
    pub(crate) fn mark_completed(
        &mut self,
        video_url: String,
        thumbnail_url: Option<String>,
        metadata: Option<serde_json::Value>,
    ) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = JobStatus::Completed;
        self.stage = None;
        self.progress = 100;
        self.estimated_time_remaining = None;
        self.error = None;
        self.video_url = Some(video_url);
        self.thumbnail_url = thumbnail_url;
        self.metadata = metadata;
        self.finished_at = Some(Utc::now());
        true
    }

    /// Returns `false` when the job is already terminal.
    pub(crate) fn mark_failed(&mut self, error: JobError) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = JobStatus::Failed;
        self.stage = None;
        self.estimated_time_remaining = None;
        self.error = Some(error);
        self.finished_at = Some(Utc::now());
        true
    }

    /// Returns `false` when the job is already terminal.
    pub(crate) fn mark_cancelled(&mut self) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = JobStatus::Cancelled;
        self.stage = None;
        self.estimated_time_remaining = None;
        self.finished_at = Some(Utc::now());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::CostConfig;

    fn admitted_job() -> Job {
        let request = GenerationRequest::new("Lion", "a lion at sunset");
        let cost = CostConfig::new().compute(&request.settings);
        Job::admitted("user-1".into(), &request, cost, 0, 3)
    }

    #[test]
    fn admission_starts_pending_and_queued() {
        let job = admitted_job();

        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.stage, Some(JobStage::Queued));
        assert_eq!(job.progress, 0);
        assert_eq!(job.cost.total_credits, 10);
        assert!(matches!(job.id, JobRef::Provisional(_)));
    }

    #[test]
    fn progress_never_regresses_while_processing() {
        let mut job = admitted_job();

        assert!(job.mark_processing(JobStage::Generating, Some(40), None));
        assert!(job.mark_processing(JobStage::Generating, Some(25), None));

        assert_eq!(job.progress, 40);
    }

    #[test]
    fn completion_sets_result_and_clears_stage() {
        let mut job = admitted_job();
        job.mark_processing(JobStage::Uploading, Some(90), Some(10));

        assert!(job.mark_completed("https://x/v.mp4".to_owned(), None, None));

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert_eq!(job.stage, None);
        assert_eq!(job.estimated_time_remaining, None);
        assert_eq!(job.video_url.as_deref(), Some("https://x/v.mp4"));
        assert!(job.error.is_none());
    }

    #[test]
    fn terminal_states_absorb_further_transitions() {
        let mut job = admitted_job();
        job.mark_processing(JobStage::Processing, Some(40), None);
        assert!(job.mark_completed("https://x/v.mp4".to_owned(), None, None));

        assert!(!job.mark_processing(JobStage::Processing, Some(10), None));
        assert!(!job.mark_failed(JobError::timeout(60)));
        assert!(!job.mark_cancelled());

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
    }

    #[test]
    fn failure_requires_recorded_error() {
        let mut job = admitted_job();

        assert!(job.mark_failed(JobError::api("boom", true)));

        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.is_some());
        assert_eq!(job.stage, None);
    }

    #[test]
    fn retry_eligibility_follows_count_and_error() {
        let mut job = admitted_job();
        job.mark_failed(JobError::api("boom", true));
        assert!(job.can_retry());

        let mut exhausted = admitted_job();
        exhausted.retry_count = 3;
        exhausted.mark_failed(JobError::api("boom", true));
        assert!(!exhausted.can_retry());

        let mut hopeless = admitted_job();
        hopeless.mark_failed(JobError::content_policy("rejected"));
        assert!(!hopeless.can_retry());
    }

    #[test]
    fn quota_failures_suggest_reducing_the_request() {
        let remote = RemoteError {
            code: RemoteErrorCode::QuotaExceeded,
            message: "plan quota exceeded".to_owned(),
        };

        let error = JobError::from(&remote);

        assert!(error.retryable);
        assert_eq!(
            error.suggested_action.as_deref(),
            Some("reduce the duration or resolution")
        );
    }

    #[test]
    fn api_errors_map_onto_job_errors() {
        let error = JobError::from(&ApiError::Timeout);
        assert_eq!(error.code, JobErrorCode::Api);
        assert!(error.retryable);

        let policy = JobError::from(&ApiError::ContentPolicy("violence".to_owned()));
        assert_eq!(policy.code, JobErrorCode::ContentPolicy);
        assert!(!policy.retryable);
    }
}
