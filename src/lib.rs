//! A video generation job orchestration library.
//!
//! `vidgen` tracks a natural-language request for an AI-generated video
//! through an asynchronous, multi-minute external generation pipeline. It
//! owns job admission, per-user queueing with position and wait accounting,
//! status polling against the remote service, retry policy, cancellation,
//! and deterministic credit pricing.
//!
//! The crate is transport-agnostic: the generation service, the credit gate,
//! and durable storage are consumed through the [`client::GenerationClient`],
//! [`entitlements::Entitlements`], and [`store::JobStore`] traits. The
//! [`orchestrator::Orchestrator`] wires them together for one user session.
//!
//! # Example
//!
//! ```
//! use vidgen::entitlements::StaticEntitlements;
//! use vidgen::job::settings::GenerationRequest;
//! use vidgen::job::JobStatus;
//! use vidgen::orchestrator::Orchestrator;
//! use vidgen::store::memory::InMemoryStore;
//! use vidgen::testing::ScriptedClient;
//!
//! # tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap().block_on(async {
//! let orchestrator = Orchestrator::new(
//!     "user-1",
//!     ScriptedClient::new(),
//!     InMemoryStore::new(),
//!     StaticEntitlements::subscribed(100),
//! );
//!
//! let job_id = orchestrator
//!     .submit(GenerationRequest::new("Lion", "a lion at sunset"))
//!     .await
//!     .unwrap();
//!
//! let job = orchestrator.current_job().unwrap();
//! assert_eq!(job.status, JobStatus::Pending);
//! assert_eq!(job.cost.total_credits, 10);
//! # let _ = job_id;
//! # orchestrator.shutdown().await;
//! # });
//! ```

use thiserror::Error;

pub mod client;
pub mod cost;
pub mod entitlements;
pub mod events;
pub mod job;
pub mod orchestrator;
pub mod poll;
pub mod prelude;
pub mod queue;
pub mod store;
pub mod testing;

use client::ApiError;
use entitlements::PermissionDenied;
use store::StoreError;

/// Convenience alias for fallible `vidgen` operations.
pub type Result<T> = std::result::Result<T, VidgenError>;

/// Every failure the caller-facing surface can return.
#[derive(Debug, Error)]
pub enum VidgenError {
    /// The request itself is malformed; the caller must fix the input.
    #[error("invalid {field}: {message}")]
    Validation { field: &'static str, message: String },
    /// The entitlement gate refused admission.
    #[error(transparent)]
    Permission(#[from] PermissionDenied),
    /// A job is already being tracked by this session.
    #[error("a generation is already in progress")]
    ConcurrentGeneration,
    /// Talking to the generation service failed.
    #[error(transparent)]
    Api(#[from] ApiError),
    /// The poll ceiling was reached before the job ended.
    #[error("generation timed out after {attempts} status checks")]
    Timeout { attempts: u32 },
    /// The service declined to cancel; the job runs on.
    #[error("the generation has progressed too far to be cancelled")]
    CancellationRejected,
    /// The service refused the prompt outright.
    #[error("prompt rejected by content policy: {0}")]
    ContentPolicy(String),
    #[error("no retries left: {retry_count} of {max_retries} attempts used")]
    RetriesExhausted { retry_count: u8, max_retries: u8 },
    #[error("the job cannot be retried: {reason}")]
    RetryNotAllowed { reason: String },
    /// A running job cannot be discarded; cancel it first.
    #[error("the job is still running")]
    JobStillRunning,
    #[error("no job is currently tracked")]
    NoTrackedJob,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("orchestrator state poisoned")]
    BadState,
}

impl VidgenError {
    /// Whether repeating the same call later could succeed.
    pub fn retryable(&self) -> bool {
        match self {
            Self::Api(error) => error.retryable(),
            Self::Timeout { .. } => true,
            Self::Validation { .. }
            | Self::Permission(_)
            | Self::ConcurrentGeneration
            | Self::CancellationRejected
            | Self::ContentPolicy(_)
            | Self::RetriesExhausted { .. }
            | Self::RetryNotAllowed { .. }
            | Self::JobStillRunning
            | Self::NoTrackedJob
            | Self::Store(_)
            | Self::BadState => false,
        }
    }

    /// A hint shown to the user alongside the message, where one applies.
    pub fn suggested_action(&self) -> Option<&'static str> {
        match self {
            Self::Validation { .. } => Some("fix the highlighted field and resubmit"),
            Self::Permission(PermissionDenied::InsufficientCredits { .. }) => {
                Some("reduce the duration or resolution, or top up credits")
            }
            Self::Permission(_) => Some("upgrade the current plan"),
            Self::ConcurrentGeneration => Some("wait for the current generation to finish"),
            Self::Timeout { .. } | Self::Api(_) => Some("try again"),
            Self::ContentPolicy(_) => Some("rephrase the prompt"),
            Self::JobStillRunning => Some("cancel the job first"),
            Self::CancellationRejected
            | Self::RetriesExhausted { .. }
            | Self::RetryNotAllowed { .. }
            | Self::NoTrackedJob
            | Self::Store(_)
            | Self::BadState => None,
        }
    }
}
