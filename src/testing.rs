//! Helpers for testing.
//!
//! [`ScriptedClient`] stands in for the generation service: it replays a
//! scripted sequence of poll responses and records how it was called, so
//! orchestrator behaviour can be driven deterministically without a network.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use crate::client::{
    ApiError, CancelOutcome, ExternalJobId, GenerationClient, PollResponse, RemoteStatus,
};

/// A [`GenerationClient`] that replays a scripted conversation.
///
/// Submissions succeed with a fresh id unless a failure is scripted. Poll
/// responses are consumed front to back; when the script runs dry the client
/// keeps reporting an in-flight job, which is exactly what a stuck remote
/// generation looks like.
#[derive(Default)]
pub struct ScriptedClient {
    submit_results: Mutex<VecDeque<Result<ExternalJobId, ApiError>>>,
    poll_responses: Mutex<VecDeque<Result<PollResponse, ApiError>>>,
    cancel_results: Mutex<VecDeque<Result<CancelOutcome, ApiError>>>,
    enhancement: Mutex<Option<String>>,
    submits: AtomicUsize,
    polls: AtomicUsize,
    cancels: AtomicUsize,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the poll responses, replayed in order.
    pub fn with_poll_responses(self, responses: Vec<PollResponse>) -> Self {
        {
            let mut queue = self.poll_responses.lock().unwrap();
            queue.extend(responses.into_iter().map(Ok));
        }
        self
    }

    /// Scripts a poll attempt that fails at the transport level.
    pub fn with_poll_error(self, error: ApiError) -> Self {
        self.poll_responses.lock().unwrap().push_back(Err(error));
        self
    }

    /// Scripts the next submission to fail.
    pub fn with_submit_error(self, error: ApiError) -> Self {
        self.submit_results.lock().unwrap().push_back(Err(error));
        self
    }

    /// Scripts the next cancellation to be rejected by the service.
    pub fn with_cancel_rejected(self) -> Self {
        self.cancel_results
            .lock()
            .unwrap()
            .push_back(Ok(CancelOutcome::Rejected));
        self
    }

    /// Scripts the improved text returned by prompt enhancement.
    pub fn with_enhancement(self, improved: impl Into<String>) -> Self {
        *self.enhancement.lock().unwrap() = Some(improved.into());
        self
    }

    pub fn submit_count(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }

    pub fn poll_count(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn cancel_count(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationClient for ScriptedClient {
    async fn submit_job(
        &self,
        _request: &crate::job::settings::GenerationRequest,
    ) -> Result<ExternalJobId, ApiError> {
        self.submits.fetch_add(1, Ordering::SeqCst);
        self.submit_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(ExternalJobId::from(format!("gen-{}", Uuid::new_v4()))))
    }

    async fn poll_status(&self, _id: &ExternalJobId) -> Result<PollResponse, ApiError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        self.poll_responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(PollResponse::status(RemoteStatus::Processing)))
    }

    async fn cancel_job(&self, _id: &ExternalJobId) -> Result<CancelOutcome, ApiError> {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        self.cancel_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(CancelOutcome::Cancelled))
    }

    async fn enhance_prompt(&self, prompt: &str) -> String {
        self.enhancement
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| prompt.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn replays_poll_responses_in_order() {
        let client = ScriptedClient::new().with_poll_responses(vec![
            PollResponse::processing(40),
            PollResponse::completed("https://x/v.mp4"),
        ]);
        let id = ExternalJobId::from("gen-1");

        assert_eq!(
            client.poll_status(&id).await.unwrap(),
            PollResponse::processing(40)
        );
        assert_eq!(
            client.poll_status(&id).await.unwrap().status,
            RemoteStatus::Completed
        );
        assert_eq!(client.poll_count(), 2);
    }

    #[tokio::test]
    async fn a_dry_script_reports_an_in_flight_job() {
        let client = ScriptedClient::new();

        let response = client
            .poll_status(&ExternalJobId::from("gen-1"))
            .await
            .unwrap();

        assert_eq!(response.status, RemoteStatus::Processing);
    }

    #[tokio::test]
    async fn scripted_submit_failures_surface_once() {
        let client = ScriptedClient::new().with_submit_error(ApiError::Timeout);
        let request = crate::job::settings::GenerationRequest::new("Lion", "a lion at sunset");

        assert_matches!(client.submit_job(&request).await, Err(ApiError::Timeout));
        assert_matches!(client.submit_job(&request).await, Ok(_));
    }
}
