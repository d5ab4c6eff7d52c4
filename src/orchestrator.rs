//! The state machine driving a generation job from admission to its end.
//!
//! An [`Orchestrator`] belongs to one user session and surfaces exactly one
//! job for live tracking at a time. Admission is synchronous: validation,
//! the entitlement gate, pricing, persistence, and enqueueing all happen
//! inside [`Orchestrator::submit`]. Everything after that is driven by
//! reconciling status reports polled from the generation service; the
//! orchestrator never invents progress on its own.
//!
//! The tracked job is mutated only here, through the job's transition
//! functions, while a poll task owns the conversation with the remote
//! service. Observers read cloned snapshots and subscribe to
//! [`JobEvent`]s.

use std::pin::Pin;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use futures::Stream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, Instrument};

use crate::client::{
    ApiError, CancelOutcome, ExternalJobId, GenerationClient, PollResponse, RemoteStatus,
};
use crate::cost::{CostConfig, GenerationCost};
use crate::entitlements::Entitlements;
use crate::events::{EventChannel, JobEvent};
use crate::job::settings::{GenerationRequest, GenerationSettings};
use crate::job::{Job, JobError, JobId, JobRef, JobStage, JobStatus, UserId};
use crate::poll::PollPolicy;
use crate::queue::{EntryOutcome, Priority, QueueConfig, QueueManager, QueueSnapshot};
use crate::store::JobStore;
use crate::VidgenError;

type Result<T> = std::result::Result<T, VidgenError>;

/// Tunables for one orchestrator instance.
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorConfig {
    pub poll: PollPolicy,
    pub queue: QueueConfig,
    pub cost: CostConfig,
    /// Retry ceiling carried onto each admitted job.
    pub max_retries: u8,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll: PollPolicy::default(),
            queue: QueueConfig::default(),
            cost: CostConfig::default(),
            max_retries: 3,
        }
    }
}

impl OrchestratorConfig {
    pub fn with_poll(self, poll: PollPolicy) -> Self {
        Self { poll, ..self }
    }

    pub fn with_queue(self, queue: QueueConfig) -> Self {
        Self { queue, ..self }
    }

    pub fn with_cost(self, cost: CostConfig) -> Self {
        Self { cost, ..self }
    }

    pub fn with_max_retries(self, max_retries: u8) -> Self {
        Self {
            max_retries,
            ..self
        }
    }
}

struct TrackedJob {
    id: JobId,
    job: Job,
    poll_token: CancellationToken,
    poll_handle: Option<JoinHandle<()>>,
}

struct Inner<C, S, E> {
    user_id: UserId,
    client: C,
    store: S,
    entitlements: E,
    config: OrchestratorConfig,
    queue: RwLock<QueueManager>,
    current: RwLock<Option<TrackedJob>>,
    events: EventChannel,
    shutdown: CancellationToken,
}

/// Orchestrates generation jobs for one user session.
pub struct Orchestrator<C, S, E>
where
    C: GenerationClient + 'static,
    S: JobStore + 'static,
    E: Entitlements + 'static,
{
    inner: Arc<Inner<C, S, E>>,
}

impl<C, S, E> Orchestrator<C, S, E>
where
    C: GenerationClient + 'static,
    S: JobStore + 'static,
    E: Entitlements + 'static,
{
    pub fn new(user_id: impl Into<UserId>, client: C, store: S, entitlements: E) -> Self {
        Self::with_config(user_id, client, store, entitlements, Default::default())
    }

    pub fn with_config(
        user_id: impl Into<UserId>,
        client: C,
        store: S,
        entitlements: E,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                user_id: user_id.into(),
                client,
                store,
                entitlements,
                queue: RwLock::new(QueueManager::new(config.queue)),
                config,
                current: RwLock::new(None),
                events: EventChannel::default(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Prices settings without admitting anything.
    pub fn compute_cost(&self, settings: &GenerationSettings) -> GenerationCost {
        self.inner.config.cost.compute(settings)
    }

    /// Admits a generation request and returns its assigned job id.
    ///
    /// Validation, the entitlement gate, and the concurrency check all run
    /// before anything is persisted; a failed submit has no side effects.
    pub async fn submit(&self, request: GenerationRequest) -> Result<JobId> {
        request.validate()?;
        let cost = self.inner.config.cost.compute(&request.settings);
        self.inner.entitlements.check(cost.total_credits)?;
        self.submit_admitted(request, cost, 0).await
    }

    /// Re-submits the tracked failed job as a new attempt.
    pub async fn retry(&self) -> Result<JobId> {
        let (request, retry_count) = {
            let current = self
                .inner
                .current
                .read()
                .map_err(|_| VidgenError::BadState)?;
            let tracked = current.as_ref().ok_or(VidgenError::NoTrackedJob)?;
            let job = &tracked.job;
            if job.status != JobStatus::Failed {
                return Err(VidgenError::RetryNotAllowed {
                    reason: "only failed jobs can be retried".to_owned(),
                });
            }
            if job.retry_count >= job.max_retries {
                return Err(VidgenError::RetriesExhausted {
                    retry_count: job.retry_count,
                    max_retries: job.max_retries,
                });
            }
            match &job.error {
                Some(error) if error.retryable => {}
                _ => {
                    return Err(VidgenError::RetryNotAllowed {
                        reason: "the recorded failure is not retryable".to_owned(),
                    })
                }
            }
            (job.request(), job.retry_count)
        };

        // A fresh attempt passes the same gate as a fresh submission.
        request.validate()?;
        let cost = self.inner.config.cost.compute(&request.settings);
        self.inner.entitlements.check(cost.total_credits)?;
        self.submit_admitted(request, cost, retry_count + 1).await
    }

    /// Cancels the tracked job.
    ///
    /// A job that has not been handed to the generation service is cancelled
    /// purely locally. A dispatched job is cancelled cooperatively: the
    /// service may reject the request, in which case the job keeps running
    /// and this returns [`VidgenError::CancellationRejected`].
    pub async fn cancel(&self) -> Result<()> {
        let (id, external_job_id, status) = {
            let current = self
                .inner
                .current
                .read()
                .map_err(|_| VidgenError::BadState)?;
            let tracked = current.as_ref().ok_or(VidgenError::NoTrackedJob)?;
            if tracked.job.is_terminal() {
                return Err(VidgenError::CancellationRejected);
            }
            (
                tracked.id,
                tracked.job.external_job_id.clone(),
                tracked.job.status,
            )
        };

        match external_job_id {
            None => {
                debug_assert_eq!(status, JobStatus::Pending);
                self.inner.cancel_locally(id).await;
                Ok(())
            }
            Some(external) => match self.inner.client.cancel_job(&external).await? {
                CancelOutcome::Rejected => {
                    tracing::info!(job_id = %id, "Cancellation rejected for job {id}, generation continues");
                    Err(VidgenError::CancellationRejected)
                }
                CancelOutcome::Cancelled => {
                    self.inner.cancel_locally(id).await;
                    Ok(())
                }
            },
        }
    }

    /// Best-effort prompt improvement via the generation service.
    pub async fn enhance_prompt(&self, prompt: &str) -> String {
        self.inner.client.enhance_prompt(prompt).await
    }

    /// Snapshot of the tracked job, if any.
    pub fn current_job(&self) -> Option<Job> {
        self.inner
            .current
            .read()
            .ok()?
            .as_ref()
            .map(|tracked| tracked.job.clone())
    }

    pub fn queue_snapshot(&self) -> QueueSnapshot {
        match self.inner.queue.read() {
            Ok(queue) => queue.snapshot(),
            Err(_) => QueueManager::default().snapshot(),
        }
    }

    /// 1-based queue position of the tracked job.
    pub fn position(&self) -> Option<usize> {
        let id = self.current_id()?;
        self.inner.queue.read().ok()?.position(id)
    }

    /// Expected wait for the tracked job.
    pub fn estimated_wait(&self) -> Option<Duration> {
        let id = self.current_id()?;
        self.inner.queue.read().ok()?.estimated_wait(id)
    }

    /// Subscribes to job lifecycle events.
    pub fn subscribe(&self) -> Pin<Box<dyn Stream<Item = JobEvent> + Send>> {
        self.inner.events.subscribe()
    }

    /// Stops granting generation slots to waiting entries.
    pub fn pause_queue(&self) -> Result<()> {
        self.inner
            .queue
            .write()
            .map_err(|_| VidgenError::BadState)?
            .pause();
        Ok(())
    }

    /// Resumes the queue and dispatches the tracked job if it was waiting.
    pub async fn resume_queue(&self) -> Result<()> {
        let activated = self
            .inner
            .queue
            .write()
            .map_err(|_| VidgenError::BadState)?
            .resume();
        self.dispatch_if_tracked(&activated).await
    }

    /// Empties the queue, requesting cancellation of any active generation.
    ///
    /// Cancellation is best effort: a rejection removes the entry from the
    /// visible queue but the remote job runs on to its own terminal state.
    pub async fn clear_queue(&self) -> Result<()> {
        let outcome = self
            .inner
            .queue
            .write()
            .map_err(|_| VidgenError::BadState)?
            .clear();

        let Some(id) = self.current_id() else {
            return Ok(());
        };
        if !outcome.removed.contains(&id) {
            return Ok(());
        }
        let (external_job_id, terminal) = {
            let current = self
                .inner
                .current
                .read()
                .map_err(|_| VidgenError::BadState)?;
            match current.as_ref() {
                Some(tracked) if tracked.id == id => (
                    tracked.job.external_job_id.clone(),
                    tracked.job.is_terminal(),
                ),
                _ => return Ok(()),
            }
        };
        if terminal {
            return Ok(());
        }
        match external_job_id {
            None => self.inner.cancel_locally(id).await,
            Some(external) => match self.inner.client.cancel_job(&external).await {
                Ok(CancelOutcome::Cancelled) => self.inner.cancel_locally(id).await,
                Ok(CancelOutcome::Rejected) => {
                    tracing::info!(job_id = %id, "Cancellation rejected while clearing, job {id} continues");
                }
                Err(error) => {
                    tracing::warn!(job_id = %id, ?error, "Cancel request failed while clearing: {error}");
                }
            },
        }
        Ok(())
    }

    /// Removes a job from tracking and from the store.
    ///
    /// Refuses while the job is still running; cancel it first.
    pub async fn discard(&self, id: JobId) -> Result<()> {
        {
            let current = self
                .inner
                .current
                .read()
                .map_err(|_| VidgenError::BadState)?;
            if let Some(tracked) = current.as_ref() {
                if tracked.id == id && !tracked.job.is_terminal() {
                    return Err(VidgenError::JobStillRunning);
                }
            }
        }
        self.inner.store.delete(id).await?;
        if let Ok(mut queue) = self.inner.queue.write() {
            queue.dequeue(id);
        }
        if let Ok(mut current) = self.inner.current.write() {
            if current.as_ref().map(|tracked| tracked.id) == Some(id) {
                *current = None;
            }
        }
        Ok(())
    }

    /// Stops polling and waits for the poll task to finish.
    pub async fn shutdown(&self) {
        tracing::debug!("Shutting down orchestrator for {}", self.inner.user_id);
        self.inner.shutdown.cancel();
        let handle = match self.inner.current.write() {
            Ok(mut current) => current
                .as_mut()
                .and_then(|tracked| tracked.poll_handle.take()),
            Err(_) => None,
        };
        if let Some(handle) = handle {
            if let Err(error) = handle.await {
                tracing::error!(?error, "Poll task ended abnormally: {error}");
            }
        }
    }

    fn current_id(&self) -> Option<JobId> {
        self.inner
            .current
            .read()
            .ok()?
            .as_ref()
            .map(|tracked| tracked.id)
    }

    async fn submit_admitted(
        &self,
        request: GenerationRequest,
        cost: GenerationCost,
        retry_count: u8,
    ) -> Result<JobId> {
        {
            let current = self
                .inner
                .current
                .read()
                .map_err(|_| VidgenError::BadState)?;
            if let Some(tracked) = current.as_ref() {
                if !tracked.job.is_terminal() {
                    return Err(VidgenError::ConcurrentGeneration);
                }
            }
        }

        let max_retries = self.inner.config.max_retries;
        let mut job = Job::admitted(
            self.inner.user_id.clone(),
            &request,
            cost,
            retry_count,
            max_retries,
        );
        tracing::debug!(provisional_id = %job.id, "Admitting job for {}", self.inner.user_id);
        let id = self.inner.store.insert(job.clone()).await?;
        job.id = JobRef::Persisted(id);

        let activated = {
            let mut queue = self
                .inner
                .queue
                .write()
                .map_err(|_| VidgenError::BadState)?;
            queue.enqueue(id, Priority::Normal);
            queue.activate_next()
        };

        {
            let mut current = self
                .inner
                .current
                .write()
                .map_err(|_| VidgenError::BadState)?;
            *current = Some(TrackedJob {
                id,
                job,
                poll_token: self.inner.shutdown.child_token(),
                poll_handle: None,
            });
        }
        self.inner.events.publish(JobEvent::Admitted { id });

        self.dispatch_if_tracked(&activated).await?;
        Ok(id)
    }

    async fn dispatch_if_tracked(&self, activated: &[JobId]) -> Result<()> {
        let Some(id) = self.current_id() else {
            return Ok(());
        };
        for activated_id in activated {
            if *activated_id == id {
                return self.dispatch(id).await;
            }
            // Entries admitted outside this session are activated here but
            // dispatched by whoever tracks them.
            tracing::debug!(job_id = %activated_id, "Activated job {activated_id} is not tracked by this session");
        }
        Ok(())
    }

    /// Hands the tracked job to the generation service and starts polling.
    async fn dispatch(&self, id: JobId) -> Result<()> {
        let request = {
            let current = self
                .inner
                .current
                .read()
                .map_err(|_| VidgenError::BadState)?;
            match current.as_ref() {
                Some(tracked) if tracked.id == id => tracked.job.request(),
                _ => return Ok(()),
            }
        };

        match self.inner.client.submit_job(&request).await {
            Ok(external_job_id) => {
                self.begin_polling(id, external_job_id).await;
                Ok(())
            }
            Err(error) => {
                tracing::warn!(job_id = %id, ?error, "Dispatch failed for job {id}: {error}");
                self.inner.fail_job(id, JobError::from(&error)).await;
                Err(match error {
                    ApiError::ContentPolicy(message) => VidgenError::ContentPolicy(message),
                    other => VidgenError::Api(other),
                })
            }
        }
    }

    async fn begin_polling(&self, id: JobId, external_job_id: ExternalJobId) {
        let dispatched = {
            let Ok(mut current) = self.inner.current.write() else {
                return;
            };
            match current.as_mut().filter(|tracked| tracked.id == id) {
                None => return,
                // Cancelled while the submission was in flight; the remote
                // job is orphaned.
                Some(tracked) if tracked.job.is_terminal() => None,
                Some(tracked) => {
                    tracked.job.record_dispatch(external_job_id.clone());
                    Some((tracked.job.clone(), tracked.poll_token.clone()))
                }
            }
        };
        let Some((snapshot, token)) = dispatched else {
            tracing::debug!(job_id = %id, "Job {id} ended during dispatch, cancelling remote job");
            if let Err(error) = self.inner.client.cancel_job(&external_job_id).await {
                tracing::warn!(job_id = %id, ?error, "Failed to cancel orphaned remote job: {error}");
            }
            return;
        };
        self.inner.persist(&snapshot).await;

        let handle = tokio::spawn({
            let inner = Arc::clone(&self.inner);
            let token = token.clone();
            async move { inner.poll_loop(id, external_job_id, token).await }.in_current_span()
        });
        if let Ok(mut current) = self.inner.current.write() {
            if let Some(tracked) = current.as_mut().filter(|tracked| tracked.id == id) {
                tracked.poll_handle = Some(handle);
            }
        }
    }
}

impl<C, S, E> Drop for Orchestrator<C, S, E>
where
    C: GenerationClient + 'static,
    S: JobStore + 'static,
    E: Entitlements + 'static,
{
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}

impl<C, S, E> Inner<C, S, E>
where
    C: GenerationClient + 'static,
    S: JobStore + 'static,
    E: Entitlements + 'static,
{
    /// Polls the generation service until the job ends or the attempt
    /// ceiling is reached.
    ///
    /// Polls are issued strictly one at a time, so responses are applied in
    /// the order the service produced them.
    #[instrument(skip(self, token), fields(%job_id, %external_job_id))]
    async fn poll_loop(
        self: Arc<Self>,
        job_id: JobId,
        external_job_id: ExternalJobId,
        token: CancellationToken,
    ) {
        let policy = self.config.poll;
        let mut attempts = 0u32;
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::debug!("Polling stopped for job {job_id}");
                    return;
                }
                _ = tokio::time::sleep(policy.next_delay()) => {}
            }
            attempts += 1;
            let response = tokio::select! {
                _ = token.cancelled() => {
                    // The in-flight response is superseded; drop it.
                    tracing::debug!("Polling stopped for job {job_id}");
                    return;
                }
                response = self.client.poll_status(&external_job_id) => response,
            };
            match response {
                Ok(response) => {
                    if self.reconcile(job_id, response).await {
                        return;
                    }
                }
                Err(error) => {
                    // Transient: the remote job keeps running. Only an
                    // explicit terminal report or the ceiling fails the job.
                    tracing::warn!(?error, "Poll {attempts} failed for job {job_id}: {error}");
                }
            }
            if attempts >= policy.max_attempts() {
                tracing::warn!("Job {job_id} hit the poll ceiling after {attempts} attempts");
                self.fail_job(job_id, JobError::timeout(attempts)).await;
                return;
            }
        }
    }

    /// Applies one poll response to the tracked job.
    ///
    /// Returns `true` when polling should stop: the job reached a terminal
    /// state, or the response no longer applies to the tracked job.
    async fn reconcile(&self, id: JobId, response: PollResponse) -> bool {
        let (snapshot, event, outcome, stop) = {
            let Ok(mut current) = self.current.write() else {
                tracing::error!("Tracked job state poisoned, stopping polling");
                return true;
            };
            let Some(tracked) = current.as_mut().filter(|tracked| tracked.id == id) else {
                return true;
            };
            if tracked.job.is_terminal() {
                return true;
            }
            let job = &mut tracked.job;
            match response.status {
                RemoteStatus::Queued => {
                    job.update_estimate(response.estimated_time_remaining);
                    (job.clone(), None, None, false)
                }
                RemoteStatus::Initializing
                | RemoteStatus::Generating
                | RemoteStatus::Processing
                | RemoteStatus::Finalizing
                | RemoteStatus::Uploading => {
                    let stage = active_stage(response.status);
                    job.mark_processing(stage, response.progress, response.estimated_time_remaining);
                    let event = JobEvent::Progress {
                        id,
                        stage,
                        progress: job.progress,
                        estimated_time_remaining: job.estimated_time_remaining,
                    };
                    (job.clone(), Some(event), None, false)
                }
                RemoteStatus::Completed => match response.video_url {
                    Some(video_url) => {
                        job.mark_completed(
                            video_url.clone(),
                            response.thumbnail_url,
                            response.metadata,
                        );
                        tracing::debug!("Job {id} completed");
                        let event = JobEvent::Completed { id, video_url };
                        (job.clone(), Some(event), Some(EntryOutcome::Completed), true)
                    }
                    None => {
                        let error =
                            JobError::api("generation service reported completion without a video", true);
                        job.mark_failed(error.clone());
                        let event = JobEvent::Failed { id, error };
                        (job.clone(), Some(event), Some(EntryOutcome::Failed), true)
                    }
                },
                RemoteStatus::Failed => {
                    let error = response
                        .error
                        .as_ref()
                        .map(JobError::from)
                        .unwrap_or_else(|| JobError::api("generation failed", true));
                    tracing::debug!(?error, "Job {id} failed remotely");
                    job.mark_failed(error.clone());
                    let event = JobEvent::Failed { id, error };
                    (job.clone(), Some(event), Some(EntryOutcome::Failed), true)
                }
                RemoteStatus::Cancelled => {
                    job.mark_cancelled();
                    tracing::debug!("Job {id} cancelled remotely");
                    let event = JobEvent::Cancelled { id };
                    (job.clone(), Some(event), Some(EntryOutcome::Cancelled), true)
                }
            }
        };

        if let Some(outcome) = outcome {
            self.finish_in_queue(id, outcome);
        }
        self.persist(&snapshot).await;
        if let Some(event) = event {
            self.events.publish(event);
        }
        stop
    }

    /// Marks the tracked job failed and tears its tracking down.
    async fn fail_job(&self, id: JobId, error: JobError) {
        let snapshot = {
            let Ok(mut current) = self.current.write() else {
                return;
            };
            let Some(tracked) = current.as_mut().filter(|tracked| tracked.id == id) else {
                return;
            };
            if !tracked.job.mark_failed(error) {
                return;
            }
            tracked.poll_token.cancel();
            tracked.job.clone()
        };
        self.finish_in_queue(id, EntryOutcome::Failed);
        self.persist(&snapshot).await;
        if let Some(error) = snapshot.error.clone() {
            self.events.publish(JobEvent::Failed { id, error });
        }
    }

    /// Cancels the tracked job in local state and removes its queue entry.
    async fn cancel_locally(&self, id: JobId) {
        let snapshot = {
            let Ok(mut current) = self.current.write() else {
                return;
            };
            let Some(tracked) = current.as_mut().filter(|tracked| tracked.id == id) else {
                return;
            };
            if !tracked.job.mark_cancelled() {
                return;
            }
            tracked.poll_token.cancel();
            tracked.job.clone()
        };
        if let Ok(mut queue) = self.queue.write() {
            queue.dequeue(id);
            let activated = queue.activate_next();
            if !activated.is_empty() {
                tracing::debug!(?activated, "Queue advanced after cancelling job {id}");
            }
        }
        self.persist(&snapshot).await;
        tracing::debug!("Job {id} cancelled");
        self.events.publish(JobEvent::Cancelled { id });
    }

    fn finish_in_queue(&self, id: JobId, outcome: EntryOutcome) {
        if let Ok(mut queue) = self.queue.write() {
            let activated = queue.finish(id, outcome);
            if !activated.is_empty() {
                tracing::debug!(?activated, "Queue advanced after job {id} finished");
            }
        }
    }

    async fn persist(&self, job: &Job) {
        if let Err(error) = self.store.update(job).await {
            tracing::error!(?error, "Failed to persist job {}: {error}", job.id);
        }
    }
}

fn active_stage(status: RemoteStatus) -> JobStage {
    match status {
        RemoteStatus::Initializing => JobStage::Initializing,
        RemoteStatus::Generating => JobStage::Generating,
        RemoteStatus::Processing => JobStage::Processing,
        RemoteStatus::Finalizing => JobStage::Finalizing,
        RemoteStatus::Uploading => JobStage::Uploading,
        // Only called for active statuses.
        RemoteStatus::Queued | RemoteStatus::Completed | RemoteStatus::Failed | RemoteStatus::Cancelled => {
            JobStage::Processing
        }
    }
}
