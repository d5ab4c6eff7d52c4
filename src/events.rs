//! Notifications pushed to callers as a tracked job changes.
//!
//! Observers subscribe to a stream of [`JobEvent`]s; the orchestrator
//! publishes into every live subscription. Terminal events are published
//! exactly once per job, guarded by the job's absorbing terminal state.

use std::pin::Pin;
use std::sync::RwLock;

use futures::Stream;
use tokio::sync::mpsc;

use crate::job::{JobError, JobId, JobStage};

/// A change worth telling the caller about.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    /// The job passed admission and entered the queue.
    Admitted { id: JobId },
    /// A poll moved the job's stage, progress, or time estimate.
    Progress {
        id: JobId,
        stage: JobStage,
        progress: u8,
        estimated_time_remaining: Option<u32>,
    },
    Completed { id: JobId, video_url: String },
    Failed { id: JobId, error: JobError },
    Cancelled { id: JobId },
}

impl JobEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Failed { .. } | Self::Cancelled { .. }
        )
    }
}

type Subscriber = mpsc::UnboundedSender<JobEvent>;

/// Fan-out of [`JobEvent`]s to any number of subscribers.
#[derive(Default)]
pub(crate) struct EventChannel {
    subscribers: RwLock<Vec<Subscriber>>,
}

impl EventChannel {
    /// Sends `event` to every live subscriber, dropping closed ones.
    pub(crate) fn publish(&self, event: JobEvent) {
        match self.subscribers.write() {
            Ok(mut subscribers) => {
                subscribers.retain(|sender| sender.send(event.clone()).is_ok());
            }
            Err(_) => tracing::error!(?event, "Event subscribers poisoned, dropping event"),
        }
    }

    /// Registers a new subscriber and returns its event stream.
    pub(crate) fn subscribe(&self) -> Pin<Box<dyn Stream<Item = JobEvent> + Send>> {
        let (sender, mut receiver) = mpsc::unbounded_channel();
        if let Ok(mut subscribers) = self.subscribers.write() {
            subscribers.push(sender);
        }
        Box::pin(async_stream::stream! {
            while let Some(event) = receiver.recv().await {
                yield event;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn every_subscriber_sees_every_event() {
        let channel = EventChannel::default();
        let mut first = channel.subscribe();
        let mut second = channel.subscribe();

        channel.publish(JobEvent::Admitted { id: 1.into() });

        assert_eq!(first.next().await, Some(JobEvent::Admitted { id: 1.into() }));
        assert_eq!(
            second.next().await,
            Some(JobEvent::Admitted { id: 1.into() })
        );
    }

    #[tokio::test]
    async fn dropped_subscribers_are_pruned() {
        let channel = EventChannel::default();
        let first = channel.subscribe();
        drop(first);

        channel.publish(JobEvent::Admitted { id: 1.into() });

        assert_eq!(channel.subscribers.read().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn events_arrive_in_publication_order() {
        let channel = EventChannel::default();
        let mut stream = channel.subscribe();

        channel.publish(JobEvent::Admitted { id: 1.into() });
        channel.publish(JobEvent::Cancelled { id: 1.into() });

        assert_eq!(
            stream.next().await,
            Some(JobEvent::Admitted { id: 1.into() })
        );
        assert_eq!(
            stream.next().await,
            Some(JobEvent::Cancelled { id: 1.into() })
        );
    }
}
