use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::dispatcher::events::DispatchCause;
use crate::dispatcher::job::Job;

#[derive(Error, Debug)]
#[error("Worker allocation failed: {0}")]
pub struct AllocationError(pub String);

/// The collaborator the dispatcher hands persisted jobs to. Which worker
/// actually runs the job, and how, is decided on the other side of this
/// seam; the dispatcher only needs the hand-off acknowledged.
#[async_trait]
pub trait WorkerAllocator: Send + Sync {
    async fn allocate(&self, job: &Job, cause: DispatchCause) -> Result<(), AllocationError>;
}

/// Forwards dispatched jobs onto a channel whose receiver is the worker side.
/// Used by the standalone binary and by tests observing dispatch traffic.
pub struct ChannelAllocator {
    tx: mpsc::UnboundedSender<(Job, DispatchCause)>,
}

impl ChannelAllocator {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(Job, DispatchCause)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl WorkerAllocator for ChannelAllocator {
    async fn allocate(&self, job: &Job, cause: DispatchCause) -> Result<(), AllocationError> {
        self.tx
            .send((job.clone(), cause))
            .map_err(|_| AllocationError("worker channel closed".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::job::{JobId, JobPayload};

    #[tokio::test]
    async fn forwards_jobs_with_their_cause() {
        let (allocator, mut rx) = ChannelAllocator::new();
        let job = Job::new(JobId::new("J1"), JobPayload::new("echo 1"));

        allocator
            .allocate(&job, DispatchCause::NewSubmission)
            .await
            .unwrap();

        let (received, cause) = rx.recv().await.unwrap();
        assert_eq!(received.id, job.id);
        assert_eq!(cause, DispatchCause::NewSubmission);
    }

    #[tokio::test]
    async fn fails_once_worker_side_is_gone() {
        let (allocator, rx) = ChannelAllocator::new();
        drop(rx);

        let job = Job::new(JobId::new("J1"), JobPayload::new("echo 1"));
        let err = allocator
            .allocate(&job, DispatchCause::Recovery)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("channel closed"));
    }
}
