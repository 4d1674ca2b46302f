use crate::dispatcher::job::Job;

/// Why a job is being handed to worker allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchCause {
    NewSubmission,
    Recovery,
}

impl std::fmt::Display for DispatchCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchCause::NewSubmission => write!(f, "new-submission"),
            DispatchCause::Recovery => write!(f, "recovery"),
        }
    }
}

/// Self-published by the dispatcher after a submission's persistence write is
/// acknowledged. Transient mailbox message, never persisted; derived from
/// the persisted job record.
#[derive(Debug, Clone)]
pub struct DispatchJobEvent {
    pub job: Job,
    pub cause: DispatchCause,
}

impl DispatchJobEvent {
    pub fn new_submission(job: Job) -> Self {
        Self {
            job,
            cause: DispatchCause::NewSubmission,
        }
    }
}

/// Replayed during startup recovery for every persisted job not known to
/// have settled. Always carries [`DispatchCause::Recovery`].
#[derive(Debug, Clone)]
pub struct ReDispatchJobEvent {
    pub job: Job,
}

impl ReDispatchJobEvent {
    pub fn new(job: Job) -> Self {
        Self { job }
    }

    pub fn cause(&self) -> DispatchCause {
        DispatchCause::Recovery
    }
}
