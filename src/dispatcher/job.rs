use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque job identifier, unique for the lifetime of the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Submitted,
    Dispatched,
    Running,
    Failed,
    Finished,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Failed | JobStatus::Finished | JobStatus::Cancelled
        )
    }

    /// Transitions are monotonic along
    /// Submitted → Dispatched → Running → {Finished | Failed | Cancelled};
    /// terminal states never transition again. Cancellation is allowed from
    /// any non-terminal state.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        if self == next {
            return true;
        }
        match self {
            JobStatus::Submitted => !matches!(next, JobStatus::Submitted),
            JobStatus::Dispatched => matches!(
                next,
                JobStatus::Running | JobStatus::Finished | JobStatus::Failed | JobStatus::Cancelled
            ),
            JobStatus::Running => matches!(
                next,
                JobStatus::Finished | JobStatus::Failed | JobStatus::Cancelled
            ),
            JobStatus::Failed | JobStatus::Finished | JobStatus::Cancelled => false,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Submitted => write!(f, "submitted"),
            JobStatus::Dispatched => write!(f, "dispatched"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Finished => write!(f, "finished"),
            JobStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// The executable job definition handed over at submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPayload {
    pub command: String,
}

impl JobPayload {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

/// A job record. The persisted form is the durability source of truth; the
/// in-memory copy in the dispatcher's job table follows it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub payload: JobPayload,
    pub status: JobStatus,
    pub submitted_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Cause recorded when the job reached `Failed`.
    pub failure: Option<String>,
}

impl Job {
    pub fn new(id: JobId, payload: JobPayload) -> Self {
        Self {
            id,
            payload,
            status: JobStatus::Submitted,
            submitted_at: Utc::now(),
            completed_at: None,
            failure: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Terminal status of the whole dispatcher process, completed exactly once
/// through the shutdown future.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplicationStatus {
    Succeeded,
    Failed,
    Canceled,
    Unknown,
}

impl ApplicationStatus {
    pub fn exit_code(self) -> i32 {
        match self {
            ApplicationStatus::Succeeded => 0,
            ApplicationStatus::Failed => 1,
            ApplicationStatus::Canceled => 2,
            ApplicationStatus::Unknown => 3,
        }
    }
}

impl std::fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApplicationStatus::Succeeded => write!(f, "succeeded"),
            ApplicationStatus::Failed => write!(f, "failed"),
            ApplicationStatus::Canceled => write!(f, "canceled"),
            ApplicationStatus::Unknown => write!(f, "unknown"),
        }
    }
}
