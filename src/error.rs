use std::time::Duration;

use thiserror::Error;

use crate::dispatcher::job::JobId;
use crate::rpc::EndpointAddress;

/// Errors surfaced by the persistence layer.
///
/// A failed `store` means the caller must not proceed to dispatch; a failed
/// `load_all` during startup is fatal for the dispatcher.
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Write failed: {0}")]
    Write(String),

    #[error("Read failed: {0}")]
    Read(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Duplicate job id: {0}")]
    DuplicateJob(JobId),

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Dispatcher is shutting down, submission rejected")]
    ShuttingDown,

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("No endpoint registered at {0}")]
    EndpointNotFound(EndpointAddress),

    #[error("Connecting to {0} timed out")]
    ConnectionTimeout(EndpointAddress),

    #[error("Call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Endpoint mailbox closed")]
    MailboxClosed,

    /// Startup failure wrapping the original cause; if the stop cleanup that
    /// follows a failed start itself fails, that secondary error is chained
    /// in `cleanup` rather than dropped.
    #[error("Could not start endpoint {address}: {source}")]
    Startup {
        address: EndpointAddress,
        source: Box<DispatchError>,
        cleanup: Option<Box<DispatchError>>,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DispatchError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, DispatchError::Startup { .. })
    }
}

pub type Result<T> = std::result::Result<T, DispatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn startup_error_chains_cleanup_failure() {
        let err = DispatchError::Startup {
            address: EndpointAddress::new("jobmaster://127.0.0.1:6070/dispatcher"),
            source: Box::new(DispatchError::Persistence(PersistenceError::Read(
                "backend unreachable".into(),
            ))),
            cleanup: Some(Box::new(DispatchError::Internal("stop hook failed".into()))),
        };

        assert!(err.is_fatal());
        let rendered = err.to_string();
        assert!(rendered.contains("dispatcher"));
        assert!(rendered.contains("backend unreachable"));
    }

    #[test]
    fn validation_errors_are_not_fatal() {
        assert!(!DispatchError::DuplicateJob(JobId::new("J1")).is_fatal());
        assert!(!DispatchError::Timeout(Duration::from_secs(1)).is_fatal());
    }
}
