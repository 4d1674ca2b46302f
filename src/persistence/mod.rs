pub mod file;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{PersistenceBackend, PersistenceConfig};
use crate::dispatcher::job::{Job, JobId};
use crate::error::PersistenceError;
use crate::rpc::Acknowledge;

pub use file::FilePersistence;
pub use memory::MemoryPersistence;

/// Durable store for job records.
///
/// `store` is an upsert and must be acknowledged before the job is forwarded
/// anywhere (write-ahead discipline). `load_all` is used only during startup
/// recovery and returns records ordered by submission time. The dispatcher
/// never retries a failed write itself; the failure fails the originating
/// call and the client decides whether to resubmit.
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn store(&self, job: &Job) -> Result<Acknowledge, PersistenceError>;

    async fn load_all(&self) -> Result<Vec<Job>, PersistenceError>;

    async fn delete(&self, id: &JobId) -> Result<Acknowledge, PersistenceError>;
}

/// Build the persistence backend selected by configuration.
pub async fn create_persistence(
    config: &PersistenceConfig,
) -> Result<Arc<dyn Persistence>, PersistenceError> {
    match config.backend {
        PersistenceBackend::Memory => Ok(Arc::new(MemoryPersistence::new())),
        PersistenceBackend::File => {
            let path = config.file_path.clone().ok_or_else(|| {
                PersistenceError::Read("file backend requires a store path".into())
            })?;
            Ok(Arc::new(FilePersistence::open(path).await?))
        }
    }
}
