use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::dispatcher::job::{Job, JobId};
use crate::error::PersistenceError;
use crate::persistence::Persistence;
use crate::rpc::Acknowledge;

/// In-memory job store. Survives dispatcher restarts within a process, which
/// is enough for the standalone deployment and for recovery tests.
#[derive(Default)]
pub struct MemoryPersistence {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    pub async fn get(&self, id: &JobId) -> Option<Job> {
        self.jobs.read().await.get(id).cloned()
    }
}

#[async_trait]
impl Persistence for MemoryPersistence {
    async fn store(&self, job: &Job) -> Result<Acknowledge, PersistenceError> {
        self.jobs.write().await.insert(job.id.clone(), job.clone());
        Ok(Acknowledge)
    }

    async fn load_all(&self) -> Result<Vec<Job>, PersistenceError> {
        let mut jobs: Vec<Job> = self.jobs.read().await.values().cloned().collect();
        jobs.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at).then(a.id.cmp(&b.id)));
        Ok(jobs)
    }

    async fn delete(&self, id: &JobId) -> Result<Acknowledge, PersistenceError> {
        if self.jobs.write().await.remove(id).is_none() {
            tracing::debug!(job_id = %id, "Delete of unknown job id ignored");
        }
        Ok(Acknowledge)
    }
}
