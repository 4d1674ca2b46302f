use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::dispatcher::job::{Job, JobId};
use crate::error::PersistenceError;
use crate::persistence::Persistence;
use crate::rpc::Acknowledge;

/// JSON document store on the local filesystem.
///
/// The whole job set is serialized on every mutation and swapped in with an
/// atomic rename, so a crash mid-write leaves the previous store intact. Fine
/// for a single master's job set; larger deployments plug in an external
/// document store behind the same trait.
pub struct FilePersistence {
    path: PathBuf,
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl FilePersistence {
    /// Open the store at `path`, loading any existing records.
    pub async fn open(path: PathBuf) -> Result<Self, PersistenceError> {
        let jobs = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let records: Vec<Job> = serde_json::from_slice(&bytes)?;
                records.into_iter().map(|j| (j.id.clone(), j)).collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(PersistenceError::Io(e)),
        };

        tracing::info!(path = %path.display(), jobs = jobs.len(), "Opened file persistence");
        Ok(Self {
            path,
            jobs: RwLock::new(jobs),
        })
    }

    async fn flush(&self, jobs: &HashMap<JobId, Job>) -> Result<(), PersistenceError> {
        let mut records: Vec<&Job> = jobs.values().collect();
        records.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at).then(a.id.cmp(&b.id)));
        let bytes = serde_json::to_vec_pretty(&records)?;

        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| PersistenceError::Write(format!("{}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| PersistenceError::Write(format!("{}: {}", self.path.display(), e)))?;
        Ok(())
    }
}

#[async_trait]
impl Persistence for FilePersistence {
    async fn store(&self, job: &Job) -> Result<Acknowledge, PersistenceError> {
        let mut jobs = self.jobs.write().await;
        jobs.insert(job.id.clone(), job.clone());
        self.flush(&jobs).await?;
        Ok(Acknowledge)
    }

    async fn load_all(&self) -> Result<Vec<Job>, PersistenceError> {
        let mut jobs: Vec<Job> = self.jobs.read().await.values().cloned().collect();
        jobs.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at).then(a.id.cmp(&b.id)));
        Ok(jobs)
    }

    async fn delete(&self, id: &JobId) -> Result<Acknowledge, PersistenceError> {
        let mut jobs = self.jobs.write().await;
        if jobs.remove(id).is_some() {
            self.flush(&jobs).await?;
        } else {
            tracing::debug!(job_id = %id, "Delete of unknown job id ignored");
        }
        Ok(Acknowledge)
    }
}
