use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::dispatcher::job::{Job, JobId, JobStatus};

/// In-memory view of the job set, owned exclusively by the dispatcher's
/// mailbox task. The persisted records are the source of truth; this table
/// follows them.
#[derive(Debug, Default)]
pub struct JobTable {
    jobs: HashMap<JobId, Job>,
}

impl JobTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new job. Returns false when the id is already taken.
    pub fn insert(&mut self, job: Job) -> bool {
        if self.jobs.contains_key(&job.id) {
            return false;
        }
        self.jobs.insert(job.id.clone(), job);
        true
    }

    pub fn contains(&self, id: &JobId) -> bool {
        self.jobs.contains_key(id)
    }

    pub fn get(&self, id: &JobId) -> Option<&Job> {
        self.jobs.get(id)
    }

    /// Apply a status transition. Returns the updated record, or `None` when
    /// the job is unknown or the transition would move backward.
    pub fn transition(
        &mut self,
        id: &JobId,
        next: JobStatus,
        failure: Option<String>,
    ) -> Option<&Job> {
        let job = self.jobs.get_mut(id)?;
        if !job.status.can_transition_to(next) {
            tracing::warn!(
                job_id = %id,
                from = %job.status,
                to = %next,
                "Ignoring non-monotonic status transition"
            );
            return None;
        }

        job.status = next;
        if next.is_terminal() && job.completed_at.is_none() {
            job.completed_at = Some(Utc::now());
        }
        if failure.is_some() {
            job.failure = failure;
        }
        Some(&self.jobs[id])
    }

    pub fn remove(&mut self, id: &JobId) -> Option<Job> {
        self.jobs.remove(id)
    }

    /// Ids of all non-terminal jobs, ordered by submission time.
    pub fn active_job_ids(&self) -> Vec<JobId> {
        let mut active: Vec<&Job> = self.jobs.values().filter(|j| !j.is_terminal()).collect();
        active.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at).then(a.id.cmp(&b.id)));
        active.into_iter().map(|j| j.id.clone()).collect()
    }

    /// Remove terminal jobs whose completion predates `now - retention`.
    /// Returns the removed ids so their persisted records can be deleted.
    pub fn sweep_terminal(&mut self, now: DateTime<Utc>, retention: chrono::Duration) -> Vec<JobId> {
        let cutoff = now - retention;
        let expired: Vec<JobId> = self
            .jobs
            .values()
            .filter(|j| j.is_terminal() && j.completed_at.map(|t| t <= cutoff).unwrap_or(true))
            .map(|j| j.id.clone())
            .collect();

        for id in &expired {
            self.jobs.remove(id);
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
