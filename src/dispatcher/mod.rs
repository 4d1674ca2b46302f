pub mod events;
pub mod job;
pub mod table;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::config::DispatcherConfig;
use crate::dispatcher::events::{DispatchJobEvent, ReDispatchJobEvent};
use crate::dispatcher::job::{ApplicationStatus, Job, JobId, JobPayload, JobStatus};
use crate::dispatcher::table::JobTable;
use crate::error::{DispatchError, Result};
use crate::fatal::FatalErrorHandler;
use crate::persistence::Persistence;
use crate::rpc::endpoint::{spawn_endpoint, Endpoint, EndpointHandle, EndpointState};
use crate::rpc::mailbox::{mailbox, Mailbox};
use crate::rpc::service::{Gateway, RpcService};
use crate::rpc::{Acknowledge, EndpointAddress};
use crate::worker::WorkerAllocator;

/// Operations and events marshaled through the dispatcher's mailbox.
///
/// Gateway operations carry a reply channel and fail the caller's future on
/// error; events have no caller and escalate fatally if their handler errors
/// out.
pub enum DispatcherMessage {
    SubmitJob {
        job_id: JobId,
        payload: JobPayload,
        reply: oneshot::Sender<Result<Acknowledge>>,
    },
    ListJobs {
        reply: oneshot::Sender<Result<Vec<JobId>>>,
    },
    StopJob {
        job_id: JobId,
        remove_from_persistence: bool,
        reply: oneshot::Sender<Result<Acknowledge>>,
    },
    ShutdownJobManager {
        reply: oneshot::Sender<Result<Acknowledge>>,
    },
    DispatchJob(DispatchJobEvent),
    ReDispatchJob(ReDispatchJobEvent),
    SweepRetention,
}

/// The endpoint address a dispatcher with this configuration registers under.
pub fn dispatcher_address(config: &DispatcherConfig) -> EndpointAddress {
    EndpointAddress::new(format!("jobmaster://{}/dispatcher", config.bind_addr))
}

/// The dispatcher: receives job submissions, persists them ahead of
/// dispatch, forwards them toward worker allocation, and recovers the job
/// set from persistence after a master restart.
pub struct Dispatcher {
    address: EndpointAddress,
    config: DispatcherConfig,
    persistence: Arc<dyn Persistence>,
    allocator: Arc<dyn WorkerAllocator>,
    jobs: JobTable,
    /// Sender onto this dispatcher's own mailbox, used for self-published
    /// dispatch events and retention ticks.
    mailbox: Mailbox<DispatcherMessage>,
    cancel: CancellationToken,
    shutdown_tx: watch::Sender<Option<ApplicationStatus>>,
    shutdown_requested: bool,
}

impl Dispatcher {
    async fn submit_job(&mut self, job_id: JobId, payload: JobPayload) -> Result<Acknowledge> {
        if self.shutdown_requested {
            return Err(DispatchError::ShuttingDown);
        }
        if self.jobs.contains(&job_id) {
            return Err(DispatchError::DuplicateJob(job_id));
        }

        let job = Job::new(job_id, payload);
        // Write-ahead: the job is not forwarded anywhere before the store is
        // acknowledged. A failed store fails this call; the client resubmits.
        self.persistence.store(&job).await?;

        tracing::info!(job_id = %job.id, "Job submitted");
        self.jobs.insert(job.clone());
        self.mailbox
            .enqueue(DispatcherMessage::DispatchJob(DispatchJobEvent::new_submission(job)))?;
        Ok(Acknowledge)
    }

    fn list_jobs(&self) -> Vec<JobId> {
        self.jobs.active_job_ids()
    }

    async fn stop_job(&mut self, job_id: JobId, remove_from_persistence: bool) -> Result<Acknowledge> {
        if !self.jobs.contains(&job_id) {
            return Err(DispatchError::JobNotFound(job_id));
        }

        let already_settled = self.jobs.get(&job_id).map(Job::is_terminal).unwrap_or(false);
        if !already_settled {
            if let Some(cancelled) = self.jobs.transition(&job_id, JobStatus::Cancelled, None) {
                let record = cancelled.clone();
                self.persistence.store(&record).await?;
                tracing::info!(job_id = %job_id, "Job cancelled");
            }
        }

        if remove_from_persistence {
            self.jobs.remove(&job_id);
            self.persistence.delete(&job_id).await?;
            tracing::info!(job_id = %job_id, "Job removed from persistence");
        }
        Ok(Acknowledge)
    }

    fn shutdown_job_manager(&mut self) -> Result<Acknowledge> {
        if !self.shutdown_requested {
            self.shutdown_requested = true;
            tracing::info!(endpoint = %self.address, "Shutdown requested, draining in-flight operations");
            // Already-enqueued mailbox items drain before the stop hook
            // completes the shutdown future.
            self.cancel.cancel();
        }
        Ok(Acknowledge)
    }

    async fn on_dispatch_job(&mut self, event: DispatchJobEvent) -> Result<()> {
        let job_id = event.job.id.clone();

        // Re-check the table: the job may have settled while this event sat
        // in the mailbox.
        let current = match self.jobs.get(&job_id) {
            Some(job) if !job.is_terminal() => job.clone(),
            _ => {
                tracing::debug!(job_id = %job_id, cause = %event.cause, "Skipping dispatch of settled job");
                return Ok(());
            }
        };

        match self.allocator.allocate(&current, event.cause).await {
            Ok(()) => {
                tracing::info!(job_id = %job_id, cause = %event.cause, "Job forwarded to worker allocation");
                if let Some(dispatched) = self.jobs.transition(&job_id, JobStatus::Dispatched, None)
                {
                    let record = dispatched.clone();
                    if let Err(e) = self.persistence.store(&record).await {
                        // The record stays Submitted in the store; recovery
                        // re-dispatches it, so at-least-once still holds.
                        tracing::warn!(job_id = %job_id, error = %e, "Failed to persist dispatched status");
                    }
                }
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, cause = %event.cause, error = %e, "Worker allocation failed");
                if let Some(failed) =
                    self.jobs
                        .transition(&job_id, JobStatus::Failed, Some(e.to_string()))
                {
                    let record = failed.clone();
                    if let Err(pe) = self.persistence.store(&record).await {
                        tracing::warn!(job_id = %job_id, error = %pe, "Failed to persist failure status");
                    }
                }
            }
        }
        Ok(())
    }

    async fn on_redispatch_job(&mut self, event: ReDispatchJobEvent) -> Result<()> {
        tracing::info!(job_id = %event.job.id, "Re-dispatching recovered job");
        let cause = event.cause();
        self.on_dispatch_job(DispatchJobEvent {
            job: event.job,
            cause,
        })
        .await
    }

    async fn sweep_retention(&mut self) {
        let removed = self
            .jobs
            .sweep_terminal(Utc::now(), self.config.retention_window());
        for job_id in removed {
            tracing::debug!(job_id = %job_id, "Retention sweep tombstoned terminal job");
            if let Err(e) = self.persistence.delete(&job_id).await {
                tracing::warn!(job_id = %job_id, error = %e, "Failed to delete record during retention sweep");
            }
        }
    }

    fn spawn_retention_ticker(&self) {
        let mailbox = self.mailbox.clone();
        let cancel = self.cancel.clone();
        let mut interval = tokio::time::interval(self.config.retention_sweep_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        if mailbox.enqueue(DispatcherMessage::SweepRetention).is_err() {
                            break;
                        }
                    }
                }
            }
        });
    }
}

#[async_trait]
impl Endpoint for Dispatcher {
    type Message = DispatcherMessage;

    fn address(&self) -> &EndpointAddress {
        &self.address
    }

    /// Recovery runs before any submission is accepted: the full persisted
    /// job set is loaded, and every job not known to have settled is
    /// re-dispatched. A dispatcher that cannot read the persisted state must
    /// not run with partial knowledge, so a load failure fails startup.
    async fn on_start(&mut self) -> Result<()> {
        tracing::info!(
            endpoint = %self.address,
            backend = %self.config.persistence.backend,
            "Starting dispatcher"
        );

        let records = self.persistence.load_all().await?;
        let total = records.len();
        let mut recovered = 0usize;
        for job in records {
            let recoverable = matches!(job.status, JobStatus::Submitted | JobStatus::Dispatched);
            if recoverable {
                self.mailbox
                    .enqueue(DispatcherMessage::ReDispatchJob(ReDispatchJobEvent::new(
                        job.clone(),
                    )))?;
                recovered += 1;
            }
            self.jobs.insert(job);
        }
        if total > 0 {
            tracing::info!(total, recovered, "Recovered persisted job set");
        }

        self.spawn_retention_ticker();
        Ok(())
    }

    async fn handle(&mut self, msg: DispatcherMessage) -> Result<()> {
        match msg {
            DispatcherMessage::SubmitJob {
                job_id,
                payload,
                reply,
            } => {
                let result = self.submit_job(job_id, payload).await;
                let _ = reply.send(result);
            }
            DispatcherMessage::ListJobs { reply } => {
                let _ = reply.send(Ok(self.list_jobs()));
            }
            DispatcherMessage::StopJob {
                job_id,
                remove_from_persistence,
                reply,
            } => {
                let result = self.stop_job(job_id, remove_from_persistence).await;
                let _ = reply.send(result);
            }
            DispatcherMessage::ShutdownJobManager { reply } => {
                let result = self.shutdown_job_manager();
                let _ = reply.send(result);
            }
            DispatcherMessage::DispatchJob(event) => self.on_dispatch_job(event).await?,
            DispatcherMessage::ReDispatchJob(event) => self.on_redispatch_job(event).await?,
            DispatcherMessage::SweepRetention => self.sweep_retention().await,
        }
        Ok(())
    }

    async fn on_stop(&mut self) -> Result<()> {
        tracing::info!(endpoint = %self.address, "Stopping dispatcher");
        let status = if self.shutdown_requested {
            ApplicationStatus::Succeeded
        } else {
            ApplicationStatus::Unknown
        };
        // Completed at most once, even when stop follows an earlier shutdown.
        self.shutdown_tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(status);
                true
            } else {
                false
            }
        });
        Ok(())
    }
}

/// Client for the dispatcher's gateway operations. Every call is marshaled
/// into the dispatcher's mailbox and returns once the mailbox worker
/// completes it, or fails with [`DispatchError::Timeout`] first.
#[derive(Debug)]
pub struct DispatcherGateway {
    mailbox: Mailbox<DispatcherMessage>,
    default_timeout: Duration,
}

impl Gateway for DispatcherGateway {
    type Message = DispatcherMessage;

    fn from_mailbox(mailbox: Mailbox<DispatcherMessage>, default_timeout: Duration) -> Self {
        Self {
            mailbox,
            default_timeout,
        }
    }
}

impl DispatcherGateway {
    pub async fn submit_job(
        &self,
        job_id: JobId,
        payload: JobPayload,
        timeout: Duration,
    ) -> Result<Acknowledge> {
        self.mailbox
            .call(
                |reply| DispatcherMessage::SubmitJob {
                    job_id,
                    payload,
                    reply,
                },
                timeout,
            )
            .await?
    }

    pub async fn list_jobs(&self, timeout: Duration) -> Result<Vec<JobId>> {
        self.mailbox
            .call(|reply| DispatcherMessage::ListJobs { reply }, timeout)
            .await?
    }

    pub async fn stop_job(
        &self,
        job_id: JobId,
        remove_from_persistence: bool,
        timeout: Duration,
    ) -> Result<Acknowledge> {
        self.mailbox
            .call(
                |reply| DispatcherMessage::StopJob {
                    job_id,
                    remove_from_persistence,
                    reply,
                },
                timeout,
            )
            .await?
    }

    pub async fn shutdown_job_manager(&self) -> Result<Acknowledge> {
        self.mailbox
            .call(
                |reply| DispatcherMessage::ShutdownJobManager { reply },
                self.default_timeout,
            )
            .await?
    }
}

/// Handle to a running dispatcher endpoint.
pub struct DispatcherHandle {
    endpoint: EndpointHandle<DispatcherMessage>,
    shutdown_rx: watch::Receiver<Option<ApplicationStatus>>,
}

impl std::fmt::Debug for DispatcherHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatcherHandle").finish_non_exhaustive()
    }
}

impl DispatcherHandle {
    pub fn address(&self) -> &EndpointAddress {
        self.endpoint.address()
    }

    pub fn state(&self) -> EndpointState {
        self.endpoint.state()
    }

    /// Local gateway bound directly to the dispatcher's mailbox. Remote
    /// callers go through [`RpcService::connect`] instead.
    pub fn gateway(&self, default_timeout: Duration) -> DispatcherGateway {
        DispatcherGateway::from_mailbox(self.endpoint.mailbox(), default_timeout)
    }

    /// Resolves with the process-wide terminal status once the dispatcher
    /// has shut down and drained.
    pub async fn shutdown_future(&self) -> ApplicationStatus {
        let mut rx = self.shutdown_rx.clone();
        let status = match rx.wait_for(|status| status.is_some()).await {
            Ok(status) => (*status).unwrap_or(ApplicationStatus::Unknown),
            Err(_) => ApplicationStatus::Unknown,
        };
        status
    }

    pub async fn close_async(&self) {
        self.endpoint.close_async().await;
    }

    /// Kill the dispatcher without running any cleanup. Simulates a master
    /// crash in failover tests.
    pub fn abort(&self) {
        self.endpoint.abort();
    }
}

/// Assemble and start a dispatcher endpoint: mailbox wired for self-published
/// events, endpoint spawned, address registered, startup (including
/// persistence recovery) awaited.
pub async fn start_dispatcher(
    config: DispatcherConfig,
    persistence: Arc<dyn Persistence>,
    allocator: Arc<dyn WorkerAllocator>,
    fatal_handler: Arc<dyn FatalErrorHandler>,
    rpc_service: &RpcService,
) -> Result<DispatcherHandle> {
    let address = dispatcher_address(&config);
    let (mb, rx) = mailbox();
    let cancel = CancellationToken::new();
    let (shutdown_tx, shutdown_rx) = watch::channel(None);

    let dispatcher = Dispatcher {
        address: address.clone(),
        config,
        persistence,
        allocator,
        jobs: JobTable::new(),
        mailbox: mb.clone(),
        cancel: cancel.clone(),
        shutdown_tx,
        shutdown_requested: false,
    };

    let endpoint = spawn_endpoint(dispatcher, mb, rx, cancel, fatal_handler);
    if let Err(e) = rpc_service.register_endpoint(&endpoint) {
        endpoint.close_async().await;
        return Err(e);
    }

    if let Err(e) = endpoint.await_started().await {
        rpc_service.deregister_endpoint(&address);
        return Err(e);
    }
    Ok(DispatcherHandle {
        endpoint,
        shutdown_rx,
    })
}
