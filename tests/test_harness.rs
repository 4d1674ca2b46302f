//! Test harness for dispatcher integration tests.
//!
//! Provides a spawned-dispatcher fixture, a failure-injecting persistence
//! wrapper, and poll-until-condition helpers.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use jobmaster::config::DispatcherConfig;
use jobmaster::dispatcher::events::DispatchCause;
use jobmaster::dispatcher::job::{Job, JobId};
use jobmaster::dispatcher::{start_dispatcher, DispatcherGateway, DispatcherHandle};
use jobmaster::error::{PersistenceError, Result as DispatchResult};
use jobmaster::fatal::CapturingFatalHandler;
use jobmaster::persistence::{MemoryPersistence, Persistence};
use jobmaster::rpc::{Acknowledge, RpcService};
use jobmaster::worker::ChannelAllocator;

/// Timeout applied to gateway calls in tests.
pub const CALL_TIMEOUT: Duration = Duration::from_secs(2);

/// Dispatcher config with short timeouts for faster tests.
pub fn test_config(port: u16) -> DispatcherConfig {
    DispatcherConfig::new(format!("127.0.0.1:{}", port).parse().unwrap())
        .with_rpc_timeout_ms(2_000)
        // Long window by default so jobs do not vanish mid-test.
        .with_retention(600_000, 50)
}

/// A running dispatcher plus the collaborators tests observe.
pub struct TestDispatcher {
    pub handle: DispatcherHandle,
    pub gateway: DispatcherGateway,
    pub rpc_service: Arc<RpcService>,
    pub persistence: Arc<MemoryPersistence>,
    /// Worker side of the allocation seam: every forwarded job shows up
    /// here with its dispatch cause.
    pub dispatched: mpsc::UnboundedReceiver<(Job, DispatchCause)>,
    pub fatal: Arc<CapturingFatalHandler>,
}

impl TestDispatcher {
    /// Spawn a dispatcher with a fresh in-memory store.
    pub async fn spawn(port: u16) -> Self {
        Self::spawn_with_persistence(test_config(port), Arc::new(MemoryPersistence::new()))
            .await
            .expect("dispatcher should start")
    }

    /// Spawn a dispatcher over an existing store (e.g. one seeded with
    /// records, or one surviving a previous dispatcher's crash).
    pub async fn spawn_with_persistence(
        config: DispatcherConfig,
        persistence: Arc<MemoryPersistence>,
    ) -> DispatchResult<Self> {
        let fatal = Arc::new(CapturingFatalHandler::default());
        let (allocator, dispatched) = ChannelAllocator::new();
        let rpc_service = Arc::new(RpcService::new(CALL_TIMEOUT, CALL_TIMEOUT));

        let handle = start_dispatcher(
            config,
            persistence.clone() as Arc<dyn Persistence>,
            Arc::new(allocator),
            fatal.clone(),
            &rpc_service,
        )
        .await?;

        let gateway = rpc_service.connect(handle.address()).await?;

        Ok(Self {
            handle,
            gateway,
            rpc_service,
            persistence,
            dispatched,
            fatal,
        })
    }

    /// Await the next job forwarded to worker allocation.
    pub async fn next_dispatched(&mut self) -> Option<(Job, DispatchCause)> {
        tokio::time::timeout(Duration::from_secs(2), self.dispatched.recv())
            .await
            .ok()
            .flatten()
    }

    /// Assert that nothing reaches worker allocation within `window`.
    pub async fn assert_no_dispatch_within(&mut self, window: Duration) {
        let got = tokio::time::timeout(window, self.dispatched.recv()).await;
        assert!(
            got.is_err(),
            "expected no dispatch traffic, got {:?}",
            got.unwrap().map(|(job, cause)| (job.id, cause))
        );
    }
}

/// Persistence wrapper with switchable failure injection.
pub struct FlakyPersistence {
    inner: MemoryPersistence,
    fail_store: AtomicBool,
    fail_load: AtomicBool,
}

#[allow(dead_code)]
impl FlakyPersistence {
    pub fn new() -> Self {
        Self {
            inner: MemoryPersistence::new(),
            fail_store: AtomicBool::new(false),
            fail_load: AtomicBool::new(false),
        }
    }

    pub fn fail_stores(&self, fail: bool) {
        self.fail_store.store(fail, Ordering::SeqCst);
    }

    pub fn fail_loads(&self, fail: bool) {
        self.fail_load.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Persistence for FlakyPersistence {
    async fn store(&self, job: &Job) -> Result<Acknowledge, PersistenceError> {
        if self.fail_store.load(Ordering::SeqCst) {
            return Err(PersistenceError::Write("injected store failure".into()));
        }
        self.inner.store(job).await
    }

    async fn load_all(&self) -> Result<Vec<Job>, PersistenceError> {
        if self.fail_load.load(Ordering::SeqCst) {
            return Err(PersistenceError::Read("injected load failure".into()));
        }
        self.inner.load_all().await
    }

    async fn delete(&self, id: &JobId) -> Result<Acknowledge, PersistenceError> {
        self.inner.delete(id).await
    }
}

/// Wait for a condition to become true with timeout.
pub async fn wait_for<F, Fut>(
    condition: F,
    timeout_duration: Duration,
    poll_interval: Duration,
) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    while start.elapsed() < timeout_duration {
        if condition().await {
            return true;
        }
        tokio::time::sleep(poll_interval).await;
    }
    false
}

/// Assert a condition eventually becomes true.
#[allow(dead_code)]
pub async fn assert_eventually<F, Fut>(condition: F, timeout_duration: Duration, message: &str)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let result = wait_for(condition, timeout_duration, Duration::from_millis(20)).await;
    assert!(result, "{}", message);
}
