use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{DispatchError, Result};
use crate::fatal::FatalErrorHandler;
use crate::rpc::mailbox::{Mailbox, MailboxReceiver};
use crate::rpc::EndpointAddress;

/// Lifecycle of an endpoint. States advance monotonically; none is revisited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    Created,
    Starting,
    Started,
    Stopping,
    Stopped,
}

impl std::fmt::Display for EndpointState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndpointState::Created => write!(f, "created"),
            EndpointState::Starting => write!(f, "starting"),
            EndpointState::Started => write!(f, "started"),
            EndpointState::Stopping => write!(f, "stopping"),
            EndpointState::Stopped => write!(f, "stopped"),
        }
    }
}

/// An actor whose operations are serialized through a mailbox.
///
/// `handle` runs on the endpoint's single worker task. An `Err` returned from
/// `handle` is an error that escaped the handler (as opposed to one returned
/// to a caller through a reply channel) and escalates through the fatal-error
/// path; the mailbox keeps draining either way.
#[async_trait]
pub trait Endpoint: Send + 'static {
    type Message: Send + 'static;

    fn address(&self) -> &EndpointAddress;

    /// Extension hook run before any message is processed. Failure here
    /// aborts startup: the stop hook still runs for cleanup, and the wrapped
    /// failure is reported to the caller and the fatal-error handler.
    async fn on_start(&mut self) -> Result<()>;

    async fn handle(&mut self, msg: Self::Message) -> Result<()>;

    async fn on_stop(&mut self) -> Result<()>;
}

/// Handle to a spawned endpoint: enqueue messages, observe lifecycle state,
/// request shutdown.
pub struct EndpointHandle<M> {
    address: EndpointAddress,
    mailbox: Mailbox<M>,
    state_rx: watch::Receiver<EndpointState>,
    cancel: CancellationToken,
    startup_error: Arc<Mutex<Option<DispatchError>>>,
    join: JoinHandle<()>,
}

impl<M: Send> EndpointHandle<M> {
    pub fn address(&self) -> &EndpointAddress {
        &self.address
    }

    pub fn mailbox(&self) -> Mailbox<M> {
        self.mailbox.clone()
    }

    pub fn state(&self) -> EndpointState {
        *self.state_rx.borrow()
    }

    pub fn state_receiver(&self) -> watch::Receiver<EndpointState> {
        self.state_rx.clone()
    }

    /// Wait until the endpoint has completed startup. Returns the wrapped
    /// startup failure if the endpoint stopped before reaching
    /// [`EndpointState::Started`].
    pub async fn await_started(&self) -> Result<()> {
        let mut rx = self.state_rx.clone();
        let state = rx
            .wait_for(|s| matches!(s, EndpointState::Started | EndpointState::Stopped))
            .await
            .map(|s| *s)
            .unwrap_or(EndpointState::Stopped);

        match state {
            EndpointState::Started => Ok(()),
            _ => Err(self.take_startup_error()),
        }
    }

    /// Begin shutdown and wait for the endpoint to stop. Idempotent: calling
    /// this on an already stopping or stopped endpoint awaits the same
    /// terminal state without further side effects.
    pub async fn close_async(&self) {
        self.cancel.cancel();
        let mut rx = self.state_rx.clone();
        let _ = rx
            .wait_for(|s| matches!(s, EndpointState::Stopped))
            .await;
    }

    /// Abort the worker task outright. Test hook simulating a process crash:
    /// no stop hook runs, persisted state is left as-is.
    pub fn abort(&self) {
        self.join.abort();
    }

    fn take_startup_error(&self) -> DispatchError {
        self.startup_error
            .lock()
            .expect("startup error lock poisoned")
            .take()
            .unwrap_or_else(|| {
                DispatchError::Internal(format!(
                    "endpoint {} stopped before it was started",
                    self.address
                ))
            })
    }
}

/// Spawn the worker task that owns `endpoint` and drains `rx` in FIFO order.
///
/// The mailbox pair is created by the caller so the endpoint can keep a
/// sender to itself for self-published events.
pub fn spawn_endpoint<E: Endpoint>(
    mut endpoint: E,
    mailbox: Mailbox<E::Message>,
    mut rx: MailboxReceiver<E::Message>,
    cancel: CancellationToken,
    fatal_handler: Arc<dyn FatalErrorHandler>,
) -> EndpointHandle<E::Message> {
    let address = endpoint.address().clone();
    let (state_tx, state_rx) = watch::channel(EndpointState::Created);
    let startup_error: Arc<Mutex<Option<DispatchError>>> = Arc::new(Mutex::new(None));

    let task_address = address.clone();
    let task_cancel = cancel.clone();
    let task_startup_error = startup_error.clone();

    let join = tokio::spawn(async move {
        let set_state = |state: EndpointState| {
            tracing::debug!(endpoint = %task_address, state = %state, "Endpoint state changed");
            let _ = state_tx.send(state);
        };

        set_state(EndpointState::Starting);
        if let Err(start_err) = endpoint.on_start().await {
            set_state(EndpointState::Stopping);
            let cleanup = endpoint.on_stop().await.err().map(Box::new);

            let wrapped = DispatchError::Startup {
                address: task_address.clone(),
                source: Box::new(start_err),
                cleanup,
            };
            tracing::error!(endpoint = %task_address, error = %wrapped, "Endpoint startup failed");
            fatal_handler.on_fatal_error(&wrapped);
            // Stash the failure before the state flips to Stopped so a
            // caller woken by the transition always finds it.
            *task_startup_error
                .lock()
                .expect("startup error lock poisoned") = Some(wrapped);
            set_state(EndpointState::Stopped);
            return;
        }
        set_state(EndpointState::Started);

        loop {
            tokio::select! {
                _ = task_cancel.cancelled() => break,
                msg = rx.recv() => match msg {
                    Some(msg) => {
                        if let Err(e) = endpoint.handle(msg).await {
                            // Escaped the handler without a reply channel:
                            // escalate, keep draining the mailbox.
                            tracing::error!(endpoint = %task_address, error = %e, "Unhandled error in endpoint handler");
                            fatal_handler.on_fatal_error(&e);
                        }
                    }
                    None => break,
                },
            }
        }

        set_state(EndpointState::Stopping);

        // Let already-enqueued operations drain before the stop hook runs.
        rx.close();
        while let Some(msg) = rx.try_recv() {
            if let Err(e) = endpoint.handle(msg).await {
                tracing::error!(endpoint = %task_address, error = %e, "Unhandled error while draining mailbox");
                fatal_handler.on_fatal_error(&e);
            }
        }

        if let Err(e) = endpoint.on_stop().await {
            tracing::error!(endpoint = %task_address, error = %e, "Endpoint stop hook failed");
            fatal_handler.on_fatal_error(&e);
        }
        set_state(EndpointState::Stopped);
        tracing::info!(endpoint = %task_address, "Endpoint stopped");
    });

    EndpointHandle {
        address,
        mailbox,
        state_rx,
        cancel,
        startup_error,
        join,
    }
}
