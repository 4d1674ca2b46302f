use std::any::Any;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::timeout;

use crate::error::{DispatchError, Result};
use crate::rpc::endpoint::{EndpointHandle, EndpointState};
use crate::rpc::mailbox::Mailbox;
use crate::rpc::EndpointAddress;

/// A typed client for an endpoint's gateway operations, built over the
/// endpoint's mailbox. Every call enqueues a message and returns a future the
/// mailbox worker completes; failures come back as `Err` values, never as
/// synchronous panics.
pub trait Gateway: Sized {
    type Message: Send + 'static;

    fn from_mailbox(mailbox: Mailbox<Self::Message>, default_timeout: Duration) -> Self;
}

struct RegisteredEndpoint {
    /// Type-erased `Mailbox<M>`; recovered by `connect` for the matching
    /// gateway type.
    mailbox: Box<dyn Any + Send + Sync>,
    state_rx: watch::Receiver<EndpointState>,
}

/// Endpoint registry: addresses in, gateway clients out.
pub struct RpcService {
    connect_timeout: Duration,
    default_call_timeout: Duration,
    endpoints: Mutex<HashMap<EndpointAddress, RegisteredEndpoint>>,
}

impl RpcService {
    pub fn new(connect_timeout: Duration, default_call_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            default_call_timeout,
            endpoints: Mutex::new(HashMap::new()),
        }
    }

    /// Publish an endpoint's mailbox under its address and return that
    /// address for remote lookups.
    pub fn register_endpoint<M: Send + 'static>(
        &self,
        handle: &EndpointHandle<M>,
    ) -> Result<EndpointAddress> {
        let address = handle.address().clone();
        let mut endpoints = self.endpoints.lock().expect("endpoint registry poisoned");
        if endpoints.contains_key(&address) {
            return Err(DispatchError::Internal(format!(
                "endpoint already registered at {}",
                address
            )));
        }

        endpoints.insert(
            address.clone(),
            RegisteredEndpoint {
                mailbox: Box::new(handle.mailbox()),
                state_rx: handle.state_receiver(),
            },
        );
        tracing::info!(endpoint = %address, "Registered endpoint");
        Ok(address)
    }

    pub fn deregister_endpoint(&self, address: &EndpointAddress) {
        let mut endpoints = self.endpoints.lock().expect("endpoint registry poisoned");
        if endpoints.remove(address).is_some() {
            tracing::info!(endpoint = %address, "Deregistered endpoint");
        }
    }

    /// Resolve `address` to a typed gateway client.
    ///
    /// Fails with [`DispatchError::EndpointNotFound`] when nothing is
    /// registered there (or the endpoint has already stopped), and with
    /// [`DispatchError::ConnectionTimeout`] when the endpoint does not reach
    /// [`EndpointState::Started`] within the connect timeout.
    pub async fn connect<G: Gateway>(&self, address: &EndpointAddress) -> Result<G> {
        let (mailbox, mut state_rx) = {
            let endpoints = self.endpoints.lock().expect("endpoint registry poisoned");
            let registered = endpoints
                .get(address)
                .ok_or_else(|| DispatchError::EndpointNotFound(address.clone()))?;

            let mailbox = registered
                .mailbox
                .downcast_ref::<Mailbox<G::Message>>()
                .ok_or_else(|| {
                    DispatchError::Internal(format!(
                        "endpoint at {} does not serve the requested gateway type",
                        address
                    ))
                })?
                .clone();
            (mailbox, registered.state_rx.clone())
        };

        let ready = timeout(
            self.connect_timeout,
            state_rx.wait_for(|s| matches!(s, EndpointState::Started | EndpointState::Stopped)),
        )
        .await;

        match ready {
            Ok(Ok(state)) if *state == EndpointState::Started => {
                Ok(G::from_mailbox(mailbox, self.default_call_timeout))
            }
            Ok(_) => Err(DispatchError::EndpointNotFound(address.clone())),
            Err(_) => Err(DispatchError::ConnectionTimeout(address.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::fatal::CapturingFatalHandler;
    use crate::rpc::endpoint::{spawn_endpoint, Endpoint};
    use crate::rpc::mailbox::mailbox;

    struct EchoEndpoint {
        address: EndpointAddress,
    }

    #[async_trait]
    impl Endpoint for EchoEndpoint {
        type Message = tokio::sync::oneshot::Sender<&'static str>;

        fn address(&self) -> &EndpointAddress {
            &self.address
        }

        async fn on_start(&mut self) -> Result<()> {
            Ok(())
        }

        async fn handle(&mut self, msg: Self::Message) -> Result<()> {
            let _ = msg.send("pong");
            Ok(())
        }

        async fn on_stop(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Debug)]
    struct EchoGateway {
        mailbox: Mailbox<tokio::sync::oneshot::Sender<&'static str>>,
        timeout: Duration,
    }

    impl Gateway for EchoGateway {
        type Message = tokio::sync::oneshot::Sender<&'static str>;

        fn from_mailbox(mailbox: Mailbox<Self::Message>, default_timeout: Duration) -> Self {
            Self {
                mailbox,
                timeout: default_timeout,
            }
        }
    }

    fn spawn_echo(address: &str) -> EndpointHandle<tokio::sync::oneshot::Sender<&'static str>> {
        let (mb, rx) = mailbox();
        spawn_endpoint(
            EchoEndpoint {
                address: EndpointAddress::new(address),
            },
            mb,
            rx,
            CancellationToken::new(),
            Arc::new(CapturingFatalHandler::default()),
        )
    }

    #[tokio::test]
    async fn connect_routes_calls_into_the_mailbox() {
        let service = RpcService::new(Duration::from_secs(1), Duration::from_secs(1));
        let handle = spawn_echo("test://echo");
        service.register_endpoint(&handle).unwrap();

        let gateway: EchoGateway = service.connect(handle.address()).await.unwrap();
        let reply = gateway.mailbox.call(|tx| tx, gateway.timeout).await.unwrap();
        assert_eq!(reply, "pong");

        handle.close_async().await;
    }

    #[tokio::test]
    async fn connect_fails_for_unknown_address() {
        let service = RpcService::new(Duration::from_secs(1), Duration::from_secs(1));
        let err = service
            .connect::<EchoGateway>(&EndpointAddress::new("test://nowhere"))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::EndpointNotFound(_)));
    }

    #[tokio::test]
    async fn register_rejects_duplicate_address() {
        let service = RpcService::new(Duration::from_secs(1), Duration::from_secs(1));
        let first = spawn_echo("test://dup");
        let second = spawn_echo("test://dup");

        service.register_endpoint(&first).unwrap();
        assert!(service.register_endpoint(&second).is_err());

        first.close_async().await;
        second.close_async().await;
    }
}
