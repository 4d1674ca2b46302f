pub mod endpoint;
pub mod mailbox;
pub mod service;

pub use endpoint::{spawn_endpoint, Endpoint, EndpointHandle, EndpointState};
pub use mailbox::{mailbox, Mailbox, MailboxReceiver};
pub use service::{Gateway, RpcService};

/// Zero-payload success marker returned by mutating RPC calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acknowledge;

/// Identity an endpoint is registered under and looked up by.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointAddress(String);

impl EndpointAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EndpointAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EndpointAddress {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}
