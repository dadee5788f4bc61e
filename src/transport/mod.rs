//! Transport — the abstract unit of communication between services.
//!
//! A transport exposes publish/subscribe, point-to-point request/response,
//! fire-and-forget, and local request-handler registration. Concrete
//! transports may be backed by a [`QueueSystem`](crate::queue::QueueSystem)
//! (see [`QueueTransport`]) or by a direct channel (an HTTP call, a
//! WebSocket frame).
//!
//! Capabilities are declared up front via [`Transport::capabilities`]; a
//! backend that cannot support an operation returns
//! [`TransportError::Unsupported`] immediately instead of silently
//! no-op-ing.

mod correlator;
mod queue_transport;

#[cfg(feature = "http")]
mod http;

pub(crate) use correlator::Correlator;
pub use queue_transport::{QueueTransport, TransportBuilder};

#[cfg(feature = "http")]
pub use http::{router, serve};

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::command::Command;
use crate::error::{StellarError, TransportError};
use crate::stopper::Stopper;

/// An operation a concrete transport may or may not support.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Capability {
    Publish,
    Subscribe,
    SubscribeGroup,
    Request,
    FireAndForget,
    RequestHandling,
}

/// The set of capabilities a transport declares.
#[derive(Clone, Debug, Default)]
pub struct CapabilitySet {
    capabilities: HashSet<Capability>,
}

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every capability; the full-featured transports use this.
    pub fn all() -> Self {
        Self::new()
            .with(Capability::Publish)
            .with(Capability::Subscribe)
            .with(Capability::SubscribeGroup)
            .with(Capability::Request)
            .with(Capability::FireAndForget)
            .with(Capability::RequestHandling)
    }

    pub fn with(mut self, capability: Capability) -> Self {
        self.capabilities.insert(capability);
        self
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// Local function invoked when a request arrives for a registered
/// queue name. Its error is serialized into the response command.
pub type RequestHandler = Arc<
    dyn Fn(Command) -> Pin<Box<dyn Future<Output = Result<Value, StellarError>> + Send>>
        + Send
        + Sync,
>;

/// Function invoked for each delivery on a subscribed channel.
pub type SubscriptionHandler =
    Arc<dyn Fn(Command) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Build a [`RequestHandler`] from an async closure.
pub fn request_handler<F, Fut>(f: F) -> RequestHandler
where
    F: Fn(Command) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, StellarError>> + Send + 'static,
{
    Arc::new(move |command| Box::pin(f(command)))
}

/// Build a [`SubscriptionHandler`] from an async closure.
pub fn subscription_handler<F, Fut>(f: F) -> SubscriptionHandler
where
    F: Fn(Command) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |command| Box::pin(f(command)))
}

/// The capability set every concrete transport implements.
#[async_trait]
pub trait Transport: Send + Sync {
    /// What this transport supports. Invoking anything else fails fast
    /// with [`TransportError::Unsupported`].
    fn capabilities(&self) -> CapabilitySet;

    /// Mint a fresh id: `{millis-since-fixed-origin}:{random-suffix}`.
    fn generate_id(&self) -> String;

    /// Best-effort broadcast on `channel`; no acknowledgment.
    async fn publish(&self, channel: &str, payload: Value) -> Result<(), TransportError>;

    /// Fan-out subscription: every subscriber gets every message.
    async fn subscribe(
        &self,
        channel: &str,
        handler: SubscriptionHandler,
    ) -> Result<Stopper, TransportError>;

    /// Competing-consumer subscription: of all processes registered under
    /// `group_id` on `channel`, exactly one receives each message.
    async fn subscribe_group(
        &self,
        group_id: &str,
        channel: &str,
        handler: SubscriptionHandler,
    ) -> Result<Stopper, TransportError>;

    /// Send a request command and await the matching response.
    ///
    /// Fails with [`TransportError::Timeout`] when no response carrying
    /// the matching `requestId` arrives within `timeout`.
    async fn request(&self, command: Command, timeout: Duration)
        -> Result<Command, TransportError>;

    /// Send without expecting a response; never fails on the remote
    /// handler's behalf.
    async fn fire_and_forget(&self, command: Command) -> Result<(), TransportError>;

    /// Register the local handler invoked when a request arrives
    /// targeting `queue_name`.
    async fn add_request_handler(
        &self,
        queue_name: &str,
        handler: RequestHandler,
    ) -> Result<(), TransportError>;

    /// Clear all in-flight correlation state and local registrations.
    /// Used for test isolation and reconnects.
    async fn reset(&self) -> Result<(), TransportError>;
}
