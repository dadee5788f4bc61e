//! Capability declarations and fail-fast behavior for partial transports.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use stellar_rust::transport::{
    Capability, CapabilitySet, RequestHandler, SubscriptionHandler, Transport,
};
use stellar_rust::{Command, IdSource, Stopper, TransportError};

/// A direct-channel transport that only supports request/response —
/// e.g. an HTTP callback adaptor with no pub/sub fabric behind it.
struct RequestOnlyTransport {
    ids: IdSource,
}

#[async_trait]
impl Transport for RequestOnlyTransport {
    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::new()
            .with(Capability::Request)
            .with(Capability::FireAndForget)
    }

    fn generate_id(&self) -> String {
        self.ids.generate()
    }

    async fn publish(&self, _channel: &str, _payload: Value) -> Result<(), TransportError> {
        Err(TransportError::Unsupported("publish"))
    }

    async fn subscribe(
        &self,
        _channel: &str,
        _handler: SubscriptionHandler,
    ) -> Result<Stopper, TransportError> {
        Err(TransportError::Unsupported("subscribe"))
    }

    async fn subscribe_group(
        &self,
        _group_id: &str,
        _channel: &str,
        _handler: SubscriptionHandler,
    ) -> Result<Stopper, TransportError> {
        Err(TransportError::Unsupported("subscribeGroup"))
    }

    async fn request(
        &self,
        command: Command,
        _timeout: Duration,
    ) -> Result<Command, TransportError> {
        Ok(Command::response_to(&command, self.ids.generate(), json!({})))
    }

    async fn fire_and_forget(&self, _command: Command) -> Result<(), TransportError> {
        Ok(())
    }

    async fn add_request_handler(
        &self,
        _queue_name: &str,
        _handler: RequestHandler,
    ) -> Result<(), TransportError> {
        Err(TransportError::Unsupported("addRequestHandler"))
    }

    async fn reset(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

#[tokio::test]
async fn undeclared_capabilities_fail_fast() {
    let transport = RequestOnlyTransport { ids: IdSource::new() };

    assert!(!transport.capabilities().supports(Capability::Publish));
    assert!(transport.capabilities().supports(Capability::Request));

    let result = transport.publish("news", json!({})).await;
    match result {
        Err(TransportError::Unsupported(capability)) => assert_eq!(capability, "publish"),
        other => panic!("expected Unsupported, got {:?}", other),
    }

    // Unsupported is a programming error: not retriable, distinct kind.
    let error = transport.subscribe_group("g", "c", stellar_rust::transport::subscription_handler(|_| async {})).await.unwrap_err();
    assert_eq!(error.kind(), stellar_rust::ErrorKind::Unsupported);
    assert_eq!(error.status_code(), 501);
}

#[tokio::test]
async fn queue_transport_declares_everything() {
    let queue = crate::support::shared_queue();
    let transport = crate::support::node(&queue, "full-node");
    for capability in [
        Capability::Publish,
        Capability::Subscribe,
        Capability::SubscribeGroup,
        Capability::Request,
        Capability::FireAndForget,
        Capability::RequestHandling,
    ] {
        assert!(transport.capabilities().supports(capability));
    }
}
