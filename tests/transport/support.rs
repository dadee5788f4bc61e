//! Shared helpers for transport tests.

use std::sync::Arc;
use std::time::Duration;

use stellar_rust::queue::InMemoryQueueSystem;
use stellar_rust::transport::QueueTransport;

/// A queue system shared by every node in a test scenario.
pub fn shared_queue() -> Arc<InMemoryQueueSystem> {
    Arc::new(InMemoryQueueSystem::new())
}

/// A transport node with a fixed id on the shared queue system.
pub fn node(queue: &Arc<InMemoryQueueSystem>, node_id: &str) -> QueueTransport<InMemoryQueueSystem> {
    QueueTransport::builder(Arc::clone(queue))
        .node_id(node_id)
        .build()
}

/// Receive from an mpsc channel, failing the test after a second.
pub async fn recv_within<T>(rx: &mut tokio::sync::mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for delivery")
        .expect("channel closed")
}

/// Assert that nothing arrives on the channel for a little while.
pub async fn assert_quiet<T>(rx: &mut tokio::sync::mpsc::UnboundedReceiver<T>) {
    let outcome = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
    assert!(outcome.is_err(), "unexpected delivery");
}
