//! Plain method forwarding through the dispatcher.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use stellar_rust::queue::InMemoryQueueSystem;
use stellar_rust::transport::{request_handler, QueueTransport, Transport};
use stellar_rust::{CallOptions, Command, Dispatcher, StellarError, TransportError};

async fn dispatcher_with_handlers() -> Dispatcher {
    let queue = Arc::new(InMemoryQueueSystem::new());
    let transport = QueueTransport::new(queue);

    transport
        .add_request_handler(
            "orders:order:get",
            request_handler(|cmd: Command| async move {
                Ok(json!({"orderId": cmd.body["orderId"], "status": "shipped"}))
            }),
        )
        .await
        .unwrap();
    transport
        .add_request_handler(
            "orders:create",
            request_handler(|_cmd: Command| async move { Ok(json!({"created": true})) }),
        )
        .await
        .unwrap();
    transport
        .add_request_handler(
            "orders:order:remove",
            request_handler(|_cmd: Command| async move {
                Err(StellarError::new("cannot remove shipped order"))
            }),
        )
        .await
        .unwrap();

    Dispatcher::new(Arc::new(transport))
}

#[tokio::test]
async fn get_builds_resource_path_method_url() {
    let dispatcher = dispatcher_with_handlers().await;
    let result = dispatcher
        .get("orders", "order", json!({"orderId": "o-1"}), CallOptions::new())
        .await
        .unwrap();
    assert_eq!(result, json!({"orderId": "o-1", "status": "shipped"}));
}

#[tokio::test]
async fn create_without_path_targets_resource_directly() {
    let dispatcher = dispatcher_with_handlers().await;
    let result = dispatcher
        .create("orders", "", json!({}), CallOptions::new())
        .await
        .unwrap();
    assert_eq!(result, json!({"created": true}));
}

#[tokio::test]
async fn handler_rejection_surfaces_as_handler_error() {
    let dispatcher = dispatcher_with_handlers().await;
    let result = dispatcher
        .remove("orders", "order", json!({"orderId": "o-1"}), CallOptions::new())
        .await;

    match result {
        Err(TransportError::Handler(error)) => {
            assert_eq!(error.message, "cannot remove shipped order");
            assert_eq!(
                error.message_keys()["general"],
                "general_cannot remove shipped order"
            );
        }
        other => panic!("expected Handler error, got {:?}", other),
    }
}

#[tokio::test]
async fn unknown_method_times_out() {
    let dispatcher = dispatcher_with_handlers().await;
    let result = dispatcher
        .request(
            "orders",
            "order",
            "archive",
            json!({}),
            CallOptions::new().timeout(Duration::from_millis(100)),
        )
        .await;
    assert!(matches!(result, Err(TransportError::Timeout)));
}
