//! Request/response correlation over the queue backend.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use stellar_rust::transport::{request_handler, Transport};
use stellar_rust::{Command, StellarError, TransportError};

use crate::support::{node, recv_within, shared_queue};

#[tokio::test]
async fn end_to_end_request_response() {
    let queue = shared_queue();
    let service = node(&queue, "service-node");
    let client = node(&queue, "client-node");

    service
        .add_request_handler(
            "svc:resource:get",
            request_handler(|_cmd: Command| async move { Ok(json!({"ok": true})) }),
        )
        .await
        .unwrap();

    let response = client
        .request(
            Command::request("svc:resource:get", "1", json!({})),
            Duration::from_secs(2),
        )
        .await
        .unwrap();

    // The response is a new command correlated back to the request.
    assert_eq!(response.headers.request_id.as_deref(), Some("1"));
    assert_ne!(response.headers.id, "1");
    assert_eq!(response.body, json!({"ok": true}));
}

#[tokio::test]
async fn handler_sees_request_body() {
    let queue = shared_queue();
    let service = node(&queue, "echo-service");
    let client = node(&queue, "echo-client");

    service
        .add_request_handler(
            "echo:message:create",
            request_handler(|cmd: Command| async move {
                Ok(json!({"echoed": cmd.body["text"]}))
            }),
        )
        .await
        .unwrap();

    let response = client
        .request(
            Command::request("echo:message:create", "", json!({"text": "hi"})),
            Duration::from_secs(2),
        )
        .await
        .unwrap();
    assert_eq!(response.body, json!({"echoed": "hi"}));
}

#[tokio::test]
async fn generated_ids_fill_empty_requests() {
    let queue = shared_queue();
    let service = node(&queue, "ids-service");
    let client = node(&queue, "ids-client");

    service
        .add_request_handler(
            "ids:thing:get",
            request_handler(|cmd: Command| async move { Ok(json!({"id": cmd.headers.id})) }),
        )
        .await
        .unwrap();

    let response = client
        .request(
            Command::request("ids:thing:get", "", json!({})),
            Duration::from_secs(2),
        )
        .await
        .unwrap();

    let seen = response.body["id"].as_str().unwrap().to_string();
    assert_eq!(response.headers.request_id.as_deref(), Some(seen.as_str()));
    // Generated shape: {millis}:{suffix}
    let (millis, suffix) = seen.split_once(':').unwrap();
    assert!(millis.parse::<u64>().is_ok());
    assert!(!suffix.is_empty());
}

#[tokio::test]
async fn handler_error_resolves_caller_with_failure() {
    let queue = shared_queue();
    let service = node(&queue, "err-service");
    let client = node(&queue, "err-client");

    service
        .add_request_handler(
            "billing:invoice:create",
            request_handler(|_cmd: Command| async move {
                let mut error = StellarError::new("invalid invoice");
                error.add_property_error("amount", "must be positive");
                Err(error)
            }),
        )
        .await
        .unwrap();

    let response = client
        .request(
            Command::request("billing:invoice:create", "", json!({"amount": -3})),
            Duration::from_secs(2),
        )
        .await
        .unwrap();

    assert!(response.is_error());
    let error = response.into_result().unwrap_err();
    assert_eq!(error.message, "invalid invoice");
    assert_eq!(error.message_keys()["amount"], "amount_must be positive");
}

#[tokio::test]
async fn request_without_handler_times_out() {
    let queue = shared_queue();
    let client = node(&queue, "lonely-client");

    let started = Instant::now();
    let result = client
        .request(
            Command::request("ghost:thing:get", "", json!({})),
            Duration::from_millis(150),
        )
        .await;

    assert!(matches!(result, Err(TransportError::Timeout)));
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(150), "failed early: {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(2), "hung: {:?}", elapsed);
    // The stale waiter is removed at timeout.
    assert_eq!(client.pending_requests(), 0);
}

#[tokio::test]
async fn duplicate_responses_resolve_once() {
    let queue = shared_queue();
    let client = node(&queue, "dup-client");

    let requester = client.clone();
    let call = tokio::spawn(async move {
        requester
            .request(
                Command::request("ghost:thing:get", "dup-1", json!({})),
                Duration::from_secs(2),
            )
            .await
    });

    // Give the request time to register its waiter.
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Two responses with the same requestId arrive on the node inbox.
    let request = Command::request("ghost:thing:get", "dup-1", json!({}));
    let first = Command::response_to(&request, "r1", json!({"winner": 1}));
    let second = Command::response_to(&request, "r2", json!({"winner": 2}));
    use stellar_rust::QueueSystem;
    queue
        .enqueue("stlr:n:dup-client:inbox", first)
        .await
        .unwrap();
    queue
        .enqueue("stlr:n:dup-client:inbox", second)
        .await
        .unwrap();

    let response = call.await.unwrap().unwrap();
    assert_eq!(response.body, json!({"winner": 1}));

    // The duplicate was dropped silently; nothing is pending.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(client.pending_requests(), 0);
}

#[tokio::test]
async fn concurrent_requests_correlate_by_request_id() {
    let queue = shared_queue();
    let service = node(&queue, "slow-service");
    let client = node(&queue, "ooo-client");

    service
        .add_request_handler(
            "svc:slow:get",
            request_handler(|_cmd: Command| async move {
                tokio::time::sleep(Duration::from_millis(150)).await;
                Ok(json!({"which": "slow"}))
            }),
        )
        .await
        .unwrap();
    service
        .add_request_handler(
            "svc:fast:get",
            request_handler(|_cmd: Command| async move { Ok(json!({"which": "fast"})) }),
        )
        .await
        .unwrap();

    let slow_client = client.clone();
    let slow = tokio::spawn(async move {
        slow_client
            .request(
                Command::request("svc:slow:get", "", json!({})),
                Duration::from_secs(2),
            )
            .await
    });
    // Let the slow request enter the service inbox first.
    tokio::time::sleep(Duration::from_millis(20)).await;
    let fast_client = client.clone();
    let fast = tokio::spawn(async move {
        fast_client
            .request(
                Command::request("svc:fast:get", "", json!({})),
                Duration::from_secs(2),
            )
            .await
    });

    assert_eq!(slow.await.unwrap().unwrap().body["which"], "slow");
    assert_eq!(fast.await.unwrap().unwrap().body["which"], "fast");
}

#[tokio::test]
async fn fire_and_forget_invokes_handler_without_response() {
    let queue = shared_queue();
    let service = node(&queue, "fnf-service");
    let client = node(&queue, "fnf-client");

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    service
        .add_request_handler(
            "audit:event:record",
            request_handler(move |cmd: Command| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(cmd.body);
                    Ok(json!({}))
                }
            }),
        )
        .await
        .unwrap();

    client
        .fire_and_forget(Command::fire_and_forget(
            "audit:event:record",
            json!({"what": "login"}),
        ))
        .await
        .unwrap();

    assert_eq!(recv_within(&mut rx).await, json!({"what": "login"}));
    // No correlation state was created on either side.
    assert_eq!(client.pending_requests(), 0);
}

#[tokio::test]
async fn reset_drops_pending_waiters_and_handlers() {
    let queue = shared_queue();
    let client = node(&queue, "reset-client");

    let requester = client.clone();
    let call = tokio::spawn(async move {
        requester
            .request(
                Command::request("ghost:thing:get", "", json!({})),
                Duration::from_secs(5),
            )
            .await
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(client.pending_requests(), 1);

    client.reset().await.unwrap();

    let result = call.await.unwrap();
    assert!(matches!(result, Err(TransportError::Reset)));
    assert_eq!(client.pending_requests(), 0);
    assert!(client.registered_handlers().is_empty());
}
