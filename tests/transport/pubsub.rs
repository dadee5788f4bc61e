//! Publish/subscribe: fan-out channels and competing consumer groups.

use serde_json::json;
use stellar_rust::transport::{subscription_handler, Transport};
use stellar_rust::Command;

use crate::support::{assert_quiet, node, recv_within, shared_queue};

#[tokio::test]
async fn publish_reaches_every_subscriber() {
    let queue = shared_queue();
    let publisher = node(&queue, "pub-node");
    let sub_a = node(&queue, "sub-a");
    let sub_b = node(&queue, "sub-b");

    let (tx_a, mut rx_a) = tokio::sync::mpsc::unbounded_channel();
    let (tx_b, mut rx_b) = tokio::sync::mpsc::unbounded_channel();

    sub_a
        .subscribe(
            "news",
            subscription_handler(move |cmd: Command| {
                let tx = tx_a.clone();
                async move {
                    let _ = tx.send(cmd.body);
                }
            }),
        )
        .await
        .unwrap();
    sub_b
        .subscribe(
            "news",
            subscription_handler(move |cmd: Command| {
                let tx = tx_b.clone();
                async move {
                    let _ = tx.send(cmd.body);
                }
            }),
        )
        .await
        .unwrap();

    publisher
        .publish("news", json!({"headline": "hello"}))
        .await
        .unwrap();

    assert_eq!(recv_within(&mut rx_a).await, json!({"headline": "hello"}));
    assert_eq!(recv_within(&mut rx_b).await, json!({"headline": "hello"}));
}

#[tokio::test]
async fn delivery_carries_channel_in_queue_name() {
    let queue = shared_queue();
    let publisher = node(&queue, "pub-chan");
    let subscriber = node(&queue, "sub-chan");

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    subscriber
        .subscribe(
            "ticks",
            subscription_handler(move |cmd: Command| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(cmd.headers.queue_name.clone());
                }
            }),
        )
        .await
        .unwrap();

    publisher.publish("ticks", json!(1)).await.unwrap();
    assert_eq!(recv_within(&mut rx).await.as_deref(), Some("ticks"));
}

#[tokio::test]
async fn publish_without_subscribers_is_a_no_op() {
    let queue = shared_queue();
    let publisher = node(&queue, "pub-nobody");
    publisher.publish("empty", json!({})).await.unwrap();
}

#[tokio::test]
async fn stopped_subscription_receives_nothing() {
    let queue = shared_queue();
    let publisher = node(&queue, "pub-stop");
    let subscriber = node(&queue, "sub-stop");

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let stopper = subscriber
        .subscribe(
            "alerts",
            subscription_handler(move |cmd: Command| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(cmd.body);
                }
            }),
        )
        .await
        .unwrap();

    publisher.publish("alerts", json!({"n": 1})).await.unwrap();
    assert_eq!(recv_within(&mut rx).await, json!({"n": 1}));

    stopper.stop().await;
    stopper.stop().await; // idempotent

    publisher.publish("alerts", json!({"n": 2})).await.unwrap();
    assert_quiet(&mut rx).await;
}

#[tokio::test]
async fn two_local_subscribers_both_receive() {
    let queue = shared_queue();
    let publisher = node(&queue, "pub-local");
    let subscriber = node(&queue, "sub-local");

    let (tx_1, mut rx_1) = tokio::sync::mpsc::unbounded_channel();
    let (tx_2, mut rx_2) = tokio::sync::mpsc::unbounded_channel();

    subscriber
        .subscribe(
            "feed",
            subscription_handler(move |cmd: Command| {
                let tx = tx_1.clone();
                async move {
                    let _ = tx.send(cmd.body);
                }
            }),
        )
        .await
        .unwrap();
    let second = subscriber
        .subscribe(
            "feed",
            subscription_handler(move |cmd: Command| {
                let tx = tx_2.clone();
                async move {
                    let _ = tx.send(cmd.body);
                }
            }),
        )
        .await
        .unwrap();

    publisher.publish("feed", json!({"n": 1})).await.unwrap();
    assert_eq!(recv_within(&mut rx_1).await, json!({"n": 1}));
    assert_eq!(recv_within(&mut rx_2).await, json!({"n": 1}));

    // Stopping one local subscriber leaves the other attached.
    second.stop().await;
    publisher.publish("feed", json!({"n": 2})).await.unwrap();
    assert_eq!(recv_within(&mut rx_1).await, json!({"n": 2}));
    assert_quiet(&mut rx_2).await;
}

#[tokio::test]
async fn group_members_compete_for_deliveries() {
    let queue = shared_queue();
    let publisher = node(&queue, "pub-group");
    let member_a = node(&queue, "member-a");
    let member_b = node(&queue, "member-b");

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    for (member, label) in [(&member_a, "a"), (&member_b, "b")] {
        let tx = tx.clone();
        member
            .subscribe_group(
                "workers",
                "jobs",
                subscription_handler(move |cmd: Command| {
                    let tx = tx.clone();
                    let label = label.to_string();
                    async move {
                        let _ = tx.send((label, cmd.body));
                    }
                }),
            )
            .await
            .unwrap();
    }

    for i in 0..10 {
        publisher.publish("jobs", json!({"n": i})).await.unwrap();
    }

    // Exactly one member receives each published message.
    let mut seen = Vec::new();
    for _ in 0..10 {
        seen.push(recv_within(&mut rx).await);
    }
    assert_eq!(seen.len(), 10);
    assert_quiet(&mut rx).await;
}

#[tokio::test]
async fn distinct_groups_each_receive_once() {
    let queue = shared_queue();
    let publisher = node(&queue, "pub-groups");
    let alpha = node(&queue, "alpha-member");
    let beta = node(&queue, "beta-member");

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    for (member, group) in [(&alpha, "alpha"), (&beta, "beta")] {
        let tx = tx.clone();
        member
            .subscribe_group(
                group,
                "events",
                subscription_handler(move |cmd: Command| {
                    let tx = tx.clone();
                    let group = group.to_string();
                    async move {
                        let _ = tx.send((group, cmd.body));
                    }
                }),
            )
            .await
            .unwrap();
    }

    publisher.publish("events", json!({"n": 1})).await.unwrap();

    let mut groups: Vec<String> = vec![recv_within(&mut rx).await.0, recv_within(&mut rx).await.0];
    groups.sort();
    assert_eq!(groups, vec!["alpha".to_string(), "beta".to_string()]);
    assert_quiet(&mut rx).await;
}

#[tokio::test]
async fn group_stopper_removes_membership() {
    let queue = shared_queue();
    let publisher = node(&queue, "pub-leave");
    let member = node(&queue, "leaver");

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let tx_clone = tx.clone();
    let stopper = member
        .subscribe_group(
            "solo",
            "work",
            subscription_handler(move |cmd: Command| {
                let tx = tx_clone.clone();
                async move {
                    let _ = tx.send(cmd.body);
                }
            }),
        )
        .await
        .unwrap();

    publisher.publish("work", json!({"n": 1})).await.unwrap();
    assert_eq!(recv_within(&mut rx).await, json!({"n": 1}));

    stopper.stop().await;
    publisher.publish("work", json!({"n": 2})).await.unwrap();
    assert_quiet(&mut rx).await;
}
