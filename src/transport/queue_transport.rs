//! Queue-backed transport.
//!
//! Wires a [`QueueSystem`] into the full [`Transport`] contract:
//!
//! - requests are enqueued to the target service's well-known inbox
//!   (`stlr:s:{service}:inbox`) and answered on the requesting node's
//!   response inbox (`stlr:n:{node}:inbox`), correlated by `requestId`;
//! - channel subscriptions register this node's subscription inbox with
//!   the backend and fan deliveries out to local handlers;
//! - group subscriptions share one inbox per group
//!   (`stlr:s:{group}:subscriptionInbox`) so registered members compete
//!   for each delivery.
//!
//! Both the inbound handler invocation and the outbound request dispatch
//! run through the configured middleware [`Pipeline`].

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use super::correlator::Correlator;
use super::{CapabilitySet, RequestHandler, SubscriptionHandler, Transport};
use crate::command::{Command, CommandType};
use crate::error::{StellarError, TransportError};
use crate::id::IdSource;
use crate::middleware::{Pipeline, PipelineError};
use crate::queue::{consumer, QueueSystem};
use crate::routing;
use crate::stopper::Stopper;

/// Local fan-out state for one subscribed channel.
struct ChannelSubscription {
    handlers: HashMap<u64, SubscriptionHandler>,
    /// Removes this node's backend registration for the channel.
    remover: Arc<Stopper>,
}

/// This node's membership state for one consumer group.
struct GroupMembership {
    /// Stops this node's competing consumer on the group inbox.
    consumer: Arc<Stopper>,
    /// One handler per channel; re-subscribing a channel replaces it.
    handlers: HashMap<String, SubscriptionHandler>,
    /// Backend registrations per channel.
    removers: HashMap<String, Arc<Stopper>>,
}

struct Inner<Q: QueueSystem> {
    queue: Arc<Q>,
    pipeline: Pipeline,
    ids: IdSource,
    node_id: String,
    correlator: Correlator,
    handlers: Mutex<HashMap<String, RequestHandler>>,
    subscriptions: tokio::sync::Mutex<HashMap<String, ChannelSubscription>>,
    groups: tokio::sync::Mutex<HashMap<String, GroupMembership>>,
    subscription_seq: AtomicU64,
    /// Inboxes whose consumer has been started (guarded across awaits).
    started_inboxes: tokio::sync::Mutex<HashSet<String>>,
}

/// Builder for [`QueueTransport`].
pub struct TransportBuilder<Q: QueueSystem> {
    queue: Arc<Q>,
    pipeline: Pipeline,
    node_id: Option<String>,
}

impl<Q: QueueSystem + 'static> TransportBuilder<Q> {
    /// Attach the middleware pipeline wrapping inbound handler invocation
    /// and outbound request dispatch.
    pub fn pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Fix the node id (defaults to a generated one). The node id
    /// determines this transport's response and subscription inboxes.
    pub fn node_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    pub fn build(self) -> QueueTransport<Q> {
        let ids = IdSource::new();
        let node_id = self.node_id.unwrap_or_else(|| ids.generate());
        QueueTransport {
            inner: Arc::new(Inner {
                queue: self.queue,
                pipeline: self.pipeline,
                ids,
                node_id,
                correlator: Correlator::new(),
                handlers: Mutex::new(HashMap::new()),
                subscriptions: tokio::sync::Mutex::new(HashMap::new()),
                groups: tokio::sync::Mutex::new(HashMap::new()),
                subscription_seq: AtomicU64::new(0),
                started_inboxes: tokio::sync::Mutex::new(HashSet::new()),
            }),
        }
    }
}

/// [`Transport`] implementation over any [`QueueSystem`].
///
/// ```
/// use std::sync::Arc;
/// use std::time::Duration;
/// use serde_json::json;
/// use stellar_rust::queue::InMemoryQueueSystem;
/// use stellar_rust::transport::{request_handler, QueueTransport, Transport};
/// use stellar_rust::Command;
///
/// # async fn demo() -> Result<(), stellar_rust::TransportError> {
/// let queue = Arc::new(InMemoryQueueSystem::new());
/// let transport = QueueTransport::new(Arc::clone(&queue));
///
/// transport
///     .add_request_handler(
///         "orders:order:get",
///         request_handler(|cmd: Command| async move { Ok(cmd.body) }),
///     )
///     .await?;
///
/// let response = transport
///     .request(
///         Command::request("orders:order:get", "", json!({"orderId": "o-1"})),
///         Duration::from_secs(5),
///     )
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct QueueTransport<Q: QueueSystem> {
    inner: Arc<Inner<Q>>,
}

impl<Q: QueueSystem> Clone for QueueTransport<Q> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<Q: QueueSystem + 'static> QueueTransport<Q> {
    /// Create a transport with a default pipeline and generated node id.
    pub fn new(queue: Arc<Q>) -> Self {
        Self::builder(queue).build()
    }

    pub fn builder(queue: Arc<Q>) -> TransportBuilder<Q> {
        TransportBuilder {
            queue,
            pipeline: Pipeline::new(),
            node_id: None,
        }
    }

    /// This transport's node id.
    pub fn node_id(&self) -> &str {
        &self.inner.node_id
    }

    /// In-flight requests awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.inner.correlator.pending_count()
    }

    /// Queue names with a registered local handler.
    pub fn registered_handlers(&self) -> Vec<String> {
        self.inner
            .handlers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    /// Dispatch an inbound command through the middleware pipeline to the
    /// registered handler, producing the response command to send back.
    ///
    /// Returns `None` for fire-and-forget commands and for commands no
    /// local handler is registered for (the latter are dropped so the
    /// caller's correlator times out rather than receiving a bogus
    /// response from the wrong party).
    pub async fn handle_inbound(&self, command: Command) -> Option<Command> {
        self.inner.handle_inbound(command).await
    }

    /// Start consuming `inbox` once; later calls for the same inbox are
    /// no-ops.
    async fn ensure_inbox(
        inner: &Arc<Inner<Q>>,
        inbox: &str,
        make_consumer: impl FnOnce() -> crate::queue::Consumer,
    ) -> Result<(), TransportError> {
        let mut started = inner.started_inboxes.lock().await;
        if started.contains(inbox) {
            return Ok(());
        }
        inner.queue.process(inbox, make_consumer()).await?;
        started.insert(inbox.to_string());
        Ok(())
    }

    /// Start the response-inbox consumer feeding the correlator.
    async fn ensure_response_inbox(inner: &Arc<Inner<Q>>) -> Result<(), TransportError> {
        let inbox = routing::node_inbox(&inner.node_id)
            .map_err(|_| TransportError::MissingQueueName)?;
        let resolver = Arc::clone(inner);
        Self::ensure_inbox(inner, &inbox, move || {
            consumer(move |response: Command| {
                let resolver = Arc::clone(&resolver);
                async move {
                    resolver.correlator.resolve(response);
                }
            })
        })
        .await
    }

    /// Start the subscription-inbox consumer fanning deliveries out to
    /// local channel handlers.
    async fn ensure_subscription_inbox(inner: &Arc<Inner<Q>>) -> Result<(), TransportError> {
        let inbox = routing::node_subscription_inbox(&inner.node_id)
            .map_err(|_| TransportError::MissingQueueName)?;
        let dispatcher = Arc::clone(inner);
        Self::ensure_inbox(inner, &inbox, move || {
            consumer(move |delivery: Command| {
                let dispatcher = Arc::clone(&dispatcher);
                async move {
                    let Some(channel) = delivery.headers.queue_name.clone() else {
                        debug!("dropping channel delivery without a channel");
                        return;
                    };
                    let handlers: Vec<SubscriptionHandler> = {
                        let subscriptions = dispatcher.subscriptions.lock().await;
                        subscriptions
                            .get(&channel)
                            .map(|s| s.handlers.values().cloned().collect())
                            .unwrap_or_default()
                    };
                    for handler in handlers {
                        handler(delivery.clone()).await;
                    }
                }
            })
        })
        .await
    }
}

impl<Q: QueueSystem + 'static> Inner<Q> {
    /// Enqueue `command` to `target_queue` through the outbound pipeline.
    async fn dispatch_outbound(
        &self,
        target_queue: &str,
        command: Command,
    ) -> Result<(), TransportError> {
        let queue = Arc::clone(&self.queue);
        let target = target_queue.to_string();
        self.pipeline
            .run(command, move |command| {
                let queue = Arc::clone(&queue);
                let target = target.clone();
                async move {
                    queue
                        .enqueue(&target, command)
                        .await
                        .map_err(TransportError::from)
                        .map_err(PipelineError::from)?;
                    Ok(Value::Null)
                }
            })
            .await
            .map(|_| ())
            .map_err(PipelineError::into_error)
    }

    async fn handle_inbound(&self, command: Command) -> Option<Command> {
        let queue_name = match command.headers.queue_name.clone() {
            Some(queue_name) => queue_name,
            None => {
                debug!("dropping inbound command without queueName");
                return None;
            }
        };
        let handler = self
            .handlers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(&queue_name)
            .cloned();
        let Some(handler) = handler else {
            debug!(queue_name = %queue_name, "no handler registered; dropping");
            return None;
        };

        let expects_response = command.headers.kind != CommandType::FireAndForget;
        let request = command.clone();
        let result = self
            .pipeline
            .run(command, move |command| {
                let handler = Arc::clone(&handler);
                async move { handler(command).await.map_err(PipelineError::from) }
            })
            .await;

        if !expects_response {
            if let Err(error) = result {
                debug!(error = %error, "fire-and-forget handler failed");
            }
            return None;
        }

        // Handler errors are always converted into a response command so
        // the requesting side resolves with a failure instead of hanging
        // until timeout.
        let mut response = match result {
            Ok(value) => Command::response_to(&request, self.ids.generate(), value),
            Err(error) => {
                let stellar = match error.into_error() {
                    TransportError::Handler(stellar) => stellar,
                    other => StellarError::new(other.to_string()),
                };
                Command::error_response_to(&request, self.ids.generate(), &stellar)
            }
        };
        response.headers.source = Some(self.node_id.clone());
        Some(response)
    }

    /// Send a response back to the inbox derived from the request's
    /// `source` header.
    async fn return_response(&self, reply_to: Option<String>, response: Command) {
        let Some(inbox) = reply_to.and_then(|source| routing::node_inbox(&source).ok()) else {
            warn!("request carried no source; dropping response");
            return;
        };
        if let Err(error) = self.queue.enqueue(&inbox, response).await {
            warn!(inbox = %inbox, error = %error, "failed to enqueue response");
        }
    }
}

#[async_trait]
impl<Q: QueueSystem + 'static> Transport for QueueTransport<Q> {
    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::all()
    }

    fn generate_id(&self) -> String {
        self.inner.ids.generate()
    }

    async fn publish(&self, channel: &str, payload: Value) -> Result<(), TransportError> {
        let subscribers = self.inner.queue.get_subscribers(channel).await?;
        let id = self.inner.ids.generate();
        for queue_name in subscribers {
            let delivery = Command::publish(channel, &id, payload.clone());
            // Best effort: a failing subscriber queue must not starve the
            // rest of the fan-out.
            if let Err(error) = self.inner.queue.enqueue(&queue_name, delivery).await {
                warn!(channel = %channel, queue_name = %queue_name, error = %error,
                    "publish delivery failed");
            }
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        channel: &str,
        handler: SubscriptionHandler,
    ) -> Result<Stopper, TransportError> {
        Self::ensure_subscription_inbox(&self.inner).await?;
        let inbox = routing::node_subscription_inbox(&self.inner.node_id)
            .map_err(|_| TransportError::MissingQueueName)?;

        let token = self.inner.subscription_seq.fetch_add(1, Ordering::SeqCst);
        {
            let mut subscriptions = self.inner.subscriptions.lock().await;
            let needs_registration = match subscriptions.get(channel) {
                Some(subscription) => subscription.remover.is_stopped(),
                None => true,
            };
            let remover = if needs_registration {
                Some(
                    self.inner
                        .queue
                        .register_subscriber(channel, &inbox)
                        .await?,
                )
            } else {
                None
            };
            let entry = subscriptions
                .entry(channel.to_string())
                .or_insert_with(|| ChannelSubscription {
                    handlers: HashMap::new(),
                    remover: Arc::new(Stopper::noop()),
                });
            if let Some(remover) = remover {
                entry.remover = Arc::new(remover);
            }
            entry.handlers.insert(token, handler);
        }

        let inner = Arc::clone(&self.inner);
        let channel = channel.to_string();
        Ok(Stopper::new(move || async move {
            let last_remover = {
                let mut subscriptions = inner.subscriptions.lock().await;
                match subscriptions.get_mut(&channel) {
                    Some(subscription) => {
                        subscription.handlers.remove(&token);
                        subscription
                            .handlers
                            .is_empty()
                            .then(|| Arc::clone(&subscription.remover))
                    }
                    None => None,
                }
            };
            // The last local subscriber takes the backend registration
            // down with it.
            if let Some(remover) = last_remover {
                remover.stop().await;
            }
        }))
    }

    async fn subscribe_group(
        &self,
        group_id: &str,
        channel: &str,
        handler: SubscriptionHandler,
    ) -> Result<Stopper, TransportError> {
        let inbox = routing::group_subscription_inbox(group_id)
            .map_err(|_| TransportError::MissingQueueName)?;

        {
            let mut groups = self.inner.groups.lock().await;
            let mut membership = match groups.remove(group_id) {
                Some(membership) => membership,
                None => {
                    // One competing consumer per group per node; deliveries
                    // are dispatched to this node's per-channel handler.
                    let dispatcher = Arc::clone(&self.inner);
                    let group_key = group_id.to_string();
                    let consumer_stopper = self
                        .inner
                        .queue
                        .process(
                            &inbox,
                            consumer(move |delivery: Command| {
                                let dispatcher = Arc::clone(&dispatcher);
                                let group_key = group_key.clone();
                                async move {
                                    let Some(channel) = delivery.headers.queue_name.clone()
                                    else {
                                        return;
                                    };
                                    let handler = {
                                        let groups = dispatcher.groups.lock().await;
                                        groups
                                            .get(&group_key)
                                            .and_then(|g| g.handlers.get(&channel).cloned())
                                    };
                                    match handler {
                                        Some(handler) => handler(delivery).await,
                                        None => debug!(channel = %channel,
                                            "group delivery for channel without handler"),
                                    }
                                }
                            }),
                        )
                        .await?;
                    GroupMembership {
                        consumer: Arc::new(consumer_stopper),
                        handlers: HashMap::new(),
                        removers: HashMap::new(),
                    }
                }
            };

            if !membership.removers.contains_key(channel) {
                match self.inner.queue.register_subscriber(channel, &inbox).await {
                    Ok(remover) => {
                        membership
                            .removers
                            .insert(channel.to_string(), Arc::new(remover));
                    }
                    Err(error) => {
                        // Keep whatever membership already existed.
                        groups.insert(group_id.to_string(), membership);
                        return Err(error.into());
                    }
                }
            }
            membership.handlers.insert(channel.to_string(), handler);
            groups.insert(group_id.to_string(), membership);
        }

        let inner = Arc::clone(&self.inner);
        let group_id = group_id.to_string();
        let channel = channel.to_string();
        Ok(Stopper::new(move || async move {
            let mut groups = inner.groups.lock().await;
            let Some(membership) = groups.get_mut(&group_id) else {
                return;
            };
            membership.handlers.remove(&channel);
            let channel_remover = membership.removers.remove(&channel);
            let group_done = membership.handlers.is_empty();
            let consumer_stopper = group_done.then(|| Arc::clone(&membership.consumer));
            if group_done {
                groups.remove(&group_id);
            }
            drop(groups);
            if let Some(remover) = channel_remover {
                remover.stop().await;
            }
            if let Some(stopper) = consumer_stopper {
                stopper.stop().await;
            }
        }))
    }

    async fn request(
        &self,
        mut command: Command,
        timeout: Duration,
    ) -> Result<Command, TransportError> {
        let queue_name = command
            .headers
            .queue_name
            .clone()
            .ok_or(TransportError::MissingQueueName)?;
        Self::ensure_response_inbox(&self.inner).await?;

        if command.headers.id.is_empty() {
            command.headers.id = self.inner.ids.generate();
        }
        command.headers.kind = CommandType::Request;
        command.headers.source = Some(self.inner.node_id.clone());
        command.headers.request_timeout = Some(timeout.as_millis() as u64);

        let id = command.headers.id.clone();
        let inbox = routing::service_inbox(&queue_name)
            .map_err(|_| TransportError::MissingQueueName)?;

        // Register before dispatch so a fast response cannot race the
        // waiter into existence.
        let rx = self.inner.correlator.register(&id);
        if let Err(error) = self.inner.dispatch_outbound(&inbox, command).await {
            self.inner.correlator.remove(&id);
            return Err(error);
        }
        self.inner.correlator.wait(&id, rx, timeout).await
    }

    async fn fire_and_forget(&self, mut command: Command) -> Result<(), TransportError> {
        let queue_name = command
            .headers
            .queue_name
            .clone()
            .ok_or(TransportError::MissingQueueName)?;
        if command.headers.id.is_empty() {
            command.headers.id = self.inner.ids.generate();
        }
        command.headers.kind = CommandType::FireAndForget;
        let inbox = routing::service_inbox(&queue_name)
            .map_err(|_| TransportError::MissingQueueName)?;
        self.inner.dispatch_outbound(&inbox, command).await
    }

    async fn add_request_handler(
        &self,
        queue_name: &str,
        handler: RequestHandler,
    ) -> Result<(), TransportError> {
        let inbox = routing::service_inbox(queue_name)
            .map_err(|_| TransportError::MissingQueueName)?;
        self.inner
            .handlers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(queue_name.to_string(), handler);

        let worker = Arc::clone(&self.inner);
        Self::ensure_inbox(&self.inner, &inbox, move || {
            consumer(move |command: Command| {
                let worker = Arc::clone(&worker);
                async move {
                    let reply_to = command.headers.source.clone();
                    if let Some(response) = worker.handle_inbound(command).await {
                        worker.return_response(reply_to, response).await;
                    }
                }
            })
        })
        .await
    }

    async fn reset(&self) -> Result<(), TransportError> {
        self.inner.correlator.clear();
        self.inner
            .handlers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clear();

        let removers: Vec<Arc<Stopper>> = {
            let mut subscriptions = self.inner.subscriptions.lock().await;
            let removers = subscriptions
                .values()
                .map(|s| Arc::clone(&s.remover))
                .collect();
            subscriptions.clear();
            removers
        };
        for remover in removers {
            remover.stop().await;
        }

        let group_stoppers: Vec<Arc<Stopper>> = {
            let mut groups = self.inner.groups.lock().await;
            let mut stoppers = Vec::new();
            for (_, membership) in groups.drain() {
                stoppers.push(Arc::clone(&membership.consumer));
                stoppers.extend(membership.removers.into_values());
            }
            stoppers
        };
        for stopper in group_stoppers {
            stopper.stop().await;
        }

        Ok(())
    }
}
