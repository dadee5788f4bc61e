//! Queue System — abstract FIFO channels with named queues and
//! channel subscriber registration.
//!
//! Any backend (in-process, Redis-style job queue, broker client) plugs in
//! by implementing [`QueueSystem`]. Transports that need queueing are built
//! against this contract only.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 QueueTransport (per node)                    │
//! │  request() / publish() / subscribe() / addRequestHandler()  │
//! └─────────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     QueueSystem trait                        │
//! │  enqueue / process / stopProcessing                         │
//! │  getSubscribers / registerSubscriber                        │
//! └─────────────────────────────────────────────────────────────┘
//!          │                  │                     │
//!          ▼                  ▼                     ▼
//! ┌──────────────────┐  ┌─────────────┐  ┌─────────────────────┐
//! │InMemoryQueueSystem│  │ RedisQueue  │  │   BrokerQueue       │
//! │   (included)      │  │ (external)  │  │    (external)       │
//! └──────────────────┘  └─────────────┘  └─────────────────────┘
//! ```
//!
//! Delivery is at-least-once: a consumer may see a command again after a
//! backend redelivery. Backends that redeliver SHOULD deduplicate at their
//! boundary; the transport layer above does not keep a seen-ids table.

mod instrument;
mod memory;

pub use instrument::{
    ConsumeEvent, DestinationType, Instrumentation, NoopInstrumentation, ProduceEvent,
};
pub use memory::{InMemoryQueueSystem, QueueConfig};

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use crate::command::Command;
use crate::error::QueueError;
use crate::stopper::Stopper;

/// Callback invoked once per delivered command.
pub type Consumer =
    Arc<dyn Fn(Command) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Build a [`Consumer`] from an async closure.
pub fn consumer<F, Fut>(f: F) -> Consumer
where
    F: Fn(Command) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |command| Box::pin(f(command)))
}

/// Abstract FIFO channel contract every queue backend must implement.
#[async_trait]
pub trait QueueSystem: Send + Sync {
    /// Accept `command` into the named queue.
    ///
    /// The returned `Ok` acknowledges acceptance into the queue only, not
    /// that anything processed it.
    async fn enqueue(&self, queue_name: &str, command: Command) -> Result<(), QueueError>;

    /// Register a pull-based consumer on the named queue.
    ///
    /// The consumer is invoked once per delivered command, sequentially,
    /// with at-least-once semantics. Registering additional consumers on
    /// the same queue opts into competing consumption: each delivery goes
    /// to exactly one of them. The returned [`Stopper`] cancels this one
    /// consumer.
    async fn process(&self, queue_name: &str, consumer: Consumer) -> Result<Stopper, QueueError>;

    /// Unregister every consumer on the named queue. Idempotent.
    async fn stop_processing(&self, queue_name: &str) -> Result<(), QueueError>;

    /// The queue names currently registered for `channel`.
    async fn get_subscribers(&self, channel: &str) -> Result<HashSet<String>, QueueError>;

    /// Register `queue_name` to receive publishes on `channel`.
    ///
    /// The returned [`Stopper`] removes this registration; invoking it
    /// twice is a no-op. The channel's set is emptied on removal, never
    /// deleted.
    async fn register_subscriber(
        &self,
        channel: &str,
        queue_name: &str,
    ) -> Result<Stopper, QueueError>;
}
