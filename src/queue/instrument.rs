//! Instrumentation boundary for queue produce/consume events.
//!
//! An external APM shim can record messaging activity from these events
//! without parsing the business payload a second time: the backend hands
//! over the destination name, the command headers, and (on produce) the
//! payload it already holds.

use serde_json::Value;

use crate::command::Headers;

/// The kind of destination an event was recorded against.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DestinationType {
    Queue,
}

/// A message was accepted into a queue.
#[derive(Debug)]
pub struct ProduceEvent<'a> {
    pub destination_name: &'a str,
    pub destination_type: DestinationType,
    pub headers: &'a Headers,
    pub parameters: &'a Value,
}

/// A message was handed to a consumer.
#[derive(Debug)]
pub struct ConsumeEvent<'a> {
    pub destination_name: &'a str,
    pub destination_type: DestinationType,
    pub headers: &'a Headers,
}

/// Hook invoked by queue backends on produce and consume.
///
/// Implementations must be cheap and non-blocking; they run inline with
/// queue operations.
pub trait Instrumentation: Send + Sync {
    fn on_produce(&self, event: ProduceEvent<'_>);
    fn on_consume(&self, event: ConsumeEvent<'_>);
}

/// Default hook that records nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopInstrumentation;

impl Instrumentation for NoopInstrumentation {
    fn on_produce(&self, _event: ProduceEvent<'_>) {}
    fn on_consume(&self, _event: ConsumeEvent<'_>) {}
}
