//! Error model — structured business errors and the transport taxonomy.
//!
//! Two families live here:
//!
//! - [`StellarError`] — the structured, field-keyed error value application
//!   handlers reject with. It is expected, serialized across the transport
//!   boundary, and reconstructed on the requesting side with its
//!   [`StellarError::message_keys`] intact.
//! - [`TransportError`] / [`QueueError`] — infrastructure failures: timeouts,
//!   backend errors, unsupported capabilities. These surface to the caller's
//!   future and (except for timeouts and business rejections) get reported
//!   through the middleware pipeline.

use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field name under which top-level messages accumulate.
const GENERAL: &str = "general";

/// Structured, field-keyed error value that survives serialization.
///
/// Two construction modes, both of which round-trip through the wire:
///
/// ```
/// use stellar_rust::StellarError;
///
/// // From a single message — seeds the `general` list.
/// let e = StellarError::new("msg");
/// assert_eq!(e.message, "msg");
/// assert_eq!(e.errors.as_ref().unwrap()["general"], vec!["msg".to_string()]);
/// assert_eq!(e.message_keys()["general"], "general_msg");
///
/// // From an arbitrary object — fields copied onto the error.
/// let e = StellarError::from_object(serde_json::json!({"code": 42}));
/// assert_eq!(e.message, "");
/// assert!(e.errors.is_none());
/// assert_eq!(e.fields["code"], 42);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StellarError {
    /// The first/general message; empty string if none.
    #[serde(default)]
    pub message: String,
    /// Per-field message lists; `general` holds top-level messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<BTreeMap<String, Vec<String>>>,
    /// Extra own fields from the arbitrary-object construction mode.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl StellarError {
    /// Create an error from a single message, seeding the `general` list.
    pub fn new(message: impl Into<String>) -> Self {
        let message = message.into();
        let mut errors = BTreeMap::new();
        errors.insert(GENERAL.to_string(), vec![message.clone()]);
        Self {
            message,
            errors: Some(errors),
            fields: Map::new(),
        }
    }

    /// Create an error from an arbitrary JSON object.
    ///
    /// The object's fields are copied onto the error; `errors` is left
    /// unset and `message` empty. Non-object values become a single
    /// `value` field.
    pub fn from_object(value: Value) -> Self {
        let fields = match value {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        Self {
            message: String::new(),
            errors: None,
            fields,
        }
    }

    /// Append a top-level message without replacing prior entries.
    pub fn add_general(&mut self, message: impl Into<String>) {
        let message = message.into();
        if self.message.is_empty() {
            self.message = message.clone();
        }
        self.errors
            .get_or_insert_with(BTreeMap::new)
            .entry(GENERAL.to_string())
            .or_default()
            .push(message);
    }

    /// Append a message to (or create) the named field's list.
    pub fn add_property_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors
            .get_or_insert_with(BTreeMap::new)
            .entry(field.into())
            .or_default()
            .push(message.into());
    }

    /// Machine keys for i18n lookup: `field → "{field}_{message}"`.
    ///
    /// Keys derive from each field's first message; general messages get
    /// the `general_` prefix.
    pub fn message_keys(&self) -> BTreeMap<String, String> {
        match &self.errors {
            Some(errors) => errors
                .iter()
                .filter_map(|(field, messages)| {
                    messages
                        .first()
                        .map(|m| (field.clone(), format!("{}_{}", field, m)))
                })
                .collect(),
            None => BTreeMap::new(),
        }
    }
}

impl fmt::Display for StellarError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "stellar error")
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl Error for StellarError {}

/// Coarse classification of a [`TransportError`], used by the
/// error-reporting middleware's ignore list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Business rejection carried as a [`StellarError`].
    Handler,
    /// No response within the configured window.
    Timeout,
    /// Backend queue failure.
    Queue,
    /// Connection-level failure.
    Connection,
    /// Payload could not be (de)serialized.
    Serialization,
    /// The transport does not implement the invoked capability.
    Unsupported,
    /// In-flight state was cleared by `reset()`.
    Reset,
    /// Anything else.
    Other,
}

/// Error type for transport operations.
#[derive(Debug)]
pub enum TransportError {
    /// The request's response window elapsed. Retriable by the caller.
    Timeout,
    /// The invoked capability is not implemented by this transport.
    /// A programming error, raised immediately and never reported.
    Unsupported(&'static str),
    /// Connection to the backend failed.
    Connection(String),
    /// Serialization of a command or payload failed.
    Serialization(String),
    /// The queue backend rejected the operation.
    Queue(QueueError),
    /// The remote handler rejected the request with a business error.
    Handler(StellarError),
    /// The pending call was abandoned by `reset()`.
    Reset,
    /// A command had no `queueName` to route by.
    MissingQueueName,
    /// Other error.
    Other(Box<dyn Error + Send + Sync>),
}

impl TransportError {
    /// Classify this error for the reporting ignore list.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransportError::Timeout => ErrorKind::Timeout,
            TransportError::Unsupported(_) => ErrorKind::Unsupported,
            TransportError::Connection(_) => ErrorKind::Connection,
            TransportError::Serialization(_) => ErrorKind::Serialization,
            TransportError::Queue(_) => ErrorKind::Queue,
            TransportError::Handler(_) => ErrorKind::Handler,
            TransportError::Reset => ErrorKind::Reset,
            TransportError::MissingQueueName | TransportError::Other(_) => ErrorKind::Other,
        }
    }

    /// Whether this is the retriable timeout case.
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout)
    }

    /// Map this error to an HTTP-style status code.
    pub fn status_code(&self) -> u16 {
        match self {
            TransportError::Timeout => 504,
            TransportError::Unsupported(_) => 501,
            TransportError::Handler(_) => 422,
            TransportError::Serialization(_) | TransportError::MissingQueueName => 400,
            TransportError::Connection(_)
            | TransportError::Queue(_)
            | TransportError::Reset
            | TransportError::Other(_) => 500,
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Timeout => write!(f, "request timed out"),
            TransportError::Unsupported(capability) => {
                write!(f, "transport does not implement {}", capability)
            }
            TransportError::Connection(msg) => write!(f, "connection failed: {}", msg),
            TransportError::Serialization(msg) => write!(f, "serialization failed: {}", msg),
            TransportError::Queue(e) => write!(f, "queue error: {}", e),
            TransportError::Handler(e) => write!(f, "handler rejected: {}", e),
            TransportError::Reset => write!(f, "pending call dropped by reset"),
            TransportError::MissingQueueName => write!(f, "command has no queueName header"),
            TransportError::Other(e) => write!(f, "transport error: {}", e),
        }
    }
}

impl Error for TransportError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TransportError::Queue(e) => Some(e),
            TransportError::Handler(e) => Some(e),
            TransportError::Other(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<QueueError> for TransportError {
    fn from(err: QueueError) -> Self {
        TransportError::Queue(err)
    }
}

impl From<StellarError> for TransportError {
    fn from(err: StellarError) -> Self {
        TransportError::Handler(err)
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        TransportError::Serialization(err.to_string())
    }
}

/// Error type for queue system operations.
#[derive(Debug)]
pub enum QueueError {
    /// The named queue is closed (its consumers went away).
    Closed(String),
    /// A queue or subscriber name was empty or malformed.
    InvalidName(String),
    /// Other error.
    Other(Box<dyn Error + Send + Sync>),
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueError::Closed(queue) => write!(f, "queue closed: {}", queue),
            QueueError::InvalidName(name) => write!(f, "invalid queue name: {:?}", name),
            QueueError::Other(e) => write!(f, "queue error: {}", e),
        }
    }
}

impl Error for QueueError {}
