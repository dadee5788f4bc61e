//! Routing — queue name derivation and route pattern matching.
//!
//! Queue names are colon-delimited paths whose final segment is the verb
//! (`get`, `create`, `update`, `remove`, or a custom method); the first
//! segment names the target service. Well-known inbox addresses derive
//! from those names:
//!
//! - service inbox: `stlr:s:{serviceName}:inbox`
//! - node response inbox: `stlr:n:{nodeId}:inbox`
//! - node subscription inbox: `stlr:n:{nodeId}:subscriptionInbox`
//! - group subscription inbox: `stlr:s:{groupId}:subscriptionInbox`

use std::error::Error;
use std::fmt;

use regex::Regex;

/// Error type for queue name derivation.
#[derive(Debug, PartialEq, Eq)]
pub enum RoutingError {
    /// The queue name (or service/node/group id) was empty.
    EmptyName,
}

impl fmt::Display for RoutingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutingError::EmptyName => write!(f, "queue name must not be empty"),
        }
    }
}

impl Error for RoutingError {}

/// The service name is the first colon-segment of a queue name.
///
/// ```
/// use stellar_rust::routing::service_name;
/// assert_eq!(service_name("test.fred:blah:tag").unwrap(), "test.fred");
/// ```
pub fn service_name(queue_name: &str) -> Result<&str, RoutingError> {
    if queue_name.is_empty() {
        return Err(RoutingError::EmptyName);
    }
    Ok(queue_name.split(':').next().unwrap_or(queue_name))
}

/// The well-known inbox for a service's incoming request traffic.
///
/// ```
/// use stellar_rust::routing::service_inbox;
/// assert_eq!(service_inbox("test.fred:blah:tag").unwrap(), "stlr:s:test.fred:inbox");
/// ```
pub fn service_inbox(queue_name: &str) -> Result<String, RoutingError> {
    Ok(format!("stlr:s:{}:inbox", service_name(queue_name)?))
}

/// The inbox a node receives responses on.
pub fn node_inbox(node_id: &str) -> Result<String, RoutingError> {
    if node_id.is_empty() {
        return Err(RoutingError::EmptyName);
    }
    Ok(format!("stlr:n:{}:inbox", node_id))
}

/// The inbox a node receives its own channel subscriptions on (fan-out).
pub fn node_subscription_inbox(node_id: &str) -> Result<String, RoutingError> {
    if node_id.is_empty() {
        return Err(RoutingError::EmptyName);
    }
    Ok(format!("stlr:n:{}:subscriptionInbox", node_id))
}

/// The shared inbox a consumer group competes on (load-shared fan-out).
pub fn group_subscription_inbox(group_id: &str) -> Result<String, RoutingError> {
    if group_id.is_empty() {
        return Err(RoutingError::EmptyName);
    }
    Ok(format!("stlr:s:{}:subscriptionInbox", group_id))
}

/// A route matcher for middleware registration.
///
/// `Any` matches every url (the "no pattern given" case); `Exact` requires
/// equality; `Matcher` uses standard partial-match regex semantics; `Many`
/// matches when any element does.
#[derive(Clone, Debug)]
pub enum Pattern {
    Any,
    Exact(String),
    Matcher(Regex),
    Many(Vec<Pattern>),
}

impl Pattern {
    /// Whether `url` is matched by this pattern.
    pub fn matches(&self, url: &str) -> bool {
        match self {
            Pattern::Any => true,
            Pattern::Exact(s) => s == url,
            Pattern::Matcher(re) => re.is_match(url),
            Pattern::Many(patterns) => patterns.iter().any(|p| p.matches(url)),
        }
    }
}

impl From<&str> for Pattern {
    fn from(s: &str) -> Self {
        Pattern::Exact(s.to_string())
    }
}

impl From<String> for Pattern {
    fn from(s: String) -> Self {
        Pattern::Exact(s)
    }
}

impl From<Regex> for Pattern {
    fn from(re: Regex) -> Self {
        Pattern::Matcher(re)
    }
}

impl<P: Into<Pattern>> From<Vec<P>> for Pattern {
    fn from(patterns: Vec<P>) -> Self {
        Pattern::Many(patterns.into_iter().map(Into::into).collect())
    }
}

/// Whether `url` is matched by `pattern`; `None` matches everything.
pub fn matches(url: &str, pattern: Option<&Pattern>) -> bool {
    match pattern {
        None => true,
        Some(p) => p.matches(url),
    }
}
