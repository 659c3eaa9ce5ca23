//! Error types for the bus, its adapters, and the binding layer.
//!
//! There is no decode error: a payload that does not decode is skipped by
//! the consumer loop.

use thiserror::Error;

/// How a broker failure is expected to behave on retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerErrorKind {
    /// Expected to clear on its own (fetch timeout, leader election, ...).
    Transient,
    /// Not expected to clear without intervention.
    Fatal,
}

/// Failure reported by a broker adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind:?} broker error: {message}")]
pub struct BrokerError {
    pub kind: BrokerErrorKind,
    pub message: String,
}

impl BrokerError {
    /// A failure worth retrying, such as a timeout or rebalance.
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: BrokerErrorKind::Transient,
            message: message.into(),
        }
    }

    /// A failure retrying will not fix.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            kind: BrokerErrorKind::Fatal,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == BrokerErrorKind::Transient
    }
}

/// A value could not be encoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("serialization failed: {0}")]
pub struct SerializationError(pub String);

impl From<serde_json::Error> for SerializationError {
    fn from(err: serde_json::Error) -> Self {
        SerializationError(err.to_string())
    }
}

impl From<bitcode::Error> for SerializationError {
    fn from(err: bitcode::Error) -> Self {
        SerializationError(err.to_string())
    }
}

/// Invalid arguments to a constructor or an invalid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {field}: {reason}")]
pub struct ConstructionError {
    pub field: &'static str,
    pub reason: String,
}

impl ConstructionError {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// Errors returned by `MessageBus` and `TopicSet` construction/observation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    #[error(transparent)]
    Construction(#[from] ConstructionError),

    #[error("message bus has been shut down")]
    Disposed,

    #[error("{key} is already observed as {existing}, not {requested}")]
    TypeMismatch {
        key: String,
        existing: &'static str,
        requested: &'static str,
    },

    #[error("could not open consumer: {0}")]
    Broker(#[from] BrokerError),

    #[error("could not start consumer loop: {0}")]
    Spawn(String),
}

/// A publish did not reach the broker.
///
/// Publishes are never retried by the bus; the caller decides.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublishError {
    #[error(transparent)]
    Serialization(#[from] SerializationError),

    #[error("produce failed: {0}")]
    Broker(#[from] BrokerError),

    #[error("topic must not be blank")]
    BlankTopic,

    #[error("message bus has been shut down")]
    Disposed,
}

/// Terminal error signal delivered to a single subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    /// A handler or per-subscriber operator panicked.
    #[error("subscriber failed: {0}")]
    Subscriber(String),
}

/// Topic bindings could not be resolved into topic sets.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindingError {
    #[error("no topic binding registered for {0}")]
    Missing(&'static str),

    #[error("multiple topic bindings registered for {0}")]
    Ambiguous(&'static str),

    #[error("invalid topic template {0:?}")]
    InvalidTemplate(String),

    #[error("topic {0:?} contains a wildcard but wildcards are not allowed")]
    WildcardNotAllowed(String),

    #[error(transparent)]
    Bus(#[from] BusError),
}
