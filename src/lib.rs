//! Typed, reactive topic sets over a log broker.
//!
//! ```text
//! BusContext ──► TopicSet<T> ──► MessageBus ──► BrokerClient
//!                    │               │
//!                    ▼               ▼
//!                Stream<T> ◄── consumer loop (one per topic, group)
//! ```

pub mod broker;
pub mod bus;
mod config;
pub mod context;
mod error;
mod message;
mod serializer;
pub mod stream;
pub mod topic;

pub use broker::{BrokerClient, ConsumerHandle, DeliveryReport, InMemoryBroker, ProducerHandle, RawMessage};
#[cfg(feature = "kafka")]
pub use broker::KafkaBroker;
pub use bus::{LoopKey, LoopStats, MessageBus};
pub use config::{BusConfig, OffsetReset};
pub use context::{BusContext, ContextBuilder, TopicBinding};
pub use error::{
    BindingError, BrokerError, BrokerErrorKind, BusError, ConstructionError, PublishError,
    SerializationError, StreamError,
};
pub use message::TopicMessage;
pub use serializer::{BitcodeSerializer, JsonSerializer, Serializer};
pub use stream::{Multicast, Observer, Stream, Subscription};
pub use topic::TopicSet;
