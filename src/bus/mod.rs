//! Reactive message bus.
//!
//! The bus owns one broker configuration and multiplexes any number of
//! subscribers onto one consumer loop per `(topic, group)` key.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        MessageBus                           │
//! │  observe::<T>(topic, group) / publish(topic, &msg)          │
//! │  shutdown()                                                 │
//! └─────────────────────────────────────────────────────────────┘
//!          │ one per key (create-if-absent)        │ pooled
//!          ▼                                       ▼
//! ┌─────────────────────────┐            ┌──────────────────┐
//! │ ConsumerLoop (thread)   │            │  ProducerHandle  │
//! │ poll → decode → emit    │            └──────────────────┘
//! └─────────────────────────┘
//!          │
//!          ▼
//! ┌─────────────────────────┐
//! │ Multicast<T> → Stream<T>│ ──► subscribers
//! └─────────────────────────┘
//! ```

mod consumer_loop;
mod message_bus;
mod shutdown;

use std::fmt;

pub use consumer_loop::LoopStats;
pub use message_bus::MessageBus;

/// Identity of a consumer loop and its multicast stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LoopKey {
    pub topic: String,
    pub group: String,
}

impl LoopKey {
    pub fn new(topic: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            group: group.into(),
        }
    }
}

impl fmt::Display for LoopKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.group, self.topic)
    }
}
