//! Broker client adapters.
//!
//! The bus never talks to a broker SDK directly. It consumes three small
//! traits: a client that opens consumers and producers, a blocking
//! consumer handle polled by exactly one consumer loop, and a shared
//! async producer handle.
//!
//! ```text
//!            ┌────────────────────────────┐
//!            │        BrokerClient        │
//!            │ open_consumer / open_prod. │
//!            └────────────────────────────┘
//!                 │                  │
//!                 ▼                  ▼
//!     ┌──────────────────┐   ┌──────────────────┐
//!     │  ConsumerHandle  │   │  ProducerHandle  │
//!     │ poll(t) / close  │   │ produce (async)  │
//!     └──────────────────┘   └──────────────────┘
//!          │          │
//!          ▼          ▼
//! ┌──────────────┐ ┌─────────────────────────┐
//! │InMemoryBroker│ │ KafkaBroker (`kafka`)   │
//! └──────────────┘ └─────────────────────────┘
//! ```

mod in_memory;
#[cfg(feature = "kafka")]
mod kafka;
mod message;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::BrokerError;

pub use in_memory::InMemoryBroker;
#[cfg(feature = "kafka")]
pub use kafka::KafkaBroker;
pub use message::{DeliveryReport, RawMessage};

/// Entry point into a broker: opens consumer and producer handles.
pub trait BrokerClient: Send + Sync + 'static {
    /// Open a consumer subscribed to `topic` as a member of `group`.
    fn open_consumer(
        &self,
        topic: &str,
        group: &str,
    ) -> Result<Box<dyn ConsumerHandle>, BrokerError>;

    /// Open a producer. The bus opens one and shares it across publishes.
    fn open_producer(&self) -> Result<Arc<dyn ProducerHandle>, BrokerError>;
}

/// A subscription owned by a single consumer loop.
pub trait ConsumerHandle: Send {
    /// Wait up to `timeout` for the next message.
    ///
    /// `Ok(None)` means the timeout elapsed with nothing to read.
    fn poll(&mut self, timeout: Duration) -> Result<Option<RawMessage>, BrokerError>;

    /// Leave the group and release the subscription.
    fn close(&mut self);
}

/// Publish side of a broker connection.
#[async_trait]
pub trait ProducerHandle: Send + Sync {
    /// Produce `payload` to `topic` and wait for the broker's acknowledgment.
    async fn produce(&self, topic: &str, payload: Vec<u8>) -> Result<DeliveryReport, BrokerError>;
}
