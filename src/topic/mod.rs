//! Typed topic sets.
//!
//! A `TopicSet<T>` binds one message type to one topic (and optionally a
//! consumer group) on a shared bus. It is the handle application code
//! holds: subscribe to it like a stream, publish through it like a sink.

use std::fmt;
use std::sync::Arc;

use crate::broker::DeliveryReport;
use crate::bus::MessageBus;
use crate::error::{BusError, ConstructionError, PublishError, StreamError};
use crate::message::TopicMessage;
use crate::serializer::{JsonSerializer, Serializer};
use crate::stream::{Stream, Subscription};

/// A message type bound to a topic on a bus.
///
/// Construction observes the topic right away, so the consumer loop for
/// `(topic, group)` is running before the set is returned.
///
/// ## Example
///
/// ```
/// use reactive_topics::broker::InMemoryBroker;
/// use reactive_topics::{BusConfig, MessageBus, TopicSet};
/// use serde::{Deserialize, Serialize};
/// use std::sync::Arc;
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// struct OrderCreated {
///     id: u64,
///     amount: f64,
/// }
///
/// let bus = Arc::new(MessageBus::new(BusConfig::default(), InMemoryBroker::new()).unwrap());
/// let orders = TopicSet::<OrderCreated>::new(bus, "orders.created", None).unwrap();
///
/// let _large = orders
///     .filter(|o| o.amount > 100.0)
///     .subscribe(|o| println!("large order {}", o.id));
/// ```
pub struct TopicSet<T, S: Serializer = JsonSerializer> {
    bus: Arc<MessageBus<S>>,
    topic: String,
    group: Option<String>,
    stream: Stream<T>,
}

impl<T: TopicMessage, S: Serializer> TopicSet<T, S> {
    /// Bind `T` to `topic` on `bus`, consumed as `group` or the bus
    /// default group.
    ///
    /// Fails like [`MessageBus::observe`]: blank topic, disposed bus,
    /// a type clash on the key, or a broker error opening the consumer.
    pub fn new(bus: Arc<MessageBus<S>>, topic: &str, group: Option<&str>) -> Result<Self, BusError> {
        if topic.trim().is_empty() {
            return Err(ConstructionError::new("topic", "must not be blank").into());
        }

        let stream = bus.observe::<T>(topic, group)?;

        Ok(Self {
            bus,
            topic: topic.to_string(),
            group: group.map(str::to_string),
            stream,
        })
    }

    /// Publish `message` to this set's topic.
    pub async fn publish(&self, message: &T) -> Result<DeliveryReport, PublishError> {
        self.bus.publish(&self.topic, message).await
    }

    /// The hot stream of decoded messages for this set.
    pub fn stream(&self) -> Stream<T> {
        self.stream.clone()
    }

    /// Messages matching `predicate`.
    pub fn filter<P>(&self, predicate: P) -> Stream<T>
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.stream.filter(predicate)
    }

    /// Each message projected through `selector`.
    pub fn map<R, F>(&self, selector: F) -> Stream<R>
    where
        R: Send + 'static,
        F: Fn(T) -> R + Send + Sync + 'static,
    {
        self.stream.map(selector)
    }

    /// Handle each message. Stream errors are logged, not delivered.
    pub fn subscribe<N>(&self, on_next: N) -> Subscription
    where
        N: Fn(T) + Send + Sync + 'static,
    {
        self.stream.subscribe(on_next)
    }

    /// Handle messages, errors and completion.
    ///
    /// `on_completed` runs when the bus shuts down.
    pub fn subscribe_with<N, E, C>(&self, on_next: N, on_error: E, on_completed: C) -> Subscription
    where
        N: Fn(T) + Send + Sync + 'static,
        E: Fn(StreamError) + Send + Sync + 'static,
        C: Fn() + Send + Sync + 'static,
    {
        self.stream.subscribe_with(on_next, on_error, on_completed)
    }

    /// The resolved topic name.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// The group given at construction; `None` means the bus default.
    pub fn consumer_group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    /// The bus this set observes and publishes through.
    pub fn bus(&self) -> &Arc<MessageBus<S>> {
        &self.bus
    }
}

impl<T, S: Serializer> fmt::Debug for TopicSet<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopicSet")
            .field("topic", &self.topic)
            .field("group", &self.group)
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InMemoryBroker;
    use crate::config::BusConfig;
    use serde::{Deserialize, Serialize};
    use std::sync::Mutex;
    use std::thread;
    use std::time::{Duration, Instant};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct OrderCreated {
        order_id: u64,
        amount: f64,
    }

    fn bus(broker: &InMemoryBroker) -> Arc<MessageBus> {
        let config = BusConfig::new("memory", "billing").with_poll_timeout(Duration::from_millis(5));
        Arc::new(MessageBus::new(config, broker.clone()).unwrap())
    }

    #[test]
    fn construction_starts_the_loop() {
        let broker = InMemoryBroker::new();
        let bus = bus(&broker);

        let set = TopicSet::<OrderCreated>::new(Arc::clone(&bus), "orders", Some("audit")).unwrap();

        assert_eq!(set.topic(), "orders");
        assert_eq!(set.consumer_group(), Some("audit"));
        assert_eq!(bus.active_loops(), 1);
        assert_eq!(broker.consumers_opened(), 1);
    }

    #[test]
    fn rejects_blank_topic() {
        let broker = InMemoryBroker::new();
        let err = TopicSet::<OrderCreated>::new(bus(&broker), "", None).unwrap_err();
        assert!(matches!(err, BusError::Construction(e) if e.field == "topic"));
        assert_eq!(broker.consumers_opened(), 0);
    }

    #[tokio::test]
    async fn publish_round_trips_through_the_topic() {
        let broker = InMemoryBroker::new();
        let set = TopicSet::<OrderCreated>::new(bus(&broker), "orders", None).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = set.map(|o| o.order_id).subscribe(move |id| sink.lock().unwrap().push(id));

        let report = set
            .publish(&OrderCreated {
                order_id: 7,
                amount: 12.5,
            })
            .await
            .unwrap();
        assert_eq!(report.topic, "orders");
        assert_eq!(
            broker.messages("orders")[0].payload_str(),
            Some(r#"{"orderId":7,"amount":12.5}"#)
        );

        let deadline = Instant::now() + Duration::from_secs(5);
        while seen.lock().unwrap().is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(*seen.lock().unwrap(), vec![7]);
    }
}
