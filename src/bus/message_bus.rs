use std::any::{self, Any};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::consumer_loop::{ConsumerLoop, LoopSettings, LoopStats};
use super::shutdown::ShutdownSignal;
use super::LoopKey;
use crate::broker::{BrokerClient, DeliveryReport, ProducerHandle};
use crate::config::BusConfig;
use crate::error::{BrokerError, BusError, ConstructionError, PublishError};
use crate::message::TopicMessage;
use crate::serializer::{JsonSerializer, Serializer};
use crate::stream::{Multicast, Stream};

/// Running loop for one `(topic, group)` key.
struct LoopSlot {
    /// `Multicast<T>` for the type the key was first observed with.
    subject: Box<dyn Any + Send + Sync>,
    type_name: &'static str,
    worker: Option<ConsumerLoop>,
}

impl LoopSlot {
    fn stream<T: TopicMessage>(&self, key: &LoopKey) -> Result<Stream<T>, BusError> {
        self.subject
            .downcast_ref::<Multicast<T>>()
            .map(Multicast::stream)
            .ok_or_else(|| BusError::TypeMismatch {
                key: key.to_string(),
                existing: self.type_name,
                requested: any::type_name::<T>(),
            })
    }
}

/// Per-key cell. The registry shard is locked only to find or insert the
/// cell; opening the consumer happens under the cell's own lock.
type LoopCell = Mutex<Option<LoopSlot>>;

fn lock_cell(cell: &LoopCell) -> MutexGuard<'_, Option<LoopSlot>> {
    cell.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Reactive message bus over a broker client.
///
/// Every distinct `(topic, group)` pair observed through the bus gets
/// exactly one consumer loop and one hot stream, shared by every caller
/// that observes the same pair. Publishing goes through one pooled
/// producer and never needs a consumer loop.
///
/// ## Example
///
/// ```
/// use reactive_topics::broker::InMemoryBroker;
/// use reactive_topics::{BusConfig, MessageBus};
///
/// let broker = InMemoryBroker::new();
/// let bus = MessageBus::new(BusConfig::default(), broker.clone()).unwrap();
///
/// let a = bus.observe::<String>("greetings", None).unwrap();
/// let b = bus.observe::<String>("greetings", None).unwrap();
/// let _sa = a.subscribe(|s| println!("a: {s}"));
/// let _sb = b.subscribe(|s| println!("b: {s}"));
///
/// assert_eq!(bus.active_loops(), 1);
/// assert_eq!(broker.consumers_opened(), 1);
///
/// let stats = bus.shutdown();
/// assert_eq!(stats.len(), 1);
/// ```
///
/// ## Shutdown
///
/// Dropping the last handle shuts the bus down. A subscriber that captures
/// the bus, directly or through a `TopicSet` or `BusContext`, keeps it
/// alive from inside its own stream, so such a bus must be shut down
/// explicitly. Calling `shutdown` from a subscriber is allowed: the loop
/// running that subscriber is not joined and stops once the handler
/// returns.
pub struct MessageBus<S: Serializer = JsonSerializer> {
    config: BusConfig,
    broker: Arc<dyn BrokerClient>,
    serializer: Arc<S>,
    loops: DashMap<LoopKey, Arc<LoopCell>>,
    /// Loops started and not yet shut down. Read without touching any cell.
    running: AtomicUsize,
    signal: ShutdownSignal,
    /// Serializes shutdown so a second caller waits for the first to finish.
    shutdown_lock: Mutex<()>,
    producer: Mutex<Option<Arc<dyn ProducerHandle>>>,
}

impl MessageBus<JsonSerializer> {
    /// Create a bus that encodes messages as JSON.
    pub fn new(config: BusConfig, broker: impl BrokerClient) -> Result<Self, BusError> {
        Self::with_serializer(config, broker, JsonSerializer)
    }
}

impl<S: Serializer> MessageBus<S> {
    /// Create a bus with a custom serializer.
    pub fn with_serializer(
        config: BusConfig,
        broker: impl BrokerClient,
        serializer: S,
    ) -> Result<Self, BusError> {
        config.validate()?;

        Ok(Self {
            config,
            broker: Arc::new(broker),
            serializer: Arc::new(serializer),
            loops: DashMap::new(),
            running: AtomicUsize::new(0),
            signal: ShutdownSignal::new(),
            shutdown_lock: Mutex::new(()),
            producer: Mutex::new(None),
        })
    }

    /// Get the hot stream for `topic` consumed as `group`, or as the
    /// configured default group when `group` is `None` or blank.
    ///
    /// The first call for a key opens a consumer and starts its loop.
    /// Later calls, from any thread, share that loop.
    pub fn observe<T: TopicMessage>(
        &self,
        topic: &str,
        group: Option<&str>,
    ) -> Result<Stream<T>, BusError> {
        if topic.trim().is_empty() {
            return Err(ConstructionError::new("topic", "must not be blank").into());
        }
        if self.signal.is_set() {
            return Err(BusError::Disposed);
        }

        let key = LoopKey::new(topic, self.config.group_or_default(group));

        loop {
            let cell = Arc::clone(self.loops.entry(key.clone()).or_default().value());
            let mut slot = lock_cell(&cell);

            if let Some(running) = slot.as_ref() {
                return running.stream::<T>(&key);
            }
            // A failed open for this key removed the cell while we waited.
            if !self.is_registered(&key, &cell) {
                continue;
            }
            // Checked again under the cell lock: shutdown sets the signal
            // before it collects the cells.
            if self.signal.is_set() {
                self.unregister(&key, &cell);
                return Err(BusError::Disposed);
            }

            return match self.start_loop::<T>(&key) {
                Ok((stream, running)) => {
                    *slot = Some(running);
                    self.running.fetch_add(1, Ordering::SeqCst);
                    Ok(stream)
                }
                Err(err) => {
                    self.unregister(&key, &cell);
                    Err(err)
                }
            };
        }
    }

    /// Encode `message` and produce it to `topic`, resolving once the broker
    /// acknowledges it.
    ///
    /// Failures are returned as-is; the bus never retries a publish.
    pub async fn publish<T: Serialize>(
        &self,
        topic: &str,
        message: &T,
    ) -> Result<DeliveryReport, PublishError> {
        if topic.trim().is_empty() {
            return Err(PublishError::BlankTopic);
        }
        if self.signal.is_set() {
            return Err(PublishError::Disposed);
        }

        let payload = self.serializer.encode(message)?;
        let producer = self.producer()?;

        match producer.produce(topic, payload).await {
            Ok(report) => {
                debug!(
                    topic = %report.topic,
                    partition = report.partition,
                    offset = report.offset,
                    "publish acknowledged"
                );
                Ok(report)
            }
            Err(err) => {
                warn!(topic = %topic, error = %err, "publish failed");
                Err(err.into())
            }
        }
    }

    /// Stop every consumer loop and wait for them to exit.
    ///
    /// Each loop closes its consumer and completes its stream before it is
    /// joined. Only the first call returns stats; later calls find nothing
    /// left to join. When called from a subscriber, the calling loop is left
    /// to stop on its own and is missing from the result.
    pub fn shutdown(&self) -> HashMap<LoopKey, LoopStats> {
        let _serial = self
            .shutdown_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if self.signal.trigger() {
            info!(loops = self.loops.len(), "shutting down message bus");
        }

        let mut stats = HashMap::new();
        for (key, cell) in self.cells() {
            let worker = lock_cell(&cell)
                .as_mut()
                .and_then(|running| running.worker.take());
            let Some(worker) = worker else {
                continue;
            };

            if worker.is_current_thread() {
                debug!(
                    topic = %key.topic,
                    group = %key.group,
                    "shutdown called from this loop's subscriber; not joining it"
                );
                continue;
            }
            stats.insert(key, worker.join());
        }

        self.loops.clear();
        self.running.store(0, Ordering::SeqCst);
        self.producer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        stats
    }

    /// The configuration the bus was built with.
    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// Number of `(topic, group)` keys with a running loop. Keys whose
    /// consumer is still being opened are not counted.
    pub fn active_loops(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// True once `shutdown` has started, including via `Drop`.
    pub fn is_shut_down(&self) -> bool {
        self.signal.is_set()
    }

    /// Open the consumer for `key` and start its loop.
    fn start_loop<T: TopicMessage>(
        &self,
        key: &LoopKey,
    ) -> Result<(Stream<T>, LoopSlot), BusError> {
        let consumer = self.broker.open_consumer(&key.topic, &key.group)?;
        let subject = Multicast::<T>::new();
        let worker = ConsumerLoop::spawn(
            key.clone(),
            consumer,
            subject.clone(),
            Arc::clone(&self.serializer),
            self.signal.clone(),
            self.loop_settings(),
        )?;

        let stream = subject.stream();
        Ok((
            stream,
            LoopSlot {
                subject: Box::new(subject),
                type_name: any::type_name::<T>(),
                worker: Some(worker),
            },
        ))
    }

    fn loop_settings(&self) -> LoopSettings {
        LoopSettings {
            poll_timeout: self.config.poll_timeout(),
            error_backoff: self.config.error_backoff(),
        }
    }

    /// Snapshot of the registry, so no shard lock is held while a cell is.
    fn cells(&self) -> Vec<(LoopKey, Arc<LoopCell>)> {
        self.loops
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect()
    }

    fn is_registered(&self, key: &LoopKey, cell: &Arc<LoopCell>) -> bool {
        self.loops
            .get(key)
            .is_some_and(|registered| Arc::ptr_eq(registered.value(), cell))
    }

    fn unregister(&self, key: &LoopKey, cell: &Arc<LoopCell>) {
        self.loops
            .remove_if(key, |_, registered| Arc::ptr_eq(registered, cell));
    }

    /// The pooled producer, opened on first use.
    fn producer(&self) -> Result<Arc<dyn ProducerHandle>, BrokerError> {
        let mut pooled = self.producer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(producer) = pooled.as_ref() {
            return Ok(Arc::clone(producer));
        }

        let producer = self.broker.open_producer()?;
        info!(servers = %self.config.bootstrap_servers, "producer opened");
        *pooled = Some(Arc::clone(&producer));
        Ok(producer)
    }
}

impl<S: Serializer> Drop for MessageBus<S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
