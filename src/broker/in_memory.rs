//! In-memory broker for testing and single-process scenarios.
//!
//! Each topic is an append-only log. Consumers in the same group share a
//! committed position per topic (competing consumers); different groups
//! read independently. Positions are committed as soon as a record is
//! handed out, mirroring auto-commit.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

use super::{BrokerClient, ConsumerHandle, DeliveryReport, ProducerHandle, RawMessage};
use crate::config::{BusConfig, OffsetReset};
use crate::error::BrokerError;

/// In-memory broker.
///
/// Cloning shares the same logs, so a test can keep one handle to inject
/// records while the bus holds another.
///
/// ## Example
///
/// ```
/// use reactive_topics::broker::{BrokerClient, InMemoryBroker};
/// use std::time::Duration;
///
/// let broker = InMemoryBroker::new();
/// broker.append("orders.created", br#"{"id":1}"#.to_vec());
///
/// let mut consumer = broker.open_consumer("orders.created", "billing").unwrap();
/// let msg = consumer.poll(Duration::from_millis(10)).unwrap().unwrap();
/// assert_eq!(msg.payload_str(), Some(r#"{"id":1}"#));
/// ```
#[derive(Clone)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

struct Shared {
    /// Topic name -> log
    logs: RwLock<HashMap<String, Vec<RawMessage>>>,
    /// (topic, group) -> next offset to hand out
    positions: Mutex<HashMap<(String, String), usize>>,
    offset_reset: OffsetReset,
    consumers_opened: AtomicUsize,
    producers_opened: AtomicUsize,
    polls: AtomicUsize,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    /// Create a broker whose new groups start from the earliest record.
    pub fn new() -> Self {
        Self::with_offset_reset(OffsetReset::Earliest)
    }

    /// Create a broker that starts new groups where `config` says to.
    pub fn from_config(config: &BusConfig) -> Self {
        Self::with_offset_reset(config.auto_offset_reset)
    }

    /// Create a broker whose new groups start at `offset_reset`.
    pub fn with_offset_reset(offset_reset: OffsetReset) -> Self {
        Self {
            shared: Arc::new(Shared {
                logs: RwLock::new(HashMap::new()),
                positions: Mutex::new(HashMap::new()),
                offset_reset,
                consumers_opened: AtomicUsize::new(0),
                producers_opened: AtomicUsize::new(0),
                polls: AtomicUsize::new(0),
            }),
        }
    }

    /// Append a raw payload to a topic, bypassing any serializer.
    pub fn append(&self, topic: &str, payload: Vec<u8>) -> DeliveryReport {
        self.shared.append(topic, payload)
    }

    /// All records written to a topic so far.
    pub fn messages(&self, topic: &str) -> Vec<RawMessage> {
        self.shared
            .logs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .cloned()
            .unwrap_or_default()
    }

    /// Names of every topic that has at least one record.
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self
            .shared
            .logs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        topics.sort();
        topics
    }

    /// Number of consumer handles opened.
    pub fn consumers_opened(&self) -> usize {
        self.shared.consumers_opened.load(Ordering::SeqCst)
    }

    /// Number of producer handles opened.
    pub fn producers_opened(&self) -> usize {
        self.shared.producers_opened.load(Ordering::SeqCst)
    }

    /// Number of `poll` calls across all consumers.
    pub fn polls(&self) -> usize {
        self.shared.polls.load(Ordering::SeqCst)
    }
}

impl Shared {
    fn append(&self, topic: &str, payload: Vec<u8>) -> DeliveryReport {
        let mut logs = self.logs.write().unwrap_or_else(PoisonError::into_inner);
        let log = logs.entry(topic.to_string()).or_default();
        let offset = log.len() as i64;

        let mut msg = RawMessage::new(topic, payload).at(0, offset);
        msg.timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .ok()
            .map(|d| d.as_millis() as i64);
        log.push(msg);

        DeliveryReport {
            topic: topic.to_string(),
            partition: 0,
            offset,
        }
    }

    fn log_len(&self, topic: &str) -> usize {
        self.logs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .map_or(0, Vec::len)
    }

    /// Hand out the next record for the group, advancing its position.
    fn next_for(&self, topic: &str, group: &str) -> Option<RawMessage> {
        let logs = self.logs.read().unwrap_or_else(PoisonError::into_inner);
        let log = logs.get(topic)?;

        let mut positions = self.positions.lock().unwrap_or_else(PoisonError::into_inner);
        let pos = positions
            .entry((topic.to_string(), group.to_string()))
            .or_insert(0);

        let msg = log.get(*pos)?.clone();
        *pos += 1;
        Some(msg)
    }
}

impl BrokerClient for InMemoryBroker {
    fn open_consumer(
        &self,
        topic: &str,
        group: &str,
    ) -> Result<Box<dyn ConsumerHandle>, BrokerError> {
        let start = match self.shared.offset_reset {
            OffsetReset::Earliest => 0,
            OffsetReset::Latest => self.shared.log_len(topic),
        };
        self.shared
            .positions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry((topic.to_string(), group.to_string()))
            .or_insert(start);

        self.shared.consumers_opened.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(InMemoryConsumer {
            shared: Arc::clone(&self.shared),
            topic: topic.to_string(),
            group: group.to_string(),
            closed: false,
        }))
    }

    fn open_producer(&self) -> Result<Arc<dyn ProducerHandle>, BrokerError> {
        self.shared.producers_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(InMemoryProducer {
            shared: Arc::clone(&self.shared),
        }))
    }
}

struct InMemoryConsumer {
    shared: Arc<Shared>,
    topic: String,
    group: String,
    closed: bool,
}

impl ConsumerHandle for InMemoryConsumer {
    fn poll(&mut self, timeout: Duration) -> Result<Option<RawMessage>, BrokerError> {
        if self.closed {
            return Err(BrokerError::fatal("consumer is closed"));
        }
        self.shared.polls.fetch_add(1, Ordering::SeqCst);

        let deadline = Instant::now() + timeout;
        loop {
            if let Some(msg) = self.shared.next_for(&self.topic, &self.group) {
                return Ok(Some(msg));
            }

            if Instant::now() >= deadline {
                return Ok(None);
            }

            // Small sleep to avoid busy-waiting
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

struct InMemoryProducer {
    shared: Arc<Shared>,
}

#[async_trait]
impl ProducerHandle for InMemoryProducer {
    async fn produce(&self, topic: &str, payload: Vec<u8>) -> Result<DeliveryReport, BrokerError> {
        Ok(self.shared.append(topic, payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WAIT: Duration = Duration::from_millis(10);

    #[test]
    fn append_and_poll() {
        let broker = InMemoryBroker::new();
        let report = broker.append("orders.created", b"{}".to_vec());
        assert_eq!(report.offset, 0);

        let mut consumer = broker.open_consumer("orders.created", "g").unwrap();
        let msg = consumer.poll(WAIT).unwrap().unwrap();
        assert_eq!(msg.offset, 0);
        assert!(msg.timestamp_ms.is_some());
        assert!(consumer.poll(WAIT).unwrap().is_none());
        assert_eq!(broker.polls(), 2);
    }

    #[test]
    fn groups_read_independently() {
        let broker = InMemoryBroker::new();
        broker.append("t", b"1".to_vec());

        let mut a = broker.open_consumer("t", "a").unwrap();
        let mut b = broker.open_consumer("t", "b").unwrap();

        assert_eq!(a.poll(WAIT).unwrap().unwrap().payload, b"1");
        assert_eq!(b.poll(WAIT).unwrap().unwrap().payload, b"1");
    }

    #[test]
    fn same_group_shares_position() {
        let broker = InMemoryBroker::new();
        broker.append("t", b"1".to_vec());
        broker.append("t", b"2".to_vec());

        let mut a = broker.open_consumer("t", "g").unwrap();
        let mut b = broker.open_consumer("t", "g").unwrap();

        assert_eq!(a.poll(WAIT).unwrap().unwrap().payload, b"1");
        assert_eq!(b.poll(WAIT).unwrap().unwrap().payload, b"2");
        assert_eq!(broker.consumers_opened(), 2);
    }

    #[test]
    fn latest_reset_skips_existing_records() {
        let broker = InMemoryBroker::with_offset_reset(OffsetReset::Latest);
        broker.append("t", b"old".to_vec());

        let mut consumer = broker.open_consumer("t", "g").unwrap();
        assert!(consumer.poll(WAIT).unwrap().is_none());

        broker.append("t", b"new".to_vec());
        assert_eq!(consumer.poll(WAIT).unwrap().unwrap().payload, b"new");
    }

    #[test]
    fn offset_reset_follows_bus_config() {
        let config = BusConfig::default().with_offset_reset(OffsetReset::Latest);
        let broker = InMemoryBroker::from_config(&config);
        broker.append("t", b"old".to_vec());

        let mut consumer = broker.open_consumer("t", "g").unwrap();
        assert!(consumer.poll(WAIT).unwrap().is_none());

        let broker = InMemoryBroker::from_config(&BusConfig::default());
        broker.append("t", b"old".to_vec());
        let mut consumer = broker.open_consumer("t", "g").unwrap();
        assert_eq!(consumer.poll(WAIT).unwrap().unwrap().payload, b"old");
    }

    #[test]
    fn poll_after_close_fails() {
        let broker = InMemoryBroker::new();
        let mut consumer = broker.open_consumer("t", "g").unwrap();
        consumer.close();
        assert!(!consumer.poll(WAIT).unwrap_err().is_transient());
    }

    #[test]
    fn topics_sorted() {
        let broker = InMemoryBroker::new();
        broker.append("b", vec![]);
        broker.append("a", vec![]);
        assert_eq!(broker.topics(), vec!["a", "b"]);
        assert_eq!(broker.messages("a").len(), 1);
        assert!(broker.messages("missing").is_empty());
    }
}
