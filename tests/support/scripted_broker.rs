//! Broker double driven by per-topic scripts.
//!
//! Each consumer poll pops the next step for its topic; an empty script
//! behaves like an idle topic. Counters record every call the bus makes.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use reactive_topics::{BrokerClient, BrokerError, ConsumerHandle, DeliveryReport, ProducerHandle, RawMessage};

pub enum Step {
    Message(Vec<u8>),
    Fail(BrokerError),
    Panic(&'static str),
}

#[derive(Clone, Default)]
pub struct ScriptedBroker {
    shared: Arc<Shared>,
}

#[derive(Default)]
struct Shared {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    open_failures: Mutex<HashMap<String, BrokerError>>,
    open_delays: Mutex<HashMap<String, Duration>>,
    produce_failure: Mutex<Option<BrokerError>>,
    produced: Mutex<Vec<(String, Vec<u8>)>>,
    open_calls: AtomicUsize,
    consumers_opened: AtomicUsize,
    consumers_closed: AtomicUsize,
    producers_opened: AtomicUsize,
    produce_calls: AtomicUsize,
    polls: AtomicUsize,
    polls_after_close: AtomicUsize,
}

impl ScriptedBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, topic: &str, step: Step) {
        self.shared
            .scripts
            .lock()
            .unwrap()
            .entry(topic.to_string())
            .or_default()
            .push_back(step);
    }

    pub fn push_payload(&self, topic: &str, payload: impl Into<Vec<u8>>) {
        self.push(topic, Step::Message(payload.into()));
    }

    /// The next `open_consumer` for `topic` fails with `err`.
    pub fn fail_next_open(&self, topic: &str, err: BrokerError) {
        self.shared
            .open_failures
            .lock()
            .unwrap()
            .insert(topic.to_string(), err);
    }

    /// Every `open_consumer` for `topic` blocks for `delay` first.
    pub fn delay_open(&self, topic: &str, delay: Duration) {
        self.shared
            .open_delays
            .lock()
            .unwrap()
            .insert(topic.to_string(), delay);
    }

    /// The next `produce` fails with `err`.
    pub fn fail_next_produce(&self, err: BrokerError) {
        *self.shared.produce_failure.lock().unwrap() = Some(err);
    }

    pub fn produced(&self) -> Vec<(String, Vec<u8>)> {
        self.shared.produced.lock().unwrap().clone()
    }

    /// `open_consumer` calls started, including ones still blocked.
    pub fn open_calls(&self) -> usize {
        self.shared.open_calls.load(Ordering::SeqCst)
    }

    pub fn consumers_opened(&self) -> usize {
        self.shared.consumers_opened.load(Ordering::SeqCst)
    }

    pub fn consumers_closed(&self) -> usize {
        self.shared.consumers_closed.load(Ordering::SeqCst)
    }

    pub fn producers_opened(&self) -> usize {
        self.shared.producers_opened.load(Ordering::SeqCst)
    }

    pub fn produce_calls(&self) -> usize {
        self.shared.produce_calls.load(Ordering::SeqCst)
    }

    pub fn polls(&self) -> usize {
        self.shared.polls.load(Ordering::SeqCst)
    }

    pub fn polls_after_close(&self) -> usize {
        self.shared.polls_after_close.load(Ordering::SeqCst)
    }
}

impl BrokerClient for ScriptedBroker {
    fn open_consumer(
        &self,
        topic: &str,
        _group: &str,
    ) -> Result<Box<dyn ConsumerHandle>, BrokerError> {
        self.shared.open_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.shared.open_failures.lock().unwrap().remove(topic) {
            return Err(err);
        }
        let delay = self.shared.open_delays.lock().unwrap().get(topic).copied();
        // Widen the window in which concurrent observers could race.
        thread::sleep(delay.unwrap_or(Duration::from_millis(10)));
        self.shared.consumers_opened.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(ScriptedConsumer {
            shared: Arc::clone(&self.shared),
            topic: topic.to_string(),
            closed: false,
        }))
    }

    fn open_producer(&self) -> Result<Arc<dyn ProducerHandle>, BrokerError> {
        self.shared.producers_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(ScriptedProducer {
            shared: Arc::clone(&self.shared),
        }))
    }
}

struct ScriptedConsumer {
    shared: Arc<Shared>,
    topic: String,
    closed: bool,
}

impl ConsumerHandle for ScriptedConsumer {
    fn poll(&mut self, timeout: Duration) -> Result<Option<RawMessage>, BrokerError> {
        if self.closed {
            self.shared.polls_after_close.fetch_add(1, Ordering::SeqCst);
            return Err(BrokerError::fatal("closed"));
        }
        let offset = self.shared.polls.fetch_add(1, Ordering::SeqCst) as i64;

        let step = self
            .shared
            .scripts
            .lock()
            .unwrap()
            .get_mut(&self.topic)
            .and_then(VecDeque::pop_front);

        match step {
            Some(Step::Message(payload)) => {
                Ok(Some(RawMessage::new(&self.topic, payload).at(0, offset)))
            }
            Some(Step::Fail(err)) => Err(err),
            Some(Step::Panic(reason)) => panic!("{reason}"),
            None => {
                thread::sleep(timeout);
                Ok(None)
            }
        }
    }

    fn close(&mut self) {
        self.closed = true;
        self.shared.consumers_closed.fetch_add(1, Ordering::SeqCst);
    }
}

struct ScriptedProducer {
    shared: Arc<Shared>,
}

#[async_trait]
impl ProducerHandle for ScriptedProducer {
    async fn produce(&self, topic: &str, payload: Vec<u8>) -> Result<DeliveryReport, BrokerError> {
        self.shared.produce_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.shared.produce_failure.lock().unwrap().take() {
            return Err(err);
        }

        let mut produced = self.shared.produced.lock().unwrap();
        let offset = produced.iter().filter(|(t, _)| t == topic).count() as i64;
        produced.push((topic.to_string(), payload));

        Ok(DeliveryReport {
            topic: topic.to_string(),
            partition: 0,
            offset,
        })
    }
}
