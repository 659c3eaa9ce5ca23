//! Dedicated consumer thread for one (topic, group) key.
//!
//! Each loop owns its consumer handle exclusively and blocks on it for at
//! most one poll timeout, then checks the shutdown signal.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::shutdown::ShutdownSignal;
use super::LoopKey;
use crate::broker::ConsumerHandle;
use crate::error::BusError;
use crate::message::TopicMessage;
use crate::serializer::Serializer;
use crate::stream::{panic_message, Multicast};

/// Counters reported by a consumer loop when it is joined.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoopStats {
    /// Number of poll calls made.
    pub polls: usize,
    /// Number of decoded items pushed to the stream.
    pub delivered: usize,
    /// Number of payloads dropped because they did not decode.
    pub skipped: usize,
    /// Number of broker errors logged and survived.
    pub broker_errors: usize,
    /// Number of iterations that panicked and were recovered.
    pub recovered_panics: usize,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct LoopSettings {
    pub poll_timeout: Duration,
    pub error_backoff: Duration,
}

/// Handle to a running consumer loop.
pub(crate) struct ConsumerLoop {
    handle: JoinHandle<LoopStats>,
}

impl ConsumerLoop {
    /// Start a loop that polls `consumer` until `signal` is set, pushing
    /// every decodable payload onto `subject`.
    pub(crate) fn spawn<T, S>(
        key: LoopKey,
        consumer: Box<dyn ConsumerHandle>,
        subject: Multicast<T>,
        serializer: Arc<S>,
        signal: ShutdownSignal,
        settings: LoopSettings,
    ) -> Result<Self, BusError>
    where
        T: TopicMessage,
        S: Serializer,
    {
        let worker = Worker {
            key,
            consumer,
            subject,
            serializer,
            signal,
            settings,
        };

        let handle = thread::Builder::new()
            .name(format!("consumer:{}", worker.key))
            .spawn(move || worker.run())
            .map_err(|err| BusError::Spawn(err.to_string()))?;

        Ok(Self { handle })
    }

    /// True when called from this loop's own thread, e.g. by a subscriber.
    pub(crate) fn is_current_thread(&self) -> bool {
        self.handle.thread().id() == thread::current().id()
    }

    /// Wait for the loop to exit. The caller must have set the signal.
    pub(crate) fn join(self) -> LoopStats {
        self.handle.join().unwrap_or_default()
    }
}

struct Worker<T, S> {
    key: LoopKey,
    consumer: Box<dyn ConsumerHandle>,
    subject: Multicast<T>,
    serializer: Arc<S>,
    signal: ShutdownSignal,
    settings: LoopSettings,
}

impl<T: TopicMessage, S: Serializer> Worker<T, S> {
    fn run(mut self) -> LoopStats {
        let mut stats = LoopStats::default();
        info!(topic = %self.key.topic, group = %self.key.group, "consumer loop started");

        while !self.signal.is_set() {
            let iteration = panic::catch_unwind(AssertUnwindSafe(|| self.step(&mut stats)));
            if let Err(payload) = iteration {
                stats.recovered_panics += 1;
                error!(
                    topic = %self.key.topic,
                    group = %self.key.group,
                    panic = %panic_message(payload.as_ref()),
                    "consumer loop iteration panicked; continuing"
                );
            }
        }

        self.consumer.close();
        self.subject.complete();

        info!(
            topic = %self.key.topic,
            group = %self.key.group,
            delivered = stats.delivered,
            skipped = stats.skipped,
            broker_errors = stats.broker_errors,
            "consumer loop stopped"
        );
        stats
    }

    fn step(&mut self, stats: &mut LoopStats) {
        stats.polls += 1;

        match self.consumer.poll(self.settings.poll_timeout) {
            Ok(Some(raw)) => match self.serializer.decode::<T>(&raw.payload) {
                Some(value) => {
                    self.subject.emit(value);
                    stats.delivered += 1;
                }
                None => {
                    stats.skipped += 1;
                    debug!(
                        topic = %raw.topic,
                        partition = raw.partition,
                        offset = raw.offset,
                        "dropping payload that does not decode"
                    );
                }
            },
            Ok(None) => {}
            Err(err) => {
                stats.broker_errors += 1;
                warn!(
                    topic = %self.key.topic,
                    group = %self.key.group,
                    transient = err.is_transient(),
                    error = %err,
                    "consumer poll failed; continuing"
                );
                self.signal.wait_timeout(self.settings.error_backoff);
            }
        }
    }
}
