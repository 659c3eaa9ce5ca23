//! Apache Kafka adapter built on `rdkafka`.
//!
//! Consumers are `BaseConsumer`s polled from the bus's dedicated loop
//! threads; the producer is a single `FutureProducer` shared by every
//! publish.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::Message;
use tracing::info;

use super::{BrokerClient, ConsumerHandle, DeliveryReport, ProducerHandle, RawMessage};
use crate::config::BusConfig;
use crate::error::BrokerError;

/// Kafka broker client configured from a `BusConfig`.
#[derive(Clone)]
pub struct KafkaBroker {
    config: BusConfig,
}

impl KafkaBroker {
    /// Connection settings are read from `config`; nothing connects until
    /// the first consumer or producer is opened.
    pub fn new(config: &BusConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    fn base_config(&self) -> ClientConfig {
        let mut client = ClientConfig::new();
        client
            .set("bootstrap.servers", &self.config.bootstrap_servers)
            .set("client.id", &self.config.client_id);
        client
    }
}

impl BrokerClient for KafkaBroker {
    fn open_consumer(
        &self,
        topic: &str,
        group: &str,
    ) -> Result<Box<dyn ConsumerHandle>, BrokerError> {
        let consumer: BaseConsumer = self
            .base_config()
            .set("group.id", group)
            .set("auto.offset.reset", self.config.auto_offset_reset.as_str())
            .set(
                "enable.auto.commit",
                if self.config.enable_auto_commit { "true" } else { "false" },
            )
            .create()
            .map_err(to_broker_error)?;

        consumer.subscribe(&[topic]).map_err(to_broker_error)?;
        info!(topic, group, "kafka consumer subscribed");

        Ok(Box::new(KafkaConsumer { consumer }))
    }

    fn open_producer(&self) -> Result<Arc<dyn ProducerHandle>, BrokerError> {
        let producer: FutureProducer = self
            .base_config()
            .set(
                "message.timeout.ms",
                self.config.publish_timeout_ms.to_string(),
            )
            .create()
            .map_err(to_broker_error)?;

        Ok(Arc::new(KafkaProducer {
            producer,
            timeout: self.config.publish_timeout(),
        }))
    }
}

struct KafkaConsumer {
    consumer: BaseConsumer,
}

impl ConsumerHandle for KafkaConsumer {
    fn poll(&mut self, timeout: Duration) -> Result<Option<RawMessage>, BrokerError> {
        match self.consumer.poll(timeout) {
            None => Ok(None),
            Some(Ok(msg)) => Ok(Some(RawMessage {
                topic: msg.topic().to_string(),
                partition: msg.partition(),
                offset: msg.offset(),
                key: msg.key().map(<[u8]>::to_vec),
                payload: msg.payload().map(<[u8]>::to_vec).unwrap_or_default(),
                timestamp_ms: msg.timestamp().to_millis(),
            })),
            Some(Err(err)) => Err(to_broker_error(err)),
        }
    }

    fn close(&mut self) {
        self.consumer.unsubscribe();
    }
}

struct KafkaProducer {
    producer: FutureProducer,
    timeout: Duration,
}

#[async_trait]
impl ProducerHandle for KafkaProducer {
    async fn produce(&self, topic: &str, payload: Vec<u8>) -> Result<DeliveryReport, BrokerError> {
        let record = FutureRecord::<(), [u8]>::to(topic).payload(&payload);

        let (partition, offset) = self
            .producer
            .send(record, Timeout::After(self.timeout))
            .await
            .map_err(|(err, _msg)| to_broker_error(err))?;

        Ok(DeliveryReport {
            topic: topic.to_string(),
            partition,
            offset,
        })
    }
}

fn to_broker_error(err: KafkaError) -> BrokerError {
    let fatal = matches!(
        err.rdkafka_error_code(),
        Some(RDKafkaErrorCode::Fatal)
            | Some(RDKafkaErrorCode::Authentication)
            | Some(RDKafkaErrorCode::TopicAuthorizationFailed)
            | Some(RDKafkaErrorCode::GroupAuthorizationFailed)
    ) || matches!(err, KafkaError::ClientCreation(_) | KafkaError::ClientConfig(..));

    if fatal {
        BrokerError::fatal(err.to_string())
    } else {
        BrokerError::transient(err.to_string())
    }
}
