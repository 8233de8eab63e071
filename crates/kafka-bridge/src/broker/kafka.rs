//! Kafka transport.
//!
//! Requests go out through a `FutureProducer` keyed by correlation ID.
//! Replies come in through a `StreamConsumer` manually assigned to every
//! partition of the response topic from the latest offset. Assignment instead
//! of group subscription means every gateway instance reads every reply and
//! keeps the ones it has a pending entry for.

use super::transport::{InboundReply, ReplyStream, RequestPublisher, TransportError};
use crate::domain::config::BrokerConfig;
use crate::domain::error::BridgeError;
use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::{Message, Offset, TopicPartitionList};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

const METADATA_TIMEOUT: Duration = Duration::from_secs(10);
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

pub struct KafkaPublisher {
    producer: FutureProducer,
    topic: String,
    send_timeout: Duration,
}

impl KafkaPublisher {
    pub fn connect(config: &BrokerConfig) -> Result<Self, BridgeError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", config.bootstrap_servers())
            .set(
                "message.timeout.ms",
                config.send_timeout.as_millis().to_string(),
            )
            .create()
            .map_err(|e| BridgeError::Transport(format!("failed to create producer: {}", e)))?;

        info!(
            brokers = %config.bootstrap_servers(),
            topic = %config.request_topic,
            "Kafka producer created"
        );

        Ok(Self {
            producer,
            topic: config.request_topic.clone(),
            send_timeout: config.send_timeout,
        })
    }
}

#[async_trait]
impl RequestPublisher for KafkaPublisher {
    async fn publish(&self, key: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        let record = FutureRecord::to(&self.topic)
            .key(key)
            .payload(payload.as_slice());

        match self
            .producer
            .send(record, Timeout::After(self.send_timeout))
            .await
        {
            Ok((partition, offset)) => {
                debug!(key = key, partition, offset, "Request delivered to Kafka");
                Ok(())
            }
            Err((e, _)) => Err(TransportError::Rejected(e.to_string())),
        }
    }

    async fn close(&self) {
        let producer = self.producer.clone();
        match tokio::task::spawn_blocking(move || producer.flush(Timeout::After(FLUSH_TIMEOUT)))
            .await
        {
            Ok(Ok(())) => debug!("Kafka producer flushed"),
            Ok(Err(e)) => warn!(error = %e, "Kafka producer flush failed"),
            Err(e) => warn!(error = %e, "Kafka producer flush task failed"),
        }
    }
}

pub struct KafkaReplyStream {
    consumer: StreamConsumer,
}

impl KafkaReplyStream {
    /// Create the consumer and assign it to every partition of the response
    /// topic at the latest offset.
    ///
    /// Fetches topic metadata synchronously; call once at startup.
    pub fn connect(config: &BrokerConfig) -> Result<Self, BridgeError> {
        let group_id = format!("{}-{}", config.consumer_group, Uuid::new_v4().simple());

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", config.bootstrap_servers())
            .set("group.id", &group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "latest")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| BridgeError::Consumer(format!("failed to create consumer: {}", e)))?;

        let topic = &config.response_topic;
        let metadata = consumer
            .fetch_metadata(Some(topic), METADATA_TIMEOUT)
            .map_err(|e| BridgeError::Consumer(format!("failed to fetch metadata: {}", e)))?;

        let mut assignment = TopicPartitionList::new();
        for partition in metadata
            .topics()
            .iter()
            .filter(|t| t.name() == topic)
            .flat_map(|t| t.partitions())
        {
            assignment
                .add_partition_offset(topic, partition.id(), Offset::End)
                .map_err(|e| BridgeError::Consumer(e.to_string()))?;
        }

        if assignment.count() == 0 {
            return Err(BridgeError::Consumer(format!(
                "topic '{}' has no partitions",
                topic
            )));
        }

        consumer
            .assign(&assignment)
            .map_err(|e| BridgeError::Consumer(format!("failed to assign partitions: {}", e)))?;

        info!(
            topic = %topic,
            partitions = assignment.count(),
            group_id = %group_id,
            "Kafka reply consumer assigned"
        );

        Ok(Self { consumer })
    }
}

#[async_trait]
impl ReplyStream for KafkaReplyStream {
    async fn next_reply(&mut self) -> Option<Result<InboundReply, TransportError>> {
        let next = match self.consumer.recv().await {
            Ok(message) => Ok(InboundReply {
                key: message.key().map(<[u8]>::to_vec),
                payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
            }),
            Err(e) => Err(TransportError::Receive(e.to_string())),
        };
        Some(next)
    }
}
