//! Log-structured broker client (SPEC_FULL.md §4.5, §4.6, §6 "Broker").
//!
//! Topic `feedback-events` carries the JSON encoding of [`FeedbackEvent`],
//! keyed by `feedback_id` so that a given feedback's records land on one
//! partition and are processed in order. Delivery is at-least-once; the
//! consumer side exposes an explicit `commit` so the launcher can commit only
//! after a successful workflow `Start` (§4.6).

use async_trait::async_trait;
use feedback_model::FeedbackEvent;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker transport error: {0}")]
    Transport(String),
    #[error("failed to encode feedback event: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("consumer closed")]
    Closed,
}

/// Connection configuration, mirroring the defaults in §6's configuration table.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub brokers: String,
    pub topic: String,
    pub consumer_group: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".into(),
            topic: "feedback-events".into(),
            consumer_group: "iterateswarm-consumer".into(),
        }
    }
}

/// One delivered broker record, carrying enough to let the consumer commit
/// precisely the record it has finished processing.
#[derive(Debug, Clone)]
pub struct BrokerRecord {
    pub key: String,
    pub event: FeedbackEvent,
    pub partition: i32,
    pub offset: i64,
}

#[async_trait]
pub trait BrokerProducer: Send + Sync {
    /// Appends `event` to the feedback topic, keyed by `feedback_id` (§4.5).
    async fn publish(&self, event: &FeedbackEvent) -> Result<(), BrokerError>;

    /// Cheap liveness probe for `/health/details` (§4.5's route table).
    /// Implementations that have no cheaper check may override with a real
    /// round-trip; the default assumes a producer that constructed
    /// successfully stays usable.
    async fn healthy(&self) -> bool {
        true
    }
}

#[async_trait]
pub trait BrokerConsumer: Send {
    /// Blocks until the next record is available.
    async fn poll(&mut self) -> Result<BrokerRecord, BrokerError>;

    /// Commits the offset for `record`. Per §4.6, callers MUST only commit
    /// after the corresponding workflow `Start` has returned.
    async fn commit(&mut self, record: &BrokerRecord) -> Result<(), BrokerError>;
}

pub mod kafka {
    use super::*;
    use rdkafka::config::ClientConfig;
    use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
    use rdkafka::message::Message;
    use rdkafka::producer::{FutureProducer, FutureRecord};
    use rdkafka::TopicPartitionList;

    /// `FutureProducer`-backed implementation, one instance per gateway
    /// process (§5 "Shared-resource policy").
    pub struct KafkaProducer {
        producer: FutureProducer,
        topic: String,
    }

    impl KafkaProducer {
        pub fn connect(config: &BrokerConfig) -> Result<Self, BrokerError> {
            let producer: FutureProducer = ClientConfig::new()
                .set("bootstrap.servers", &config.brokers)
                .set("message.timeout.ms", "5000")
                .create()
                .map_err(|e| BrokerError::Transport(e.to_string()))?;
            Ok(Self {
                producer,
                topic: config.topic.clone(),
            })
        }
    }

    #[async_trait]
    impl BrokerProducer for KafkaProducer {
        async fn publish(&self, event: &FeedbackEvent) -> Result<(), BrokerError> {
            let key = event.feedback_id.to_string();
            let payload = serde_json::to_vec(event)?;
            let record = FutureRecord::to(&self.topic).key(&key).payload(&payload);
            self.producer
                .send(record, Duration::from_secs(5))
                .await
                .map_err(|(err, _)| BrokerError::Transport(err.to_string()))?;
            Ok(())
        }
    }

    /// `StreamConsumer`-backed implementation, one instance per launcher
    /// process.
    pub struct KafkaConsumer {
        consumer: StreamConsumer,
    }

    impl KafkaConsumer {
        pub fn connect(config: &BrokerConfig) -> Result<Self, BrokerError> {
            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &config.brokers)
                .set("group.id", &config.consumer_group)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", "earliest")
                .create()
                .map_err(|e| BrokerError::Transport(e.to_string()))?;
            consumer
                .subscribe(&[config.topic.as_str()])
                .map_err(|e| BrokerError::Transport(e.to_string()))?;
            Ok(Self { consumer })
        }
    }

    #[async_trait]
    impl BrokerConsumer for KafkaConsumer {
        async fn poll(&mut self) -> Result<BrokerRecord, BrokerError> {
            let message = self
                .consumer
                .recv()
                .await
                .map_err(|e| BrokerError::Transport(e.to_string()))?;
            let payload = message.payload().ok_or(BrokerError::Closed)?;
            let event: FeedbackEvent = serde_json::from_slice(payload)?;
            let key = message
                .key()
                .map(|k| String::from_utf8_lossy(k).into_owned())
                .unwrap_or_else(|| event.feedback_id.to_string());
            Ok(BrokerRecord {
                key,
                event,
                partition: message.partition(),
                offset: message.offset(),
            })
        }

        async fn commit(&mut self, record: &BrokerRecord) -> Result<(), BrokerError> {
            let mut tpl = TopicPartitionList::new();
            tpl.add_partition_offset(
                self.consumer.subscription().map_err(|e| BrokerError::Transport(e.to_string()))?[0]
                    .topic(),
                record.partition,
                rdkafka::Offset::Offset(record.offset + 1),
            )
            .map_err(|e| BrokerError::Transport(e.to_string()))?;
            self.consumer
                .commit(&tpl, CommitMode::Sync)
                .map_err(|e| BrokerError::Transport(e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feedback_model::{FeedbackOrigin, FeedbackSource};
    use std::sync::Mutex;

    /// In-memory fake used by the gateway and launcher's own unit tests
    /// (no broker process required), grounded on the same fake-over-trait
    /// approach used throughout the activity layer.
    pub struct InMemoryBroker {
        records: Mutex<Vec<BrokerRecord>>,
    }

    impl InMemoryBroker {
        pub fn new() -> Self {
            Self {
                records: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl BrokerProducer for InMemoryBroker {
        async fn publish(&self, event: &FeedbackEvent) -> Result<(), BrokerError> {
            self.records.lock().unwrap().push(BrokerRecord {
                key: event.feedback_id.to_string(),
                event: event.clone(),
                partition: 0,
                offset: 0,
            });
            Ok(())
        }
    }

    #[tokio::test]
    async fn publish_records_one_entry_per_event() {
        let broker = InMemoryBroker::new();
        let event = FeedbackEvent::new(
            "App crashes on startup".into(),
            FeedbackSource::ChatA,
            FeedbackOrigin {
                channel_id: Some("C1".into()),
                user_id: Some("alice".into()),
                message_id: None,
            },
        );
        broker.publish(&event).await.unwrap();
        assert_eq!(broker.records.lock().unwrap().len(), 1);
    }

    #[test]
    fn default_config_matches_spec_defaults() {
        let config = BrokerConfig::default();
        assert_eq!(config.brokers, "localhost:9092");
        assert_eq!(config.topic, "feedback-events");
        assert_eq!(config.consumer_group, "iterateswarm-consumer");
    }
}
