use async_trait::async_trait;
use common_kafka::kafka_producer::{send_json, KafkaContext};
use common_kafka::topic_strategy::TopicStrategy;
use rdkafka::producer::FutureProducer;
use serde_json::Value;
use tracing::debug;

use crate::metrics_consts::RESULTS_PRODUCED;

/// Destination for step results.
#[async_trait]
pub trait Producer: Send + Sync {
    async fn produce(&self, message: Value) -> anyhow::Result<()>;
}

/// Discards every result. Used when no result topic is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProducer;

#[async_trait]
impl Producer for NoopProducer {
    async fn produce(&self, _message: Value) -> anyhow::Result<()> {
        Ok(())
    }
}

pub enum ResultTopic {
    Static(String),
    Strategy(Box<dyn TopicStrategy>),
}

impl ResultTopic {
    /// The topic results go to right now. With a strategy this is the newest
    /// resolved topic.
    pub fn current(&self) -> Option<String> {
        match self {
            ResultTopic::Static(topic) => Some(topic.clone()),
            ResultTopic::Strategy(strategy) => strategy.resolve().pop(),
        }
    }
}

/// JSON-encodes results onto a Kafka topic. An array result is produced one
/// element per message, a null result is not produced at all.
pub struct KafkaResultProducer {
    producer: FutureProducer<KafkaContext>,
    topic: ResultTopic,
}

impl KafkaResultProducer {
    pub fn new(producer: FutureProducer<KafkaContext>, topic: ResultTopic) -> Self {
        Self { producer, topic }
    }
}

#[async_trait]
impl Producer for KafkaResultProducer {
    async fn produce(&self, message: Value) -> anyhow::Result<()> {
        let messages = match message {
            Value::Null => return Ok(()),
            Value::Array(items) => items,
            other => vec![other],
        };
        let topic = self
            .topic
            .current()
            .ok_or_else(|| anyhow::anyhow!("topic strategy resolved no result topic"))?;

        for message in messages.iter().filter(|m| !m.is_null()) {
            send_json(&self.producer, &topic, message).await?;
            metrics::counter!(RESULTS_PRODUCED).increment(1);
        }
        debug!("Produced {} results to {topic}", messages.len());
        Ok(())
    }
}
