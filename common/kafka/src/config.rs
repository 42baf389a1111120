use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use envconfig::Envconfig;
use rdkafka::ClientConfig;
use serde_json::Value;

use crate::consumer::{ConsumerError, ConsumerOptions, TopicSource, Window};
use crate::payload::PayloadFormat;
use crate::topic_strategy::TopicStrategyConfig;

#[derive(Envconfig, Clone, Debug)]
pub struct KafkaConfig {
    #[envconfig(default = "20")]
    pub kafka_producer_linger_ms: u32, // Maximum time between producer batches during low traffic

    #[envconfig(default = "400")]
    pub kafka_producer_queue_mib: u32, // Size of the in-memory producer queue in mebibytes

    #[envconfig(default = "10000000")]
    pub kafka_producer_queue_messages: u32, // Maximum number of messages in the in-memory producer queue

    #[envconfig(default = "20000")]
    pub kafka_message_timeout_ms: u32, // Time before we stop retrying producing a message: 20 seconds

    #[envconfig(default = "none")]
    pub kafka_compression_codec: String, // none, gzip, snappy, lz4, zstd

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,
}

#[derive(Envconfig, Clone, Debug)]
pub struct ConsumerConfig {
    #[envconfig(default = "step-worker")]
    pub kafka_consumer_group: String,

    // Comma separated, mutually exclusive with the topic strategy
    pub kafka_consumer_topics: Option<String>,

    // {"class": "daily", "params": {...}}
    pub kafka_consumer_topic_strategy: Option<TopicStrategyConfig>,

    #[envconfig(default = "earliest")]
    pub kafka_consumer_offset_reset: String, // earliest, latest

    // Extra librdkafka options as a JSON object, passed through untouched
    pub kafka_consumer_params: Option<ClientParams>,

    #[envconfig(default = "json")]
    pub payload_format: PayloadFormat,

    #[envconfig(default = "1")]
    pub consume_messages: usize,

    #[envconfig(default = "60")]
    pub consume_timeout_secs: u64,

    // DD/MM/YYYY HH:MM:SS, UTC
    pub offset_init: Option<String>,
    pub offset_end: Option<String>,
}

impl ConsumerConfig {
    pub fn static_topics(&self) -> Option<Vec<String>> {
        self.kafka_consumer_topics.as_ref().map(|topics| {
            topics
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(String::from)
                .collect()
        })
    }

    pub fn topic_source(&self) -> Result<TopicSource, ConsumerError> {
        let strategy = self
            .kafka_consumer_topic_strategy
            .as_ref()
            .map(TopicStrategyConfig::build)
            .transpose()
            .map_err(|e| ConsumerError::Configuration(e.to_string()))?;
        TopicSource::from_parts(self.static_topics(), strategy)
    }

    pub fn options(&self) -> ConsumerOptions {
        ConsumerOptions {
            batch_size: self.consume_messages,
            poll_timeout: Duration::from_secs(self.consume_timeout_secs),
            payload_format: self.payload_format,
            window: Window::parse(self.offset_init.as_deref(), self.offset_end.as_deref()),
        }
    }

    /// Client settings for the consumer. Automatic commits and offset storing
    /// are always disabled, whatever the pass-through params say. Partition EOF
    /// reporting stays off unless the params turn it on, since the first EOF
    /// ends a consumption pass.
    pub fn client_config(&self, kafka: &KafkaConfig) -> ClientConfig {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &kafka.kafka_hosts)
            .set("group.id", &self.kafka_consumer_group)
            .set("auto.offset.reset", &self.kafka_consumer_offset_reset);

        if kafka.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        };

        if let Some(params) = &self.kafka_consumer_params {
            for (key, value) in &params.0 {
                client_config.set(key, value);
            }
        }

        client_config
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false");
        client_config
    }
}

/// Opaque librdkafka settings given as a JSON object. Non-string values are
/// rendered to their JSON text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientParams(pub BTreeMap<String, String>);

impl FromStr for ClientParams {
    type Err = serde_json::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw: BTreeMap<String, Value> = serde_json::from_str(s)?;
        Ok(Self(
            raw.into_iter()
                .map(|(key, value)| match value {
                    Value::String(s) => (key, s),
                    other => (key, other.to_string()),
                })
                .collect(),
        ))
    }
}
