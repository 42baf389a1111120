use crate::config::KafkaConfig;
use crate::metrics_consts::{PRODUCER_MESSAGES_FAILED, PRODUCER_MESSAGES_SENT, PRODUCER_QUEUE_DEPTH};

use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::{ClientConfig, ClientContext, Statistics};
use serde::Serialize;
use serde_json::error::Error as SerdeError;
use thiserror::Error;
use tracing::{debug, error, info};

#[derive(Default)]
pub struct KafkaContext;

impl ClientContext for KafkaContext {
    fn stats(&self, stats: Statistics) {
        metrics::gauge!(PRODUCER_QUEUE_DEPTH).set(stats.msg_cnt as f64);
    }
}

pub async fn create_kafka_producer(
    config: &KafkaConfig,
) -> Result<FutureProducer<KafkaContext>, KafkaError> {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", &config.kafka_hosts)
        .set("statistics.interval.ms", "10000")
        .set("linger.ms", config.kafka_producer_linger_ms.to_string())
        .set(
            "message.timeout.ms",
            config.kafka_message_timeout_ms.to_string(),
        )
        .set(
            "compression.codec",
            config.kafka_compression_codec.to_owned(),
        )
        .set(
            "queue.buffering.max.kbytes",
            (config.kafka_producer_queue_mib * 1024).to_string(),
        )
        .set(
            "queue.buffering.max.messages",
            config.kafka_producer_queue_messages.to_string(),
        );

    if config.kafka_tls {
        client_config
            .set("security.protocol", "ssl")
            .set("enable.ssl.certificate.verification", "false");
    };

    debug!("rdkafka producer configuration: {:?}", client_config);
    let api: FutureProducer<KafkaContext> = client_config.create_with_context(KafkaContext)?;

    // "Ping" the brokers by requesting metadata
    match api
        .client()
        .fetch_metadata(None, std::time::Duration::from_secs(15))
    {
        Ok(metadata) => {
            info!(
                "Successfully connected to Kafka brokers. Found {} topics.",
                metadata.topics().len()
            );
        }
        Err(error) => {
            error!("Failed to fetch metadata from Kafka brokers: {:?}", error);
            return Err(error);
        }
    }

    Ok(api)
}

#[derive(Error, Debug)]
pub enum KafkaProduceError {
    #[error("failed to serialize: {error}")]
    SerializationError { error: SerdeError },
    #[error("failed to produce to {topic}: {error}")]
    KafkaProduceError { topic: String, error: KafkaError },
    #[error("failed to produce to {topic} (canceled)")]
    KafkaProduceCanceled { topic: String },
}

/// JSON-encode `item` and wait for the broker to acknowledge it.
pub async fn send_json<T, C>(
    kafka_producer: &FutureProducer<C>,
    topic: &str,
    item: &T,
) -> Result<(), KafkaProduceError>
where
    T: Serialize + ?Sized,
    C: ClientContext + 'static,
{
    let payload = serde_json::to_string(item)
        .map_err(|error| KafkaProduceError::SerializationError { error })?;

    let record: FutureRecord<'_, (), String> = FutureRecord {
        topic,
        key: None,
        payload: Some(&payload),
        timestamp: None,
        partition: None,
        headers: None,
    };

    let result = match kafka_producer.send_result(record) {
        Ok(delivery) => match delivery.await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err((error, _))) => Err(KafkaProduceError::KafkaProduceError {
                topic: topic.to_string(),
                error,
            }),
            Err(_) => Err(KafkaProduceError::KafkaProduceCanceled {
                topic: topic.to_string(),
            }),
        },
        Err((error, _)) => Err(KafkaProduceError::KafkaProduceError {
            topic: topic.to_string(),
            error,
        }),
    };

    match &result {
        Ok(()) => metrics::counter!(PRODUCER_MESSAGES_SENT, "topic" => topic.to_string()).increment(1),
        Err(_) => {
            metrics::counter!(PRODUCER_MESSAGES_FAILED, "topic" => topic.to_string()).increment(1)
        }
    }
    result
}
