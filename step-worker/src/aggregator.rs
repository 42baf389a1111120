use async_trait::async_trait;
use common_kafka::kafka_producer::{send_json, KafkaContext};
use rdkafka::producer::FutureProducer;
use serde_json::{Map, Value};
use tracing::{error, info};

use crate::metrics_consts::METRICS_SINK_FAILURES;

pub const SOURCE: &str = "source";

/// External transport for per-cycle metrics records.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn send(&self, metrics: &Map<String, Value>) -> anyhow::Result<()>;
}

/// Single collection point for per-cycle metrics. Records are stamped with the
/// step name and forwarded as they come, without buffering. Without a sink
/// every record is dropped.
pub struct MetricsAggregator {
    source: String,
    sink: Option<Box<dyn MetricsSink>>,
}

impl MetricsAggregator {
    pub fn new(source: impl Into<String>, sink: Option<Box<dyn MetricsSink>>) -> Self {
        Self {
            source: source.into(),
            sink,
        }
    }

    pub fn disabled(source: impl Into<String>) -> Self {
        Self::new(source, None)
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    /// Forward one record. Sink failures are logged and counted, never returned.
    pub async fn send(&self, mut metrics: Map<String, Value>) {
        let Some(sink) = &self.sink else {
            return;
        };
        metrics.insert(SOURCE.to_string(), Value::String(self.source.clone()));
        if let Err(e) = sink.send(&metrics).await {
            error!("Failed to send metrics for {}: {e:#}", self.source);
            metrics::counter!(METRICS_SINK_FAILURES).increment(1);
        }
    }
}

/// Writes each record as a tracing event.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMetricsSink;

#[async_trait]
impl MetricsSink for LogMetricsSink {
    async fn send(&self, metrics: &Map<String, Value>) -> anyhow::Result<()> {
        info!(metrics = %serde_json::Value::Object(metrics.clone()), "step metrics");
        Ok(())
    }
}

/// Publishes each record as JSON on a metrics topic.
pub struct KafkaMetricsSink {
    producer: FutureProducer<KafkaContext>,
    topic: String,
}

impl KafkaMetricsSink {
    pub fn new(producer: FutureProducer<KafkaContext>, topic: impl Into<String>) -> Self {
        Self {
            producer,
            topic: topic.into(),
        }
    }
}

#[async_trait]
impl MetricsSink for KafkaMetricsSink {
    async fn send(&self, metrics: &Map<String, Value>) -> anyhow::Result<()> {
        send_json(&self.producer, &self.topic, metrics).await?;
        Ok(())
    }
}
