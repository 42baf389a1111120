use std::str::FromStr;

use common_kafka::config::{ConsumerConfig, KafkaConfig};
use common_kafka::topic_strategy::TopicStrategyConfig;
use envconfig::Envconfig;

use crate::driver::DriverSettings;
use crate::error::DriverError;
use crate::extra_metrics::MetricSpec;
use crate::mode::ProcessingMode;

/// Field extracted by default once a metrics sink is configured.
pub const DEFAULT_EXTRA_METRIC: &str = "candid";

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3302")]
    pub port: u16,

    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,

    #[envconfig(nested = true)]
    pub consumer: ConsumerConfig,

    #[envconfig(default = "passthrough")]
    pub step_name: String,

    // simple, composite, component
    #[envconfig(default = "simple")]
    pub step_type: String,

    #[envconfig(default = "true")]
    pub commit: bool,

    #[envconfig(default = "none")]
    pub metrics_sink: MetricsSinkKind,

    #[envconfig(default = "metrics")]
    pub metrics_topic: String,

    // JSON list, e.g. ["oid", {"key": "candid", "alias": "c", "format": "str"}]
    pub extra_metrics: Option<ExtraMetrics>,

    pub producer_topic: Option<String>,
    pub producer_topic_strategy: Option<TopicStrategyConfig>,

    #[envconfig(default = "false")]
    pub logging_debug: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricsSinkKind {
    None,
    Log,
    Kafka,
}

impl FromStr for MetricsSinkKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "" => Ok(MetricsSinkKind::None),
            "log" => Ok(MetricsSinkKind::Log),
            "kafka" => Ok(MetricsSinkKind::Kafka),
            other => Err(format!("unknown metrics sink: {other}")),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExtraMetrics(pub Vec<MetricSpec>);

impl FromStr for ExtraMetrics {
    type Err = serde_json::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(serde_json::from_str(s)?))
    }
}

impl Config {
    pub fn processing_mode(&self) -> Result<ProcessingMode, DriverError> {
        self.step_type
            .parse()
            .map_err(DriverError::Configuration)
    }

    /// Declared extra metrics. Without a declaration, a configured sink gets
    /// the default field and no sink gets none.
    pub fn extra_metric_specs(&self) -> Vec<MetricSpec> {
        match (&self.extra_metrics, self.metrics_sink) {
            (Some(ExtraMetrics(specs)), _) => specs.clone(),
            (None, MetricsSinkKind::None) => Vec::new(),
            (None, _) => vec![MetricSpec::field(DEFAULT_EXTRA_METRIC)],
        }
    }

    pub fn driver_settings(&self) -> Result<DriverSettings, DriverError> {
        Ok(DriverSettings {
            mode: self.processing_mode()?,
            commit: self.commit,
            extra_metrics: self.extra_metric_specs(),
        })
    }

    pub fn validate(&self) -> Result<(), DriverError> {
        if self.producer_topic.is_some() && self.producer_topic_strategy.is_some() {
            return Err(DriverError::Configuration(
                "PRODUCER_TOPIC and PRODUCER_TOPIC_STRATEGY are mutually exclusive".to_string(),
            ));
        }
        self.processing_mode()?;
        self.consumer.topic_source()?;
        Ok(())
    }

    pub fn default_log_level(&self) -> &'static str {
        if self.logging_debug {
            "debug"
        } else {
            "info"
        }
    }
}
