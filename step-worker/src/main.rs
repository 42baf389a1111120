use anyhow::{Context, Error};
use common_kafka::broker::KafkaBrokerClient;
use common_kafka::consumer::WindowedConsumer;
use common_kafka::kafka_producer::create_kafka_producer;
use envconfig::Envconfig;
use step_worker::aggregator::{KafkaMetricsSink, LogMetricsSink, MetricsAggregator, MetricsSink};
use step_worker::config::{Config, MetricsSinkKind};
use step_worker::driver::StepDriver;
use step_worker::passthrough::PassthroughStep;
use step_worker::producer::{KafkaResultProducer, Producer, ResultTopic};
use step_worker::server::{router, serve};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

fn setup_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let log_layer = tracing_subscriber::fmt::layer().with_filter(filter);
    tracing_subscriber::registry().with(log_layer).init();
}

async fn build_producer(config: &Config) -> Result<Option<Box<dyn Producer>>, Error> {
    let topic = match (&config.producer_topic, &config.producer_topic_strategy) {
        (Some(topic), _) => ResultTopic::Static(topic.clone()),
        (None, Some(strategy)) => ResultTopic::Strategy(
            strategy
                .build()
                .context("invalid producer topic strategy")?,
        ),
        (None, None) => return Ok(None),
    };
    let producer = create_kafka_producer(&config.kafka)
        .await
        .context("failed to create result producer")?;
    Ok(Some(Box::new(KafkaResultProducer::new(producer, topic))))
}

async fn build_metrics_sink(config: &Config) -> Result<Option<Box<dyn MetricsSink>>, Error> {
    let sink: Box<dyn MetricsSink> = match config.metrics_sink {
        MetricsSinkKind::None => return Ok(None),
        MetricsSinkKind::Log => Box::new(LogMetricsSink),
        MetricsSinkKind::Kafka => {
            let producer = create_kafka_producer(&config.kafka)
                .await
                .context("failed to create metrics producer")?;
            Box::new(KafkaMetricsSink::new(producer, config.metrics_topic.clone()))
        }
    };
    Ok(Some(sink))
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config = Config::init_from_env().context("failed to load configuration")?;
    setup_tracing(config.default_log_level());
    info!("Starting up...");

    // Everything that can be checked without a broker fails here
    config.validate()?;
    let settings = config.driver_settings()?;
    let source = config.consumer.topic_source()?;

    let app = router().context("failed to install metrics recorder")?;
    let bind = format!("{}:{}", config.host, config.port);
    tokio::task::spawn(async move {
        if let Err(e) = serve(app, &bind).await {
            error!("Failed to serve metrics on {bind}: {e}");
        }
    });

    let broker = KafkaBrokerClient::new(&config.consumer.client_config(&config.kafka))
        .context("failed to create kafka consumer")?;
    let consumer = WindowedConsumer::new(broker, source, config.consumer.options())?;

    let step = PassthroughStep::new(config.step_name.clone());
    let metrics = MetricsAggregator::new(config.step_name.clone(), build_metrics_sink(&config).await?);
    let mut driver = StepDriver::new(step, consumer, settings).with_metrics(metrics);
    if let Some(producer) = build_producer(&config).await? {
        driver = driver.with_producer(producer);
    }

    driver.run().await?;

    info!("Shutting down");
    Ok(())
}
