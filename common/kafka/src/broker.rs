use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::consumer::{BaseConsumer, CommitMode, Consumer, ConsumerContext, Rebalance, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::{BorrowedMessage, Message, Timestamp};
use rdkafka::{ClientConfig, ClientContext, Offset, TopicPartitionList};
use tracing::{debug, error, info};

use crate::record::Position;

/// How long a rebalance callback may wait on the broker to resolve start offsets.
const OFFSETS_FOR_TIMES_TIMEOUT: Duration = Duration::from_secs(10);

/// A message as handed over by the broker, before any decoding.
///
/// Per-message failures travel in `error` instead of failing the whole poll,
/// so the consumer can decide whether to skip them or stop.
#[derive(Debug, Clone)]
pub struct WireRecord {
    pub position: Option<Position>,
    pub payload: Option<Vec<u8>>,
    pub timestamp: Timestamp,
    pub error: Option<KafkaError>,
}

impl WireRecord {
    pub fn message(position: Position, payload: Option<Vec<u8>>, timestamp: Timestamp) -> Self {
        Self {
            position: Some(position),
            payload,
            timestamp,
            error: None,
        }
    }

    pub fn failed(error: KafkaError) -> Self {
        Self {
            position: None,
            payload: None,
            timestamp: Timestamp::NotAvailable,
            error: Some(error),
        }
    }

    pub fn from_borrowed_message(msg: &BorrowedMessage<'_>) -> Self {
        Self::message(
            Position::new(msg.topic(), msg.partition(), msg.offset()),
            msg.payload().map(|p| p.to_vec()),
            msg.timestamp(),
        )
    }

    pub fn timestamp_ms(&self) -> Option<i64> {
        self.timestamp.to_millis()
    }
}

/// True when the error only signals that a partition has no more data.
pub fn is_partition_eof(error: &KafkaError) -> bool {
    matches!(
        error,
        KafkaError::PartitionEOF(_) | KafkaError::MessageConsumption(RDKafkaErrorCode::PartitionEOF)
    )
}

/// The narrow slice of a broker client the windowed consumer relies on.
#[async_trait]
pub trait BrokerClient: Send {
    /// Subscribe to `topics`. When `start_ms` is set, newly assigned partitions
    /// start at the first offset whose timestamp is at or after it.
    fn subscribe(&mut self, topics: &[String], start_ms: Option<i64>) -> Result<(), KafkaError>;

    fn unsubscribe(&mut self);

    /// Fetch up to `max_records` records, waiting at most `timeout`.
    /// An empty result is not an error.
    async fn poll_batch(
        &mut self,
        max_records: usize,
        timeout: Duration,
    ) -> Result<Vec<WireRecord>, KafkaError>;

    /// Acknowledge everything up to and including `position`.
    fn commit(&mut self, position: &Position) -> Result<(), KafkaError>;
}

/// Consumer context that moves freshly assigned partitions to a start timestamp.
#[derive(Default)]
pub struct WindowContext {
    start_ms: Mutex<Option<i64>>,
}

impl WindowContext {
    fn set_start(&self, start_ms: Option<i64>) {
        *self.start_ms.lock().unwrap_or_else(PoisonError::into_inner) = start_ms;
    }

    fn start(&self) -> Option<i64> {
        *self.start_ms.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ClientContext for WindowContext {}

impl ConsumerContext for WindowContext {
    fn post_rebalance(&self, base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance) {
        let Rebalance::Assign(partitions) = rebalance else {
            return;
        };
        let Some(start_ms) = self.start() else {
            return;
        };
        if partitions.count() == 0 {
            return;
        }

        let mut timestamps = TopicPartitionList::new();
        for elem in partitions.elements() {
            if let Err(e) =
                timestamps.add_partition_offset(elem.topic(), elem.partition(), Offset::Offset(start_ms))
            {
                error!("Failed to build start offsets for {}/{}: {e}", elem.topic(), elem.partition());
                return;
            }
        }

        match base_consumer.offsets_for_times(timestamps, OFFSETS_FOR_TIMES_TIMEOUT) {
            Ok(resolved) => {
                info!(
                    "Assigning {} partitions from timestamp {start_ms}",
                    resolved.count()
                );
                if let Err(e) = base_consumer.assign(&resolved) {
                    error!("Failed to assign partitions at start timestamp: {e}");
                }
            }
            Err(e) => error!("Failed to resolve offsets for timestamp {start_ms}: {e}"),
        }
    }
}

/// [`BrokerClient`] backed by an rdkafka stream consumer.
pub struct KafkaBrokerClient {
    consumer: StreamConsumer<WindowContext>,
}

impl KafkaBrokerClient {
    pub fn new(config: &ClientConfig) -> Result<Self, KafkaError> {
        debug!("rdkafka consumer configuration: {:?}", config);
        let consumer: StreamConsumer<WindowContext> =
            config.create_with_context(WindowContext::default())?;
        Ok(Self { consumer })
    }
}

#[async_trait]
impl BrokerClient for KafkaBrokerClient {
    fn subscribe(&mut self, topics: &[String], start_ms: Option<i64>) -> Result<(), KafkaError> {
        self.consumer.context().set_start(start_ms);
        let topics: Vec<&str> = topics.iter().map(String::as_str).collect();
        self.consumer.subscribe(&topics)
    }

    fn unsubscribe(&mut self) {
        self.consumer.unsubscribe();
    }

    async fn poll_batch(
        &mut self,
        max_records: usize,
        timeout: Duration,
    ) -> Result<Vec<WireRecord>, KafkaError> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut records = Vec::with_capacity(max_records);

        while records.len() < max_records {
            match tokio::time::timeout_at(deadline, self.consumer.recv()).await {
                // Out of time, hand back whatever arrived
                Err(_) => break,
                Ok(Ok(msg)) => records.push(WireRecord::from_borrowed_message(&msg)),
                Ok(Err(e @ KafkaError::MessageConsumptionFatal(_))) => return Err(e),
                Ok(Err(e)) => {
                    // Return early so the caller sees the error in arrival order
                    records.push(WireRecord::failed(e));
                    break;
                }
            }
        }

        Ok(records)
    }

    fn commit(&mut self, position: &Position) -> Result<(), KafkaError> {
        let mut list = TopicPartitionList::new();
        list.add_partition_offset(
            position.topic(),
            position.partition(),
            Offset::Offset(position.offset() + 1),
        )?;
        self.consumer.commit(&list, CommitMode::Sync)
    }
}
