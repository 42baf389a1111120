//! Windowed, topic-adaptive batch consumer with caller-controlled commits.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::NaiveDateTime;
use rdkafka::error::KafkaError;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::broker::{is_partition_eof, BrokerClient, WireRecord};
use crate::metrics_consts::{
    CONSUMER_COMMIT_FAILURES, CONSUMER_COMMIT_RETRIES, CONSUMER_COMMITS,
    CONSUMER_RECORDS_RECEIVED, CONSUMER_RECORDS_SKIPPED, CONSUMER_RESUBSCRIPTIONS,
    CONSUMER_UNITS_YIELDED,
};
use crate::payload::{DecodeError, PayloadFormat};
use crate::record::{Position, Record, Unit};
use crate::topic_strategy::TopicStrategy;

/// Human readable timestamp format accepted for window bounds, read as UTC.
pub const WINDOW_TIMESTAMP_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

/// Attempts per record before a commit failure is surfaced.
pub const COMMIT_ATTEMPTS: u32 = 3;

pub const DEFAULT_BATCH_SIZE: usize = 1;
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("invalid window timestamp {value:?}, expected DD/MM/YYYY HH:MM:SS: {source}")]
    InvalidWindow {
        value: String,
        #[source]
        source: chrono::ParseError,
    },
    #[error("failed to subscribe to {topics:?}: {source}")]
    Subscribe {
        topics: Vec<String>,
        #[source]
        source: KafkaError,
    },
    #[error("failed to poll broker: {0}")]
    Poll(#[source] KafkaError),
    #[error("failed to decode message at {position}: {source}")]
    Decode {
        position: Position,
        #[source]
        source: DecodeError,
    },
    #[error("failed to commit {position} after {attempts} attempts: {source}")]
    Commit {
        position: Position,
        attempts: u32,
        #[source]
        source: KafkaError,
    },
}

/// Where the topic set comes from. Exactly one source is allowed.
pub enum TopicSource {
    Static(Vec<String>),
    Strategy(Box<dyn TopicStrategy>),
}

impl TopicSource {
    pub fn from_parts(
        topics: Option<Vec<String>>,
        strategy: Option<Box<dyn TopicStrategy>>,
    ) -> Result<Self, ConsumerError> {
        let topics = topics.filter(|t| !t.is_empty());
        match (topics, strategy) {
            (Some(topics), None) => Ok(TopicSource::Static(topics)),
            (None, Some(strategy)) => Ok(TopicSource::Strategy(strategy)),
            (Some(_), Some(_)) => Err(ConsumerError::Configuration(
                "a static topic list and a topic strategy are mutually exclusive".to_string(),
            )),
            (None, None) => Err(ConsumerError::Configuration(
                "no topics or topic strategy set".to_string(),
            )),
        }
    }

    fn resolve(&self) -> Vec<String> {
        match self {
            TopicSource::Static(topics) => topics.clone(),
            TopicSource::Strategy(strategy) => strategy.resolve(),
        }
    }

    fn is_dynamic(&self) -> bool {
        matches!(self, TopicSource::Strategy(_))
    }
}

/// Timestamp bounds, in epoch milliseconds, on the records handed out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Window {
    pub start_ms: Option<i64>,
    pub end_ms: Option<i64>,
}

impl Window {
    /// Parse both bounds. A malformed bound is logged and left open rather
    /// than failing startup.
    pub fn parse(start: Option<&str>, end: Option<&str>) -> Self {
        let bound = |name: &str, value: Option<&str>| {
            value.and_then(|v| match parse_window_timestamp(v) {
                Ok(ms) => Some(ms),
                Err(e) => {
                    error!("Ignoring window {name}: {e}");
                    None
                }
            })
        };
        Self {
            start_ms: bound("start", start),
            end_ms: bound("end", end),
        }
    }

    fn is_past_end(&self, record: &WireRecord) -> bool {
        match (self.end_ms, record.timestamp_ms()) {
            (Some(end), Some(ts)) => ts > end,
            _ => false,
        }
    }
}

pub fn parse_window_timestamp(value: &str) -> Result<i64, ConsumerError> {
    NaiveDateTime::parse_from_str(value.trim(), WINDOW_TIMESTAMP_FORMAT)
        .map(|dt| dt.and_utc().timestamp_millis())
        .map_err(|source| ConsumerError::InvalidWindow {
            value: value.to_string(),
            source,
        })
}

#[derive(Debug, Clone)]
pub struct ConsumerOptions {
    pub batch_size: usize,
    pub poll_timeout: Duration,
    pub payload_format: PayloadFormat,
    pub window: Window,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            payload_format: PayloadFormat::default(),
            window: Window::default(),
        }
    }
}

/// Acknowledges the most recently delivered unit.
pub trait Committer {
    fn commit(&mut self) -> Result<(), ConsumerError>;
}

pub struct WindowedConsumer<B> {
    broker: B,
    source: TopicSource,
    topics: Vec<String>,
    options: ConsumerOptions,
    // positions behind the last yielded unit, acknowledged by commit()
    commit_state: Vec<Position>,
}

impl<B: BrokerClient> WindowedConsumer<B> {
    pub fn new(
        mut broker: B,
        source: TopicSource,
        options: ConsumerOptions,
    ) -> Result<Self, ConsumerError> {
        if options.batch_size == 0 {
            return Err(ConsumerError::Configuration(
                "batch size must be at least 1".to_string(),
            ));
        }

        let topics = source.resolve();
        if source.is_dynamic() {
            info!("Using dynamic topic strategy");
        }
        info!("Subscribing to {:?}", topics);
        broker
            .subscribe(&topics, options.window.start_ms)
            .map_err(|source| ConsumerError::Subscribe {
                topics: topics.clone(),
                source,
            })?;

        Ok(Self {
            broker,
            source,
            topics,
            options,
            commit_state: Vec::new(),
        })
    }

    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    /// Start a fresh consumption pass with the configured batch size and timeout.
    pub fn consume(&mut self) -> Consume<'_, B> {
        let (batch_size, timeout) = (self.options.batch_size, self.options.poll_timeout);
        self.consume_with(batch_size, timeout)
    }

    /// Start a fresh consumption pass. The pass yields units until the broker
    /// reports end of stream or the window end is crossed.
    pub fn consume_with(&mut self, batch_size: usize, timeout: Duration) -> Consume<'_, B> {
        let batch_size = batch_size.max(1);
        Consume {
            consumer: self,
            batch_size,
            timeout,
            pending: VecDeque::new(),
            accumulated: Vec::with_capacity(batch_size),
            delivered: Vec::new(),
            finished: false,
        }
    }

    /// Recompute the topic set and resubscribe when it changed. A failed
    /// resubscription is logged and retried on the next cycle.
    fn refresh_topics(&mut self) {
        if !self.source.is_dynamic() {
            return;
        }
        let topics = self.source.resolve();
        if topics == self.topics {
            return;
        }

        info!("Subscribing to {:?}", topics);
        self.broker.unsubscribe();
        match self.broker.subscribe(&topics, self.options.window.start_ms) {
            Ok(()) => {
                metrics::counter!(CONSUMER_RESUBSCRIPTIONS).increment(1);
                self.topics = topics;
            }
            Err(e) => error!("Failed to subscribe to {:?}: {e}", topics),
        }
    }

    fn decode(&self, wire: WireRecord) -> Result<Option<Record>, ConsumerError> {
        // rdkafka always attaches coordinates to delivered messages
        let Some(position) = wire.position else {
            warn!("Skipping message without broker coordinates");
            return Ok(None);
        };
        let timestamp_ms = wire.timestamp.to_millis();
        let data = self
            .options
            .payload_format
            .decode(wire.payload.as_deref())
            .map_err(|source| ConsumerError::Decode {
                position: position.clone(),
                source,
            })?;
        Ok(Some(Record::new(position, timestamp_ms, data)))
    }
}

impl<B: BrokerClient> Committer for WindowedConsumer<B> {
    /// Commit every position behind the last yielded unit, retrying each one
    /// immediately up to [`COMMIT_ATTEMPTS`] times.
    fn commit(&mut self) -> Result<(), ConsumerError> {
        for position in &self.commit_state {
            let mut attempt = 1;
            loop {
                metrics::counter!(CONSUMER_COMMITS).increment(1);
                match self.broker.commit(position) {
                    Ok(()) => break,
                    Err(e) if attempt < COMMIT_ATTEMPTS => {
                        warn!("Commit of {position} failed (attempt {attempt}): {e}, retrying");
                        metrics::counter!(CONSUMER_COMMIT_RETRIES).increment(1);
                        attempt += 1;
                    }
                    Err(source) => {
                        metrics::counter!(CONSUMER_COMMIT_FAILURES).increment(1);
                        return Err(ConsumerError::Commit {
                            position: position.clone(),
                            attempts: attempt,
                            source,
                        });
                    }
                }
            }
        }
        debug!("Committed {} positions", self.commit_state.len());
        Ok(())
    }
}

/// A single consumption pass. Not restartable: once it returns `None` it stays
/// exhausted, call [`WindowedConsumer::consume`] again for a new pass.
pub struct Consume<'a, B> {
    consumer: &'a mut WindowedConsumer<B>,
    batch_size: usize,
    timeout: Duration,
    // records from the last poll not looked at yet
    pending: VecDeque<WireRecord>,
    accumulated: Vec<Record>,
    // every position seen since the last yield, skipped errors included
    delivered: Vec<Position>,
    finished: bool,
}

impl<B: BrokerClient> Consume<'_, B> {
    pub async fn next_unit(&mut self) -> Result<Option<Unit>, ConsumerError> {
        if self.finished {
            return Ok(None);
        }

        loop {
            while let Some(wire) = self.pending.pop_front() {
                if self.consumer.options.window.is_past_end(&wire) {
                    info!("Reached end of consumption window");
                    return Ok(self.finish());
                }

                if let Some(e) = &wire.error {
                    if is_partition_eof(e) {
                        info!("PARTITION_EOF: No more messages");
                        return Ok(self.finish());
                    }
                    error!("Error in kafka stream: {e}");
                    metrics::counter!(CONSUMER_RECORDS_SKIPPED).increment(1);
                    if let Some(position) = wire.position {
                        self.delivered.push(position);
                    }
                    continue;
                }

                if let Some(record) = self.consumer.decode(wire)? {
                    self.delivered.push(record.position().clone());
                    self.accumulated.push(record);
                }

                if self.accumulated.len() >= self.batch_size {
                    return Ok(Some(self.take_unit()));
                }
            }

            // the last poll is fully processed, hand out what it produced
            if !self.accumulated.is_empty() {
                return Ok(Some(self.take_unit()));
            }

            self.consumer.refresh_topics();
            let polled = self
                .consumer
                .broker
                .poll_batch(self.batch_size, self.timeout)
                .await
                .map_err(ConsumerError::Poll)?;
            if polled.is_empty() {
                debug!("Empty poll, polling again");
                continue;
            }
            metrics::counter!(CONSUMER_RECORDS_RECEIVED).increment(polled.len() as u64);
            self.pending.extend(polled);
        }
    }

    /// End the pass. Positions of skipped records seen after the last yield
    /// join the commit state, so a final commit still moves past them.
    fn finish(&mut self) -> Option<Unit> {
        self.finished = true;
        self.pending.clear();
        if self.accumulated.is_empty() {
            let skipped = std::mem::take(&mut self.delivered);
            self.consumer.commit_state.extend(skipped);
            None
        } else {
            Some(self.take_unit())
        }
    }

    fn take_unit(&mut self) -> Unit {
        let mut records =
            std::mem::replace(&mut self.accumulated, Vec::with_capacity(self.batch_size));
        self.consumer.commit_state = std::mem::take(&mut self.delivered);
        metrics::counter!(CONSUMER_UNITS_YIELDED).increment(1);

        if self.batch_size == 1 && records.len() == 1 {
            if let Some(record) = records.pop() {
                return Unit::Single(record);
            }
        }
        Unit::Batch(records)
    }
}

impl<B: BrokerClient> Committer for Consume<'_, B> {
    fn commit(&mut self) -> Result<(), ConsumerError> {
        self.consumer.commit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{eof, failed, failed_at, json_record, raw_record, ScriptedBroker};
    use crate::topic_strategy::{Clock, DailyTopicStrategy};
    use chrono::{DateTime, TimeZone, Utc};
    use rdkafka::error::RDKafkaErrorCode;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn static_consumer(broker: ScriptedBroker, batch_size: usize) -> WindowedConsumer<ScriptedBroker> {
        let options = ConsumerOptions {
            batch_size,
            poll_timeout: Duration::from_secs(5),
            ..Default::default()
        };
        WindowedConsumer::new(
            broker,
            TopicSource::Static(vec!["a".into(), "b".into()]),
            options,
        )
        .unwrap()
    }

    fn offsets(unit: &Unit) -> Vec<i64> {
        unit.records().iter().map(Record::offset).collect()
    }

    #[test]
    fn test_topic_source_requires_exactly_one() {
        assert!(matches!(
            TopicSource::from_parts(None, None),
            Err(ConsumerError::Configuration(_))
        ));
        assert!(matches!(
            TopicSource::from_parts(Some(vec![]), None),
            Err(ConsumerError::Configuration(_))
        ));
        let strategy = DailyTopicStrategy::new(vec!["t_%s".into()], "%Y%m%d", 22).unwrap();
        assert!(matches!(
            TopicSource::from_parts(Some(vec!["a".into()]), Some(Box::new(strategy))),
            Err(ConsumerError::Configuration(_))
        ));
    }

    #[test]
    fn test_window_parsing() {
        assert_eq!(
            parse_window_timestamp("01/01/2000 00:00:00").unwrap(),
            946_684_800_000
        );
        assert!(parse_window_timestamp("2000-01-01").is_err());

        let window = Window::parse(Some("not a date"), Some("02/01/2000 00:00:00"));
        assert_eq!(window.start_ms, None);
        assert_eq!(window.end_ms, Some(946_771_200_000));
    }

    #[tokio::test]
    async fn test_batches_in_arrival_order_with_short_tail() {
        let broker = ScriptedBroker::new();
        broker.push_poll(vec![json_record("a", 0, 1, 10, json!({"n": 1})), json_record("b", 0, 1, 11, json!({"n": 2}))]);
        broker.push_poll(vec![json_record("a", 0, 2, 12, json!({"n": 3})), json_record("b", 0, 2, 13, json!({"n": 4}))]);
        broker.push_poll(vec![json_record("a", 0, 3, 14, json!({"n": 5})), eof("a", 0)]);

        let mut consumer = static_consumer(broker.clone(), 2);
        let mut units = consumer.consume();
        let mut seen = vec![];
        while let Some(unit) = units.next_unit().await.unwrap() {
            assert!(unit.is_batch());
            seen.push(unit.records().iter().map(|r| r.get("n").cloned().unwrap()).collect::<Vec<_>>());
        }
        assert_eq!(
            seen,
            vec![vec![json!(1), json!(2)], vec![json!(3), json!(4)], vec![json!(5)]]
        );
        assert!(units.next_unit().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_batch_size_one_yields_bare_records() {
        let broker = ScriptedBroker::new();
        broker.push_poll(vec![json_record("a", 0, 7, 10, json!({"oid": "x"}))]);
        broker.push_poll(vec![eof("a", 0)]);

        let mut consumer = static_consumer(broker, 1);
        let mut units = consumer.consume();
        let unit = units.next_unit().await.unwrap().unwrap();
        assert!(matches!(&unit, Unit::Single(r) if r.offset() == 7));
        assert!(units.next_unit().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_polls_are_retried() {
        let broker = ScriptedBroker::new();
        broker.push_poll(vec![]);
        broker.push_poll(vec![]);
        broker.push_poll(vec![json_record("a", 0, 1, 10, json!({}))]);

        let mut consumer = static_consumer(broker.clone(), 1);
        let mut units = consumer.consume();
        assert!(units.next_unit().await.unwrap().is_some());
        assert_eq!(broker.poll_count(), 3);
    }

    #[tokio::test]
    async fn test_broker_errors_are_skipped() {
        let broker = ScriptedBroker::new();
        broker.push_poll(vec![
            failed(KafkaError::MessageConsumption(RDKafkaErrorCode::UnknownTopicOrPartition)),
            json_record("a", 0, 4, 10, json!({"ok": true})),
        ]);
        broker.push_poll(vec![eof("a", 0)]);

        let mut consumer = static_consumer(broker, 2);
        let mut units = consumer.consume();
        let unit = units.next_unit().await.unwrap().unwrap();
        assert_eq!(offsets(&unit), vec![4]);
        assert!(units.next_unit().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_errored_positions_are_committed_with_the_unit() {
        let broker = ScriptedBroker::new();
        broker.push_poll(vec![
            failed_at(
                "a",
                0,
                3,
                KafkaError::MessageConsumption(RDKafkaErrorCode::InvalidMessage),
            ),
            json_record("a", 0, 4, 10, json!({"ok": true})),
        ]);

        let mut consumer = static_consumer(broker.clone(), 2);
        let mut units = consumer.consume();
        let unit = units.next_unit().await.unwrap().unwrap();
        assert_eq!(offsets(&unit), vec![4]);

        units.commit().unwrap();
        assert_eq!(
            broker.commit_calls(),
            vec![Position::new("a", 0, 3), Position::new("a", 0, 4)]
        );
        assert_eq!(broker.committed_offsets().get(&("a".to_string(), 0)), Some(&5));
    }

    #[tokio::test]
    async fn test_skipped_positions_survive_an_empty_end_of_pass() {
        let broker = ScriptedBroker::new();
        broker.push_poll(vec![json_record("a", 0, 1, 10, json!({}))]);
        broker.push_poll(vec![
            failed_at(
                "b",
                2,
                8,
                KafkaError::MessageConsumption(RDKafkaErrorCode::InvalidMessage),
            ),
            eof("b", 2),
        ]);

        let mut consumer = static_consumer(broker.clone(), 1);
        let mut units = consumer.consume();
        units.next_unit().await.unwrap().unwrap();
        units.commit().unwrap();
        assert!(units.next_unit().await.unwrap().is_none());

        units.commit().unwrap();
        let committed = broker.committed_offsets();
        assert_eq!(committed.get(&("a".to_string(), 0)), Some(&2));
        assert_eq!(committed.get(&("b".to_string(), 2)), Some(&9));
    }

    #[tokio::test]
    async fn test_window_end_stops_consumption() {
        let broker = ScriptedBroker::new();
        broker.push_poll(vec![
            json_record("a", 0, 1, 100, json!({})),
            json_record("a", 0, 2, 201, json!({})),
            json_record("b", 1, 1, 150, json!({})),
        ]);

        let options = ConsumerOptions {
            batch_size: 5,
            window: Window {
                start_ms: Some(50),
                end_ms: Some(200),
            },
            ..Default::default()
        };
        let mut consumer = WindowedConsumer::new(
            broker.clone(),
            TopicSource::Static(vec!["a".into(), "b".into()]),
            options,
        )
        .unwrap();
        let mut units = consumer.consume();
        let unit = units.next_unit().await.unwrap().unwrap();
        assert_eq!(offsets(&unit), vec![1]);
        assert!(units.next_unit().await.unwrap().is_none());
        assert_eq!(broker.subscriptions(), vec![(vec!["a".to_string(), "b".to_string()], Some(50))]);
    }

    #[tokio::test]
    async fn test_decode_failure_is_fatal() {
        let broker = ScriptedBroker::new();
        broker.push_poll(vec![raw_record("a", 0, 1, 10, b"{not json".to_vec())]);

        let mut consumer = static_consumer(broker, 1);
        let mut units = consumer.consume();
        assert!(matches!(
            units.next_unit().await,
            Err(ConsumerError::Decode { .. })
        ));
    }

    #[tokio::test]
    async fn test_commit_acknowledges_last_unit_and_is_idempotent() {
        let broker = ScriptedBroker::new();
        broker.push_poll(vec![json_record("a", 0, 1, 10, json!({})), json_record("a", 1, 9, 11, json!({}))]);
        broker.push_poll(vec![eof("a", 0)]);

        let mut consumer = static_consumer(broker.clone(), 2);
        let mut units = consumer.consume();
        units.next_unit().await.unwrap().unwrap();
        units.commit().unwrap();
        let first = broker.committed_offsets();
        units.commit().unwrap();
        assert_eq!(broker.committed_offsets(), first);
        assert_eq!(first.get(&("a".to_string(), 0)), Some(&2));
        assert_eq!(first.get(&("a".to_string(), 1)), Some(&10));
    }

    #[tokio::test]
    async fn test_commit_retries_then_fails() {
        let broker = ScriptedBroker::new();
        broker.push_poll(vec![json_record("a", 0, 1, 10, json!({}))]);

        let mut consumer = static_consumer(broker.clone(), 1);
        let mut units = consumer.consume();
        units.next_unit().await.unwrap().unwrap();

        broker.fail_next_commits(COMMIT_ATTEMPTS as usize - 1);
        units.commit().unwrap();

        broker.fail_next_commits(COMMIT_ATTEMPTS as usize);
        assert!(matches!(
            units.commit(),
            Err(ConsumerError::Commit { attempts: COMMIT_ATTEMPTS, .. })
        ));
    }

    struct ManualClock(Mutex<DateTime<Utc>>);

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    #[tokio::test]
    async fn test_dynamic_topics_resubscribe_once_on_change() {
        let clock = Arc::new(ManualClock(Mutex::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 21, 59, 59).unwrap(),
        )));
        let strategy = DailyTopicStrategy::new(vec!["alerts_%s".into()], "%Y%m%d", 22)
            .unwrap()
            .with_clock(clock.clone());

        let broker = ScriptedBroker::new();
        broker.push_poll(vec![json_record("alerts_20240501", 0, 1, 10, json!({}))]);
        broker.push_poll(vec![json_record("alerts_20240501", 0, 2, 11, json!({}))]);
        broker.push_poll(vec![json_record("alerts_20240501", 0, 3, 12, json!({}))]);

        let mut consumer = WindowedConsumer::new(
            broker.clone(),
            TopicSource::Strategy(Box::new(strategy)),
            ConsumerOptions::default(),
        )
        .unwrap();
        assert_eq!(consumer.topics(), ["alerts_20240501"]);

        let mut units = consumer.consume();
        units.next_unit().await.unwrap().unwrap();
        assert_eq!(broker.subscriptions().len(), 1);

        *clock.0.lock().unwrap() = Utc.with_ymd_and_hms(2024, 5, 1, 22, 0, 1).unwrap();
        units.next_unit().await.unwrap().unwrap();
        units.next_unit().await.unwrap().unwrap();

        let subscriptions = broker.subscriptions();
        assert_eq!(subscriptions.len(), 2);
        assert_eq!(
            subscriptions[1].0,
            vec!["alerts_20240501".to_string(), "alerts_20240502".to_string()]
        );
        assert_eq!(broker.unsubscribe_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_resubscribe_is_retried_next_cycle() {
        let clock = Arc::new(ManualClock(Mutex::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 21, 59, 59).unwrap(),
        )));
        let strategy = DailyTopicStrategy::new(vec!["alerts_%s".into()], "%Y%m%d", 22)
            .unwrap()
            .with_clock(clock.clone());

        let broker = ScriptedBroker::new();
        broker.push_poll(vec![json_record("alerts_20240501", 0, 1, 10, json!({}))]);
        broker.push_poll(vec![json_record("alerts_20240501", 0, 2, 11, json!({}))]);

        let mut consumer = WindowedConsumer::new(
            broker.clone(),
            TopicSource::Strategy(Box::new(strategy)),
            ConsumerOptions::default(),
        )
        .unwrap();

        *clock.0.lock().unwrap() = Utc.with_ymd_and_hms(2024, 5, 1, 22, 0, 1).unwrap();
        broker.fail_next_subscribes(1);
        {
            let mut units = consumer.consume();
            let unit = units.next_unit().await.unwrap().unwrap();
            assert_eq!(offsets(&unit), vec![1]);
            assert_eq!(broker.subscriptions().len(), 1);

            units.next_unit().await.unwrap().unwrap();
        }

        let attempts = broker
            .log()
            .events()
            .iter()
            .filter(|e| e.starts_with("subscribe"))
            .count();
        assert_eq!(attempts, 3);
        assert_eq!(broker.unsubscribe_count(), 2);
        assert_eq!(broker.subscriptions().len(), 2);
        assert_eq!(consumer.topics(), ["alerts_20240501", "alerts_20240502"]);
    }
}
