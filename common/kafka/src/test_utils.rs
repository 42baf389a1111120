use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::Timestamp;
use serde_json::Value;

use crate::broker::{BrokerClient, WireRecord};
use crate::record::Position;

/// Ordered log of calls shared between test doubles, for call-order assertions.
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: impl Into<String>) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Index of the first event equal to `event`.
    pub fn position(&self, event: &str) -> Option<usize> {
        self.events().iter().position(|e| e == event)
    }
}

#[derive(Default)]
struct State {
    polls: VecDeque<Vec<WireRecord>>,
    poll_count: usize,
    subscriptions: Vec<(Vec<String>, Option<i64>)>,
    unsubscribes: usize,
    committed: HashMap<(String, i32), i64>,
    commit_calls: Vec<Position>,
    failing_commits: usize,
    failing_subscribes: usize,
}

/// In-memory [`BrokerClient`] replaying scripted polls.
///
/// Once the script runs out every poll returns a partition EOF, so a consume
/// pass over a scripted broker always terminates. Clones share state.
#[derive(Clone, Default)]
pub struct ScriptedBroker {
    state: Arc<Mutex<State>>,
    log: EventLog,
}

impl ScriptedBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_log(log: EventLog) -> Self {
        Self {
            state: Arc::default(),
            log,
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    pub fn push_poll(&self, records: Vec<WireRecord>) {
        self.state().polls.push_back(records);
    }

    /// Make the next `n` commit calls fail with a retriable error.
    pub fn fail_next_commits(&self, n: usize) {
        self.state().failing_commits = n;
    }

    /// Make the next `n` subscribe calls fail. Failed calls are logged but not
    /// recorded as subscriptions.
    pub fn fail_next_subscribes(&self, n: usize) {
        self.state().failing_subscribes = n;
    }

    pub fn poll_count(&self) -> usize {
        self.state().poll_count
    }

    pub fn subscriptions(&self) -> Vec<(Vec<String>, Option<i64>)> {
        self.state().subscriptions.clone()
    }

    pub fn unsubscribe_count(&self) -> usize {
        self.state().unsubscribes
    }

    /// Every commit call that reached the broker, failed attempts included.
    pub fn commit_calls(&self) -> Vec<Position> {
        self.state().commit_calls.clone()
    }

    /// Next offset to read per topic/partition, as the broker sees it.
    pub fn committed_offsets(&self) -> HashMap<(String, i32), i64> {
        self.state().committed.clone()
    }
}

#[async_trait]
impl BrokerClient for ScriptedBroker {
    fn subscribe(&mut self, topics: &[String], start_ms: Option<i64>) -> Result<(), KafkaError> {
        self.log.push(format!("subscribe {}", topics.join(",")));
        let mut state = self.state();
        if state.failing_subscribes > 0 {
            state.failing_subscribes -= 1;
            return Err(KafkaError::Subscription(format!(
                "broker unavailable for {}",
                topics.join(",")
            )));
        }
        state.subscriptions.push((topics.to_vec(), start_ms));
        Ok(())
    }

    fn unsubscribe(&mut self) {
        self.log.push("unsubscribe");
        self.state().unsubscribes += 1;
    }

    async fn poll_batch(
        &mut self,
        _max_records: usize,
        _timeout: Duration,
    ) -> Result<Vec<WireRecord>, KafkaError> {
        self.log.push("poll");
        let mut state = self.state();
        state.poll_count += 1;
        Ok(state
            .polls
            .pop_front()
            .unwrap_or_else(|| vec![WireRecord::failed(KafkaError::PartitionEOF(0))]))
    }

    fn commit(&mut self, position: &Position) -> Result<(), KafkaError> {
        self.log.push(format!("commit {position}"));
        let mut state = self.state();
        state.commit_calls.push(position.clone());
        if state.failing_commits > 0 {
            state.failing_commits -= 1;
            return Err(KafkaError::ConsumerCommit(RDKafkaErrorCode::RequestTimedOut));
        }
        state.committed.insert(
            (position.topic().to_string(), position.partition()),
            position.offset() + 1,
        );
        Ok(())
    }
}

pub fn raw_record(
    topic: &str,
    partition: i32,
    offset: i64,
    timestamp_ms: i64,
    payload: Vec<u8>,
) -> WireRecord {
    WireRecord::message(
        Position::new(topic, partition, offset),
        Some(payload),
        Timestamp::CreateTime(timestamp_ms),
    )
}

pub fn json_record(
    topic: &str,
    partition: i32,
    offset: i64,
    timestamp_ms: i64,
    payload: Value,
) -> WireRecord {
    raw_record(topic, partition, offset, timestamp_ms, payload.to_string().into_bytes())
}

pub fn failed(error: KafkaError) -> WireRecord {
    WireRecord::failed(error)
}

/// A broker error attached to a record position, as librdkafka reports
/// per-message failures.
pub fn failed_at(topic: &str, partition: i32, offset: i64, error: KafkaError) -> WireRecord {
    let mut record = WireRecord::failed(error);
    record.position = Some(Position::new(topic, partition, offset));
    record
}

pub fn eof(topic: &str, partition: i32) -> WireRecord {
    let mut record = WireRecord::failed(KafkaError::PartitionEOF(partition));
    record.position = Some(Position::new(topic, partition, -1));
    record
}
