#![allow(dead_code)]

use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use common_kafka::consumer::{ConsumerOptions, TopicSource, WindowedConsumer};
use common_kafka::record::{Record, Unit};
use common_kafka::test_utils::{json_record, EventLog, ScriptedBroker};
use mockall::mock;
use serde_json::{json, Map, Value};
use step_worker::aggregator::MetricsSink;
use step_worker::producer::Producer;
use step_worker::step::Step;

mock! {
    pub Sink {}

    #[async_trait]
    impl MetricsSink for Sink {
        async fn send(&self, metrics: &Map<String, Value>) -> anyhow::Result<()>;
    }
}

mock! {
    pub ResultProducer {}

    #[async_trait]
    impl Producer for ResultProducer {
        async fn produce(&self, message: Value) -> anyhow::Result<()>;
    }
}

/// Step that writes every hook call to a shared log and returns the offsets
/// of the unit it executed.
pub struct RecordingStep {
    log: EventLog,
    fail_execute: bool,
    pub executed: Vec<Vec<i64>>,
}

impl RecordingStep {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            fail_execute: false,
            executed: Vec::new(),
        }
    }

    pub fn failing(log: EventLog) -> Self {
        Self {
            fail_execute: true,
            ..Self::new(log)
        }
    }
}

#[async_trait]
impl Step for RecordingStep {
    type Output = Vec<i64>;

    fn name(&self) -> &str {
        "recording"
    }

    async fn pre_consume(&mut self) -> anyhow::Result<()> {
        self.log.push("pre_consume");
        Ok(())
    }

    async fn pre_execute(&mut self, _unit: &Unit) -> anyhow::Result<()> {
        self.log.push("pre_execute");
        Ok(())
    }

    async fn execute(&mut self, unit: &Unit) -> anyhow::Result<Vec<i64>> {
        self.log.push("execute");
        if self.fail_execute {
            bail!("execute blew up");
        }
        let offsets: Vec<i64> = unit.records().iter().map(Record::offset).collect();
        self.executed.push(offsets.clone());
        Ok(offsets)
    }

    async fn post_execute(&mut self, output: Vec<i64>) -> anyhow::Result<Vec<i64>> {
        self.log.push("post_execute");
        Ok(output)
    }

    async fn pre_produce(&mut self, output: Vec<i64>) -> anyhow::Result<Value> {
        self.log.push("pre_produce");
        Ok(json!({ "offsets": output }))
    }

    async fn produce(&mut self, producer: &dyn Producer, message: Value) -> anyhow::Result<()> {
        self.log.push("produce");
        producer.produce(message).await
    }

    async fn post_produce(&mut self) -> anyhow::Result<()> {
        self.log.push("post_produce");
        Ok(())
    }

    async fn tear_down(&mut self) -> anyhow::Result<()> {
        self.log.push("tear_down");
        Ok(())
    }
}

/// Broker with `count` alerts on topics `a` and `b`, alternating, one poll per
/// `per_poll` records. The script then runs out and the broker reports EOF.
pub fn scripted_alerts(log: EventLog, count: i64, per_poll: usize) -> ScriptedBroker {
    let broker = ScriptedBroker::with_log(log);
    let records: Vec<_> = (0..count)
        .map(|i| {
            let topic = if i % 2 == 0 { "a" } else { "b" };
            json_record(
                topic,
                0,
                i / 2,
                1_000 + i,
                json!({"oid": format!("ZTF{i}"), "candid": i}),
            )
        })
        .collect();
    for chunk in records.chunks(per_poll) {
        broker.push_poll(chunk.to_vec());
    }
    broker
}

pub fn consumer(broker: ScriptedBroker, batch_size: usize) -> WindowedConsumer<ScriptedBroker> {
    WindowedConsumer::new(
        broker,
        TopicSource::Static(vec!["a".to_string(), "b".to_string()]),
        ConsumerOptions {
            batch_size,
            poll_timeout: Duration::from_secs(5),
            ..Default::default()
        },
    )
    .expect("scripted consumer subscribes")
}

/// Log entries between the start of the `n`th cycle and the next one.
pub fn cycle_events(events: &[String], n: usize) -> Vec<String> {
    let starts: Vec<usize> = events
        .iter()
        .enumerate()
        .filter(|(_, e)| e.as_str() == "poll")
        .map(|(i, _)| i)
        .collect();
    let start = starts[n];
    let end = starts.get(n + 1).copied().unwrap_or(events.len());
    events[start + 1..end].to_vec()
}
