//! The step lifecycle driver.
//!
//! One unit at a time is taken from the consumer and walked through
//! `PreExecute → Execute → PostExecute → PreProduce → Produce → PostProduce`,
//! with `PreConsume` before the first unit and `TearDown` after the consumer is
//! exhausted. The next unit is not polled before the previous one finished
//! `PostProduce`, so at most one unit is ever unacknowledged.
//!
//! Commit timing depends on the [`ProcessingMode`]: `component` steps
//! acknowledge the unit before `PreExecute`, every other mode after
//! `PostExecute`. Errors from hooks, commits and metric specs are never
//! caught here, they end the run.

use std::time::Instant;

use chrono::{DateTime, SecondsFormat, Utc};
use common_kafka::broker::BrokerClient;
use common_kafka::consumer::{Committer, WindowedConsumer};
use common_kafka::record::Unit;
use serde_json::{Map, Value};
use tracing::{debug, error, info};

use crate::aggregator::MetricsAggregator;
use crate::error::DriverError;
use crate::extra_metrics::{self, MetricSpec};
use crate::metrics_consts::{CYCLE_DURATION, PHASE_FAILURES, RECORDS_PROCESSED, UNITS_PROCESSED};
use crate::mode::{CommitPoint, ProcessingMode};
use crate::producer::{NoopProducer, Producer};
use crate::step::{Phase, Step};

#[derive(Debug, Clone)]
pub struct DriverSettings {
    pub mode: ProcessingMode,
    /// Disabling commits is a debugging aid, offsets never advance.
    pub commit: bool,
    pub extra_metrics: Vec<MetricSpec>,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            mode: ProcessingMode::Simple,
            commit: true,
            extra_metrics: Vec::new(),
        }
    }
}

pub struct StepDriver<S, B> {
    step: S,
    consumer: WindowedConsumer<B>,
    producer: Box<dyn Producer>,
    metrics: MetricsAggregator,
    settings: DriverSettings,
    phase: Phase,
}

impl<S: Step, B: BrokerClient> StepDriver<S, B> {
    pub fn new(step: S, consumer: WindowedConsumer<B>, settings: DriverSettings) -> Self {
        let metrics = MetricsAggregator::disabled(step.name());
        Self {
            step,
            consumer,
            producer: Box::new(NoopProducer),
            metrics,
            settings,
            phase: Phase::Idle,
        }
    }

    pub fn with_producer(mut self, producer: Box<dyn Producer>) -> Self {
        self.producer = producer;
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsAggregator) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn step(&self) -> &S {
        &self.step
    }

    pub fn consumer(&self) -> &WindowedConsumer<B> {
        &self.consumer
    }

    /// Process units until the consumer is exhausted, then tear the step down.
    pub async fn run(&mut self) -> Result<(), DriverError> {
        self.drive().await.inspect_err(|e| {
            if let Some(phase) = e.phase() {
                error!("Step failed in {phase}: {e}");
                metrics::counter!(PHASE_FAILURES, "phase" => phase.as_str()).increment(1);
            }
        })
    }

    async fn drive(&mut self) -> Result<(), DriverError> {
        let Self {
            step,
            consumer,
            producer,
            metrics,
            settings,
            phase,
        } = self;
        let mut lifecycle = Lifecycle {
            step,
            producer: producer.as_ref(),
            metrics,
            settings,
            phase,
        };

        info!(
            "Starting {} step in {} mode",
            lifecycle.step.name(),
            lifecycle.settings.mode
        );
        lifecycle.enter(Phase::PreConsume);
        lifecycle
            .step
            .pre_consume()
            .await
            .map_err(DriverError::step(Phase::PreConsume))?;

        let mut units = consumer.consume();
        while let Some(unit) = units.next_unit().await? {
            lifecycle.cycle(unit, &mut units).await?;
        }

        lifecycle.enter(Phase::TearDown);
        lifecycle
            .step
            .tear_down()
            .await
            .map_err(DriverError::step(Phase::TearDown))?;
        lifecycle.enter(Phase::Terminal);
        info!("Step {} finished", lifecycle.step.name());
        Ok(())
    }
}

struct Lifecycle<'a, S> {
    step: &'a mut S,
    producer: &'a dyn Producer,
    metrics: &'a MetricsAggregator,
    settings: &'a DriverSettings,
    phase: &'a mut Phase,
}

impl<S: Step> Lifecycle<'_, S> {
    fn enter(&mut self, phase: Phase) {
        debug!("Entering {phase}");
        *self.phase = phase;
    }

    async fn cycle<C: Committer>(&mut self, unit: Unit, committer: &mut C) -> Result<(), DriverError> {
        let received_at = Utc::now();
        let started = Instant::now();
        let commit_point = self.settings.mode.commit_point();

        self.enter(Phase::PreExecute);
        if commit_point == CommitPoint::BeforeExecute {
            self.commit(committer)?;
        }
        self.step
            .pre_execute(&unit)
            .await
            .map_err(DriverError::step(Phase::PreExecute))?;

        self.enter(Phase::Execute);
        let output = self
            .step
            .execute(&unit)
            .await
            .map_err(DriverError::step(Phase::Execute))?;

        self.enter(Phase::PostExecute);
        let output = self
            .step
            .post_execute(output)
            .await
            .map_err(DriverError::step(Phase::PostExecute))?;
        if commit_point == CommitPoint::AfterExecute {
            self.commit(committer)?;
        }
        let cycle_metrics = self.cycle_metrics(&unit, received_at, started)?;
        self.metrics.send(cycle_metrics).await;

        self.enter(Phase::PreProduce);
        let message = self
            .step
            .pre_produce(output)
            .await
            .map_err(DriverError::step(Phase::PreProduce))?;

        self.enter(Phase::Produce);
        self.step
            .produce(self.producer, message)
            .await
            .map_err(DriverError::Produce)?;

        self.enter(Phase::PostProduce);
        self.step
            .post_produce()
            .await
            .map_err(DriverError::step(Phase::PostProduce))?;

        metrics::counter!(UNITS_PROCESSED).increment(1);
        metrics::counter!(RECORDS_PROCESSED).increment(unit.len() as u64);
        Ok(())
    }

    fn commit<C: Committer>(&self, committer: &mut C) -> Result<(), DriverError> {
        if !self.settings.commit {
            debug!("Commit disabled, not acknowledging unit");
            return Ok(());
        }
        committer.commit()?;
        Ok(())
    }

    /// The per-cycle metrics record, everything but `source`.
    fn cycle_metrics(
        &self,
        unit: &Unit,
        received_at: DateTime<Utc>,
        started: Instant,
    ) -> Result<Map<String, Value>, DriverError> {
        let execution_time = started.elapsed().as_secs_f64();
        metrics::histogram!(CYCLE_DURATION).record(execution_time);

        let mut record = Map::new();
        record.insert(
            "timestamp_received".into(),
            Value::String(received_at.to_rfc3339_opts(SecondsFormat::Micros, true)),
        );
        record.insert(
            "timestamp_sent".into(),
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)),
        );
        record.insert("execution_time".into(), Value::from(execution_time));

        if !self.settings.extra_metrics.is_empty() {
            record.extend(extra_metrics::extract(&self.settings.extra_metrics, unit)?);
        }
        Ok(record)
    }
}
