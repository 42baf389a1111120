use common_kafka::consumer::ConsumerError;
use thiserror::Error;

use crate::extra_metrics::MetricSpecError;
use crate::step::Phase;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error(transparent)]
    Consumer(#[from] ConsumerError),
    #[error("invalid extra metrics: {0}")]
    MetricSpec(#[from] MetricSpecError),
    #[error("step failed in {phase}: {source:#}")]
    Step {
        phase: Phase,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to produce result: {0:#}")]
    Produce(#[source] anyhow::Error),
}

impl DriverError {
    pub fn step(phase: Phase) -> impl FnOnce(anyhow::Error) -> Self {
        move |source| DriverError::Step { phase, source }
    }

    /// Phase the error surfaced in, when it came from a step hook.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            DriverError::Step { phase, .. } => Some(*phase),
            DriverError::Produce(_) => Some(Phase::Produce),
            _ => None,
        }
    }
}
