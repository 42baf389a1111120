use std::fmt;

use async_trait::async_trait;
use common_kafka::record::Unit;
use serde::Serialize;
use serde_json::Value;

use crate::producer::Producer;

/// Lifecycle phases, in the order the driver walks them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    PreConsume,
    PreExecute,
    Execute,
    PostExecute,
    PreProduce,
    Produce,
    PostProduce,
    TearDown,
    Terminal,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::PreConsume => "pre_consume",
            Phase::PreExecute => "pre_execute",
            Phase::Execute => "execute",
            Phase::PostExecute => "post_execute",
            Phase::PreProduce => "pre_produce",
            Phase::Produce => "produce",
            Phase::PostProduce => "post_produce",
            Phase::TearDown => "tear_down",
            Phase::Terminal => "terminal",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A processing step. Only [`Step::execute`] is required; every other hook
/// defaults to doing nothing or passing its input through.
///
/// Hooks get the data of the current cycle as arguments. The step never sees
/// the consumer, so it cannot commit or poll behind the driver's back.
#[async_trait]
pub trait Step: Send {
    type Output: Serialize + Send;

    fn name(&self) -> &str;

    /// Called once before the first unit is consumed.
    async fn pre_consume(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn pre_execute(&mut self, _unit: &Unit) -> anyhow::Result<()> {
        Ok(())
    }

    async fn execute(&mut self, unit: &Unit) -> anyhow::Result<Self::Output>;

    async fn post_execute(&mut self, output: Self::Output) -> anyhow::Result<Self::Output> {
        Ok(output)
    }

    /// Turn the result into the message handed to the producer.
    async fn pre_produce(&mut self, output: Self::Output) -> anyhow::Result<Value> {
        Ok(serde_json::to_value(output)?)
    }

    async fn produce(&mut self, producer: &dyn Producer, message: Value) -> anyhow::Result<()> {
        producer.produce(message).await
    }

    async fn post_produce(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called once after the consumer is exhausted.
    async fn tear_down(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}
