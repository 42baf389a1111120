use async_trait::async_trait;
use common_kafka::record::Unit;
use tracing::debug;

use crate::step::Step;

/// Forwards every consumed unit unchanged.
pub struct PassthroughStep {
    name: String,
}

impl PassthroughStep {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Step for PassthroughStep {
    type Output = Unit;

    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&mut self, unit: &Unit) -> anyhow::Result<Unit> {
        debug!("Passing through {} records", unit.len());
        Ok(unit.clone())
    }
}
