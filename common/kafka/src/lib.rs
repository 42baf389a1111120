pub mod broker;
pub mod config;
pub mod consumer;
pub mod kafka_producer;
pub mod metrics_consts;
pub mod payload;
pub mod record;
pub mod test_utils;
pub mod topic_strategy;
