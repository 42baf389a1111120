pub mod aggregator;
pub mod config;
pub mod driver;
pub mod error;
pub mod extra_metrics;
pub mod metrics_consts;
pub mod mode;
pub mod passthrough;
pub mod producer;
pub mod server;
pub mod step;
