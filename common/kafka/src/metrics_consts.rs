pub const CONSUMER_RECORDS_RECEIVED: &str = "step_consumer_records_received_total";
pub const CONSUMER_RECORDS_SKIPPED: &str = "step_consumer_records_skipped_total";
pub const CONSUMER_UNITS_YIELDED: &str = "step_consumer_units_yielded_total";
pub const CONSUMER_COMMITS: &str = "step_consumer_commit_attempts_total";
pub const CONSUMER_COMMIT_RETRIES: &str = "step_consumer_commit_retries_total";
pub const CONSUMER_COMMIT_FAILURES: &str = "step_consumer_commit_failures_total";
pub const CONSUMER_RESUBSCRIPTIONS: &str = "step_consumer_resubscriptions_total";

pub const PRODUCER_MESSAGES_SENT: &str = "step_producer_messages_sent_total";
pub const PRODUCER_MESSAGES_FAILED: &str = "step_producer_messages_failed_total";
pub const PRODUCER_QUEUE_DEPTH: &str = "step_producer_queue_depth";
