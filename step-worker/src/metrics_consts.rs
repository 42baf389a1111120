pub const UNITS_PROCESSED: &str = "step_units_processed_total";
pub const RECORDS_PROCESSED: &str = "step_records_processed_total";
pub const CYCLE_DURATION: &str = "step_cycle_duration_seconds";
pub const PHASE_FAILURES: &str = "step_phase_failures_total";
pub const METRICS_SINK_FAILURES: &str = "step_metrics_sink_failures_total";
pub const RESULTS_PRODUCED: &str = "step_results_produced_total";
pub const HTTP_REQUESTS: &str = "step_worker_http_requests_total";
pub const HTTP_REQUEST_DURATION: &str = "step_worker_http_request_duration_seconds";
