//! Metric recorders for the dispatcher.
//!
//! Emitted through the `metrics` facade; install any recorder (Prometheus
//! exporter, test recorder) to collect them. Without one they are no-ops.
//!
//! # Metrics
//!
//! ## Counters
//! - `dispatch_jobs_enqueued_total` - Jobs accepted at ingestion
//! - `dispatch_jobs_admitted_total` - Jobs that passed the capacity budget
//! - `dispatch_jobs_completed_total` - Jobs answered by the provider
//! - `dispatch_jobs_failed_total{kind}` - Terminal failures by kind
//! - `dispatch_jobs_retried_total` - Failed attempts sent back to the retry queue
//! - `dispatch_ingest_rejected_total{reason}` - Submissions refused before enqueue
//!
//! ## Gauges
//! - `dispatch_queue_depth{queue}` - Pending jobs per queue
//!
//! ## Histograms
//! - `dispatch_call_latency_ms` - Provider call latency
//! - `dispatch_admission_wait_ms` - Time a job waited for budget

use metrics::{counter, gauge, histogram};

pub fn record_job_enqueued() {
    counter!("dispatch_jobs_enqueued_total").increment(1);
}

pub fn record_ingest_rejected(reason: &'static str) {
    counter!("dispatch_ingest_rejected_total", "reason" => reason).increment(1);
}

/// Record a budget admission and how long the job waited for it.
pub fn record_admission(wait_ms: u64) {
    counter!("dispatch_jobs_admitted_total").increment(1);
    histogram!("dispatch_admission_wait_ms").record(wait_ms as f64);
}

pub fn record_job_completed(latency_ms: u64) {
    counter!("dispatch_jobs_completed_total").increment(1);
    histogram!("dispatch_call_latency_ms").record(latency_ms as f64);
}

pub fn record_job_failed(kind: &'static str) {
    counter!("dispatch_jobs_failed_total", "kind" => kind).increment(1);
}

pub fn record_job_retried() {
    counter!("dispatch_jobs_retried_total").increment(1);
}

pub fn record_queue_depth(queue: &'static str, depth: usize) {
    gauge!("dispatch_queue_depth", "queue" => queue).set(depth as f64);
}
