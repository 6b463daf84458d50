//! Telemetry: structured logging, job spans and metrics.

mod logging;
mod metrics;
mod spans;

pub use logging::{init_logging, LogConfig, LogError, LogFormat};
pub use metrics::{
    record_admission, record_ingest_rejected, record_job_completed, record_job_enqueued,
    record_job_failed, record_job_retried, record_queue_depth,
};
pub use spans::{JobSpan, SpanExt};
