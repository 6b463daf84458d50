//! Span utilities and extension traits for dispatcher tracing.

use tracing::{info_span, Span};

use crate::job::Job;

/// Extension trait for adding context to spans.
pub trait SpanExt {
    /// Record the result of an operation into the span.
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display;
}

impl SpanExt for Span {
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display,
    {
        match result {
            Ok(_) => {
                self.record("status", "ok");
            }
            Err(e) => {
                self.record("status", "error");
                self.record("error.message", e.to_string().as_str());
            }
        }
    }
}

/// Factory for per-dispatch job spans.
pub struct JobSpan;

impl JobSpan {
    /// Create a span for one dispatch attempt of `job`.
    ///
    /// `status`, `error.message` and `latency_ms` are left empty for the
    /// worker to fill in. The credential appears only as a fingerprint.
    pub fn new(job: &Job) -> Span {
        info_span!(
            "job",
            job_id = %job.id(),
            requestor_class = job.requestor().0,
            sub_priority = job.sub_priority(),
            attempts_remaining = job.attempts_remaining(),
            credential = %job.payload().credential.fingerprint(),
            status = tracing::field::Empty,
            error.message = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
        )
    }
}
