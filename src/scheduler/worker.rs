//! Worker pool: bounded concurrent provider calls and outcome routing.
//!
//! The scheduler reserves a [`WorkerSlot`] and hands the job over with
//! [`WorkerPool::spawn`]; it never waits on the call itself. Every job
//! leaves a worker in exactly one of three ways: a success record, a
//! requeue onto the retry queue, or a terminal failure record.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span};

use super::queue::JobQueue;
use crate::job::Job;
use crate::provider::{CompletionProvider, CompletionRequest, ProviderError};
use crate::shutdown::{ShutdownCoordinator, ShutdownGuard};
use crate::telemetry::{self, JobSpan, SpanExt};
use crate::transport::{FailureKind, JobResponse, ResponsePublisher};

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Maximum concurrent provider calls.
    pub size: usize,
    /// Upper bound on a single provider call.
    pub call_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self { size: 5, call_timeout: Duration::from_secs(60) }
    }
}

/// Collaborators every worker task needs.
struct WorkerContext {
    provider: Arc<dyn CompletionProvider>,
    publisher: Arc<dyn ResponsePublisher>,
    retry: Arc<JobQueue>,
    coordinator: Arc<ShutdownCoordinator>,
    shutdown: CancellationToken,
    call_timeout: Duration,
}

/// Permission to run one job. Dropping it frees the worker.
pub struct WorkerSlot {
    _permit: OwnedSemaphorePermit,
}

#[derive(Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
    ctx: Arc<WorkerContext>,
}

impl WorkerPool {
    pub fn new(
        config: WorkerPoolConfig,
        provider: Arc<dyn CompletionProvider>,
        publisher: Arc<dyn ResponsePublisher>,
        retry: Arc<JobQueue>,
        coordinator: Arc<ShutdownCoordinator>,
        shutdown: CancellationToken,
    ) -> Self {
        let size = config.size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
            ctx: Arc::new(WorkerContext {
                provider,
                publisher,
                retry,
                coordinator,
                shutdown,
                call_timeout: config.call_timeout,
            }),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Workers currently executing a job.
    pub fn busy(&self) -> usize {
        self.size - self.permits.available_permits()
    }

    /// Wait for a free worker. `None` once the pool has been closed.
    pub async fn reserve(&self) -> Option<WorkerSlot> {
        let permit = Arc::clone(&self.permits).acquire_owned().await.ok()?;
        Some(WorkerSlot { _permit: permit })
    }

    /// Refuse further reservations. Running jobs are unaffected.
    pub fn close(&self) {
        self.permits.close();
    }

    /// Run `job` on the reserved worker. Returns immediately.
    pub fn spawn(&self, slot: WorkerSlot, job: Job) -> JoinHandle<()> {
        let ctx = Arc::clone(&self.ctx);
        let guard = ctx.coordinator.track();
        tokio::spawn(async move {
            let Some(guard) = guard else {
                ctx.publish_failure(&job, FailureKind::Shutdown, "dispatcher is shutting down".into())
                    .await;
                return;
            };
            execute(&ctx, job, guard).await;
            drop(slot);
        })
    }

    /// Charge a failed attempt made outside a worker (e.g. estimation).
    pub async fn fail_attempt(&self, job: Job, kind: FailureKind, detail: String) {
        self.ctx.settle_failure(job, kind, detail).await;
    }

    /// Publish a terminal failure without consuming attempts.
    pub async fn fail_terminal(&self, job: Job, kind: FailureKind, detail: String) {
        self.ctx.publish_failure(&job, kind, detail).await;
    }
}

async fn execute(ctx: &WorkerContext, job: Job, _guard: ShutdownGuard) {
    let span = JobSpan::new(&job);
    async move {
        let started = Instant::now();
        let request = CompletionRequest::from_job(&job);
        let result = match tokio::time::timeout(ctx.call_timeout, ctx.provider.complete(&request)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(ctx.call_timeout.as_millis() as u64)),
        };
        let latency_ms = started.elapsed().as_millis() as u64;

        let span = Span::current();
        span.record("latency_ms", latency_ms);
        span.record_result(&result);

        match result {
            Ok(message) => {
                telemetry::record_job_completed(latency_ms);
                tracing::debug!(latency_ms, "job completed");
                ctx.publish(JobResponse::completed(job.id().clone(), message)).await;
            }
            Err(e) => {
                tracing::warn!(retryable = e.is_retryable(), error = %e, "provider call failed");
                ctx.settle_failure(job, e.failure_kind(), e.to_string()).await;
            }
        }
    }
    .instrument(span)
    .await
}

impl WorkerContext {
    /// Consume one attempt, then retry or publish the terminal failure.
    async fn settle_failure(&self, mut job: Job, kind: FailureKind, detail: String) {
        let remaining = job.consume_attempt();
        if remaining > 0 && !self.shutdown.is_cancelled() {
            match self.retry.enqueue(job) {
                Ok(_) => {
                    telemetry::record_job_retried();
                    tracing::info!(attempts_remaining = remaining, kind = kind.as_str(), "job requeued for retry");
                    return;
                }
                Err(rejected) => {
                    tracing::warn!(error = %rejected.error, "retry queue refused job");
                    job = rejected.job;
                }
            }
        }

        tracing::warn!(job_id = %job.id(), kind = kind.as_str(), %detail, "job failed terminally");
        self.publish_failure(&job, kind, detail).await;
    }

    /// Every terminal failure goes through here so the counters match the records.
    async fn publish_failure(&self, job: &Job, kind: FailureKind, detail: String) {
        telemetry::record_job_failed(kind.as_str());
        self.publish(JobResponse::failed(job.id().clone(), kind, detail)).await;
    }

    async fn publish(&self, response: JobResponse) {
        let job_id = response.job_id.clone();
        if let Err(e) = self.publisher.publish(response).await {
            tracing::warn!(%job_id, error = %e, "response delivery failed");
        }
    }
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
