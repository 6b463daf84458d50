//! Rate-limited priority dispatch for chat-completion jobs.
//!
//! Jobs are ordered by `(requestor class, sub-priority, arrival)`, metered
//! against a dual request/resource capacity budget, and executed by a
//! bounded worker pool. Failed attempts go to a retry queue that is always
//! drained ahead of fresh arrivals; every job ends in exactly one success
//! or terminal-failure record.
//!
//! ```text
//! ingest -> JobQueue (primary) --+
//!                                +--> DispatchScheduler -> CapacityBudget -> WorkerPool -> publisher
//!           JobQueue (retry)  <--+------------------------- failure, attempts left <--+
//! ```

pub mod admission;
pub mod cli;
pub mod config;
pub mod job;
pub mod provider;
pub mod scheduler;
pub mod shutdown;
pub mod telemetry;
pub mod transport;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{oneshot, watch, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use admission::{BudgetConfig, BudgetSnapshot, CapacityBudget, CostEstimator};
use job::Job;
use provider::CompletionProvider;
use scheduler::{
    ArrivalSequencer, DispatchScheduler, DispatchState, JobQueue, JobQueueConfig, QueueError,
    WorkerPool, WorkerPoolConfig,
};
use shutdown::{ShutdownCoordinator, ShutdownResult};
use transport::{FailureKind, JobResponse, PublishError, ResponsePublisher, RoutingPublisher};

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub budget: BudgetConfig,
    pub workers: WorkerPoolConfig,
    /// Attempts granted to jobs parsed from the wire.
    pub max_attempts: u32,
    /// Bound on pending fresh jobs. The retry queue is unbounded.
    pub queue_capacity: usize,
    pub estimate_timeout: Duration,
    /// How long shutdown waits for in-flight calls.
    pub shutdown_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            budget: BudgetConfig::default(),
            workers: WorkerPoolConfig::default(),
            max_attempts: 3,
            queue_capacity: 1000,
            estimate_timeout: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Route(#[from] PublishError),
}

/// Outcome of [`Dispatcher::shutdown`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub drain: ShutdownResult,
    /// Jobs still queued at shutdown, each published as a `shutdown` failure.
    pub abandoned: usize,
}

/// Point-in-time counters for status output and tests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DispatchStats {
    pub state: DispatchState,
    pub pending: usize,
    pub retrying: usize,
    pub busy_workers: usize,
    pub budget: BudgetSnapshot,
}

/// The assembled dispatch engine.
pub struct Dispatcher {
    config: DispatchConfig,
    budget: Arc<CapacityBudget>,
    primary: Arc<JobQueue>,
    retry: Arc<JobQueue>,
    pool: WorkerPool,
    router: Arc<RoutingPublisher>,
    coordinator: Arc<ShutdownCoordinator>,
    shutdown: CancellationToken,
    state: watch::Receiver<DispatchState>,
    scheduler: Mutex<Option<DispatchScheduler>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Assemble the engine without starting the scheduler loop.
    ///
    /// Jobs may be submitted before [`start`](Self::start); they wait in
    /// the queue in priority order.
    pub fn new(
        config: DispatchConfig,
        provider: Arc<dyn CompletionProvider>,
        estimator: Arc<dyn CostEstimator>,
        publisher: Arc<dyn ResponsePublisher>,
    ) -> Self {
        let sequencer = Arc::new(ArrivalSequencer::new());
        let arrivals = Arc::new(Notify::new());
        let primary = Arc::new(JobQueue::sharing(
            JobQueueConfig::bounded("pending", config.queue_capacity),
            sequencer.clone(),
            arrivals.clone(),
        ));
        let retry = Arc::new(JobQueue::sharing(
            JobQueueConfig::unbounded("retry"),
            sequencer,
            arrivals.clone(),
        ));

        let budget = Arc::new(CapacityBudget::new(config.budget.clone()));
        let router = Arc::new(RoutingPublisher::new(Some(publisher)));
        let coordinator = Arc::new(ShutdownCoordinator::new());
        let shutdown = CancellationToken::new();
        let pool = WorkerPool::new(
            config.workers.clone(),
            provider,
            router.clone(),
            retry.clone(),
            coordinator.clone(),
            shutdown.clone(),
        );
        let (scheduler, state) = DispatchScheduler::new(
            primary.clone(),
            retry.clone(),
            arrivals,
            budget.clone(),
            estimator,
            config.estimate_timeout,
            pool.clone(),
            shutdown.clone(),
        );

        Self {
            config,
            budget,
            primary,
            retry,
            pool,
            router,
            coordinator,
            shutdown,
            state,
            scheduler: Mutex::new(Some(scheduler)),
            task: Mutex::new(None),
        }
    }

    /// Assemble and start. Must be called inside a Tokio runtime.
    pub fn spawn(
        config: DispatchConfig,
        provider: Arc<dyn CompletionProvider>,
        estimator: Arc<dyn CostEstimator>,
        publisher: Arc<dyn ResponsePublisher>,
    ) -> Self {
        let dispatcher = Self::new(config, provider, estimator, publisher);
        dispatcher.start();
        dispatcher
    }

    /// Start the scheduler loop. Later calls are no-ops.
    pub fn start(&self) {
        if let Some(scheduler) = self.scheduler.lock().take() {
            *self.task.lock() = Some(scheduler.spawn());
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Enqueue a job. Returns its arrival sequence.
    pub fn submit(&self, job: Job) -> Result<u64, DispatchError> {
        match self.primary.enqueue(job) {
            Ok(arrival) => {
                telemetry::record_job_enqueued();
                Ok(arrival)
            }
            Err(rejected) => {
                let reason = match rejected.error {
                    QueueError::Full { .. } => "queue_full",
                    QueueError::Closed { .. } => "closed",
                };
                telemetry::record_ingest_rejected(reason);
                Err(rejected.error.into())
            }
        }
    }

    /// Enqueue a job and get a receiver for its single outcome record.
    ///
    /// The record is delivered to the receiver instead of the publisher
    /// the dispatcher was built with. Refused with
    /// [`PublishError::DuplicateRoute`] while another caller is still
    /// waiting on a job with the same id.
    pub fn submit_with_response(&self, job: Job) -> Result<oneshot::Receiver<JobResponse>, DispatchError> {
        let job_id = job.id().clone();
        let rx = self.router.register(job_id.clone()).map_err(|e| {
            telemetry::record_ingest_rejected("duplicate_route");
            e
        })?;
        if let Err(e) = self.submit(job) {
            self.router.unregister(&job_id);
            return Err(e);
        }
        Ok(rx)
    }

    pub fn state(&self) -> DispatchState {
        *self.state.borrow()
    }

    /// Watch scheduler state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<DispatchState> {
        self.state.clone()
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            state: self.state(),
            pending: self.primary.len(),
            retrying: self.retry.len(),
            busy_workers: self.pool.busy(),
            budget: self.budget.snapshot(),
        }
    }

    /// No queued, retrying or executing jobs, and the scheduler is waiting.
    pub fn is_idle(&self) -> bool {
        let stats = self.stats();
        stats.state == DispatchState::Idle
            && stats.pending == 0
            && stats.retrying == 0
            && stats.busy_workers == 0
    }

    /// Resolve once the dispatcher has been idle for two consecutive polls.
    ///
    /// A single observation can race with the scheduler holding a job it
    /// has just popped, so one confirming poll is required.
    pub async fn until_idle(&self, poll: Duration) {
        let mut confirmed = false;
        loop {
            if self.is_idle() {
                if confirmed {
                    return;
                }
                confirmed = true;
            } else {
                confirmed = false;
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// Stop dispatching, wait for in-flight calls, and fail what is left.
    ///
    /// No job is popped after this begins and no retry is dispatched.
    /// Calls still running after `shutdown_timeout` keep running in the
    /// background; their outcomes are still published.
    pub async fn shutdown(&self) -> ShutdownReport {
        tracing::info!("dispatcher shutting down");
        self.primary.close();
        self.shutdown.cancel();

        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "scheduler task ended abnormally");
            }
        }
        self.pool.close();

        let drain = self.coordinator.initiate(self.config.shutdown_timeout).await;
        if let ShutdownResult::Timeout { remaining } = drain {
            tracing::warn!(remaining, "shutdown timed out with calls in flight");
        }

        self.retry.close();
        let mut leftover = self.retry.drain();
        leftover.extend(self.primary.drain());
        let abandoned = leftover.len();
        for job in leftover {
            telemetry::record_job_failed(FailureKind::Shutdown.as_str());
            let response = JobResponse::failed(
                job.id().clone(),
                FailureKind::Shutdown,
                "dispatcher shut down before the job was dispatched",
            );
            if let Err(e) = self.router.publish(response).await {
                tracing::warn!(job_id = %job.id(), error = %e, "response delivery failed");
            }
        }

        tracing::info!(abandoned, ?drain, "dispatcher stopped");
        ShutdownReport { drain, abandoned }
    }
}
