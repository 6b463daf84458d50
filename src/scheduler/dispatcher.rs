//! Dispatch scheduler: the single control loop.
//!
//! Each iteration takes exactly one job from selection through admission to
//! a worker before looking at the queues again, so the capacity budget is
//! only ever charged from here.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::queue::JobQueue;
use super::worker::WorkerPool;
use crate::admission::{estimate_bounded, CapacityBudget, CostEstimator};
use crate::job::Job;
use crate::telemetry;
use crate::transport::FailureKind;

/// Observable scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    /// Waiting for either queue to become non-empty.
    Idle,
    /// A job was popped and its cost is being estimated.
    Selecting,
    /// Waiting for the capacity budget to admit the job.
    Admitting,
    /// The job was handed to a worker.
    Dispatched,
    /// The loop has exited.
    Stopped,
}

/// What the loop does after handling one job.
enum Step {
    Continue,
    Stop,
}

pub struct DispatchScheduler {
    primary: Arc<JobQueue>,
    retry: Arc<JobQueue>,
    arrivals: Arc<Notify>,
    budget: Arc<CapacityBudget>,
    estimator: Arc<dyn CostEstimator>,
    estimate_timeout: Duration,
    pool: WorkerPool,
    state: watch::Sender<DispatchState>,
    shutdown: CancellationToken,
}

impl DispatchScheduler {
    /// `arrivals` must be the wakeup signal shared by both queues.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        primary: Arc<JobQueue>,
        retry: Arc<JobQueue>,
        arrivals: Arc<Notify>,
        budget: Arc<CapacityBudget>,
        estimator: Arc<dyn CostEstimator>,
        estimate_timeout: Duration,
        pool: WorkerPool,
        shutdown: CancellationToken,
    ) -> (Self, watch::Receiver<DispatchState>) {
        let (state, state_rx) = watch::channel(DispatchState::Idle);
        let scheduler = Self {
            primary,
            retry,
            arrivals,
            budget,
            estimator,
            estimate_timeout,
            pool,
            state,
            shutdown,
        };
        (scheduler, state_rx)
    }

    /// Spawn the loop. It runs until the shutdown token is cancelled.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        tracing::info!(workers = self.pool.size(), "dispatch scheduler started");
        loop {
            self.set_state(DispatchState::Idle);
            let job = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                job = self.next_job() => job,
            };
            if let Step::Stop = self.dispatch_one(job).await {
                break;
            }
        }
        self.set_state(DispatchState::Stopped);
        tracing::info!("dispatch scheduler stopped");
    }

    /// Retry queue first, then fresh arrivals; wait while both are empty.
    async fn next_job(&self) -> Job {
        loop {
            if let Some(job) = self.retry.try_pop().or_else(|| self.primary.try_pop()) {
                return job;
            }
            self.arrivals.notified().await;
        }
    }

    async fn dispatch_one(&self, job: Job) -> Step {
        self.set_state(DispatchState::Selecting);
        let cost = match estimate_bounded(&self.estimator, &job, self.estimate_timeout).await {
            Ok(cost) => cost,
            Err(e) => {
                tracing::warn!(job_id = %job.id(), error = %e, "cost estimation failed");
                self.pool.fail_attempt(job, FailureKind::Estimation, e.to_string()).await;
                return Step::Continue;
            }
        };
        if let Err(e) = self.budget.check_cost(cost) {
            tracing::warn!(job_id = %job.id(), error = %e, "job can never be admitted");
            self.pool.fail_terminal(job, FailureKind::OverCapacity, e.to_string()).await;
            return Step::Continue;
        }

        self.set_state(DispatchState::Admitting);
        let waited = tokio::select! {
            biased;
            () = self.shutdown.cancelled() => return self.park(job).await,
            admitted = self.budget.await_admit(cost) => admitted,
        };
        let waited = match waited {
            Ok(waited) => waited,
            Err(e) => {
                self.pool.fail_terminal(job, FailureKind::OverCapacity, e.to_string()).await;
                return Step::Continue;
            }
        };

        let slot = tokio::select! {
            biased;
            () = self.shutdown.cancelled() => return self.park(job).await,
            slot = self.pool.reserve() => slot,
        };
        let Some(slot) = slot else {
            return self.park(job).await;
        };

        telemetry::record_admission(waited.as_millis() as u64);
        tracing::debug!(
            job_id = %job.id(),
            cost,
            waited_ms = waited.as_millis() as u64,
            "job admitted"
        );
        self.pool.spawn(slot, job);
        self.set_state(DispatchState::Dispatched);
        Step::Continue
    }

    /// Return an undispatched job to the retry queue so shutdown can report it.
    async fn park(&self, job: Job) -> Step {
        if let Err(rejected) = self.retry.enqueue(job) {
            tracing::warn!(error = %rejected.error, "could not park job during shutdown");
            self.pool
                .fail_terminal(rejected.job, FailureKind::Shutdown, "dispatcher stopped before dispatch".into())
                .await;
        }
        Step::Stop
    }

    fn set_state(&self, state: DispatchState) {
        self.state.send_replace(state);
    }
}
