//! Job queue management.
//!
//! Both the fresh-arrival queue and the retry queue are [`JobQueue`]s. They
//! can share one [`ArrivalSequencer`] so arrival numbers are comparable
//! across queues, and one [`Notify`] so a single consumer can wait on both.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::Notify;

use super::priority::PriorityQueue;
use crate::job::Job;
use crate::telemetry;

/// Configuration for a job queue.
#[derive(Debug, Clone)]
pub struct JobQueueConfig {
    /// Label used in logs and metrics.
    pub name: &'static str,
    /// Maximum pending jobs. `None` means unbounded.
    pub capacity: Option<usize>,
}

impl JobQueueConfig {
    pub fn bounded(name: &'static str, capacity: usize) -> Self {
        Self { name, capacity: Some(capacity.max(1)) }
    }

    pub fn unbounded(name: &'static str) -> Self {
        Self { name, capacity: None }
    }
}

impl Default for JobQueueConfig {
    fn default() -> Self {
        Self::bounded("pending", 1000)
    }
}

/// Monotonic source of arrival numbers.
#[derive(Debug, Default)]
pub struct ArrivalSequencer {
    next: AtomicU64,
}

impl ArrivalSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    #[error("{queue} queue is full ({capacity} pending)")]
    Full { queue: &'static str, capacity: usize },

    #[error("{queue} queue is closed")]
    Closed { queue: &'static str },
}

/// An enqueue that was refused. The job is handed back to the caller.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct QueueRejection {
    pub error: QueueError,
    pub job: Job,
}

/// Thread-safe priority queue of jobs with a blocking pop.
pub struct JobQueue {
    heap: Mutex<PriorityQueue<Job>>,
    config: JobQueueConfig,
    sequencer: Arc<ArrivalSequencer>,
    notify: Arc<Notify>,
    closed: AtomicBool,
}

impl JobQueue {
    pub fn new(config: JobQueueConfig) -> Self {
        Self::sharing(config, Arc::new(ArrivalSequencer::new()), Arc::new(Notify::new()))
    }

    /// Build a queue that shares its arrival counter and wakeup signal.
    pub fn sharing(config: JobQueueConfig, sequencer: Arc<ArrivalSequencer>, notify: Arc<Notify>) -> Self {
        Self {
            heap: Mutex::new(PriorityQueue::new()),
            config,
            sequencer,
            notify,
            closed: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &'static str {
        self.config.name
    }

    /// Enqueue a job. Stamps its arrival sequence on first entry and returns it.
    pub fn enqueue(&self, mut job: Job) -> Result<u64, QueueRejection> {
        let queue = self.config.name;
        let mut heap = self.heap.lock();
        if self.closed.load(Ordering::Acquire) {
            return Err(QueueRejection { error: QueueError::Closed { queue }, job });
        }
        if let Some(capacity) = self.config.capacity {
            if heap.len() >= capacity {
                return Err(QueueRejection { error: QueueError::Full { queue, capacity }, job });
            }
        }

        if job.arrival().is_none() {
            job.stamp_arrival(self.sequencer.next());
        }
        let order = job.order();
        heap.push(job, order);
        let depth = heap.len();
        drop(heap);

        telemetry::record_queue_depth(queue, depth);
        self.notify.notify_one();
        Ok(order.arrival)
    }

    /// Pop the highest-priority job if there is one.
    pub fn try_pop(&self) -> Option<Job> {
        let mut heap = self.heap.lock();
        let job = heap.pop()?;
        let depth = heap.len();
        drop(heap);
        telemetry::record_queue_depth(self.config.name, depth);
        Some(job)
    }

    /// Pop the highest-priority job, waiting for one to arrive if empty.
    pub async fn pop_highest_priority(&self) -> Job {
        loop {
            if let Some(job) = self.try_pop() {
                return job;
            }
            self.notify.notified().await;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.heap.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    /// Refuse all further enqueues.
    pub fn close(&self) {
        let _heap = self.heap.lock();
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Remove and return every pending job in priority order.
    pub fn drain(&self) -> Vec<Job> {
        let jobs = self.heap.lock().drain_ordered();
        telemetry::record_queue_depth(self.config.name, 0);
        jobs
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
