//! Scheduling: job ordering, the priority and retry queues, the dispatch
//! loop and the worker pool it feeds.

mod dispatcher;
mod priority;
mod queue;
mod worker;

pub use dispatcher::{DispatchScheduler, DispatchState};
pub use priority::{PrioritizedItem, PriorityQueue};
pub use queue::{ArrivalSequencer, JobQueue, JobQueueConfig, QueueError, QueueRejection};
pub use worker::{WorkerPool, WorkerPoolConfig, WorkerSlot};
