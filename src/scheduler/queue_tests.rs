//! Tests for the job queue and its blocking pop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use super::*;
use crate::job::{Credential, Job, JobId, JobPayload, RequestorClass};

fn job(id: i64, requestor: u32, sub: i64) -> Job {
    Job::new(
        JobId::from(id),
        RequestorClass(requestor),
        sub,
        JobPayload {
            credential: Credential::new("k"),
            system_message: "s".into(),
            user_message: "u".into(),
            temperature: 0.0,
            max_cost: 1,
        },
    )
}

fn ids(jobs: &[Job]) -> Vec<JobId> {
    jobs.iter().map(|j| j.id().clone()).collect()
}

#[test]
fn enqueue_stamps_increasing_arrival() {
    let q = JobQueue::new(JobQueueConfig::unbounded("t"));
    let a = q.enqueue(job(1, 1, 0)).unwrap();
    let b = q.enqueue(job(2, 1, 0)).unwrap();
    assert!(b > a);
    assert_eq!(q.len(), 2);
}

#[test]
fn pops_in_priority_order() {
    let q = JobQueue::new(JobQueueConfig::unbounded("t"));
    q.enqueue(job(1, 2, 0)).unwrap();
    q.enqueue(job(2, 1, 5)).unwrap();
    q.enqueue(job(3, 1, 1)).unwrap();
    q.enqueue(job(4, 1, 1)).unwrap();
    assert_eq!(ids(&q.drain()), vec![3.into(), 4.into(), 2.into(), 1.into()]);
    assert!(q.is_empty());
}

#[test]
fn full_queue_hands_job_back() {
    let q = JobQueue::new(JobQueueConfig::bounded("t", 1));
    q.enqueue(job(1, 1, 0)).unwrap();
    let rejection = q.enqueue(job(2, 1, 0)).unwrap_err();
    assert_eq!(rejection.error, QueueError::Full { queue: "t", capacity: 1 });
    assert_eq!(rejection.job.id(), &JobId::from(2));
}

#[test]
fn closed_queue_rejects() {
    let q = JobQueue::new(JobQueueConfig::unbounded("t"));
    q.close();
    assert!(q.is_closed());
    let rejection = q.enqueue(job(1, 1, 0)).unwrap_err();
    assert_eq!(rejection.error, QueueError::Closed { queue: "t" });
}

#[test]
fn requeued_job_keeps_its_arrival() {
    let seq = Arc::new(ArrivalSequencer::new());
    let notify = Arc::new(Notify::new());
    let primary = JobQueue::sharing(JobQueueConfig::unbounded("p"), seq.clone(), notify.clone());
    let retry = JobQueue::sharing(JobQueueConfig::unbounded("r"), seq, notify);

    let first = primary.enqueue(job(1, 1, 0)).unwrap();
    primary.enqueue(job(2, 1, 0)).unwrap();
    let popped = primary.try_pop().unwrap();
    assert_eq!(retry.enqueue(popped).unwrap(), first);
}

#[tokio::test]
async fn pop_waits_for_enqueue() {
    let q = Arc::new(JobQueue::new(JobQueueConfig::unbounded("t")));
    let waiter = {
        let q = q.clone();
        tokio::spawn(async move { q.pop_highest_priority().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!waiter.is_finished());

    q.enqueue(job(9, 0, 0)).unwrap();
    let popped = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(popped.id(), &JobId::from(9));
}

#[test]
fn try_pop_on_empty_is_none() {
    let q = JobQueue::new(JobQueueConfig::default());
    assert!(q.try_pop().is_none());
}

#[test]
fn any_enqueue_sequence_pops_in_nondecreasing_order() {
    let q = JobQueue::new(JobQueueConfig::unbounded("t"));
    let mut seed: u32 = 0x9e37_79b9;
    let mut next = || {
        seed ^= seed << 13;
        seed ^= seed >> 17;
        seed ^= seed << 5;
        seed
    };
    for id in 0..200 {
        let requestor = next() % 4;
        let sub = i64::from(next() % 5) - 2;
        q.enqueue(job(id, requestor, sub)).unwrap();
        // Interleave pops so ordering holds while the heap is being mutated.
        if next() % 3 == 0 {
            q.try_pop();
        }
    }

    let mut previous = None;
    while let Some(job) = q.try_pop() {
        let order = job.order();
        if let Some(prev) = previous {
            assert!(prev <= order, "{prev:?} popped before {order:?}");
        }
        previous = Some(order);
    }
}
