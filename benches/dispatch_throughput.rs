//! Dispatch hot-path benchmarks.
//!
//! Measures queue ordering, budget admission and cost estimation, the three
//! things the scheduler loop does for every job.

use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use completion_dispatch::admission::{BudgetConfig, CapacityBudget, CostEstimator, MessageCostEstimator};
use completion_dispatch::job::{Credential, Job, JobPayload, RequestorClass};
use completion_dispatch::scheduler::{JobQueue, JobQueueConfig};

fn create_job(id: i64, words: usize) -> Job {
    Job::new(
        id.into(),
        RequestorClass((id % 3) as u32),
        id % 7,
        JobPayload {
            credential: Credential::new("sk-bench"),
            system_message: "Classify the record.".to_string(),
            user_message: "lorem ipsum ".repeat(words),
            temperature: 0.0,
            max_cost: 256,
        },
    )
}

fn bench_queue_enqueue(c: &mut Criterion) {
    let mut group = c.benchmark_group("job_queue_enqueue");

    for (name, prefill) in [("empty", 0), ("half_full", 500), ("near_full", 900)] {
        group.throughput(Throughput::Elements(1));
        group.bench_function(BenchmarkId::new("enqueue_pop", name), |b| {
            let queue = JobQueue::new(JobQueueConfig::bounded("bench", 1000));
            for i in 0..prefill {
                let _ = queue.enqueue(create_job(i, 4));
            }
            let mut id = prefill;
            b.iter(|| {
                id += 1;
                let _ = queue.enqueue(black_box(create_job(id, 4)));
                black_box(queue.try_pop())
            });
        });
    }
    group.finish();
}

fn bench_budget_admission(c: &mut Criterion) {
    let mut group = c.benchmark_group("capacity_budget");
    group.throughput(Throughput::Elements(1));

    let budget = CapacityBudget::new(BudgetConfig::per_window(
        1e12,
        1e15,
        Duration::from_secs(60),
    ));
    group.bench_function("try_admit_granted", |b| {
        b.iter(|| black_box(budget.try_admit(black_box(500))))
    });

    let exhausted = CapacityBudget::new(BudgetConfig::per_window(
        1.0,
        100.0,
        Duration::from_secs(3600),
    ));
    exhausted.try_admit(100);
    group.bench_function("try_admit_refused", |b| {
        b.iter(|| black_box(exhausted.try_admit(black_box(50))))
    });
    group.finish();
}

fn bench_cost_estimate(c: &mut Criterion) {
    let mut group = c.benchmark_group("cost_estimate");
    let estimator = MessageCostEstimator::new(4);

    for words in [16, 256, 4096] {
        let job = create_job(1, words);
        group.throughput(Throughput::Bytes(job.payload().user_message.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(words), &job, |b, job| {
            b.iter(|| black_box(estimator.estimate(job)))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_queue_enqueue, bench_budget_admission, bench_cost_estimate);
criterion_main!(benches);
