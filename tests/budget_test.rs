//! Capacity budget behaviour under a controlled clock.

use std::sync::Arc;
use std::time::Duration;

use completion_dispatch::admission::{BudgetConfig, BudgetError, CapacityBudget};
use futures::future::join_all;

fn per_minute(requests: f64, resources: f64) -> CapacityBudget {
    CapacityBudget::new(BudgetConfig::per_window(requests, resources, Duration::from_secs(60)))
}

fn assert_between(waited: Duration, low_secs: f64, high_secs: f64) {
    let secs = waited.as_secs_f64();
    assert!(secs >= low_secs && secs <= high_secs, "waited {secs:.3}s, expected {low_secs}..={high_secs}");
}

#[tokio::test(start_paused = true)]
async fn third_job_waits_for_refill() {
    // 2 requests and 1000 units per minute; three jobs of 400 units.
    let budget = per_minute(2.0, 1000.0);

    assert!(budget.try_admit(400));
    assert!(budget.try_admit(400));
    assert!(!budget.try_admit(400));

    // One request slot takes 30s to come back; 200 units take 12s.
    let waited = budget.await_admit(400).await.unwrap();
    assert_between(waited, 29.9, 30.5);
}

#[tokio::test(start_paused = true)]
async fn resource_units_gate_even_with_request_slots_free() {
    let budget = per_minute(100.0, 1000.0);

    assert!(budget.try_admit(400));
    assert!(budget.try_admit(400));
    assert!(!budget.try_admit(400), "only 200 units remain");

    // 1000 units/min refill: 200 missing units come back in 12s.
    let waited = budget.await_admit(400).await.unwrap();
    assert_between(waited, 11.9, 12.5);
}

#[tokio::test(start_paused = true)]
async fn cost_above_ceiling_is_rejected_immediately() {
    let budget = per_minute(10.0, 500.0);
    let err = budget.await_admit(501).await.unwrap_err();
    assert_eq!(err, BudgetError::CostExceedsCeiling { cost: 501, ceiling: 500.0 });
    assert!(budget.check_cost(500).is_ok());
}

#[tokio::test(start_paused = true)]
async fn availability_never_exceeds_ceiling() {
    let budget = per_minute(5.0, 2000.0);
    // Deterministic pseudo-random schedule of admits and idle gaps.
    let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
    for _ in 0..500 {
        seed ^= seed << 13;
        seed ^= seed >> 7;
        seed ^= seed << 17;
        let cost = seed % 900;
        let gap_ms = (seed >> 20) % 40_000;

        budget.try_admit(cost);
        tokio::time::advance(Duration::from_millis(gap_ms)).await;

        let snap = budget.snapshot();
        assert!(snap.available_requests <= snap.request_ceiling);
        assert!(snap.available_resources <= snap.resource_ceiling);
        assert!(snap.available_requests >= 0.0);
        assert!(snap.available_resources >= 0.0);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn last_slot_goes_to_exactly_one_caller() {
    // One request per hour: refill during the test is negligible.
    let budget = Arc::new(CapacityBudget::new(BudgetConfig::per_window(
        1.0,
        1_000_000.0,
        Duration::from_secs(3600),
    )));

    let attempts = (0..64).map(|_| {
        let budget = budget.clone();
        tokio::spawn(async move { budget.try_admit(10) })
    });
    let admitted = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .filter(|admitted| *admitted)
        .count();

    assert_eq!(admitted, 1);
}
