//! Dual continuous-refill capacity budget.
//!
//! Two buckets refill independently: request slots and resource units
//! (tokens). A job is admitted only when both hold enough, and the
//! check-and-subtract happens under one lock so concurrent callers can
//! never both pass on the last unit.

use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::time::Instant;

/// Configuration for the capacity budget.
#[derive(Debug, Clone)]
pub struct BudgetConfig {
    /// Maximum request slots held at once.
    pub request_ceiling: f64,
    /// Maximum resource units held at once.
    pub resource_ceiling: f64,
    pub request_refill_per_sec: f64,
    pub resource_refill_per_sec: f64,
    /// Polling interval for [`CapacityBudget::await_admit`]. Shorter means
    /// lower admission latency at the price of more wakeups.
    pub poll_interval: Duration,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            request_ceiling: 3500.0,
            resource_ceiling: 90_000.0,
            request_refill_per_sec: 3500.0 / 60.0,
            resource_refill_per_sec: 90_000.0 / 60.0,
            poll_interval: Duration::from_millis(25),
        }
    }
}

impl BudgetConfig {
    /// Budget expressed as "ceiling per window", refilling evenly over the window.
    pub fn per_window(requests: f64, resources: f64, window: Duration) -> Self {
        let secs = window.as_secs_f64().max(f64::EPSILON);
        Self {
            request_ceiling: requests,
            resource_ceiling: resources,
            request_refill_per_sec: requests / secs,
            resource_refill_per_sec: resources / secs,
            ..Default::default()
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum BudgetError {
    #[error("cost {cost} exceeds resource ceiling {ceiling}")]
    CostExceedsCeiling { cost: u64, ceiling: f64 },

    #[error("request ceiling {ceiling} is below one request; nothing can be admitted")]
    RequestCeilingBelowOne { ceiling: f64 },
}

/// Point-in-time view of both buckets.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BudgetSnapshot {
    pub available_requests: f64,
    pub available_resources: f64,
    pub request_ceiling: f64,
    pub resource_ceiling: f64,
}

#[derive(Debug)]
struct Buckets {
    requests: f64,
    resources: f64,
    last_refill: Instant,
}

impl Buckets {
    fn refill(&mut self, config: &BudgetConfig, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        if elapsed <= 0.0 {
            return;
        }
        self.requests = (self.requests + elapsed * config.request_refill_per_sec)
            .min(config.request_ceiling);
        self.resources = (self.resources + elapsed * config.resource_refill_per_sec)
            .min(config.resource_ceiling);
        self.last_refill = now;
    }
}

/// Shared request/resource budget. Both buckets start full.
#[derive(Debug)]
pub struct CapacityBudget {
    config: BudgetConfig,
    buckets: Mutex<Buckets>,
}

impl CapacityBudget {
    pub fn new(config: BudgetConfig) -> Self {
        let buckets = Buckets {
            requests: config.request_ceiling,
            resources: config.resource_ceiling,
            last_refill: Instant::now(),
        };
        Self { config, buckets: Mutex::new(buckets) }
    }

    pub fn config(&self) -> &BudgetConfig {
        &self.config
    }

    /// Reject costs that could never be admitted, however long we wait.
    pub fn check_cost(&self, cost: u64) -> Result<(), BudgetError> {
        if self.config.request_ceiling < 1.0 {
            return Err(BudgetError::RequestCeilingBelowOne {
                ceiling: self.config.request_ceiling,
            });
        }
        if cost as f64 > self.config.resource_ceiling {
            return Err(BudgetError::CostExceedsCeiling {
                cost,
                ceiling: self.config.resource_ceiling,
            });
        }
        Ok(())
    }

    /// Try to reserve one request slot and `cost` resource units.
    ///
    /// On refusal the buckets are left untouched apart from the refill.
    pub fn try_admit(&self, cost: u64) -> bool {
        self.try_admit_at(cost, Instant::now())
    }

    fn try_admit_at(&self, cost: u64, now: Instant) -> bool {
        let cost = cost as f64;
        let mut buckets = self.buckets.lock();
        buckets.refill(&self.config, now);
        if buckets.requests >= 1.0 && buckets.resources >= cost {
            buckets.requests -= 1.0;
            buckets.resources -= cost;
            true
        } else {
            false
        }
    }

    /// Poll [`try_admit`](Self::try_admit) every `poll_interval` until admitted.
    ///
    /// Cancel by dropping the future (e.g. from a `select!`).
    pub async fn await_admit(&self, cost: u64) -> Result<Duration, BudgetError> {
        self.check_cost(cost)?;
        let started = Instant::now();
        loop {
            if self.try_admit(cost) {
                return Ok(started.elapsed());
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// Refreshed view of both buckets.
    pub fn snapshot(&self) -> BudgetSnapshot {
        let mut buckets = self.buckets.lock();
        buckets.refill(&self.config, Instant::now());
        BudgetSnapshot {
            available_requests: buckets.requests,
            available_resources: buckets.resources,
            request_ceiling: self.config.request_ceiling,
            resource_ceiling: self.config.resource_ceiling,
        }
    }
}
