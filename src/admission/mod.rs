//! Admission control: what a job costs and whether the budget can take it.

mod budget;
mod cost;

pub use budget::{BudgetConfig, BudgetError, BudgetSnapshot, CapacityBudget};
pub use cost::{
    estimate_bounded, ApproxTokenCounter, CostEstimator, EstimateError, MessageCostEstimator,
    TokenCounter, DEFAULT_PER_MESSAGE_OVERHEAD, DEFAULT_REPLY_OVERHEAD,
};
