//! Resource-cost estimation for jobs.
//!
//! The cost charged against the resource bucket is the prompt token count
//! (with the chat framing overhead the provider adds) plus the completion
//! ceiling the job asks for.

use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use thiserror::Error;

use crate::job::Job;

/// Tokens the provider adds around each chat message.
pub const DEFAULT_PER_MESSAGE_OVERHEAD: u64 = 4;
/// Tokens priming the assistant reply.
pub const DEFAULT_REPLY_OVERHEAD: u64 = 3;

#[derive(Debug, Error)]
pub enum EstimateError {
    #[error("cost estimation failed: {0}")]
    Failed(String),

    #[error("cost estimation timed out after {0}ms")]
    TimedOut(u64),
}

/// Counts tokens in a piece of text.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

/// Tokenizer-free approximation: one token per word run or punctuation mark.
///
/// Close enough to BPE counts for English prose to keep the budget honest;
/// swap in a real tokenizer through [`TokenCounter`] when exactness matters.
#[derive(Debug, Clone)]
pub struct ApproxTokenCounter {
    pattern: Regex,
}

impl ApproxTokenCounter {
    pub fn new() -> Self {
        let pattern = Regex::new(r"\w+|[^\w\s]").expect("static token pattern");
        Self { pattern }
    }
}

impl Default for ApproxTokenCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenCounter for ApproxTokenCounter {
    fn count(&self, text: &str) -> usize {
        self.pattern.find_iter(text).count()
    }
}

/// Estimates the resource cost of a job. Must be deterministic and side-effect free.
pub trait CostEstimator: Send + Sync {
    fn estimate(&self, job: &Job) -> Result<u64, EstimateError>;
}

/// Chat-framing estimator: per-message overhead plus role and content tokens,
/// a reply allowance, and the job's declared `max_cost`.
#[derive(Debug, Clone)]
pub struct MessageCostEstimator<C = ApproxTokenCounter> {
    counter: C,
    per_message_overhead: u64,
    reply_overhead: u64,
}

impl MessageCostEstimator<ApproxTokenCounter> {
    pub fn new(per_message_overhead: u64) -> Self {
        Self::with_counter(ApproxTokenCounter::new(), per_message_overhead)
    }
}

impl<C: TokenCounter> MessageCostEstimator<C> {
    pub fn with_counter(counter: C, per_message_overhead: u64) -> Self {
        Self {
            counter,
            per_message_overhead,
            reply_overhead: DEFAULT_REPLY_OVERHEAD,
        }
    }

    pub fn reply_overhead(mut self, tokens: u64) -> Self {
        self.reply_overhead = tokens;
        self
    }
}

impl<C: TokenCounter> CostEstimator for MessageCostEstimator<C> {
    fn estimate(&self, job: &Job) -> Result<u64, EstimateError> {
        let prompt: u64 = job
            .messages()
            .iter()
            .map(|msg| {
                self.per_message_overhead
                    + self.counter.count(msg.role) as u64
                    + self.counter.count(msg.content) as u64
            })
            .sum();
        Ok(prompt
            .saturating_add(self.reply_overhead)
            .saturating_add(u64::from(job.payload().max_cost)))
    }
}

/// Run the estimator off the async scheduler thread, bounded by `timeout`.
pub async fn estimate_bounded(
    estimator: &Arc<dyn CostEstimator>,
    job: &Job,
    timeout: Duration,
) -> Result<u64, EstimateError> {
    let estimator = Arc::clone(estimator);
    let job = job.clone();
    let task = tokio::task::spawn_blocking(move || estimator.estimate(&job));
    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(EstimateError::Failed(join_err.to_string())),
        Err(_) => Err(EstimateError::TimedOut(timeout.as_millis() as u64)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{Credential, JobPayload, RequestorClass};

    fn job(system: &str, user: &str, max_cost: u32) -> Job {
        Job::new(
            1.into(),
            RequestorClass::default(),
            0,
            JobPayload {
                credential: Credential::new("k"),
                system_message: system.into(),
                user_message: user.into(),
                temperature: 0.0,
                max_cost,
            },
        )
    }

    struct CharCounter;

    impl TokenCounter for CharCounter {
        fn count(&self, text: &str) -> usize {
            text.chars().count()
        }
    }

    #[test]
    fn approx_counter_splits_words_and_punctuation() {
        let c = ApproxTokenCounter::new();
        assert_eq!(c.count("Hello, world!"), 4);
        assert_eq!(c.count(""), 0);
        assert_eq!(c.count("   "), 0);
    }

    #[test]
    fn estimate_adds_overheads_and_max_cost() {
        let est = MessageCostEstimator::with_counter(CharCounter, 4);
        // system: 4 + len("system")=6 + 2 ; user: 4 + len("user")=4 + 3
        let cost = est.estimate(&job("ab", "cde", 100)).unwrap();
        assert_eq!(cost, (4 + 6 + 2) + (4 + 4 + 3) + DEFAULT_REPLY_OVERHEAD + 100);
    }

    #[test]
    fn estimate_is_deterministic() {
        let est = MessageCostEstimator::new(DEFAULT_PER_MESSAGE_OVERHEAD);
        let j = job("You are a calculator.", "200 + 7", 1000);
        assert_eq!(est.estimate(&j).unwrap(), est.estimate(&j).unwrap());
    }

    #[test]
    fn reply_overhead_is_configurable() {
        let est = MessageCostEstimator::with_counter(CharCounter, 0).reply_overhead(0);
        assert_eq!(est.estimate(&job("", "", 0)).unwrap(), 6 + 4);
    }

    struct SlowEstimator;

    impl CostEstimator for SlowEstimator {
        fn estimate(&self, _job: &Job) -> Result<u64, EstimateError> {
            std::thread::sleep(Duration::from_millis(300));
            Ok(1)
        }
    }

    #[tokio::test]
    async fn bounded_estimate_times_out() {
        let est: Arc<dyn CostEstimator> = Arc::new(SlowEstimator);
        let res = estimate_bounded(&est, &job("a", "b", 1), Duration::from_millis(20)).await;
        assert!(matches!(res, Err(EstimateError::TimedOut(20))));
    }

    #[tokio::test]
    async fn bounded_estimate_passes_result_through() {
        let est: Arc<dyn CostEstimator> = Arc::new(MessageCostEstimator::with_counter(CharCounter, 4));
        let res = estimate_bounded(&est, &job("ab", "cde", 100), Duration::from_secs(1)).await;
        assert_eq!(res.unwrap(), 12 + 11 + 3 + 100);
    }
}
