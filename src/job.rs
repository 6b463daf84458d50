//! Job model: the unit of work flowing through the dispatcher.
//!
//! A [`Job`] is immutable after ingestion except for its attempt budget and
//! the arrival sequence stamped on first enqueue. Ordering uses
//! [`JobOrder`], a key captured at enqueue time, so later mutation of the
//! attempt budget never reorders a queued job.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Opaque job identifier, echoed back verbatim in the response record.
///
/// Callers may use integers or strings; the JSON type is preserved.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobId {
    Number(i64),
    Text(String),
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for JobId {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Coarse priority bucket assigned by the caller. Lower value dispatches first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestorClass(pub u32);

impl RequestorClass {
    /// Data-quality filtering jobs.
    pub const FILTER: Self = Self(0);
    /// Reconciliation jobs.
    pub const RECONCILE: Self = Self(1);
    /// Everything else; the ingestion default.
    pub const ANONYMOUS: Self = Self(2);
}

impl Default for RequestorClass {
    fn default() -> Self {
        Self::ANONYMOUS
    }
}

impl fmt::Display for RequestorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Provider API credential. Never printed; use [`Credential::fingerprint`] in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// First 8 hex chars of the SHA-256 of the secret.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0.as_bytes());
        hex::encode(&digest[..4])
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential({})", self.fingerprint())
    }
}

/// One chat message as seen by the cost estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatMessage<'a> {
    pub role: &'a str,
    pub content: &'a str,
}

/// Immutable provider-facing payload of a job.
#[derive(Debug, Clone)]
pub struct JobPayload {
    pub credential: Credential,
    pub system_message: String,
    pub user_message: String,
    pub temperature: f32,
    /// Completion token ceiling sent to the provider; also charged as cost.
    pub max_cost: u32,
}

/// Total order key: `(requestor, sub_priority, arrival)` ascending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobOrder {
    pub requestor: RequestorClass,
    pub sub_priority: i64,
    pub arrival: u64,
}

/// A unit of work requesting one completion from the provider.
#[derive(Debug, Clone)]
pub struct Job {
    id: JobId,
    requestor: RequestorClass,
    sub_priority: i64,
    payload: JobPayload,
    attempts_remaining: u32,
    arrival: Option<u64>,
}

impl Job {
    /// Create a job with a single attempt. Use [`Job::with_attempts`] to allow retries.
    pub fn new(id: JobId, requestor: RequestorClass, sub_priority: i64, payload: JobPayload) -> Self {
        Self {
            id,
            requestor,
            sub_priority,
            payload,
            attempts_remaining: 1,
            arrival: None,
        }
    }

    /// Set the attempt budget (at least one attempt is always granted).
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts_remaining = attempts.max(1);
        self
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn requestor(&self) -> RequestorClass {
        self.requestor
    }

    pub fn sub_priority(&self) -> i64 {
        self.sub_priority
    }

    pub fn payload(&self) -> &JobPayload {
        &self.payload
    }

    pub fn attempts_remaining(&self) -> u32 {
        self.attempts_remaining
    }

    /// Arrival sequence, stamped on first enqueue and kept across retries.
    pub fn arrival(&self) -> Option<u64> {
        self.arrival
    }

    /// Ordering key. Jobs not yet enqueued sort after every stamped job of their tier.
    pub fn order(&self) -> JobOrder {
        JobOrder {
            requestor: self.requestor,
            sub_priority: self.sub_priority,
            arrival: self.arrival.unwrap_or(u64::MAX),
        }
    }

    /// System then user message, the shape sent to the provider.
    pub fn messages(&self) -> [ChatMessage<'_>; 2] {
        [
            ChatMessage { role: "system", content: &self.payload.system_message },
            ChatMessage { role: "user", content: &self.payload.user_message },
        ]
    }

    pub(crate) fn stamp_arrival(&mut self, sequence: u64) {
        if self.arrival.is_none() {
            self.arrival = Some(sequence);
        }
    }

    /// Charge one dispatch attempt. Returns the attempts left afterwards.
    pub(crate) fn consume_attempt(&mut self) -> u32 {
        self.attempts_remaining = self.attempts_remaining.saturating_sub(1);
        self.attempts_remaining
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> JobPayload {
        JobPayload {
            credential: Credential::new("sk-secret"),
            system_message: "sys".into(),
            user_message: "usr".into(),
            temperature: 0.0,
            max_cost: 10,
        }
    }

    #[test]
    fn job_id_preserves_json_type() {
        let n: JobId = serde_json::from_str("42").unwrap();
        assert_eq!(n, JobId::Number(42));
        assert_eq!(serde_json::to_string(&n).unwrap(), "42");

        let s: JobId = serde_json::from_str("\"job-7\"").unwrap();
        assert_eq!(s, JobId::Text("job-7".into()));
        assert_eq!(serde_json::to_string(&s).unwrap(), "\"job-7\"");
    }

    #[test]
    fn credential_debug_is_redacted() {
        let cred = Credential::new("sk-secret");
        let dbg = format!("{cred:?}");
        assert!(!dbg.contains("sk-secret"));
        assert_eq!(cred.fingerprint().len(), 8);
    }

    #[test]
    fn arrival_is_stamped_once() {
        let mut job = Job::new(1.into(), RequestorClass::FILTER, 0, payload());
        job.stamp_arrival(5);
        job.stamp_arrival(9);
        assert_eq!(job.arrival(), Some(5));
    }

    #[test]
    fn order_ignores_attempt_budget() {
        let mut job = Job::new(1.into(), RequestorClass(1), 3, payload()).with_attempts(3);
        job.stamp_arrival(0);
        let before = job.order();
        job.consume_attempt();
        assert_eq!(before, job.order());
    }

    #[test]
    fn attempts_never_below_one_at_creation() {
        let job = Job::new(1.into(), RequestorClass(1), 0, payload()).with_attempts(0);
        assert_eq!(job.attempts_remaining(), 1);
    }

    #[test]
    fn consume_attempt_saturates() {
        let mut job = Job::new(1.into(), RequestorClass(1), 0, payload());
        assert_eq!(job.consume_attempt(), 0);
        assert_eq!(job.consume_attempt(), 0);
    }

    #[test]
    fn messages_are_system_then_user() {
        let job = Job::new("a".into(), RequestorClass::default(), 0, payload());
        let [sys, usr] = job.messages();
        assert_eq!(sys.role, "system");
        assert_eq!(usr.content, "usr");
    }
}
