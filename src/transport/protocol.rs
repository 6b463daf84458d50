//! Ingestion and response wire format.
//!
//! Inbound jobs arrive as one JSON object each. Validation happens here, at
//! the boundary: anything that fails to parse never becomes a [`Job`].
//!
//! ```json
//! {"openai_api_key": "sk-...", "system_message": "...", "user_message": "...",
//!  "temperature": 0.2, "requestorPrioId": 1, "PrioId": 5, "JobID": 42}
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::job::{Credential, Job, JobId, JobPayload, RequestorClass};

/// Upper bound on a single inbound message.
pub const MAX_MESSAGE_BYTES: usize = 1024 * 1024;
/// Completion ceiling used when the message does not carry `max_tokens`.
pub const DEFAULT_MAX_TOKENS: u32 = 1000;

const MAX_TEMPERATURE: f32 = 2.0;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

impl ProtocolError {
    /// Short label for the rejection metric.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::InvalidJson(_) => "invalid_json",
            Self::MessageTooLarge { .. } => "too_large",
            Self::MissingField(_) => "missing_field",
            Self::InvalidField { .. } => "invalid_field",
        }
    }
}

/// Raw inbound message as it appears on the wire.
#[derive(Debug, Deserialize)]
pub struct InboundMessage {
    #[serde(rename = "openai_api_key", default)]
    pub api_key: String,
    #[serde(default)]
    pub system_message: String,
    #[serde(default)]
    pub user_message: String,
    #[serde(default)]
    pub temperature: f32,
    #[serde(rename = "requestorPrioId", default)]
    pub requestor: Option<u32>,
    #[serde(rename = "PrioId")]
    pub sub_priority: Option<i64>,
    #[serde(rename = "JobID")]
    pub job_id: Option<JobId>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl InboundMessage {
    /// Validate and convert into a job with `max_attempts` attempts.
    pub fn into_job(self, max_attempts: u32) -> Result<Job, ProtocolError> {
        let id = self.job_id.ok_or(ProtocolError::MissingField("JobID"))?;
        let sub_priority = self.sub_priority.ok_or(ProtocolError::MissingField("PrioId"))?;
        if self.api_key.is_empty() {
            return Err(ProtocolError::MissingField("openai_api_key"));
        }
        if self.user_message.is_empty() {
            return Err(ProtocolError::MissingField("user_message"));
        }
        if !self.temperature.is_finite() || !(0.0..=MAX_TEMPERATURE).contains(&self.temperature) {
            return Err(ProtocolError::InvalidField {
                field: "temperature",
                reason: format!("{} is outside 0..={MAX_TEMPERATURE}", self.temperature),
            });
        }

        let payload = JobPayload {
            credential: Credential::new(self.api_key),
            system_message: self.system_message,
            user_message: self.user_message,
            temperature: self.temperature,
            max_cost: self.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        };
        let requestor = self.requestor.map(RequestorClass).unwrap_or_default();
        Ok(Job::new(id, requestor, sub_priority, payload).with_attempts(max_attempts))
    }
}

/// Parse one inbound message.
pub fn parse_job(bytes: &[u8], max_attempts: u32) -> Result<Job, ProtocolError> {
    if bytes.len() > MAX_MESSAGE_BYTES {
        return Err(ProtocolError::MessageTooLarge {
            size: bytes.len(),
            max: MAX_MESSAGE_BYTES,
        });
    }
    let message: InboundMessage = serde_json::from_slice(bytes)?;
    message.into_job(max_attempts)
}

/// Why a job ended without a completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Provider,
    Timeout,
    RateLimited,
    Unauthorized,
    InvalidResponse,
    Estimation,
    OverCapacity,
    Shutdown,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Provider => "provider",
            Self::Timeout => "timeout",
            Self::RateLimited => "rate_limited",
            Self::Unauthorized => "unauthorized",
            Self::InvalidResponse => "invalid_response",
            Self::Estimation => "estimation",
            Self::OverCapacity => "over_capacity",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Final outcome of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobOutcome {
    Completed { message: String },
    Failed { error: FailureKind, detail: String },
}

/// The single record published for every job that leaves the system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResponse {
    pub job_id: JobId,
    #[serde(flatten)]
    pub outcome: JobOutcome,
}

impl JobResponse {
    pub fn completed(job_id: JobId, message: String) -> Self {
        Self { job_id, outcome: JobOutcome::Completed { message } }
    }

    pub fn failed(job_id: JobId, error: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            job_id,
            outcome: JobOutcome::Failed { error, detail: detail.into() },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, JobOutcome::Completed { .. })
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match &self.outcome {
            JobOutcome::Failed { error, .. } => Some(*error),
            JobOutcome::Completed { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn wire(value: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&value).unwrap()
    }

    fn valid() -> serde_json::Value {
        json!({
            "openai_api_key": "sk-test",
            "system_message": "You are terse.",
            "user_message": "Say hi",
            "temperature": 0.5,
            "requestorPrioId": 1,
            "PrioId": 3,
            "JobID": 17
        })
    }

    #[test]
    fn parses_full_message() {
        let job = parse_job(&wire(valid()), 3).unwrap();
        assert_eq!(job.id(), &JobId::Number(17));
        assert_eq!(job.requestor(), RequestorClass::RECONCILE);
        assert_eq!(job.sub_priority(), 3);
        assert_eq!(job.attempts_remaining(), 3);
        assert_eq!(job.payload().max_cost, DEFAULT_MAX_TOKENS);
        assert_eq!(job.payload().credential.expose(), "sk-test");
    }

    #[test]
    fn requestor_defaults_to_anonymous() {
        let mut msg = valid();
        msg.as_object_mut().unwrap().remove("requestorPrioId");
        let job = parse_job(&wire(msg), 1).unwrap();
        assert_eq!(job.requestor(), RequestorClass::ANONYMOUS);
    }

    #[test]
    fn missing_job_id_is_rejected() {
        let mut msg = valid();
        msg.as_object_mut().unwrap().remove("JobID");
        assert!(matches!(parse_job(&wire(msg), 1), Err(ProtocolError::MissingField("JobID"))));
    }

    #[test]
    fn missing_prio_is_rejected() {
        let mut msg = valid();
        msg.as_object_mut().unwrap().remove("PrioId");
        assert!(matches!(parse_job(&wire(msg), 1), Err(ProtocolError::MissingField("PrioId"))));
    }

    #[test]
    fn out_of_range_temperature_is_rejected() {
        let mut msg = valid();
        msg["temperature"] = json!(-0.1);
        let err = parse_job(&wire(msg), 1).unwrap_err();
        assert_eq!(err.reason(), "invalid_field");
    }

    #[test]
    fn non_json_is_rejected() {
        let err = parse_job(b"not json", 1).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidJson(_)));
    }

    #[test]
    fn oversized_message_is_rejected() {
        let big = vec![b' '; MAX_MESSAGE_BYTES + 1];
        assert!(matches!(parse_job(&big, 1), Err(ProtocolError::MessageTooLarge { .. })));
    }

    #[test]
    fn response_records_match_wire_shape() {
        let ok = JobResponse::completed(JobId::from("a-1"), "hi".into());
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            json!({"job_id": "a-1", "message": "hi"})
        );

        let failed = JobResponse::failed(7.into(), FailureKind::RateLimited, "429");
        assert_eq!(
            serde_json::to_value(&failed).unwrap(),
            json!({"job_id": 7, "error": "rate_limited", "detail": "429"})
        );
    }

    #[test]
    fn failure_kind_labels_match_serde() {
        for kind in [FailureKind::OverCapacity, FailureKind::InvalidResponse, FailureKind::Shutdown] {
            assert_eq!(serde_json::to_value(kind).unwrap(), json!(kind.as_str()));
        }
    }
}
