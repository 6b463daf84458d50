//! Completion provider collaborator.
//!
//! The dispatcher only needs "send these messages, get text back". The
//! [`CompletionProvider`] trait is that seam; [`OpenAiClient`] is the
//! HTTP implementation used by the binary.

mod error;
mod openai;

use async_trait::async_trait;

use crate::job::{ChatMessage, Credential, Job};

pub use error::ProviderError;
pub use openai::{OpenAiClient, DEFAULT_BASE_URL, DEFAULT_MODEL};

/// One completion call, borrowed from the job being dispatched.
#[derive(Debug, Clone, Copy)]
pub struct CompletionRequest<'a> {
    pub credential: &'a Credential,
    pub messages: [ChatMessage<'a>; 2],
    pub temperature: f32,
    pub max_tokens: u32,
}

impl<'a> CompletionRequest<'a> {
    pub fn from_job(job: &'a Job) -> Self {
        let payload = job.payload();
        Self {
            credential: &payload.credential,
            messages: job.messages(),
            temperature: payload.temperature,
            max_tokens: payload.max_cost,
        }
    }
}

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Perform one completion and return the generated text.
    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, ProviderError>;

    /// No-cost connectivity and credential check.
    async fn check(&self, _credential: &Credential) -> Result<(), ProviderError> {
        Ok(())
    }
}
