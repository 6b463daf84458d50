//! `check` subcommand: verify provider connectivity and credential.

use std::time::Duration;

use crate::config::EnvConfig;
use crate::job::Credential;
use crate::provider::{CompletionProvider, OpenAiClient};

/// Credential used by `check`, from `DISPATCH_API_KEY` or `OPENAI_API_KEY`.
pub fn credential_from_env() -> Option<Credential> {
    ["DISPATCH_API_KEY", "OPENAI_API_KEY"]
        .iter()
        .filter_map(|key| std::env::var(key).ok())
        .find(|value| !value.trim().is_empty())
        .map(Credential::new)
}

/// Run a no-cost call against `provider`.
///
/// Returns exit code: 0 on success, 1 on a rejected credential, 3 on any
/// other failure.
pub async fn run_check_with(provider: &dyn CompletionProvider, credential: &Credential) -> i32 {
    match provider.check(credential).await {
        Ok(()) => {
            println!("Provider reachable; credential {} accepted.", credential.fingerprint());
            0
        }
        Err(e) if e.failure_kind() == crate::transport::FailureKind::Unauthorized => {
            eprintln!("Credential {} rejected: {e}", credential.fingerprint());
            1
        }
        Err(e) => {
            eprintln!("Provider check failed: {e}");
            3
        }
    }
}

/// `check` against the configured OpenAI-compatible endpoint.
pub async fn run_check(config: &EnvConfig) -> i32 {
    let Some(credential) = credential_from_env() else {
        eprintln!("No credential: set DISPATCH_API_KEY or OPENAI_API_KEY.");
        return 2;
    };
    let client = match OpenAiClient::new(&config.provider_url, &config.model, Duration::from_secs(10)) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("Cannot build HTTP client: {e}");
            return 3;
        }
    };
    run_check_with(&client, &credential).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{CompletionRequest, ProviderError};
    use async_trait::async_trait;

    struct Fixed(Option<u16>);

    #[async_trait]
    impl CompletionProvider for Fixed {
        async fn complete(&self, _: &CompletionRequest<'_>) -> Result<String, ProviderError> {
            Ok(String::new())
        }

        async fn check(&self, _: &Credential) -> Result<(), ProviderError> {
            match self.0 {
                None => Ok(()),
                Some(401) => Err(ProviderError::Unauthorized { status: 401 }),
                Some(status) => Err(ProviderError::Api { status, message: "down".into() }),
            }
        }
    }

    #[tokio::test]
    async fn exit_codes_follow_outcome() {
        let cred = Credential::new("sk-test");
        assert_eq!(run_check_with(&Fixed(None), &cred).await, 0);
        assert_eq!(run_check_with(&Fixed(Some(401)), &cred).await, 1);
        assert_eq!(run_check_with(&Fixed(Some(503)), &cred).await, 3);
    }
}
