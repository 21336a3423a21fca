use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use attn_harness::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError};
use attn_session::{ClassifyError, TranscriptClassifier};
use tracing::warn;

use crate::error::ClassifierError;
use crate::provider::{LlmConfig, LlmMessage, LlmProvider};

const SYSTEM_PROMPT: &str = "You are a state classifier for an AI coding agent's transcript turn. \
Read the assistant's latest turn and reply with exactly one word, no punctuation: \
`working` if the agent is still mid-task, `waiting_input` if it has finished and is waiting \
for the user, `pending_approval` if it is blocked on the user approving a tool call, or \
`idle` if nothing is happening. Reply with exactly one of those four words.";

/// Adapts an [`LlmProvider`] into the session core's narrow
/// `TranscriptClassifier` port, wrapping every call in a circuit
/// breaker so a failing oracle degrades to fail-fast instead of
/// piling up in-flight requests.
pub struct AnthropicClassifier {
    provider: Arc<dyn LlmProvider>,
    config: LlmConfig,
    breaker: CircuitBreaker,
    call_timeout: Duration,
}

impl AnthropicClassifier {
    pub fn new(provider: Arc<dyn LlmProvider>, config: LlmConfig, call_timeout: Duration) -> Self {
        Self {
            provider,
            config,
            breaker: CircuitBreaker::new(CircuitBreakerConfig { call_timeout, ..CircuitBreakerConfig::default() }),
            call_timeout,
        }
    }
}

#[async_trait]
impl TranscriptClassifier for AnthropicClassifier {
    async fn classify(&self, text: &str) -> std::result::Result<String, ClassifyError> {
        let messages = vec![LlmMessage::system(SYSTEM_PROMPT), LlmMessage::user(text)];
        let provider = self.provider.clone();
        let config = self.config.clone();
        let timeout = self.call_timeout;

        let result = self
            .breaker
            .call(|| async move {
                match tokio::time::timeout(timeout, provider.complete(&messages, &config)).await {
                    Ok(inner) => inner,
                    Err(_) => Err(ClassifierError::Timeout),
                }
            })
            .await;

        match result {
            Ok(label) => Ok(normalize_label(&label)),
            Err(CircuitBreakerError::Open) => Err(ClassifyError::Other("circuit open".to_string())),
            Err(CircuitBreakerError::Timeout(_)) => Err(ClassifyError::Other("oracle call timed out".to_string())),
            Err(CircuitBreakerError::Inner(ClassifierError::RateLimited { retry_after_secs })) => {
                Err(ClassifyError::RateLimited { retry_after_secs })
            }
            Err(CircuitBreakerError::Inner(e)) => {
                warn!(error = %e, "classifier oracle call failed");
                Err(ClassifyError::Other(e.to_string()))
            }
        }
    }
}

/// The oracle is asked for exactly one word but free-text models
/// occasionally wrap it in punctuation or a sentence; take the first
/// recognized label token rather than failing the whole turn.
fn normalize_label(raw: &str) -> String {
    let lowered = raw.to_lowercase();
    for candidate in ["waiting_input", "pending_approval", "working", "idle", "launching", "unknown"] {
        if lowered.contains(candidate) {
            return candidate.to_string();
        }
    }
    "unknown".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct StubProvider {
        reply: String,
        calls: AtomicU32,
    }

    #[async_trait]
    impl LlmProvider for StubProvider {
        async fn complete(&self, _messages: &[LlmMessage], _config: &LlmConfig) -> crate::error::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.reply.clone())
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl LlmProvider for FailingProvider {
        async fn complete(&self, _messages: &[LlmMessage], _config: &LlmConfig) -> crate::error::Result<String> {
            Err(ClassifierError::RateLimited { retry_after_secs: Some(5) })
        }
    }

    #[tokio::test]
    async fn classifies_exact_label() {
        let provider = Arc::new(StubProvider { reply: "waiting_input".to_string(), calls: AtomicU32::new(0) });
        let classifier = AnthropicClassifier::new(provider, LlmConfig::default(), Duration::from_secs(5));
        let label = classifier.classify("the assistant said it is done").await.unwrap();
        assert_eq!(label, "waiting_input");
    }

    #[tokio::test]
    async fn normalizes_noisy_reply() {
        let provider = Arc::new(StubProvider { reply: "I'd say `working`.".to_string(), calls: AtomicU32::new(0) });
        let classifier = AnthropicClassifier::new(provider, LlmConfig::default(), Duration::from_secs(5));
        let label = classifier.classify("still going").await.unwrap();
        assert_eq!(label, "working");
    }

    #[tokio::test]
    async fn maps_rate_limit_error() {
        let classifier = AnthropicClassifier::new(Arc::new(FailingProvider), LlmConfig::default(), Duration::from_secs(5));
        let err = classifier.classify("text").await.unwrap_err();
        assert!(matches!(err, ClassifyError::RateLimited { retry_after_secs: Some(5) }));
    }
}
